//! Domain logic for the preference-labeling backend.
//!
//! Pure functions, constants and validation with no internal crate
//! dependencies. Everything that touches the network or the database lives
//! in `datalabel-db`, `datalabel-comfyui` or `datalabel-pipeline`.

pub mod annotation;
pub mod error;
pub mod export;
pub mod sampling;
pub mod task;
pub mod types;
pub mod worker_pool;
pub mod workflow;
