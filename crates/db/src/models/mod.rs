//! Domain model structs and DTOs.
//!
//! Each submodule contains:
//! - A `FromRow` + `Serialize` entity struct matching the database row
//! - A `Deserialize` create DTO for inserts
//! - A `Deserialize` update DTO (all `Option` fields) for patches, where the
//!   entity is mutable

pub mod annotation;
pub mod batch;
pub mod render_unit;
pub mod status;
pub mod task;
pub mod variable_pool;
pub mod worker;
pub mod workflow;
