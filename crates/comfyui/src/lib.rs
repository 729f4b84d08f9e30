//! ComfyUI REST client library.
//!
//! Provides the HTTP API wrapper used to submit render jobs and probe
//! workers, history parsing for finished prompts, and the polling
//! backoff used while waiting for a prompt to finish.

pub mod api;
pub mod history;
pub mod poll;
