//! Variable pool entity models and DTOs.

use datalabel_core::error::CoreError;
use datalabel_core::sampling::{PoolSource, SamplingMode};
use datalabel_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A pool row from the `variable_pools` table. Immutable after creation.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct VariablePool {
    pub id: DbId,
    pub name: String,
    pub mode: String,
    pub items: Vec<String>,
    pub created_at: Timestamp,
}

impl VariablePool {
    pub fn sampling_mode(&self) -> Result<SamplingMode, CoreError> {
        self.mode.parse()
    }

    /// The pool as a sampler input.
    pub fn to_source(&self) -> Result<PoolSource, CoreError> {
        Ok(PoolSource {
            id: self.id,
            name: self.name.clone(),
            mode: self.sampling_mode()?,
            items: self.items.clone(),
        })
    }
}

/// DTO for creating a pool (`{name, mode, items[]}`). `mode` is checked
/// against [`SamplingMode`] by the handler.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateVariablePool {
    pub name: String,
    pub mode: String,
    pub items: Vec<String>,
}
