//! Render worker entity models and DTOs.

use datalabel_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::status::{StatusId, WorkerStatus};

// ---------------------------------------------------------------------------
// Entity structs (match database tables)
// ---------------------------------------------------------------------------

/// A worker row from the `workers` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Worker {
    pub id: DbId,
    pub name: String,
    pub base_url: String,
    /// Sent to the worker on every request; never echoed back to clients.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub is_enabled: bool,
    pub status_id: StatusId,
    pub last_checked_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Worker {
    /// Decoded status; unknown IDs read as `Unknown`.
    pub fn status(&self) -> WorkerStatus {
        WorkerStatus::from_id(self.status_id).unwrap_or(WorkerStatus::Unknown)
    }
}

// ---------------------------------------------------------------------------
// Create / Update DTOs
// ---------------------------------------------------------------------------

/// DTO for registering a new worker.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateWorker {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
}

/// DTO for updating an existing worker. All fields are optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateWorker {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(alias = "enabled")]
    pub is_enabled: Option<bool>,
}
