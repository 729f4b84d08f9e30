//! Workflow entity models and DTOs.

use datalabel_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A workflow row from the `workflows` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Workflow {
    pub id: DbId,
    pub name: String,
    pub version: String,
    pub max_batch_size: i32,
    /// The node graph as uploaded (possibly wrapped under `"prompt"`).
    #[serde(skip_serializing)]
    pub document: serde_json::Value,
    /// `{slot}` names discovered in the prompt nodes.
    pub slots: Vec<String>,
    pub created_at: Timestamp,
}

/// DTO for inserting a validated workflow. Built from the multipart upload.
#[derive(Debug, Clone)]
pub struct CreateWorkflow {
    pub name: String,
    pub version: String,
    pub max_batch_size: i32,
    pub document: serde_json::Value,
    pub slots: Vec<String>,
}
