//! Annotation models and DTOs.

use datalabel_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `annotations` table. At most one per batch.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Annotation {
    pub id: DbId,
    pub task_id: DbId,
    pub batch_id: DbId,
    pub chosen_index: Option<i32>,
    pub rejected_index: Option<i32>,
    pub spam: bool,
    pub user_id: Option<String>,
    pub created_at: Timestamp,
}

/// Request body for `POST /annotations`. `-1` or `null` means no index.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAnnotation {
    pub task_id: DbId,
    pub batch_id: DbId,
    pub chosen_index: Option<i32>,
    pub rejected_index: Option<i32>,
    #[serde(default)]
    pub spam: bool,
    pub user_id: Option<String>,
}

/// Batch joined with its annotation, used by the DPO export.
#[derive(Debug, Clone, FromRow)]
pub struct ExportRow {
    pub batch_id: DbId,
    pub sequence_number: i64,
    pub prompt_text: String,
    pub seeds: Vec<i64>,
    pub thumbnails: Vec<String>,
    pub chosen_index: Option<i32>,
    pub rejected_index: Option<i32>,
    pub spam: bool,
    pub annotated_at: Timestamp,
}
