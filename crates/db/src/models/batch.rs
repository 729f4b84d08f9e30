//! Batch models: a rendered unit offered to annotators.

use datalabel_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use crate::models::status::{AnnotationStatus, StatusId};

/// A row from the `batches` table. `seeds[i]` rendered `thumbnails[i]`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Batch {
    pub id: DbId,
    pub task_id: DbId,
    pub render_unit_id: DbId,
    pub sequence_number: i64,
    pub prompt_text: String,
    pub seeds: Vec<i64>,
    pub thumbnails: Vec<String>,
    pub worker_id: Option<DbId>,
    pub annotation_status_id: StatusId,
    pub created_at: Timestamp,
}

impl Batch {
    pub fn annotation_status(&self) -> AnnotationStatus {
        AnnotationStatus::from_id(self.annotation_status_id).unwrap_or(AnnotationStatus::Annotated)
    }
}

/// Insert DTO for a successful render. The sequence number is assigned by
/// the store.
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub task_id: DbId,
    pub render_unit_id: DbId,
    pub prompt_text: String,
    pub seeds: Vec<i64>,
    pub thumbnails: Vec<String>,
    pub worker_id: Option<DbId>,
}
