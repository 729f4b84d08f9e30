//! Render unit models: one drawn prompt with its seed list.

use datalabel_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use crate::models::status::{RenderUnitStatus, StatusId};

/// A row from the `render_units` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RenderUnit {
    pub id: DbId,
    pub task_id: DbId,
    pub draw_index: i64,
    pub prompt_text: String,
    /// Slot name -> item for this draw.
    pub combination: serde_json::Value,
    pub seeds: Vec<i64>,
    pub status_id: StatusId,
    pub attempts: i32,
    pub worker_id: Option<DbId>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl RenderUnit {
    pub fn status(&self) -> RenderUnitStatus {
        RenderUnitStatus::from_id(self.status_id).unwrap_or(RenderUnitStatus::Failed)
    }
}

/// Insert DTO for a freshly drawn unit.
#[derive(Debug, Clone)]
pub struct NewRenderUnit {
    pub task_id: DbId,
    pub draw_index: i64,
    pub prompt_text: String,
    pub combination: serde_json::Value,
    pub seeds: Vec<i64>,
}
