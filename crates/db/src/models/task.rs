//! Task entity models and DTOs.

use datalabel_core::sampling::SamplerCursor;
use datalabel_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::status::{StatusId, TaskStatus};

// ---------------------------------------------------------------------------
// Entity structs (match database tables)
// ---------------------------------------------------------------------------

/// A task row from the `tasks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Task {
    pub id: DbId,
    pub workflow_id: DbId,
    pub variable_pool_ids: Vec<DbId>,
    pub target_prompts: i32,
    pub seeds_per_prompt: i32,
    pub status_id: StatusId,
    pub rng_seed: i64,
    /// Consumed draws per pool id, `{"<pool_id>": count}`.
    pub sampler_cursor: serde_json::Value,
    /// Sequence number the next batch will receive.
    pub next_sequence: i64,
    pub prompts_drawn: i32,
    pub batches_produced: i32,
    pub units_failed: i32,
    /// Prompts the pools could not supply; set when the task completes.
    pub shortfall: Option<i32>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl Task {
    /// Decoded status; unknown IDs read as `Failed`.
    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_id(self.status_id).unwrap_or(TaskStatus::Failed)
    }

    /// Parse the persisted sampler cursor. Malformed entries are ignored,
    /// which resumes the affected pool from draw 0.
    pub fn cursor(&self) -> SamplerCursor {
        self.sampler_cursor
            .as_object()
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| Some((k.parse().ok()?, v.as_u64()?)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Encode a sampler cursor for the `sampler_cursor` JSONB column.
pub fn cursor_to_json(cursor: &SamplerCursor) -> serde_json::Value {
    serde_json::Value::Object(
        cursor
            .iter()
            .map(|(id, n)| (id.to_string(), serde_json::Value::from(*n)))
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// Create DTOs
// ---------------------------------------------------------------------------

/// Request body for `POST /tasks`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTask {
    pub workflow_id: DbId,
    pub variable_pool_ids: Vec<DbId>,
    pub target_prompts: i32,
    pub seeds_per_prompt: i32,
}

/// Validated task insert with its RNG seed.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub workflow_id: DbId,
    pub variable_pool_ids: Vec<DbId>,
    pub target_prompts: i32,
    pub seeds_per_prompt: i32,
    pub rng_seed: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_json_round_trip() {
        let mut cursor = SamplerCursor::new();
        cursor.insert(4, 2);
        cursor.insert(9, 2);
        let json = cursor_to_json(&cursor);
        assert_eq!(json, serde_json::json!({"4": 2, "9": 2}));

        let task = Task {
            id: 1,
            workflow_id: 1,
            variable_pool_ids: vec![4, 9],
            target_prompts: 3,
            seeds_per_prompt: 1,
            status_id: TaskStatus::Generating.id(),
            rng_seed: 0,
            sampler_cursor: json,
            next_sequence: 0,
            prompts_drawn: 2,
            batches_produced: 0,
            units_failed: 0,
            shortfall: None,
            error_message: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            completed_at: None,
        };
        assert_eq!(task.cursor(), cursor);
    }
}
