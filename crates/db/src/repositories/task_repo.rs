//! Repository for the `tasks` table.

use datalabel_core::types::DbId;
use sqlx::PgPool;

use crate::models::status::{StatusId, TaskStatus};
use crate::models::task::{NewTask, Task};

/// Column list for `tasks` queries.
const COLUMNS: &str = "\
    id, workflow_id, variable_pool_ids, target_prompts, seeds_per_prompt, \
    status_id, rng_seed, sampler_cursor, next_sequence, prompts_drawn, \
    batches_produced, units_failed, shortfall, error_message, \
    created_at, updated_at, completed_at";

/// Provides task lifecycle persistence.
pub struct TaskRepo;

impl TaskRepo {
    /// Insert a task in PENDING with an empty sampler cursor.
    pub async fn create(pool: &PgPool, input: &NewTask) -> Result<Task, sqlx::Error> {
        let query = format!(
            "INSERT INTO tasks (workflow_id, variable_pool_ids, target_prompts, \
                seeds_per_prompt, rng_seed, status_id)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(input.workflow_id)
            .bind(&input.variable_pool_ids)
            .bind(input.target_prompts)
            .bind(input.seeds_per_prompt)
            .bind(input.rng_seed)
            .bind(TaskStatus::Pending.id())
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Task>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = $1");
        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List tasks, newest first.
    pub async fn list(pool: &PgPool) -> Result<Vec<Task>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks ORDER BY id DESC");
        sqlx::query_as::<_, Task>(&query).fetch_all(pool).await
    }

    pub async fn list_by_status(
        pool: &PgPool,
        status: TaskStatus,
    ) -> Result<Vec<Task>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE status_id = $1 ORDER BY id ASC");
        sqlx::query_as::<_, Task>(&query)
            .bind(status.id())
            .fetch_all(pool)
            .await
    }

    /// Compare-and-set status change. Returns `None` when the task is not
    /// currently in one of `from`.
    pub async fn transition(
        pool: &PgPool,
        id: DbId,
        from: &[TaskStatus],
        to: TaskStatus,
    ) -> Result<Option<Task>, sqlx::Error> {
        let from_ids: Vec<StatusId> = from.iter().map(|s| s.id()).collect();
        let query = format!(
            "UPDATE tasks SET status_id = $2, updated_at = NOW()
             WHERE id = $1 AND status_id = ANY($3)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .bind(to.id())
            .bind(&from_ids)
            .fetch_optional(pool)
            .await
    }

    /// Move a non-terminal task into a terminal status.
    ///
    /// Returns `None` if the task had already finished (e.g. it was
    /// cancelled while its last units were in flight).
    pub async fn finish(
        pool: &PgPool,
        id: DbId,
        status: TaskStatus,
        shortfall: Option<i32>,
        error: Option<&str>,
    ) -> Result<Option<Task>, sqlx::Error> {
        let query = format!(
            "UPDATE tasks SET
                status_id = $2,
                shortfall = $3,
                error_message = $4,
                completed_at = NOW(),
                updated_at = NOW()
             WHERE id = $1 AND status_id IN ($5, $6)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .bind(status.id())
            .bind(shortfall)
            .bind(error)
            .bind(TaskStatus::Pending.id())
            .bind(TaskStatus::Generating.id())
            .fetch_optional(pool)
            .await
    }
}
