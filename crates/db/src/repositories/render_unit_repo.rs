//! Repository for the `render_units` table.

use datalabel_core::types::DbId;
use sqlx::PgPool;

use crate::models::render_unit::{NewRenderUnit, RenderUnit};
use crate::models::status::{RenderUnitStatus, TaskStatus};

/// Column list for `render_units` queries.
const COLUMNS: &str = "\
    id, task_id, draw_index, prompt_text, combination, seeds, status_id, \
    attempts, worker_id, error_message, created_at, updated_at";

/// Provides persistence for drawn render units.
pub struct RenderUnitRepo;

impl RenderUnitRepo {
    /// Record a drawn unit and the sampler cursor after the draw in one
    /// transaction. Returns `None` (and writes nothing) when the task is no
    /// longer GENERATING.
    pub async fn create_drawn(
        pool: &PgPool,
        input: &NewRenderUnit,
        cursor: &serde_json::Value,
    ) -> Result<Option<RenderUnit>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let advanced = sqlx::query(
            "UPDATE tasks SET
                sampler_cursor = $2,
                prompts_drawn = prompts_drawn + 1,
                updated_at = NOW()
             WHERE id = $1 AND status_id = $3",
        )
        .bind(input.task_id)
        .bind(cursor)
        .bind(TaskStatus::Generating.id())
        .execute(&mut *tx)
        .await?;

        if advanced.rows_affected() == 0 {
            return Ok(None);
        }

        let query = format!(
            "INSERT INTO render_units (task_id, draw_index, prompt_text, combination, seeds, status_id)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {COLUMNS}"
        );
        let unit = sqlx::query_as::<_, RenderUnit>(&query)
            .bind(input.task_id)
            .bind(input.draw_index)
            .bind(&input.prompt_text)
            .bind(&input.combination)
            .bind(&input.seeds)
            .bind(RenderUnitStatus::Pending.id())
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(unit))
    }

    /// Units of a task that have not reached DONE or FAILED, in draw order.
    pub async fn list_open(pool: &PgPool, task_id: DbId) -> Result<Vec<RenderUnit>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM render_units
             WHERE task_id = $1 AND status_id IN ($2, $3)
             ORDER BY draw_index ASC"
        );
        sqlx::query_as::<_, RenderUnit>(&query)
            .bind(task_id)
            .bind(RenderUnitStatus::Pending.id())
            .bind(RenderUnitStatus::Running.id())
            .fetch_all(pool)
            .await
    }

    /// Mark a unit RUNNING on `worker_id` and count the attempt.
    pub async fn start_attempt(
        pool: &PgPool,
        unit_id: DbId,
        worker_id: DbId,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE render_units SET
                status_id = $3,
                attempts = attempts + 1,
                worker_id = $2,
                updated_at = NOW()
             WHERE id = $1",
        )
        .bind(unit_id)
        .bind(worker_id)
        .bind(RenderUnitStatus::Running.id())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Mark a unit FAILED and bump the owning task's failure counter.
    pub async fn fail(pool: &PgPool, unit_id: DbId, error: &str) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;

        let task_id: Option<DbId> = sqlx::query_scalar(
            "UPDATE render_units SET
                status_id = $3,
                error_message = $2,
                updated_at = NOW()
             WHERE id = $1 AND status_id IN ($4, $5)
             RETURNING task_id",
        )
        .bind(unit_id)
        .bind(error)
        .bind(RenderUnitStatus::Failed.id())
        .bind(RenderUnitStatus::Pending.id())
        .bind(RenderUnitStatus::Running.id())
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(task_id) = task_id {
            sqlx::query(
                "UPDATE tasks SET units_failed = units_failed + 1, updated_at = NOW() WHERE id = $1",
            )
            .bind(task_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
