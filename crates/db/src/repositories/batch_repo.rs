//! Repository for the `batches` table.

use datalabel_core::types::DbId;
use sqlx::PgPool;

use crate::models::batch::{Batch, NewBatch};
use crate::models::status::{AnnotationStatus, RenderUnitStatus, TaskStatus};

/// Column list for `batches` queries.
const COLUMNS: &str = "\
    id, task_id, render_unit_id, sequence_number, prompt_text, seeds, \
    thumbnails, worker_id, annotation_status_id, created_at";

/// Provides batch creation and the annotation feed.
pub struct BatchRepo;

impl BatchRepo {
    /// Append a batch with the task's next sequence number.
    ///
    /// The counter increment and the insert happen in one statement while
    /// holding the task row lock, so concurrent appends serialize and the
    /// number becomes visible together with its batch. Returns `None`
    /// without writing when the task is no longer GENERATING.
    pub async fn append(pool: &PgPool, input: &NewBatch) -> Result<Option<Batch>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "WITH seq AS (
                UPDATE tasks SET
                    next_sequence = next_sequence + 1,
                    batches_produced = batches_produced + 1,
                    updated_at = NOW()
                WHERE id = $1 AND status_id = $7
                RETURNING next_sequence - 1 AS sequence_number
             )
             INSERT INTO batches (task_id, render_unit_id, sequence_number, prompt_text, \
                seeds, thumbnails, worker_id, annotation_status_id)
             SELECT $1, $2, seq.sequence_number, $3, $4, $5, $6, $8 FROM seq
             RETURNING {COLUMNS}"
        );
        let batch = sqlx::query_as::<_, Batch>(&query)
            .bind(input.task_id)
            .bind(input.render_unit_id)
            .bind(&input.prompt_text)
            .bind(&input.seeds)
            .bind(&input.thumbnails)
            .bind(input.worker_id)
            .bind(TaskStatus::Generating.id())
            .bind(AnnotationStatus::Unannotated.id())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(batch) = batch else {
            return Ok(None);
        };

        sqlx::query("UPDATE render_units SET status_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(input.render_unit_id)
            .bind(RenderUnitStatus::Done.id())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(batch))
    }

    /// Up to `limit` UNANNOTATED batches with `sequence_number >= cursor`,
    /// ascending.
    pub async fn next_unannotated(
        pool: &PgPool,
        task_id: DbId,
        cursor: i64,
        limit: i64,
    ) -> Result<Vec<Batch>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM batches
             WHERE task_id = $1 AND annotation_status_id = $2 AND sequence_number >= $3
             ORDER BY sequence_number ASC
             LIMIT $4"
        );
        sqlx::query_as::<_, Batch>(&query)
            .bind(task_id)
            .bind(AnnotationStatus::Unannotated.id())
            .bind(cursor)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Batch>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM batches WHERE id = $1");
        sqlx::query_as::<_, Batch>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// All batches of a task in sequence order.
    pub async fn list_by_task(pool: &PgPool, task_id: DbId) -> Result<Vec<Batch>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM batches WHERE task_id = $1 ORDER BY sequence_number ASC"
        );
        sqlx::query_as::<_, Batch>(&query)
            .bind(task_id)
            .fetch_all(pool)
            .await
    }
}
