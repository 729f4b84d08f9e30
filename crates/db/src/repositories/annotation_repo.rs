//! Repository for the `annotations` table.

use datalabel_core::types::DbId;
use sqlx::PgPool;

use crate::models::annotation::{Annotation, CreateAnnotation, ExportRow};
use crate::models::status::AnnotationStatus;

/// Column list for `annotations` queries.
const COLUMNS: &str = "\
    id, task_id, batch_id, chosen_index, rejected_index, spam, user_id, created_at";

/// Provides annotation persistence.
pub struct AnnotationRepo;

impl AnnotationRepo {
    /// Flip the batch to ANNOTATED and store the annotation, atomically.
    ///
    /// The flip is a compare-and-set on `annotation_status_id`; when another
    /// submission already won, nothing is written and `None` is returned.
    /// Indices must already be validated and normalised.
    pub async fn record(
        pool: &PgPool,
        input: &CreateAnnotation,
    ) -> Result<Option<Annotation>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let flipped = sqlx::query(
            "UPDATE batches SET annotation_status_id = $3
             WHERE id = $1 AND task_id = $2 AND annotation_status_id = $4",
        )
        .bind(input.batch_id)
        .bind(input.task_id)
        .bind(AnnotationStatus::Annotated.id())
        .bind(AnnotationStatus::Unannotated.id())
        .execute(&mut *tx)
        .await?;

        if flipped.rows_affected() == 0 {
            return Ok(None);
        }

        let query = format!(
            "INSERT INTO annotations (task_id, batch_id, chosen_index, rejected_index, spam, user_id)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {COLUMNS}"
        );
        let annotation = sqlx::query_as::<_, Annotation>(&query)
            .bind(input.task_id)
            .bind(input.batch_id)
            .bind(input.chosen_index)
            .bind(input.rejected_index)
            .bind(input.spam)
            .bind(&input.user_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(annotation))
    }

    pub async fn list_by_task(pool: &PgPool, task_id: DbId) -> Result<Vec<Annotation>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM annotations WHERE task_id = $1 ORDER BY id ASC");
        sqlx::query_as::<_, Annotation>(&query)
            .bind(task_id)
            .fetch_all(pool)
            .await
    }

    /// Annotated batches of a task joined with their annotation, in
    /// sequence order.
    pub async fn export_rows(pool: &PgPool, task_id: DbId) -> Result<Vec<ExportRow>, sqlx::Error> {
        sqlx::query_as::<_, ExportRow>(
            "SELECT b.id AS batch_id, b.sequence_number, b.prompt_text, b.seeds, b.thumbnails,
                    a.chosen_index, a.rejected_index, a.spam, a.created_at AS annotated_at
             FROM batches b
             JOIN annotations a ON a.batch_id = b.id
             WHERE b.task_id = $1
             ORDER BY b.sequence_number ASC",
        )
        .bind(task_id)
        .fetch_all(pool)
        .await
    }
}
