//! Acceptance of annotator decisions and the DPO export built from them.

use std::sync::Arc;

use datalabel_core::annotation::validate_choice;
use datalabel_core::error::CoreError;
use datalabel_core::export::{build_dpo_record, AnnotatedBatch, DpoMetadata, DpoRecord};
use datalabel_core::types::DbId;
use datalabel_db::models::annotation::{Annotation, CreateAnnotation};
use datalabel_db::models::status::AnnotationStatus;
use datalabel_db::models::task::Task;
use datalabel_db::store::Store;

use crate::error::PipelineResult;

pub struct AnnotationStore {
    store: Arc<dyn Store>,
}

impl AnnotationStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Accept the first annotation for a batch.
    ///
    /// The batch must exist and belong to `input.task_id`. A batch that is
    /// already annotated yields [`CoreError::AlreadyAnnotated`], both when
    /// seen up front and when a concurrent submission wins the
    /// compare-and-set.
    pub async fn submit(&self, input: CreateAnnotation) -> PipelineResult<Annotation> {
        let batch = self
            .store
            .find_batch(input.batch_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "batch",
                id: input.batch_id,
            })?;

        if batch.task_id != input.task_id {
            return Err(CoreError::Validation(format!(
                "Batch {} does not belong to task {}",
                batch.id, input.task_id
            ))
            .into());
        }
        if batch.annotation_status() == AnnotationStatus::Annotated {
            return Err(CoreError::AlreadyAnnotated { batch_id: batch.id }.into());
        }

        let choice = validate_choice(
            input.chosen_index,
            input.rejected_index,
            input.spam,
            batch.seeds.len(),
        )?;
        let (chosen_index, rejected_index) = choice.stored_indices();

        let annotation = self
            .store
            .record_annotation(&CreateAnnotation {
                chosen_index,
                rejected_index,
                spam: choice.spam,
                ..input
            })
            .await?
            .ok_or(CoreError::AlreadyAnnotated { batch_id: batch.id })?;

        tracing::info!(
            task_id = annotation.task_id,
            batch_id = annotation.batch_id,
            spam = annotation.spam,
            "Annotation recorded",
        );
        Ok(annotation)
    }

    pub async fn list(&self, task_id: DbId) -> PipelineResult<Vec<Annotation>> {
        Ok(self.store.list_annotations(task_id).await?)
    }

    /// Preference records for every non-spam annotation of `task` that
    /// names a chosen image, in batch order.
    pub async fn export_dpo(&self, task: &Task) -> PipelineResult<Vec<DpoRecord>> {
        let rows = self.store.export_rows(task.id).await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                build_dpo_record(
                    AnnotatedBatch {
                        prompt_text: &row.prompt_text,
                        seeds: &row.seeds,
                        images: &row.thumbnails,
                        chosen_index: row.chosen_index,
                        rejected_index: row.rejected_index,
                        spam: row.spam,
                    },
                    DpoMetadata {
                        task_id: task.id,
                        workflow_id: task.workflow_id,
                        batch_id: row.batch_id,
                        sequence_number: row.sequence_number,
                        annotated_at: row.annotated_at,
                    },
                )
            })
            .collect())
    }
}
