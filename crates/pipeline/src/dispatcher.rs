//! Render unit dispatch with failover across workers.
//!
//! [`Dispatcher::dispatch`] is a bounded loop: pick a worker not tried yet
//! for this unit, render, and on a worker fault mark the worker unhealthy
//! and try the next one. After `retry_budget` distinct workers (or once no
//! untried worker is eligible) the unit is recorded FAILED and
//! [`PipelineError::DispatchFailed`] is returned. The task carries on.
//!
//! When no worker is eligible before the first attempt, generation pauses
//! until a worker recovers rather than failing the unit.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use datalabel_core::error::CoreError;
use datalabel_core::sampling::Combination;
use datalabel_core::types::DbId;
use datalabel_db::models::batch::{Batch, NewBatch};
use datalabel_db::models::render_unit::RenderUnit;
use datalabel_db::store::Store;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::render::{RenderClient, RenderJob};
use crate::worker_pool::WorkerPool;

pub struct Dispatcher {
    store: Arc<dyn Store>,
    workers: Arc<WorkerPool>,
    renderer: Arc<dyn RenderClient>,
    retry_budget: usize,
    no_worker_backoff: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        workers: Arc<WorkerPool>,
        renderer: Arc<dyn RenderClient>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            workers,
            renderer,
            retry_budget: config.retry_budget,
            no_worker_backoff: config.no_worker_backoff,
        }
    }

    /// Render one unit and append its batch.
    ///
    /// Returns `Ok(None)` when the result was discarded because the task
    /// stopped generating, or when `cancel` fired while waiting for a worker
    /// (the unit then stays open for a later resume).
    pub async fn dispatch(
        &self,
        unit: &RenderUnit,
        document: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> PipelineResult<Option<Batch>> {
        let combination: Combination = serde_json::from_value(unit.combination.clone())
            .map_err(|e| CoreError::Internal(format!("corrupt combination: {e}")))?;
        let job = RenderJob {
            unit_id: unit.id,
            prompt_text: unit.prompt_text.clone(),
            combination,
            seeds: unit.seeds.clone(),
        };

        let mut tried = HashSet::new();
        let mut last_error = String::from("no eligible worker");

        while tried.len() < self.retry_budget {
            let lease = match self.workers.pick_excluding(&tried).await {
                Ok(lease) => lease,
                Err(_) => {
                    if !tried.is_empty() && !self.workers.has_candidates(&tried).await {
                        break;
                    }
                    if !self.wait_for_worker(cancel).await {
                        return Ok(None);
                    }
                    continue;
                }
            };

            let worker_id = lease.worker_id();
            tried.insert(worker_id);
            self.store.start_unit_attempt(unit.id, worker_id).await?;
            tracing::debug!(
                unit_id = unit.id,
                task_id = unit.task_id,
                worker_id,
                attempt = tried.len(),
                "Dispatching render unit",
            );

            let result = self.renderer.render(lease.target(), document, &job).await;
            drop(lease);

            let error = match result {
                Ok(output) if output.thumbnails.len() == job.seeds.len() => {
                    self.workers.mark_succeeded(worker_id).await;
                    return self.append(unit, output.thumbnails, worker_id).await;
                }
                Ok(output) => format!(
                    "worker returned {} image(s) for {} seed(s)",
                    output.thumbnails.len(),
                    job.seeds.len()
                ),
                Err(e) if !e.is_worker_fault() => {
                    last_error = e.to_string();
                    break;
                }
                Err(e) => e.to_string(),
            };

            tracing::warn!(
                unit_id = unit.id,
                worker_id,
                error = %error,
                "Render attempt failed",
            );
            self.workers.mark_failed(worker_id, &error).await;
            last_error = error;
        }

        self.store.fail_unit(unit.id, &last_error).await?;
        tracing::error!(
            unit_id = unit.id,
            task_id = unit.task_id,
            attempts = tried.len(),
            error = %last_error,
            "Render unit failed",
        );
        Err(PipelineError::DispatchFailed {
            unit_id: unit.id,
            attempts: tried.len(),
            reason: last_error,
        })
    }

    async fn append(
        &self,
        unit: &RenderUnit,
        thumbnails: Vec<String>,
        worker_id: DbId,
    ) -> PipelineResult<Option<Batch>> {
        let batch = self
            .store
            .append_batch(&NewBatch {
                task_id: unit.task_id,
                render_unit_id: unit.id,
                prompt_text: unit.prompt_text.clone(),
                seeds: unit.seeds.clone(),
                thumbnails,
                worker_id: Some(worker_id),
            })
            .await?;

        match &batch {
            Some(b) => tracing::info!(
                task_id = unit.task_id,
                batch_id = b.id,
                sequence_number = b.sequence_number,
                "Batch ready",
            ),
            None => tracing::info!(
                task_id = unit.task_id,
                unit_id = unit.id,
                "Task no longer generating, render discarded",
            ),
        }
        Ok(batch)
    }

    /// Wait for a health change, a released lease, or the backoff. Returns
    /// `false` if cancelled.
    async fn wait_for_worker(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = self.workers.changed() => true,
            _ = tokio::time::sleep(self.no_worker_backoff) => true,
        }
    }
}
