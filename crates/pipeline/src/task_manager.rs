//! Task lifecycle: creation, the generation drive loop, cancellation,
//! resume after restart, and the annotation feed.
//!
//! A task is driven by one Tokio task. It first re-dispatches render units
//! left open by a previous run, then draws from the sampler until
//! `target_prompts` prompts are drawn or a pool runs dry. Each draw is
//! persisted as a render unit together with the sampler cursor before it is
//! dispatched, so a restart resumes exactly where the last run stopped.
//! Dispatches run concurrently, bounded by a per-task semaphore.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use datalabel_core::error::CoreError;
use datalabel_core::sampling::{derive_seeds, random_rng_seed, PoolSource, Sampler};
use datalabel_core::task::{
    clamp_batch_page, settle, validate_pool_binding, validate_task_params, TaskOutcome,
    MAX_POOLS_PER_TASK,
};
use datalabel_core::types::DbId;
use datalabel_core::workflow;
use datalabel_db::models::batch::Batch;
use datalabel_db::models::render_unit::{NewRenderUnit, RenderUnit};
use datalabel_db::models::status::TaskStatus;
use datalabel_db::models::task::{cursor_to_json, CreateTask, NewTask, Task};
use datalabel_db::models::workflow::Workflow;
use datalabel_db::store::Store;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::PipelineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{PipelineError, PipelineResult};

/// Error message recorded on cancelled tasks.
pub const CANCELLED_MESSAGE: &str = "Cancelled by operator";

pub struct TaskManager {
    store: Arc<dyn Store>,
    dispatcher: Arc<Dispatcher>,
    max_in_flight_per_task: usize,
    /// Cancellation handle of every task currently being driven.
    running: Mutex<HashMap<DbId, CancellationToken>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl TaskManager {
    pub fn new(store: Arc<dyn Store>, dispatcher: Arc<Dispatcher>, config: &PipelineConfig) -> Self {
        Self {
            store,
            dispatcher,
            max_in_flight_per_task: config.max_in_flight_per_task,
            running: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    // -- creation -------------------------------------------------------------

    /// Validate references and parameters, create the task, move it to
    /// GENERATING and start driving it in the background.
    pub async fn create_task(self: &Arc<Self>, input: CreateTask) -> PipelineResult<Task> {
        let workflow = self
            .load_workflow(input.workflow_id)
            .await
            .map_err(missing_reference)?;
        let sources = self
            .load_sources(&input.variable_pool_ids)
            .await
            .map_err(missing_reference)?;

        validate_task_params(
            input.target_prompts,
            input.seeds_per_prompt,
            workflow.max_batch_size,
        )?;
        let names: Vec<&str> = sources.iter().map(|s| s.name.as_str()).collect();
        validate_pool_binding(&workflow.slots, &names)?;

        let rng_seed = random_rng_seed();
        Sampler::new(sources, rng_seed as u64)?;

        let task = self
            .store
            .insert_task(&NewTask {
                workflow_id: input.workflow_id,
                variable_pool_ids: input.variable_pool_ids,
                target_prompts: input.target_prompts,
                seeds_per_prompt: input.seeds_per_prompt,
                rng_seed,
            })
            .await?;

        let task = self
            .store
            .transition_task(task.id, &[TaskStatus::Pending], TaskStatus::Generating)
            .await?
            .ok_or_else(|| CoreError::Internal(format!("task {} left PENDING", task.id)))?;

        tracing::info!(
            task_id = task.id,
            workflow_id = task.workflow_id,
            target_prompts = task.target_prompts,
            seeds_per_prompt = task.seeds_per_prompt,
            "Task created",
        );

        self.spawn_drive(task.clone()).await;
        Ok(task)
    }

    /// Resume every task a previous process left PENDING or GENERATING.
    pub async fn resume_all(self: &Arc<Self>) -> PipelineResult<usize> {
        let mut tasks = self.store.list_tasks_by_status(TaskStatus::Generating).await?;
        for pending in self.store.list_tasks_by_status(TaskStatus::Pending).await? {
            if let Some(task) = self
                .store
                .transition_task(pending.id, &[TaskStatus::Pending], TaskStatus::Generating)
                .await?
            {
                tasks.push(task);
            }
        }

        let count = tasks.len();
        for task in tasks {
            tracing::info!(
                task_id = task.id,
                prompts_drawn = task.prompts_drawn,
                "Resuming task",
            );
            self.spawn_drive(task).await;
        }
        Ok(count)
    }

    // -- queries --------------------------------------------------------------

    pub async fn get(&self, id: DbId) -> PipelineResult<Task> {
        Ok(self
            .store
            .find_task(id)
            .await?
            .ok_or(CoreError::NotFound { entity: "task", id })?)
    }

    pub async fn list(&self) -> PipelineResult<Vec<Task>> {
        Ok(self.store.list_tasks().await?)
    }

    /// Up to `limit` unannotated batches with `sequence_number >= cursor`,
    /// ascending. Empty when nothing is ready yet; never blocks.
    pub async fn next_batches(
        &self,
        task_id: DbId,
        limit: Option<i64>,
        cursor: Option<i64>,
    ) -> PipelineResult<Vec<Batch>> {
        self.get(task_id).await?;
        let limit = clamp_batch_page(limit);
        let cursor = cursor.unwrap_or(0).max(0);
        Ok(self.store.next_batches(task_id, cursor, limit).await?)
    }

    // -- cancellation ---------------------------------------------------------

    /// Move the task to FAILED. Units still rendering finish, but their
    /// batches are discarded.
    pub async fn cancel(&self, id: DbId) -> PipelineResult<Task> {
        let task = self.get(id).await?;
        if task.status().is_terminal() {
            return Err(CoreError::Conflict(format!(
                "Task {id} is already {}",
                task.status().label()
            ))
            .into());
        }

        let task = self
            .store
            .finish_task(id, TaskStatus::Failed, None, Some(CANCELLED_MESSAGE))
            .await?
            .ok_or_else(|| CoreError::Conflict(format!("Task {id} already finished")))?;

        if let Some(token) = self.running.lock().await.get(&id) {
            token.cancel();
        }
        tracing::info!(task_id = id, "Task cancelled");
        Ok(task)
    }

    /// Stop drawing for every task and wait for in-flight renders to settle.
    /// Tasks stay GENERATING and are resumed on the next start.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    // -- driving --------------------------------------------------------------

    async fn spawn_drive(self: &Arc<Self>, task: Task) {
        let token = self.shutdown.child_token();
        self.running.lock().await.insert(task.id, token.clone());

        let manager = Arc::clone(self);
        self.tracker.spawn(async move {
            let task_id = task.id;
            if let Err(e) = manager.drive(task, &token).await {
                tracing::error!(task_id, error = %e, "Task generation failed");
                if let Err(e) = manager
                    .store
                    .finish_task(task_id, TaskStatus::Failed, None, Some(&e.to_string()))
                    .await
                {
                    tracing::error!(task_id, error = %e, "Failed to record task failure");
                }
            }
            manager.running.lock().await.remove(&task_id);
        });
    }

    async fn drive(&self, task: Task, token: &CancellationToken) -> PipelineResult<()> {
        let workflow = self.load_workflow(task.workflow_id).await?;
        let document = Arc::new(workflow.document);
        let sources = self.load_sources(&task.variable_pool_ids).await?;
        let rng_seed = task.rng_seed as u64;
        let mut sampler = Sampler::resume(sources, rng_seed, &task.cursor())?;

        let permits = Arc::new(Semaphore::new(self.max_in_flight_per_task));
        let mut units = JoinSet::new();

        for unit in self.store.list_open_units(task.id).await? {
            let Some(permit) = acquire(&permits, token).await else {
                break;
            };
            self.spawn_unit(&mut units, permit, unit, &document, token);
        }

        let mut drawn = task.prompts_drawn;
        while drawn < task.target_prompts {
            let Some(permit) = acquire(&permits, token).await else {
                break;
            };
            let Some(draw) = sampler.next_draw() else {
                tracing::info!(
                    task_id = task.id,
                    drawn,
                    position = sampler.position(),
                    "Variable pool exhausted",
                );
                break;
            };

            let unit = NewRenderUnit {
                task_id: task.id,
                draw_index: draw.index as i64,
                prompt_text: workflow::prompt_text(&document, &draw.combination)?,
                combination: serde_json::to_value(&draw.combination)
                    .map_err(|e| CoreError::Internal(e.to_string()))?,
                seeds: derive_seeds(rng_seed, draw.index, task.seeds_per_prompt as usize),
            };
            let cursor = cursor_to_json(&sampler.cursor());
            let Some(unit) = self.store.insert_unit(&unit, &cursor).await? else {
                break;
            };
            drawn += 1;
            self.spawn_unit(&mut units, permit, unit, &document, token);

            while let Some(result) = units.try_join_next() {
                log_unit_result(task.id, result);
            }
        }

        while let Some(result) = units.join_next().await {
            log_unit_result(task.id, result);
        }

        if token.is_cancelled() {
            return Ok(());
        }
        self.finish(task.id).await
    }

    fn spawn_unit(
        &self,
        units: &mut JoinSet<PipelineResult<Option<Batch>>>,
        permit: OwnedSemaphorePermit,
        unit: RenderUnit,
        document: &Arc<serde_json::Value>,
        token: &CancellationToken,
    ) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let document = Arc::clone(document);
        let token = token.clone();
        units.spawn(async move {
            let _permit = permit;
            dispatcher.dispatch(&unit, &document, &token).await
        });
    }

    /// Close out a task whose sampler and dispatches have finished.
    async fn finish(&self, task_id: DbId) -> PipelineResult<()> {
        let task = self.get(task_id).await?;
        if task.status() != TaskStatus::Generating {
            return Ok(());
        }

        let (status, shortfall, error) = match settle(
            task.target_prompts,
            task.prompts_drawn,
            task.batches_produced,
            task.units_failed,
        ) {
            TaskOutcome::Complete { shortfall } => (TaskStatus::Complete, Some(shortfall), None),
            TaskOutcome::Failed => (
                TaskStatus::Failed,
                None,
                Some("Every render unit failed"),
            ),
        };

        self.store
            .finish_task(task_id, status, shortfall, error)
            .await?;
        tracing::info!(
            task_id,
            status = status.label(),
            batches = task.batches_produced,
            failed_units = task.units_failed,
            shortfall,
            "Task finished",
        );
        Ok(())
    }

    // -- loading --------------------------------------------------------------

    async fn load_workflow(&self, id: DbId) -> PipelineResult<Workflow> {
        Ok(self.store.find_workflow(id).await?.ok_or(CoreError::NotFound {
            entity: "workflow",
            id,
        })?)
    }

    /// Pool sources in the order the task lists them.
    async fn load_sources(&self, ids: &[DbId]) -> PipelineResult<Vec<PoolSource>> {
        if ids.is_empty() {
            return Err(CoreError::Validation(
                "At least one variable pool is required".to_string(),
            )
            .into());
        }
        if ids.len() > MAX_POOLS_PER_TASK {
            return Err(CoreError::Validation(format!(
                "A task may combine at most {MAX_POOLS_PER_TASK} variable pools"
            ))
            .into());
        }
        let mut seen = HashSet::with_capacity(ids.len());
        if let Some(dup) = ids.iter().find(|id| !seen.insert(**id)) {
            return Err(CoreError::Validation(format!(
                "Variable pool {dup} is listed more than once"
            ))
            .into());
        }

        let mut pools: HashMap<DbId, _> = self
            .store
            .find_pools(ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        ids.iter()
            .map(|&id| -> PipelineResult<PoolSource> {
                let pool = pools.remove(&id).ok_or(CoreError::NotFound {
                    entity: "variable_pool",
                    id,
                })?;
                Ok(pool.to_source()?)
            })
            .collect()
    }
}

async fn acquire(
    permits: &Arc<Semaphore>,
    token: &CancellationToken,
) -> Option<OwnedSemaphorePermit> {
    tokio::select! {
        _ = token.cancelled() => None,
        permit = Arc::clone(permits).acquire_owned() => permit.ok(),
    }
}

/// A task that names an unknown workflow or pool is an invalid request,
/// not a lookup of a missing resource.
fn missing_reference(err: PipelineError) -> PipelineError {
    match err {
        PipelineError::Core(CoreError::NotFound { entity, id }) => {
            CoreError::Validation(format!("{entity}_id {id} does not exist")).into()
        }
        other => other,
    }
}

fn log_unit_result(
    task_id: DbId,
    result: Result<PipelineResult<Option<Batch>>, tokio::task::JoinError>,
) {
    match result {
        Ok(Ok(_)) => {}
        Ok(Err(PipelineError::DispatchFailed { unit_id, .. })) => {
            tracing::debug!(task_id, unit_id, "Continuing after failed render unit");
        }
        Ok(Err(e)) => tracing::error!(task_id, error = %e, "Render unit error"),
        Err(e) => tracing::error!(task_id, error = %e, "Render unit task panicked"),
    }
}
