use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use datalabel_core::types::DbId;
use tokio::sync::Mutex;

use crate::models::annotation::{Annotation, CreateAnnotation, ExportRow};
use crate::models::batch::{Batch, NewBatch};
use crate::models::render_unit::{NewRenderUnit, RenderUnit};
use crate::models::status::{AnnotationStatus, RenderUnitStatus, TaskStatus, WorkerStatus};
use crate::models::task::{NewTask, Task};
use crate::models::variable_pool::{CreateVariablePool, VariablePool};
use crate::models::worker::{CreateWorker, UpdateWorker, Worker};
use crate::models::workflow::{CreateWorkflow, Workflow};
use crate::store::{Store, StoreError, StoreResult};

#[derive(Default)]
struct State {
    last_id: DbId,
    workers: BTreeMap<DbId, Worker>,
    workflows: BTreeMap<DbId, Workflow>,
    pools: BTreeMap<DbId, VariablePool>,
    tasks: BTreeMap<DbId, Task>,
    units: BTreeMap<DbId, RenderUnit>,
    batches: BTreeMap<DbId, Batch>,
    annotations: BTreeMap<DbId, Annotation>,
}

impl State {
    fn next_id(&mut self) -> DbId {
        self.last_id += 1;
        self.last_id
    }

    fn generating_task(&mut self, id: DbId) -> Option<&mut Task> {
        self.tasks
            .get_mut(&id)
            .filter(|t| t.status_id == TaskStatus::Generating.id())
    }
}

/// In-process [`Store`] with the same atomicity guarantees as the Postgres
/// store: every operation runs under one lock, so each is a single step.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn conflict(what: &str) -> StoreError {
    StoreError::Conflict(format!("Duplicate value violates unique constraint: {what}"))
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    // -- workers --------------------------------------------------------------

    async fn insert_worker(&self, input: &CreateWorker) -> StoreResult<Worker> {
        let mut state = self.state.lock().await;
        if state.workers.values().any(|w| w.name == input.name) {
            return Err(conflict("uq_workers_name"));
        }
        let now = Utc::now();
        let worker = Worker {
            id: state.next_id(),
            name: input.name.clone(),
            base_url: input.base_url.clone(),
            api_key: input.api_key.clone(),
            is_enabled: true,
            status_id: WorkerStatus::Unknown.id(),
            last_checked_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        state.workers.insert(worker.id, worker.clone());
        Ok(worker)
    }

    async fn list_workers(&self) -> StoreResult<Vec<Worker>> {
        Ok(self.state.lock().await.workers.values().cloned().collect())
    }

    async fn find_worker(&self, id: DbId) -> StoreResult<Option<Worker>> {
        Ok(self.state.lock().await.workers.get(&id).cloned())
    }

    async fn update_worker(&self, id: DbId, input: &UpdateWorker) -> StoreResult<Option<Worker>> {
        let mut state = self.state.lock().await;
        let Some(worker) = state.workers.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(base_url) = &input.base_url {
            worker.base_url = base_url.clone();
        }
        if let Some(api_key) = &input.api_key {
            worker.api_key = Some(api_key.clone());
        }
        if let Some(enabled) = input.is_enabled {
            worker.is_enabled = enabled;
        }
        worker.updated_at = Utc::now();
        Ok(Some(worker.clone()))
    }

    async fn record_worker_health(
        &self,
        id: DbId,
        status: WorkerStatus,
        error: Option<&str>,
    ) -> StoreResult<Option<Worker>> {
        let mut state = self.state.lock().await;
        let Some(worker) = state.workers.get_mut(&id) else {
            return Ok(None);
        };
        let now = Utc::now();
        worker.status_id = status.id();
        worker.last_error = error.map(str::to_string);
        worker.last_checked_at = Some(now);
        worker.updated_at = now;
        Ok(Some(worker.clone()))
    }

    // -- workflows ------------------------------------------------------------

    async fn insert_workflow(&self, input: &CreateWorkflow) -> StoreResult<Workflow> {
        let mut state = self.state.lock().await;
        if state
            .workflows
            .values()
            .any(|w| w.name == input.name && w.version == input.version)
        {
            return Err(conflict("uq_workflows_name_version"));
        }
        let workflow = Workflow {
            id: state.next_id(),
            name: input.name.clone(),
            version: input.version.clone(),
            max_batch_size: input.max_batch_size,
            document: input.document.clone(),
            slots: input.slots.clone(),
            created_at: Utc::now(),
        };
        state.workflows.insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    async fn list_workflows(&self) -> StoreResult<Vec<Workflow>> {
        Ok(self.state.lock().await.workflows.values().rev().cloned().collect())
    }

    async fn find_workflow(&self, id: DbId) -> StoreResult<Option<Workflow>> {
        Ok(self.state.lock().await.workflows.get(&id).cloned())
    }

    // -- variable pools -------------------------------------------------------

    async fn insert_pool(&self, input: &CreateVariablePool) -> StoreResult<VariablePool> {
        let mut state = self.state.lock().await;
        if state.pools.values().any(|p| p.name == input.name) {
            return Err(conflict("uq_variable_pools_name"));
        }
        let pool = VariablePool {
            id: state.next_id(),
            name: input.name.clone(),
            mode: input.mode.clone(),
            items: input.items.clone(),
            created_at: Utc::now(),
        };
        state.pools.insert(pool.id, pool.clone());
        Ok(pool)
    }

    async fn list_pools(&self) -> StoreResult<Vec<VariablePool>> {
        let mut pools: Vec<_> = self.state.lock().await.pools.values().cloned().collect();
        pools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(pools)
    }

    async fn find_pool(&self, id: DbId) -> StoreResult<Option<VariablePool>> {
        Ok(self.state.lock().await.pools.get(&id).cloned())
    }

    async fn find_pools(&self, ids: &[DbId]) -> StoreResult<Vec<VariablePool>> {
        let state = self.state.lock().await;
        Ok(state
            .pools
            .values()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect())
    }

    // -- tasks ----------------------------------------------------------------

    async fn insert_task(&self, input: &NewTask) -> StoreResult<Task> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let task = Task {
            id: state.next_id(),
            workflow_id: input.workflow_id,
            variable_pool_ids: input.variable_pool_ids.clone(),
            target_prompts: input.target_prompts,
            seeds_per_prompt: input.seeds_per_prompt,
            status_id: TaskStatus::Pending.id(),
            rng_seed: input.rng_seed,
            sampler_cursor: serde_json::json!({}),
            next_sequence: 0,
            prompts_drawn: 0,
            batches_produced: 0,
            units_failed: 0,
            shortfall: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        state.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn find_task(&self, id: DbId) -> StoreResult<Option<Task>> {
        Ok(self.state.lock().await.tasks.get(&id).cloned())
    }

    async fn list_tasks(&self) -> StoreResult<Vec<Task>> {
        Ok(self.state.lock().await.tasks.values().rev().cloned().collect())
    }

    async fn list_tasks_by_status(&self, status: TaskStatus) -> StoreResult<Vec<Task>> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| t.status_id == status.id())
            .cloned()
            .collect())
    }

    async fn transition_task(
        &self,
        id: DbId,
        from: &[TaskStatus],
        to: TaskStatus,
    ) -> StoreResult<Option<Task>> {
        let mut state = self.state.lock().await;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(None);
        };
        if !from.iter().any(|s| s.id() == task.status_id) {
            return Ok(None);
        }
        task.status_id = to.id();
        task.updated_at = Utc::now();
        Ok(Some(task.clone()))
    }

    async fn finish_task(
        &self,
        id: DbId,
        status: TaskStatus,
        shortfall: Option<i32>,
        error: Option<&str>,
    ) -> StoreResult<Option<Task>> {
        let mut state = self.state.lock().await;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(None);
        };
        if task.status().is_terminal() {
            return Ok(None);
        }
        let now = Utc::now();
        task.status_id = status.id();
        task.shortfall = shortfall;
        task.error_message = error.map(str::to_string);
        task.completed_at = Some(now);
        task.updated_at = now;
        Ok(Some(task.clone()))
    }

    // -- render units ---------------------------------------------------------

    async fn insert_unit(
        &self,
        input: &NewRenderUnit,
        cursor: &serde_json::Value,
    ) -> StoreResult<Option<RenderUnit>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let Some(task) = state.generating_task(input.task_id) else {
            return Ok(None);
        };
        task.sampler_cursor = cursor.clone();
        task.prompts_drawn += 1;
        task.updated_at = now;

        let unit = RenderUnit {
            id: state.next_id(),
            task_id: input.task_id,
            draw_index: input.draw_index,
            prompt_text: input.prompt_text.clone(),
            combination: input.combination.clone(),
            seeds: input.seeds.clone(),
            status_id: RenderUnitStatus::Pending.id(),
            attempts: 0,
            worker_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        state.units.insert(unit.id, unit.clone());
        Ok(Some(unit))
    }

    async fn list_open_units(&self, task_id: DbId) -> StoreResult<Vec<RenderUnit>> {
        let state = self.state.lock().await;
        let mut units: Vec<_> = state
            .units
            .values()
            .filter(|u| {
                u.task_id == task_id
                    && matches!(u.status(), RenderUnitStatus::Pending | RenderUnitStatus::Running)
            })
            .cloned()
            .collect();
        units.sort_by_key(|u| u.draw_index);
        Ok(units)
    }

    async fn start_unit_attempt(&self, unit_id: DbId, worker_id: DbId) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if let Some(unit) = state.units.get_mut(&unit_id) {
            unit.status_id = RenderUnitStatus::Running.id();
            unit.attempts += 1;
            unit.worker_id = Some(worker_id);
            unit.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn fail_unit(&self, unit_id: DbId, error: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let Some(unit) = state.units.get_mut(&unit_id) else {
            return Ok(());
        };
        if !matches!(unit.status(), RenderUnitStatus::Pending | RenderUnitStatus::Running) {
            return Ok(());
        }
        unit.status_id = RenderUnitStatus::Failed.id();
        unit.error_message = Some(error.to_string());
        unit.updated_at = Utc::now();
        let task_id = unit.task_id;
        if let Some(task) = state.tasks.get_mut(&task_id) {
            task.units_failed += 1;
        }
        Ok(())
    }

    // -- batches --------------------------------------------------------------

    async fn append_batch(&self, input: &NewBatch) -> StoreResult<Option<Batch>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let Some(task) = state.generating_task(input.task_id) else {
            return Ok(None);
        };
        let sequence_number = task.next_sequence;
        task.next_sequence += 1;
        task.batches_produced += 1;
        task.updated_at = now;

        let batch = Batch {
            id: state.next_id(),
            task_id: input.task_id,
            render_unit_id: input.render_unit_id,
            sequence_number,
            prompt_text: input.prompt_text.clone(),
            seeds: input.seeds.clone(),
            thumbnails: input.thumbnails.clone(),
            worker_id: input.worker_id,
            annotation_status_id: AnnotationStatus::Unannotated.id(),
            created_at: now,
        };
        state.batches.insert(batch.id, batch.clone());
        if let Some(unit) = state.units.get_mut(&input.render_unit_id) {
            unit.status_id = RenderUnitStatus::Done.id();
            unit.updated_at = now;
        }
        Ok(Some(batch))
    }

    async fn next_batches(
        &self,
        task_id: DbId,
        cursor: i64,
        limit: i64,
    ) -> StoreResult<Vec<Batch>> {
        let state = self.state.lock().await;
        let mut batches: Vec<_> = state
            .batches
            .values()
            .filter(|b| {
                b.task_id == task_id
                    && b.sequence_number >= cursor
                    && b.annotation_status_id == AnnotationStatus::Unannotated.id()
            })
            .cloned()
            .collect();
        batches.sort_by_key(|b| b.sequence_number);
        batches.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(batches)
    }

    async fn find_batch(&self, id: DbId) -> StoreResult<Option<Batch>> {
        Ok(self.state.lock().await.batches.get(&id).cloned())
    }

    async fn list_batches(&self, task_id: DbId) -> StoreResult<Vec<Batch>> {
        let state = self.state.lock().await;
        let mut batches: Vec<_> = state
            .batches
            .values()
            .filter(|b| b.task_id == task_id)
            .cloned()
            .collect();
        batches.sort_by_key(|b| b.sequence_number);
        Ok(batches)
    }

    // -- annotations ----------------------------------------------------------

    async fn record_annotation(&self, input: &CreateAnnotation) -> StoreResult<Option<Annotation>> {
        let mut state = self.state.lock().await;
        let Some(batch) = state.batches.get_mut(&input.batch_id) else {
            return Ok(None);
        };
        if batch.task_id != input.task_id
            || batch.annotation_status_id != AnnotationStatus::Unannotated.id()
        {
            return Ok(None);
        }
        batch.annotation_status_id = AnnotationStatus::Annotated.id();

        let annotation = Annotation {
            id: state.next_id(),
            task_id: input.task_id,
            batch_id: input.batch_id,
            chosen_index: input.chosen_index,
            rejected_index: input.rejected_index,
            spam: input.spam,
            user_id: input.user_id.clone(),
            created_at: Utc::now(),
        };
        state.annotations.insert(annotation.id, annotation.clone());
        Ok(Some(annotation))
    }

    async fn list_annotations(&self, task_id: DbId) -> StoreResult<Vec<Annotation>> {
        let state = self.state.lock().await;
        Ok(state
            .annotations
            .values()
            .filter(|a| a.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn export_rows(&self, task_id: DbId) -> StoreResult<Vec<ExportRow>> {
        let state = self.state.lock().await;
        let mut rows: Vec<ExportRow> = state
            .annotations
            .values()
            .filter(|a| a.task_id == task_id)
            .filter_map(|a| {
                let b = state.batches.get(&a.batch_id)?;
                Some(ExportRow {
                    batch_id: b.id,
                    sequence_number: b.sequence_number,
                    prompt_text: b.prompt_text.clone(),
                    seeds: b.seeds.clone(),
                    thumbnails: b.thumbnails.clone(),
                    chosen_index: a.chosen_index,
                    rejected_index: a.rejected_index,
                    spam: a.spam,
                    annotated_at: a.created_at,
                })
            })
            .collect();
        rows.sort_by_key(|r| r.sequence_number);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;

    use super::*;

    async fn generating_task(store: &MemoryStore) -> Task {
        let task = store
            .insert_task(&NewTask {
                workflow_id: 1,
                variable_pool_ids: vec![1],
                target_prompts: 10,
                seeds_per_prompt: 2,
                rng_seed: 7,
            })
            .await
            .unwrap();
        store
            .transition_task(task.id, &[TaskStatus::Pending], TaskStatus::Generating)
            .await
            .unwrap()
            .unwrap()
    }

    async fn unit(store: &MemoryStore, task_id: DbId, draw_index: i64) -> RenderUnit {
        store
            .insert_unit(
                &NewRenderUnit {
                    task_id,
                    draw_index,
                    prompt_text: format!("prompt {draw_index}"),
                    combination: serde_json::json!({}),
                    seeds: vec![1, 2],
                },
                &serde_json::json!({"1": draw_index + 1}),
            )
            .await
            .unwrap()
            .unwrap()
    }

    fn new_batch(task_id: DbId, unit: &RenderUnit) -> NewBatch {
        NewBatch {
            task_id,
            render_unit_id: unit.id,
            prompt_text: unit.prompt_text.clone(),
            seeds: unit.seeds.clone(),
            thumbnails: vec!["a".into(), "b".into()],
            worker_id: None,
        }
    }

    #[tokio::test]
    async fn duplicate_worker_name_conflicts() {
        let store = MemoryStore::new();
        let input = CreateWorker {
            name: "gpu-1".into(),
            base_url: "http://localhost:8188".into(),
            api_key: None,
        };
        let worker = store.insert_worker(&input).await.unwrap();
        assert_eq!(worker.status(), WorkerStatus::Unknown);
        assert_matches!(store.insert_worker(&input).await, Err(StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn concurrent_appends_get_dense_sequence_numbers() {
        let store = Arc::new(MemoryStore::new());
        let task = generating_task(&store).await;

        let mut units = Vec::new();
        for i in 0..20 {
            units.push(unit(&store, task.id, i).await);
        }

        let mut handles = Vec::new();
        for u in units {
            let store = Arc::clone(&store);
            let input = new_batch(task.id, &u);
            handles.push(tokio::spawn(async move {
                store.append_batch(&input).await.unwrap().unwrap().sequence_number
            }));
        }

        let mut seqs = Vec::new();
        for h in handles {
            seqs.push(h.await.unwrap());
        }
        seqs.sort_unstable();
        assert_eq!(seqs, (0..20).collect::<Vec<i64>>());

        let task = store.find_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.next_sequence, 20);
        assert_eq!(task.batches_produced, 20);
        assert!(store.list_open_units(task.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_after_finish_is_discarded() {
        let store = MemoryStore::new();
        let task = generating_task(&store).await;
        let u = unit(&store, task.id, 0).await;

        store
            .finish_task(task.id, TaskStatus::Failed, None, Some("cancelled"))
            .await
            .unwrap()
            .unwrap();

        assert!(store.append_batch(&new_batch(task.id, &u)).await.unwrap().is_none());
        assert!(store.next_batches(task.id, 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn annotation_compare_and_set_wins_once() {
        let store = MemoryStore::new();
        let task = generating_task(&store).await;
        let u = unit(&store, task.id, 0).await;
        let batch = store.append_batch(&new_batch(task.id, &u)).await.unwrap().unwrap();

        let input = CreateAnnotation {
            task_id: task.id,
            batch_id: batch.id,
            chosen_index: Some(0),
            rejected_index: Some(1),
            spam: false,
            user_id: None,
        };
        assert!(store.record_annotation(&input).await.unwrap().is_some());
        assert!(store.record_annotation(&input).await.unwrap().is_none());

        assert!(store.next_batches(task.id, 0, 10).await.unwrap().is_empty());
        assert_eq!(store.export_rows(task.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn next_batches_respects_cursor_and_limit() {
        let store = MemoryStore::new();
        let task = generating_task(&store).await;
        for i in 0..5 {
            let u = unit(&store, task.id, i).await;
            store.append_batch(&new_batch(task.id, &u)).await.unwrap();
        }

        let page = store.next_batches(task.id, 2, 2).await.unwrap();
        let seqs: Vec<i64> = page.iter().map(|b| b.sequence_number).collect();
        assert_eq!(seqs, vec![2, 3]);
    }

    #[tokio::test]
    async fn insert_unit_persists_cursor() {
        let store = MemoryStore::new();
        let task = generating_task(&store).await;
        unit(&store, task.id, 0).await;
        let task = store.find_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.prompts_drawn, 1);
        assert_eq!(task.cursor().get(&1), Some(&1));
    }

    #[tokio::test]
    async fn failing_a_unit_counts_once() {
        let store = MemoryStore::new();
        let task = generating_task(&store).await;
        let u = unit(&store, task.id, 0).await;
        store.fail_unit(u.id, "boom").await.unwrap();
        store.fail_unit(u.id, "boom").await.unwrap();
        let task = store.find_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.units_failed, 1);
    }
}
