use async_trait::async_trait;
use datalabel_core::types::DbId;

use crate::models::annotation::{Annotation, CreateAnnotation, ExportRow};
use crate::models::batch::{Batch, NewBatch};
use crate::models::render_unit::{NewRenderUnit, RenderUnit};
use crate::models::status::{TaskStatus, WorkerStatus};
use crate::models::task::{NewTask, Task};
use crate::models::variable_pool::{CreateVariablePool, VariablePool};
use crate::models::worker::{CreateWorker, UpdateWorker, Worker};
use crate::models::workflow::{CreateWorkflow, Workflow};
use crate::repositories::{
    AnnotationRepo, BatchRepo, RenderUnitRepo, TaskRepo, VariablePoolRepo, WorkerRepo,
    WorkflowRepo,
};
use crate::store::{Store, StoreResult};
use crate::DbPool;

/// PostgreSQL-backed [`Store`] delegating to the repositories.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(crate::health_check(&self.pool).await?)
    }

    async fn insert_worker(&self, input: &CreateWorker) -> StoreResult<Worker> {
        Ok(WorkerRepo::create(&self.pool, input).await?)
    }

    async fn list_workers(&self) -> StoreResult<Vec<Worker>> {
        Ok(WorkerRepo::list(&self.pool).await?)
    }

    async fn find_worker(&self, id: DbId) -> StoreResult<Option<Worker>> {
        Ok(WorkerRepo::find_by_id(&self.pool, id).await?)
    }

    async fn update_worker(&self, id: DbId, input: &UpdateWorker) -> StoreResult<Option<Worker>> {
        Ok(WorkerRepo::update(&self.pool, id, input).await?)
    }

    async fn record_worker_health(
        &self,
        id: DbId,
        status: WorkerStatus,
        error: Option<&str>,
    ) -> StoreResult<Option<Worker>> {
        Ok(WorkerRepo::record_health(&self.pool, id, status, error).await?)
    }

    async fn insert_workflow(&self, input: &CreateWorkflow) -> StoreResult<Workflow> {
        Ok(WorkflowRepo::create(&self.pool, input).await?)
    }

    async fn list_workflows(&self) -> StoreResult<Vec<Workflow>> {
        Ok(WorkflowRepo::list(&self.pool).await?)
    }

    async fn find_workflow(&self, id: DbId) -> StoreResult<Option<Workflow>> {
        Ok(WorkflowRepo::find_by_id(&self.pool, id).await?)
    }

    async fn insert_pool(&self, input: &CreateVariablePool) -> StoreResult<VariablePool> {
        Ok(VariablePoolRepo::create(&self.pool, &input.name, &input.mode, &input.items).await?)
    }

    async fn list_pools(&self) -> StoreResult<Vec<VariablePool>> {
        Ok(VariablePoolRepo::list(&self.pool).await?)
    }

    async fn find_pool(&self, id: DbId) -> StoreResult<Option<VariablePool>> {
        Ok(VariablePoolRepo::find_by_id(&self.pool, id).await?)
    }

    async fn find_pools(&self, ids: &[DbId]) -> StoreResult<Vec<VariablePool>> {
        Ok(VariablePoolRepo::find_many(&self.pool, ids).await?)
    }

    async fn insert_task(&self, input: &NewTask) -> StoreResult<Task> {
        Ok(TaskRepo::create(&self.pool, input).await?)
    }

    async fn find_task(&self, id: DbId) -> StoreResult<Option<Task>> {
        Ok(TaskRepo::find_by_id(&self.pool, id).await?)
    }

    async fn list_tasks(&self) -> StoreResult<Vec<Task>> {
        Ok(TaskRepo::list(&self.pool).await?)
    }

    async fn list_tasks_by_status(&self, status: TaskStatus) -> StoreResult<Vec<Task>> {
        Ok(TaskRepo::list_by_status(&self.pool, status).await?)
    }

    async fn transition_task(
        &self,
        id: DbId,
        from: &[TaskStatus],
        to: TaskStatus,
    ) -> StoreResult<Option<Task>> {
        Ok(TaskRepo::transition(&self.pool, id, from, to).await?)
    }

    async fn finish_task(
        &self,
        id: DbId,
        status: TaskStatus,
        shortfall: Option<i32>,
        error: Option<&str>,
    ) -> StoreResult<Option<Task>> {
        Ok(TaskRepo::finish(&self.pool, id, status, shortfall, error).await?)
    }

    async fn insert_unit(
        &self,
        input: &NewRenderUnit,
        cursor: &serde_json::Value,
    ) -> StoreResult<Option<RenderUnit>> {
        Ok(RenderUnitRepo::create_drawn(&self.pool, input, cursor).await?)
    }

    async fn list_open_units(&self, task_id: DbId) -> StoreResult<Vec<RenderUnit>> {
        Ok(RenderUnitRepo::list_open(&self.pool, task_id).await?)
    }

    async fn start_unit_attempt(&self, unit_id: DbId, worker_id: DbId) -> StoreResult<()> {
        Ok(RenderUnitRepo::start_attempt(&self.pool, unit_id, worker_id).await?)
    }

    async fn fail_unit(&self, unit_id: DbId, error: &str) -> StoreResult<()> {
        Ok(RenderUnitRepo::fail(&self.pool, unit_id, error).await?)
    }

    async fn append_batch(&self, input: &NewBatch) -> StoreResult<Option<Batch>> {
        Ok(BatchRepo::append(&self.pool, input).await?)
    }

    async fn next_batches(
        &self,
        task_id: DbId,
        cursor: i64,
        limit: i64,
    ) -> StoreResult<Vec<Batch>> {
        Ok(BatchRepo::next_unannotated(&self.pool, task_id, cursor, limit).await?)
    }

    async fn find_batch(&self, id: DbId) -> StoreResult<Option<Batch>> {
        Ok(BatchRepo::find_by_id(&self.pool, id).await?)
    }

    async fn list_batches(&self, task_id: DbId) -> StoreResult<Vec<Batch>> {
        Ok(BatchRepo::list_by_task(&self.pool, task_id).await?)
    }

    async fn record_annotation(&self, input: &CreateAnnotation) -> StoreResult<Option<Annotation>> {
        Ok(AnnotationRepo::record(&self.pool, input).await?)
    }

    async fn list_annotations(&self, task_id: DbId) -> StoreResult<Vec<Annotation>> {
        Ok(AnnotationRepo::list_by_task(&self.pool, task_id).await?)
    }

    async fn export_rows(&self, task_id: DbId) -> StoreResult<Vec<ExportRow>> {
        Ok(AnnotationRepo::export_rows(&self.pool, task_id).await?)
    }
}
