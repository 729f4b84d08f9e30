//! Storage seam used by the pipeline and the API.
//!
//! [`Store`] lists every persistence operation the labeling backend needs,
//! including the atomic ones (batch sequence assignment, annotation
//! compare-and-set, task status compare-and-set). [`PgStore`] implements it
//! over the repositories; [`MemoryStore`] implements the same semantics in
//! process for tests and database-less development.

mod memory;
mod pg;

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

pub use memory::MemoryStore;
pub use pg::PgStore;

/// Errors from either store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness rule was violated (duplicate name and similar).
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    /// Unique violations on `uq_*` constraints become [`StoreError::Conflict`].
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("23505") {
                if let Some(constraint) = db_err.constraint().filter(|c| c.starts_with("uq_")) {
                    return StoreError::Conflict(format!(
                        "Duplicate value violates unique constraint: {constraint}"
                    ));
                }
            }
        }
        StoreError::Database(err)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Every persistence operation of the labeling backend.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Cheap liveness check for `/health`.
    async fn ping(&self) -> StoreResult<()>;

    // -- workers --------------------------------------------------------------

    async fn insert_worker(&self, input: &CreateWorker) -> StoreResult<Worker>;
    async fn list_workers(&self) -> StoreResult<Vec<Worker>>;
    async fn find_worker(&self, id: DbId) -> StoreResult<Option<Worker>>;
    async fn update_worker(&self, id: DbId, input: &UpdateWorker) -> StoreResult<Option<Worker>>;
    async fn record_worker_health(
        &self,
        id: DbId,
        status: WorkerStatus,
        error: Option<&str>,
    ) -> StoreResult<Option<Worker>>;

    // -- workflows ------------------------------------------------------------

    async fn insert_workflow(&self, input: &CreateWorkflow) -> StoreResult<Workflow>;
    async fn list_workflows(&self) -> StoreResult<Vec<Workflow>>;
    async fn find_workflow(&self, id: DbId) -> StoreResult<Option<Workflow>>;

    // -- variable pools -------------------------------------------------------

    async fn insert_pool(&self, input: &CreateVariablePool) -> StoreResult<VariablePool>;
    async fn list_pools(&self) -> StoreResult<Vec<VariablePool>>;
    async fn find_pool(&self, id: DbId) -> StoreResult<Option<VariablePool>>;
    /// Pools whose IDs are in `ids`, in unspecified order.
    async fn find_pools(&self, ids: &[DbId]) -> StoreResult<Vec<VariablePool>>;

    // -- tasks ----------------------------------------------------------------

    async fn insert_task(&self, input: &NewTask) -> StoreResult<Task>;
    async fn find_task(&self, id: DbId) -> StoreResult<Option<Task>>;
    async fn list_tasks(&self) -> StoreResult<Vec<Task>>;
    async fn list_tasks_by_status(&self, status: TaskStatus) -> StoreResult<Vec<Task>>;
    /// Compare-and-set: only applies when the current status is in `from`.
    async fn transition_task(
        &self,
        id: DbId,
        from: &[TaskStatus],
        to: TaskStatus,
    ) -> StoreResult<Option<Task>>;
    /// Move a PENDING or GENERATING task to a terminal status.
    async fn finish_task(
        &self,
        id: DbId,
        status: TaskStatus,
        shortfall: Option<i32>,
        error: Option<&str>,
    ) -> StoreResult<Option<Task>>;

    // -- render units ---------------------------------------------------------

    /// Persist a drawn unit together with the post-draw sampler cursor.
    /// `None` when the task is no longer GENERATING.
    async fn insert_unit(
        &self,
        input: &NewRenderUnit,
        cursor: &serde_json::Value,
    ) -> StoreResult<Option<RenderUnit>>;
    async fn list_open_units(&self, task_id: DbId) -> StoreResult<Vec<RenderUnit>>;
    async fn start_unit_attempt(&self, unit_id: DbId, worker_id: DbId) -> StoreResult<()>;
    async fn fail_unit(&self, unit_id: DbId, error: &str) -> StoreResult<()>;

    // -- batches --------------------------------------------------------------

    /// Append a batch under the next sequence number and mark its unit DONE.
    /// `None` when the task is no longer GENERATING.
    async fn append_batch(&self, input: &NewBatch) -> StoreResult<Option<Batch>>;
    async fn next_batches(&self, task_id: DbId, cursor: i64, limit: i64)
        -> StoreResult<Vec<Batch>>;
    async fn find_batch(&self, id: DbId) -> StoreResult<Option<Batch>>;
    async fn list_batches(&self, task_id: DbId) -> StoreResult<Vec<Batch>>;

    // -- annotations ----------------------------------------------------------

    /// Compare-and-set the batch to ANNOTATED and store the annotation.
    /// `None` when the batch was already annotated (or is not in the task).
    async fn record_annotation(&self, input: &CreateAnnotation) -> StoreResult<Option<Annotation>>;
    async fn list_annotations(&self, task_id: DbId) -> StoreResult<Vec<Annotation>>;
    async fn export_rows(&self, task_id: DbId) -> StoreResult<Vec<ExportRow>>;
}
