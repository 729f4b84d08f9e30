//! Handlers for labeling tasks: creation, status, cancellation, the
//! annotation feed and DPO export.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use futures::StreamExt;
use serde::Serialize;

use datalabel_core::export::{to_ndjson_line, NDJSON_CONTENT_TYPE};
use datalabel_core::types::DbId;
use datalabel_db::models::status::TaskStatus;
use datalabel_db::models::task::{CreateTask, Task};

use crate::error::AppResult;
use crate::query::BatchFeedParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// A task row with its decoded status label.
#[derive(Debug, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub status: TaskStatus,
}

impl From<Task> for TaskView {
    fn from(task: Task) -> Self {
        let status = task.status();
        Self { task, status }
    }
}

// ---------------------------------------------------------------------------
// GET /tasks
// ---------------------------------------------------------------------------

pub async fn list_tasks(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let tasks: Vec<TaskView> = state
        .pipeline
        .tasks
        .list()
        .await?
        .into_iter()
        .map(TaskView::from)
        .collect();
    Ok(Json(DataResponse { data: tasks }))
}

// ---------------------------------------------------------------------------
// POST /tasks
// ---------------------------------------------------------------------------

/// Create a task and start generating immediately.
pub async fn create_task(
    State(state): State<AppState>,
    Json(input): Json<CreateTask>,
) -> AppResult<impl IntoResponse> {
    let task = state.pipeline.tasks.create_task(input).await?;
    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: TaskView::from(task),
        }),
    ))
}

// ---------------------------------------------------------------------------
// GET /tasks/{id}
// ---------------------------------------------------------------------------

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let task = state.pipeline.tasks.get(id).await?;
    Ok(Json(DataResponse {
        data: TaskView::from(task),
    }))
}

// ---------------------------------------------------------------------------
// POST /tasks/{id}/cancel
// ---------------------------------------------------------------------------

pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let task = state.pipeline.tasks.cancel(id).await?;
    Ok(Json(DataResponse {
        data: TaskView::from(task),
    }))
}

// ---------------------------------------------------------------------------
// GET /tasks/{id}/batches
// ---------------------------------------------------------------------------

/// Next unannotated batches in sequence order. An empty list means nothing
/// is ready yet or the task is done; the task status tells which.
pub async fn next_batches(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Query(params): Query<BatchFeedParams>,
) -> AppResult<impl IntoResponse> {
    let batches = state
        .pipeline
        .tasks
        .next_batches(id, params.limit, params.cursor)
        .await?;
    Ok(Json(DataResponse { data: batches }))
}

// ---------------------------------------------------------------------------
// GET /tasks/{id}/annotations
// ---------------------------------------------------------------------------

pub async fn list_annotations(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    state.pipeline.tasks.get(id).await?;
    let annotations = state.pipeline.annotations.list(id).await?;
    Ok(Json(DataResponse { data: annotations }))
}

// ---------------------------------------------------------------------------
// GET /tasks/{id}/export/dpo
// ---------------------------------------------------------------------------

/// Stream preference pairs as NDJSON, one record per line.
pub async fn export_dpo(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let task = state.pipeline.tasks.get(id).await?;
    let records = state.pipeline.annotations.export_dpo(&task).await?;
    tracing::info!(task_id = id, records = records.len(), "Exporting DPO records");

    let lines = futures::stream::iter(records).map(|record| to_ndjson_line(&record));
    let disposition = format!("attachment; filename=\"task-{id}-dpo.ndjson\"");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(lines),
    ))
}
