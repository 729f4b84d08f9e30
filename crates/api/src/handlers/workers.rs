//! Handlers for render worker management.
//!
//! Registration persists the worker as UNKNOWN and probes it in the
//! background so it joins the rotation without waiting for the next
//! health-monitor round.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use datalabel_core::types::DbId;
use datalabel_db::models::status::WorkerStatus;
use datalabel_db::models::worker::{CreateWorker, UpdateWorker, Worker};

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// A worker row with its decoded status label.
#[derive(Debug, Serialize)]
pub struct WorkerView {
    #[serde(flatten)]
    pub worker: Worker,
    pub status: WorkerStatus,
}

impl From<Worker> for WorkerView {
    fn from(worker: Worker) -> Self {
        let status = worker.status();
        Self { worker, status }
    }
}

/// Result of an explicit worker probe.
#[derive(Debug, Serialize)]
pub struct TestResult {
    pub healthy: bool,
}

// ---------------------------------------------------------------------------
// GET /workers
// ---------------------------------------------------------------------------

pub async fn list_workers(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let workers: Vec<WorkerView> = state
        .pipeline
        .workers
        .list()
        .await?
        .into_iter()
        .map(WorkerView::from)
        .collect();
    Ok(Json(DataResponse { data: workers }))
}

// ---------------------------------------------------------------------------
// POST /workers
// ---------------------------------------------------------------------------

/// Register a worker and kick off its first probe.
pub async fn register_worker(
    State(state): State<AppState>,
    Json(input): Json<CreateWorker>,
) -> AppResult<impl IntoResponse> {
    let worker = state.pipeline.workers.register(input).await?;

    let workers = state.pipeline.workers.clone();
    let worker_id = worker.id;
    tokio::spawn(async move {
        if let Err(e) = workers.test(worker_id).await {
            tracing::warn!(worker_id, error = %e, "Initial worker probe not recorded");
        }
    });

    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: WorkerView::from(worker),
        }),
    ))
}

// ---------------------------------------------------------------------------
// GET /workers/{id}
// ---------------------------------------------------------------------------

pub async fn get_worker(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let worker = state.pipeline.workers.get(id).await?;
    Ok(Json(DataResponse {
        data: WorkerView::from(worker),
    }))
}

// ---------------------------------------------------------------------------
// PATCH /workers/{id}
// ---------------------------------------------------------------------------

pub async fn update_worker(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(input): Json<UpdateWorker>,
) -> AppResult<impl IntoResponse> {
    let worker = state.pipeline.workers.update(id, input).await?;
    Ok(Json(DataResponse {
        data: WorkerView::from(worker),
    }))
}

// ---------------------------------------------------------------------------
// POST /workers/{id}/test
// ---------------------------------------------------------------------------

/// Probe the worker now. A passing probe makes it HEALTHY immediately.
pub async fn test_worker(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let healthy = state.pipeline.workers.test(id).await?;
    Ok(Json(DataResponse {
        data: TestResult { healthy },
    }))
}
