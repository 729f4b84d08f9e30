//! Handlers for variable pools.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use datalabel_core::error::CoreError;
use datalabel_core::sampling::{self, SamplingMode};
use datalabel_core::types::DbId;
use datalabel_db::models::variable_pool::{CreateVariablePool, VariablePool};

use crate::error::AppResult;
use crate::query::SampleParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// Default number of items in a pool preview.
const DEFAULT_SAMPLE_COUNT: usize = 10;

/// Upper bound on a pool preview.
const MAX_SAMPLE_COUNT: usize = 100;

/// Deterministic preview of a pool's draw order.
#[derive(Debug, Serialize)]
pub struct PoolSample {
    pub pool_id: DbId,
    pub mode: String,
    pub seed: u64,
    pub items: Vec<String>,
}

async fn ensure_pool_exists(state: &AppState, id: DbId) -> AppResult<VariablePool> {
    Ok(state
        .store
        .find_pool(id)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "variable_pool",
            id,
        })?)
}

// ---------------------------------------------------------------------------
// GET /variable-pools
// ---------------------------------------------------------------------------

pub async fn list_pools(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let pools = state.store.list_pools().await?;
    Ok(Json(DataResponse { data: pools }))
}

// ---------------------------------------------------------------------------
// POST /variable-pools
// ---------------------------------------------------------------------------

pub async fn create_pool(
    State(state): State<AppState>,
    Json(input): Json<CreateVariablePool>,
) -> AppResult<impl IntoResponse> {
    let name = input.name.trim().to_string();
    sampling::validate_pool_name(&name)?;
    let mode: SamplingMode = input.mode.trim().parse()?;
    sampling::validate_pool_items(&input.items)?;

    let pool = state
        .store
        .insert_pool(&CreateVariablePool {
            name,
            mode: mode.as_str().to_string(),
            items: input.items,
        })
        .await?;

    tracing::info!(
        pool_id = pool.id,
        name = %pool.name,
        mode = %pool.mode,
        items = pool.items.len(),
        "Variable pool created",
    );

    Ok((StatusCode::CREATED, Json(DataResponse { data: pool })))
}

// ---------------------------------------------------------------------------
// GET /variable-pools/{id}
// ---------------------------------------------------------------------------

pub async fn get_pool(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let pool = ensure_pool_exists(&state, id).await?;
    Ok(Json(DataResponse { data: pool }))
}

// ---------------------------------------------------------------------------
// GET /variable-pools/{id}/sample
// ---------------------------------------------------------------------------

/// The first `count` items the pool hands out under `seed`.
pub async fn sample_pool(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Query(params): Query<SampleParams>,
) -> AppResult<impl IntoResponse> {
    let pool = ensure_pool_exists(&state, id).await?;
    let count = params
        .count
        .unwrap_or(DEFAULT_SAMPLE_COUNT)
        .clamp(1, MAX_SAMPLE_COUNT);
    let seed = params.seed.unwrap_or(0);

    let items = sampling::preview(pool.to_source()?, seed, count)?;
    Ok(Json(DataResponse {
        data: PoolSample {
            pool_id: pool.id,
            mode: pool.mode,
            seed,
            items,
        },
    }))
}
