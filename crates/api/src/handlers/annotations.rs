//! Handler for annotation submission.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use datalabel_db::models::annotation::CreateAnnotation;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// POST /annotations
// ---------------------------------------------------------------------------

/// Record an annotator's decision on a batch.
///
/// Rejected with 409 `ALREADY_ANNOTATED` when another submission won the
/// batch first; the client is expected to fetch the feed again.
pub async fn submit_annotation(
    State(state): State<AppState>,
    Json(input): Json<CreateAnnotation>,
) -> AppResult<impl IntoResponse> {
    let annotation = state.pipeline.annotations.submit(input).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: annotation })))
}
