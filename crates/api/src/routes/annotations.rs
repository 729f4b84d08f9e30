//! Route definitions for annotations.

use axum::routing::post;
use axum::Router;

use crate::handlers::annotations;
use crate::state::AppState;

/// Routes mounted at `/annotations`.
///
/// ```text
/// POST   /   -> submit_annotation
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/", post(annotations::submit_annotation))
}
