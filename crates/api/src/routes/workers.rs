//! Route definitions for render worker management.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::workers;
use crate::state::AppState;

/// Routes mounted at `/workers`.
///
/// ```text
/// GET    /            -> list_workers
/// POST   /            -> register_worker
/// GET    /{id}        -> get_worker
/// PATCH  /{id}        -> update_worker
/// POST   /{id}/test   -> test_worker
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(workers::list_workers).post(workers::register_worker))
        .route("/{id}", get(workers::get_worker).patch(workers::update_worker))
        .route("/{id}/test", post(workers::test_worker))
}
