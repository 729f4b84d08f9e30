//! Route definitions for tasks and the annotation feed.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::tasks;
use crate::state::AppState;

/// Routes mounted at `/tasks`.
///
/// ```text
/// GET    /                   -> list_tasks
/// POST   /                   -> create_task
/// GET    /{id}               -> get_task
/// POST   /{id}/cancel        -> cancel_task
/// GET    /{id}/batches       -> next_batches (?limit, cursor)
/// GET    /{id}/annotations   -> list_annotations
/// GET    /{id}/export/dpo    -> export_dpo (NDJSON)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(tasks::list_tasks).post(tasks::create_task))
        .route("/{id}", get(tasks::get_task))
        .route("/{id}/cancel", post(tasks::cancel_task))
        .route("/{id}/batches", get(tasks::next_batches))
        .route("/{id}/annotations", get(tasks::list_annotations))
        .route("/{id}/export/dpo", get(tasks::export_dpo))
}
