//! Route definitions for workflows.

use axum::routing::get;
use axum::Router;

use crate::handlers::workflows;
use crate::state::AppState;

/// Routes mounted at `/workflows`.
///
/// ```text
/// GET    /        -> list_workflows
/// POST   /        -> create_workflow (multipart)
/// GET    /{id}    -> get_workflow
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(workflows::list_workflows).post(workflows::create_workflow),
        )
        .route("/{id}", get(workflows::get_workflow))
}
