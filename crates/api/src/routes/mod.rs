pub mod annotations;
pub mod health;
pub mod tasks;
pub mod variable_pools;
pub mod workers;
pub mod workflows;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /workers          worker registry, health probes
/// /workflows        workflow upload and listing
/// /variable-pools   pools and draw previews
/// /tasks            tasks, annotation feed, export
/// /annotations      annotation submission
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/workers", workers::router())
        .nest("/workflows", workflows::router())
        .nest("/variable-pools", variable_pools::router())
        .nest("/tasks", tasks::router())
        .nest("/annotations", annotations::router())
}
