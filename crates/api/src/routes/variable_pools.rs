//! Route definitions for variable pools.

use axum::routing::get;
use axum::Router;

use crate::handlers::variable_pools;
use crate::state::AppState;

/// Routes mounted at `/variable-pools`.
///
/// ```text
/// GET    /              -> list_pools
/// POST   /              -> create_pool
/// GET    /{id}          -> get_pool
/// GET    /{id}/sample   -> sample_pool (?count, seed)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(variable_pools::list_pools).post(variable_pools::create_pool),
        )
        .route("/{id}", get(variable_pools::get_pool))
        .route("/{id}/sample", get(variable_pools::sample_pool))
}
