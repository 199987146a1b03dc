//! API routes.

pub mod health;
pub mod jobs;

use crate::AppState;
use axum::Router;
use axum::routing::get;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_router())
        .route("/jobs/enqueue", get(jobs::legacy_enqueue))
        .merge(health::router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new().nest("/jobs", jobs::router())
}
