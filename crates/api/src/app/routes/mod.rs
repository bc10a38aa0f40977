use axum::Router;

pub mod common;
pub mod events;
pub mod functions;
pub mod jobs;
pub mod system;

/// Router for all authenticated (application-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .merge(functions::router())
        .merge(jobs::router())
        .merge(events::router())
}
