pub mod app_state;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metadata;
pub mod query;
pub mod rate_limiter;
pub mod translate;

use std::time::Duration;

use axum::routing::post;
use axum::Router;
use tower_http::timeout::TimeoutLayer;

pub use app_state::AppState;

const HANDLER_DEADLINE: Duration = Duration::from_secs(120);

/// Builds the gateway router: one endpoint behind a global deadline.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/query", post(handlers::handle_query))
        .layer(TimeoutLayer::new(HANDLER_DEADLINE))
        .with_state(state)
}
