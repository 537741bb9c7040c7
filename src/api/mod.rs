//! Monitoring API using Axum
//!
//! Read-only HTTP endpoints under `/api/v1` for operators watching the
//! pipeline: alerts, delivery tickets, admin notifications and channel
//! health.

pub mod envelope;
pub mod handlers;
mod routes;

pub use handlers::{AdminEventLog, ApiState};

use axum::http::{header, Method};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Restrictive by default (same-origin only).
///
/// Set `CROPWATCH_CORS_ORIGINS` to a comma-separated list of allowed origins
/// for development dashboards.
fn build_cors_layer() -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    match std::env::var("CROPWATCH_CORS_ORIGINS") {
        Ok(origins) => {
            let allowed: Vec<_> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            tracing::info!(origins = %origins, "CORS: allowing configured origins");
            base.allow_origin(allowed)
        }
        Err(_) => base,
    }
}

/// Create the application router.
pub fn create_app(state: ApiState) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
}
