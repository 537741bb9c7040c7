//! API route table.

use axum::routing::get;
use axum::Router;

use super::handlers::{self, ApiState};

/// Build the v1 API router.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Alerts (farm route before any future parameterized /alerts/:id)
        .route("/alerts", get(handlers::recent_alerts))
        .route("/alerts/farm/:farm_id", get(handlers::farm_alerts))
        // Delivery
        .route("/tickets", get(handlers::recent_tickets))
        .route("/channels", get(handlers::channels))
        // Administration
        .route("/admin/events", get(handlers::admin_events))
        .with_state(state)
}
