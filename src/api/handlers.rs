//! API route handlers
//!
//! Read-only views over the running pipeline:
//! - alerts (audit history and live orchestrator state)
//! - delivery tickets
//! - administrator notifications
//! - per-channel circuit breakers

use axum::extract::{Path, Query, State};
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use tracing::warn;

use super::envelope::{ApiErrorResponse, ApiResponse};
use crate::alerts::AlertOrchestrator;
use crate::delivery::{BreakerState, DeliveryCoordinator};
use crate::ensemble::ModelRegistry;
use crate::storage::AuditStore;
use crate::types::AdminNotification;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 1_000;

// ============================================================================
// API State
// ============================================================================

/// Bounded, newest-last history of admin notifications.
#[derive(Debug, Clone)]
pub struct AdminEventLog {
    events: Arc<RwLock<VecDeque<AdminNotification>>>,
    capacity: usize,
}

impl AdminEventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Arc::new(RwLock::new(VecDeque::with_capacity(capacity.min(1_024)))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, event: AdminNotification) {
        let mut events = self.events.write().unwrap_or_else(|poisoned| {
            warn!("Admin event log lock poisoned, recovering");
            poisoned.into_inner()
        });
        events.push_back(event);
        while events.len() > self.capacity {
            events.pop_front();
        }
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<AdminNotification> {
        let events = self.events.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        events.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<AlertOrchestrator>,
    pub audit: Arc<dyn AuditStore>,
    pub delivery: DeliveryCoordinator,
    pub registry: Arc<ModelRegistry>,
    pub admin_events: AdminEventLog,
    pub started_at: DateTime<Utc>,
}

// ============================================================================
// Query / Response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

impl LimitQuery {
    fn resolve(&self) -> Result<usize, Response> {
        match self.limit {
            None => Ok(DEFAULT_LIMIT),
            Some(0) => Err(ApiErrorResponse::bad_request("limit must be at least 1")),
            Some(n) => Ok(n.min(MAX_LIMIT)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: i64,
    pub models: Vec<String>,
    pub tracked_alert_keys: usize,
    pub audit_backend: &'static str,
    pub open_channels: usize,
    pub admin_events: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/health
pub async fn health(State(state): State<ApiState>) -> Response {
    let open_channels = state
        .delivery
        .breaker_snapshots()
        .iter()
        .filter(|b| b.state != BreakerState::Closed)
        .count();
    let status = if open_channels > 0 { "degraded" } else { "ok" };

    ApiResponse::ok(HealthResponse {
        status,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        models: state.registry.model_ids(),
        tracked_alert_keys: state.orchestrator.tracked_keys(),
        audit_backend: state.audit.backend_name(),
        open_channels,
        admin_events: state.admin_events.len(),
    })
}

/// GET /api/v1/alerts?limit=50
pub async fn recent_alerts(State(state): State<ApiState>, Query(q): Query<LimitQuery>) -> Response {
    let limit = match q.resolve() {
        Ok(limit) => limit,
        Err(resp) => return resp,
    };
    match state.audit.recent_alerts(limit) {
        Ok(alerts) => ApiResponse::list(alerts),
        Err(e) => ApiErrorResponse::audit(&e),
    }
}

/// GET /api/v1/alerts/farm/:farm_id
///
/// Live alerts for the farm (one per risk type, highest priority first).
/// Falls back to audit history when the orchestrator has nothing in memory,
/// e.g. after a restart.
pub async fn farm_alerts(State(state): State<ApiState>, Path(farm_id): Path<String>) -> Response {
    let live = state.orchestrator.alerts(Some(&farm_id)).await;
    if !live.is_empty() {
        return ApiResponse::list(live);
    }
    match state.audit.alerts_for_farm(&farm_id, DEFAULT_LIMIT) {
        Ok(history) if history.is_empty() => ApiErrorResponse::not_found(format!("No alerts for farm {farm_id}")),
        Ok(history) => ApiResponse::list(history),
        Err(e) => ApiErrorResponse::audit(&e),
    }
}

/// GET /api/v1/tickets?limit=50
pub async fn recent_tickets(State(state): State<ApiState>, Query(q): Query<LimitQuery>) -> Response {
    let limit = match q.resolve() {
        Ok(limit) => limit,
        Err(resp) => return resp,
    };
    match state.audit.recent_tickets(limit) {
        Ok(tickets) => ApiResponse::list(tickets),
        Err(e) => ApiErrorResponse::audit(&e),
    }
}

/// GET /api/v1/admin/events?limit=50
pub async fn admin_events(State(state): State<ApiState>, Query(q): Query<LimitQuery>) -> Response {
    match q.resolve() {
        Ok(limit) => ApiResponse::list(state.admin_events.recent(limit)),
        Err(resp) => resp,
    }
}

/// GET /api/v1/channels
pub async fn channels(State(state): State<ApiState>) -> Response {
    ApiResponse::list(state.delivery.breaker_snapshots())
}
