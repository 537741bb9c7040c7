//! Audit store - pluggable persistence for assessments, alerts and tickets
//!
//! Different backends can be swapped without touching pipeline code:
//! - `InMemoryAudit`: capped in-memory store for tests and minimal deployments
//! - `SledAudit`: embedded sled database, one named tree per record type
//!
//! Records older than the configured retention period are removed with
//! [`AuditStore::prune_older_than`].

mod memory;
mod sled_audit;

pub use memory::InMemoryAudit;
pub use sled_audit::SledAudit;

use chrono::{DateTime, Utc};

use crate::types::{Alert, DeliveryTicket, RiskAssessment};

/// Trait for pluggable audit backends
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across async tasks.
pub trait AuditStore: Send + Sync {
    fn record_assessment(&self, assessment: &RiskAssessment) -> Result<(), AuditError>;

    /// Insert or replace an alert (keyed by alert id)
    fn record_alert(&self, alert: &Alert) -> Result<(), AuditError>;

    fn record_ticket(&self, ticket: &DeliveryTicket) -> Result<(), AuditError>;

    /// Most recent assessments, newest first
    fn recent_assessments(&self, limit: usize) -> Result<Vec<RiskAssessment>, AuditError>;

    /// Most recently updated alerts, newest first
    fn recent_alerts(&self, limit: usize) -> Result<Vec<Alert>, AuditError>;

    /// Alerts for one farm, newest first
    fn alerts_for_farm(&self, farm_id: &str, limit: usize) -> Result<Vec<Alert>, AuditError>;

    /// Most recent ticket updates, newest first
    fn recent_tickets(&self, limit: usize) -> Result<Vec<DeliveryTicket>, AuditError>;

    /// Delete records last touched before `cutoff`. Returns how many went.
    fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, AuditError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sled::Error> for AuditError {
    fn from(err: sled::Error) -> Self {
        AuditError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        AuditError::Serialization(err.to_string())
    }
}

/// Big-endian time key prefix so sled iterates chronologically.
pub(crate) fn time_key(at: DateTime<Utc>) -> [u8; 8] {
    (at.timestamp_micros().max(0) as u64).to_be_bytes()
}

fn newest_first(alerts: &mut [Alert]) {
    alerts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
}
