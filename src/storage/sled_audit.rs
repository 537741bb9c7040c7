//! sled-backed audit store
//!
//! Storage layout:
//! - Tree `assessments`: `be_micros(assessed_at) ++ farm_id` → JSON
//! - Tree `alerts`: `alert_id` → JSON (latest revision wins)
//! - Tree `tickets`: `be_micros(updated_at) ++ alert_id ++ 0x00 ++ channel` → JSON
//!
//! Time-prefixed keys sort chronologically, so "most recent" is a reverse
//! range scan.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{newest_first, time_key, AuditError, AuditStore};
use crate::types::{Alert, DeliveryTicket, RiskAssessment};

const ASSESSMENTS_TREE: &str = "assessments";
const ALERTS_TREE: &str = "alerts";
const TICKETS_TREE: &str = "tickets";

#[derive(Clone)]
pub struct SledAudit {
    db: Arc<sled::Db>,
    assessments: sled::Tree,
    alerts: sled::Tree,
    tickets: sled::Tree,
}

impl SledAudit {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref();
        let db = sled::open(path)?;
        info!(path = %path.display(), "Audit database opened");
        Self::from_db(db)
    }

    /// Throwaway database for tests and dry runs.
    pub fn temporary() -> Result<Self, AuditError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, AuditError> {
        Ok(Self {
            assessments: db.open_tree(ASSESSMENTS_TREE)?,
            alerts: db.open_tree(ALERTS_TREE)?,
            tickets: db.open_tree(TICKETS_TREE)?,
            db: Arc::new(db),
        })
    }

    pub fn flush(&self) -> Result<(), AuditError> {
        self.db.flush()?;
        Ok(())
    }

    fn prune_time_keyed(tree: &sled::Tree, cutoff: DateTime<Utc>) -> Result<usize, AuditError> {
        let end = time_key(cutoff);
        let keys: Vec<sled::IVec> = tree
            .range(..end.as_slice())
            .keys()
            .collect::<Result<_, _>>()?;
        for key in &keys {
            tree.remove(key)?;
        }
        Ok(keys.len())
    }
}

/// Decode the newest `limit` values of a time-keyed tree, skipping corrupt
/// entries.
fn newest<T: DeserializeOwned>(tree: &sled::Tree, limit: usize) -> Result<Vec<T>, AuditError> {
    let mut out = Vec::with_capacity(limit.min(tree.len()));
    for item in tree.iter().rev() {
        if out.len() >= limit {
            break;
        }
        let (_, value) = item?;
        match serde_json::from_slice(&value) {
            Ok(record) => out.push(record),
            Err(e) => warn!(tree = ?tree.name(), error = %e, "Skipping undecodable audit record"),
        }
    }
    Ok(out)
}

impl AuditStore for SledAudit {
    fn record_assessment(&self, assessment: &RiskAssessment) -> Result<(), AuditError> {
        let mut key = time_key(assessment.assessed_at).to_vec();
        key.extend_from_slice(assessment.farm_id.as_bytes());
        self.assessments.insert(key, serde_json::to_vec(assessment)?)?;
        Ok(())
    }

    fn record_alert(&self, alert: &Alert) -> Result<(), AuditError> {
        self.alerts.insert(alert.id.as_bytes(), serde_json::to_vec(alert)?)?;
        debug!(alert_id = %alert.id, state = %alert.state, "Alert audited");
        Ok(())
    }

    fn record_ticket(&self, ticket: &DeliveryTicket) -> Result<(), AuditError> {
        let mut key = time_key(ticket.updated_at).to_vec();
        key.extend_from_slice(ticket.alert_id.as_bytes());
        key.push(0);
        key.extend_from_slice(ticket.channel.to_string().as_bytes());
        self.tickets.insert(key, serde_json::to_vec(ticket)?)?;
        Ok(())
    }

    fn recent_assessments(&self, limit: usize) -> Result<Vec<RiskAssessment>, AuditError> {
        newest(&self.assessments, limit)
    }

    fn recent_alerts(&self, limit: usize) -> Result<Vec<Alert>, AuditError> {
        let mut alerts = Vec::new();
        for item in self.alerts.iter() {
            let (_, value) = item?;
            alerts.push(serde_json::from_slice::<Alert>(&value)?);
        }
        newest_first(&mut alerts);
        alerts.truncate(limit);
        Ok(alerts)
    }

    fn alerts_for_farm(&self, farm_id: &str, limit: usize) -> Result<Vec<Alert>, AuditError> {
        let mut alerts = Vec::new();
        for item in self.alerts.iter() {
            let (_, value) = item?;
            let alert: Alert = serde_json::from_slice(&value)?;
            if alert.farm_id == farm_id {
                alerts.push(alert);
            }
        }
        newest_first(&mut alerts);
        alerts.truncate(limit);
        Ok(alerts)
    }

    fn recent_tickets(&self, limit: usize) -> Result<Vec<DeliveryTicket>, AuditError> {
        newest(&self.tickets, limit)
    }

    fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, AuditError> {
        let mut removed = Self::prune_time_keyed(&self.assessments, cutoff)?;
        removed += Self::prune_time_keyed(&self.tickets, cutoff)?;

        let mut stale = Vec::new();
        for item in self.alerts.iter() {
            let (key, value) = item?;
            let alert: Alert = serde_json::from_slice(&value)?;
            if alert.updated_at < cutoff {
                stale.push(key);
            }
        }
        for key in &stale {
            self.alerts.remove(key)?;
        }
        removed += stale.len();

        self.db.flush()?;
        if removed > 0 {
            info!(removed, cutoff = %cutoff, "Pruned audit records");
        }
        Ok(removed)
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}
