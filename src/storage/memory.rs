//! In-memory audit backend
//!
//! Thread-safe via `RwLock`. Not durable; data is lost on restart.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use super::{newest_first, AuditError, AuditStore};
use crate::config::defaults::IN_MEMORY_AUDIT_LIMIT;
use crate::types::{Alert, DeliveryTicket, RiskAssessment};

pub struct InMemoryAudit {
    assessments: RwLock<VecDeque<RiskAssessment>>,
    alerts: RwLock<HashMap<String, Alert>>,
    tickets: RwLock<VecDeque<DeliveryTicket>>,
    limit: usize,
}

impl InMemoryAudit {
    pub fn new() -> Self {
        Self::with_limit(IN_MEMORY_AUDIT_LIMIT)
    }

    /// Keep at most `limit` records of each type.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            assessments: RwLock::new(VecDeque::new()),
            alerts: RwLock::new(HashMap::new()),
            tickets: RwLock::new(VecDeque::new()),
            limit: limit.max(1),
        }
    }
}

impl Default for InMemoryAudit {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> AuditError {
    AuditError::Storage(e.to_string())
}

fn push_capped<T>(queue: &mut VecDeque<T>, item: T, limit: usize) {
    queue.push_back(item);
    while queue.len() > limit {
        queue.pop_front();
    }
}

impl AuditStore for InMemoryAudit {
    fn record_assessment(&self, assessment: &RiskAssessment) -> Result<(), AuditError> {
        let mut store = self.assessments.write().map_err(poisoned)?;
        push_capped(&mut store, assessment.clone(), self.limit);
        Ok(())
    }

    fn record_alert(&self, alert: &Alert) -> Result<(), AuditError> {
        let mut store = self.alerts.write().map_err(poisoned)?;
        store.insert(alert.id.clone(), alert.clone());
        if store.len() > self.limit {
            // Evict the least recently updated alert
            if let Some(oldest) = store
                .values()
                .min_by_key(|a| a.updated_at)
                .map(|a| a.id.clone())
            {
                store.remove(&oldest);
            }
        }
        Ok(())
    }

    fn record_ticket(&self, ticket: &DeliveryTicket) -> Result<(), AuditError> {
        let mut store = self.tickets.write().map_err(poisoned)?;
        push_capped(&mut store, ticket.clone(), self.limit);
        Ok(())
    }

    fn recent_assessments(&self, limit: usize) -> Result<Vec<RiskAssessment>, AuditError> {
        let store = self.assessments.read().map_err(poisoned)?;
        Ok(store.iter().rev().take(limit).cloned().collect())
    }

    fn recent_alerts(&self, limit: usize) -> Result<Vec<Alert>, AuditError> {
        let store = self.alerts.read().map_err(poisoned)?;
        let mut alerts: Vec<Alert> = store.values().cloned().collect();
        newest_first(&mut alerts);
        alerts.truncate(limit);
        Ok(alerts)
    }

    fn alerts_for_farm(&self, farm_id: &str, limit: usize) -> Result<Vec<Alert>, AuditError> {
        let store = self.alerts.read().map_err(poisoned)?;
        let mut alerts: Vec<Alert> = store.values().filter(|a| a.farm_id == farm_id).cloned().collect();
        newest_first(&mut alerts);
        alerts.truncate(limit);
        Ok(alerts)
    }

    fn recent_tickets(&self, limit: usize) -> Result<Vec<DeliveryTicket>, AuditError> {
        let store = self.tickets.read().map_err(poisoned)?;
        Ok(store.iter().rev().take(limit).cloned().collect())
    }

    fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, AuditError> {
        let mut removed = 0;
        {
            let mut store = self.assessments.write().map_err(poisoned)?;
            let before = store.len();
            store.retain(|a| a.assessed_at >= cutoff);
            removed += before - store.len();
        }
        {
            let mut store = self.alerts.write().map_err(poisoned)?;
            let before = store.len();
            store.retain(|_, a| a.updated_at >= cutoff);
            removed += before - store.len();
        }
        {
            let mut store = self.tickets.write().map_err(poisoned)?;
            let before = store.len();
            store.retain(|t| t.updated_at >= cutoff);
            removed += before - store.len();
        }
        Ok(removed)
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}
