//! Alert Orchestrator (Stage 5)
//!
//! Owns the per-(farm, risk type) alert state machine:
//!
//! ```text
//! Idle → Pending → Scheduled → Delivered
//!          │           │            │
//!          │           │            ├─(same or lower severity, cool-down)─→ suppressed
//!          │           │            └─(higher severity, cool-down)─→ Pending (same id)
//!          └───────────┴──→ Expired   (expiration passed without delivery)
//! ```
//!
//! A suppression never rewrites the delivered record: the alert stays
//! `Delivered` and only `suppressed_count` / `last_suppressed_at` move.
//!
//! Admission is two-phase. [`AlertOrchestrator::admit`] locks every affected
//! key (in sorted order, so concurrent cycles cannot deadlock) and computes
//! candidate alerts without touching state. [`Admission::commit`] writes the
//! scheduled alerts back. Dropping an `Admission` instead (cancelled cycle)
//! releases the locks and leaves every slot as it was.

pub mod dedup;

pub use dedup::{AdmissionKind, AlertSlot};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::config::defaults::{PRIORITY_SEVERITY_WEIGHT, PRIORITY_TIME_WEIGHT};
use crate::config::AlertConfig;
use crate::types::{
    AlertKey, Alert, AlertState, AssessedPrediction, Recommendation, RiskAssessment, Severity,
};

/// Total-order priority: severity dominates, sooner events break ties.
pub fn priority_score(severity: Severity, hours_to_event: f64) -> f64 {
    let hours = hours_to_event.max(0.0);
    severity.rank() as f64 * PRIORITY_SEVERITY_WEIGHT + PRIORITY_TIME_WEIGHT / (hours + 1.0)
}

// ============================================================================
// Admission
// ============================================================================

/// One admitted prediction.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub kind: AdmissionKind,
    pub alert: Alert,
}

/// Locked, uncommitted result of admitting one assessment.
pub struct Admission {
    farm_id: String,
    guards: BTreeMap<AlertKey, OwnedMutexGuard<AlertSlot>>,
    candidates: Vec<Candidate>,
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission")
            .field("farm_id", &self.farm_id)
            .field("keys", &self.guards.keys().collect::<Vec<_>>())
            .field("candidates", &self.candidates)
            .finish()
    }
}

impl Admission {
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Alerts that still need a delivery slot (created, refreshed, escalated).
    pub fn to_schedule(&self) -> Vec<Alert> {
        self.candidates
            .iter()
            .filter(|c| c.kind != AdmissionKind::Suppressed)
            .map(|c| c.alert.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Write scheduled alerts and suppressions back to their slots.
    ///
    /// Returns every alert whose slot changed, for the audit trail. Alerts
    /// whose key was not locked by this admission are ignored.
    pub fn commit(mut self, scheduled: Vec<Alert>) -> Vec<Alert> {
        let mut committed = Vec::with_capacity(self.candidates.len());

        for candidate in self.candidates.iter().filter(|c| c.kind == AdmissionKind::Suppressed) {
            if let Some(slot) = self.guards.get_mut(&candidate.alert.key()) {
                slot.current = Some(candidate.alert.clone());
                committed.push(candidate.alert.clone());
            }
        }

        for alert in scheduled {
            match self.guards.get_mut(&alert.key()) {
                Some(slot) => {
                    slot.current = Some(alert.clone());
                    committed.push(alert);
                }
                None => warn!(alert_id = %alert.id, key = %alert.key(), "Commit for key not locked by this admission, ignoring"),
            }
        }

        debug!(farm_id = %self.farm_id, committed = committed.len(), "Admission committed");
        committed
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

#[derive(Debug, Default)]
pub struct AlertOrchestrator {
    config: AlertConfig,
    slots: DashMap<AlertKey, Arc<Mutex<AlertSlot>>>,
}

impl AlertOrchestrator {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            slots: DashMap::new(),
        }
    }

    fn slot(&self, key: &AlertKey) -> Arc<Mutex<AlertSlot>> {
        self.slots.entry(key.clone()).or_default().value().clone()
    }

    fn cooldown(&self) -> Duration {
        Duration::hours(self.config.cooldown_hours)
    }

    /// Phase one: lock the affected keys and compute candidate alerts.
    ///
    /// `recommendations` may cover several risk types; each alert receives
    /// the ones for its own risk type.
    pub async fn admit(
        &self,
        assessment: &RiskAssessment,
        recommendations: &[Recommendation],
        now: DateTime<Utc>,
    ) -> Admission {
        let qualifying: BTreeMap<AlertKey, &AssessedPrediction> = assessment
            .qualifying()
            .map(|a| {
                (
                    AlertKey {
                        farm_id: assessment.farm_id.clone(),
                        risk_type: a.prediction.risk_type,
                    },
                    a,
                )
            })
            .collect();

        // BTreeMap iteration is sorted: the global lock order
        let mut guards = BTreeMap::new();
        for key in qualifying.keys() {
            let guard = self.slot(key).lock_owned().await;
            guards.insert(key.clone(), guard);
        }

        let mut candidates = Vec::with_capacity(qualifying.len());
        for (key, assessed) in &qualifying {
            let Some(slot) = guards.get(key) else { continue };
            let recs: Vec<Recommendation> = recommendations
                .iter()
                .filter(|r| r.risk_type == key.risk_type)
                .cloned()
                .collect();
            let kind = dedup::decide(slot, assessed.prediction.severity, now, self.cooldown());
            let alert = build_alert(kind, &assessment.farm_id, slot, assessed, recs, now);

            match kind {
                AdmissionKind::Suppressed => info!(
                    key = %key,
                    alert_id = %alert.id,
                    "Alert suppressed, delivered within cool-down"
                ),
                AdmissionKind::Escalated => info!(
                    key = %key,
                    alert_id = %alert.id,
                    severity = %alert.severity,
                    revision = alert.revision,
                    "Severity increased inside cool-down, re-scheduling alert"
                ),
                _ => debug!(key = %key, alert_id = %alert.id, kind = %kind, "Alert admitted"),
            }
            candidates.push(Candidate { kind, alert });
        }

        Admission {
            farm_id: assessment.farm_id.clone(),
            guards,
            candidates,
        }
    }

    /// Scheduled → Delivered for exactly this revision of the alert.
    ///
    /// Returns the updated alert, or `None` when the slot has moved on to
    /// another alert or a newer revision, or the alert was not open. A newer
    /// revision stays scheduled so its own delivery still happens.
    pub async fn mark_delivered(&self, sent: &Alert, now: DateTime<Utc>) -> Option<Alert> {
        let slot = self.slots.get(&sent.key()).map(|s| s.value().clone())?;
        let mut slot = slot.lock().await;

        let delivered = {
            let current = slot.current.as_mut()?;
            if current.id != sent.id || current.revision != sent.revision || !current.state.is_open() {
                return None;
            }
            current.state = AlertState::Delivered;
            current.delivered_at = Some(now);
            current.updated_at = now;
            current.clone()
        };
        slot.last_delivered_at = Some(now);
        slot.last_delivered_severity = Some(delivered.severity);
        Some(delivered)
    }

    /// Any → Expired for open alerts past their expiration time.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> Vec<Alert> {
        let slots: Vec<Arc<Mutex<AlertSlot>>> = self.slots.iter().map(|e| e.value().clone()).collect();

        let mut expired = Vec::new();
        for slot in slots {
            let mut slot = slot.lock().await;
            let Some(current) = slot.current.as_mut() else { continue };
            if dedup::should_expire(current, now) {
                current.state = AlertState::Expired;
                current.updated_at = now;
                info!(
                    alert_id = %current.id,
                    key = %current.key(),
                    "Alert expired without delivery"
                );
                expired.push(current.clone());
            }
        }
        expired
    }

    /// Latest alert for a key.
    pub async fn current(&self, key: &AlertKey) -> Option<Alert> {
        let slot = self.slots.get(key).map(|s| s.value().clone())?;
        let slot = slot.lock().await;
        slot.current.clone()
    }

    /// The dispatcher holds a copy of exactly this revision, still scheduled.
    pub async fn is_current(&self, alert: &Alert) -> bool {
        match self.current(&alert.key()).await {
            Some(a) => a.id == alert.id && a.revision == alert.revision && a.state == AlertState::Scheduled,
            None => false,
        }
    }

    /// Every stored alert, optionally for one farm, highest priority first.
    pub async fn alerts(&self, farm_id: Option<&str>) -> Vec<Alert> {
        let slots: Vec<Arc<Mutex<AlertSlot>>> = self
            .slots
            .iter()
            .filter(|e| farm_id.map_or(true, |f| e.key().farm_id == f))
            .map(|e| e.value().clone())
            .collect();

        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(alert) = slot.lock().await.current.clone() {
                out.push(alert);
            }
        }
        out.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        out
    }

    pub fn tracked_keys(&self) -> usize {
        self.slots.len()
    }
}

// ============================================================================
// Alert construction
// ============================================================================

fn build_alert(
    kind: AdmissionKind,
    farm_id: &str,
    slot: &AlertSlot,
    assessed: &AssessedPrediction,
    recommendations: Vec<Recommendation>,
    now: DateTime<Utc>,
) -> Alert {
    let p = &assessed.prediction;
    let hours_to_event = (p.event_time - now).num_minutes() as f64 / 60.0;
    let priority = priority_score(p.severity, hours_to_event);

    let base = match (kind, &slot.current) {
        (AdmissionKind::Created, _) | (_, None) => Alert {
            id: uuid::Uuid::new_v4().to_string(),
            farm_id: farm_id.to_string(),
            risk_type: p.risk_type,
            severity: p.severity,
            probability: 0.0,
            confidence: 0.0,
            uncertain: false,
            priority: 0.0,
            recommendations: Vec::new(),
            event_time: p.event_time,
            delivery_time: now,
            expiration_time: p.event_time,
            state: AlertState::Pending,
            best_effort: false,
            best_effort_immediate: false,
            message: String::new(),
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            delivered_at: None,
            revision: 0,
            suppressed_count: 0,
            last_suppressed_at: None,
        },
        (_, Some(existing)) => {
            let mut alert = existing.clone();
            alert.revision = alert.revision.saturating_add(1);
            alert
        }
    };

    let mut alert = Alert {
        severity: p.severity,
        probability: p.probability,
        confidence: p.confidence,
        uncertain: assessed.uncertain,
        priority,
        recommendations,
        event_time: p.event_time,
        expiration_time: p.event_time,
        best_effort: assessed.best_effort,
        updated_at: now,
        ..base
    };
    if kind == AdmissionKind::Suppressed {
        // Delivered state and delivered_at are kept
        alert.suppressed_count = alert.suppressed_count.saturating_add(1);
        alert.last_suppressed_at = Some(now);
    } else {
        alert.state = AlertState::Pending;
    }
    alert.message = compose_message(&alert);
    alert
}

/// Farmer-facing text. Uncertainty and short notice are always spelled out.
pub fn compose_message(alert: &Alert) -> String {
    let mut msg = format!(
        "{} {} risk: {:.0}% chance, expected around {} UTC.",
        alert.severity,
        alert.risk_type,
        alert.probability * 100.0,
        alert.event_time.format("%Y-%m-%d %H:%M"),
    );
    if alert.uncertain {
        msg.push_str(&format!(
            " Forecast confidence is low ({:.0}%); check conditions before committing resources.",
            alert.confidence * 100.0
        ));
    }
    if alert.best_effort {
        msg.push_str(" Short notice: less than 24 hours until the event.");
    }
    if let Some(top) = alert.recommendations.first() {
        msg.push_str(&format!(
            " Recommended: {} (start by {} UTC).",
            top.action,
            top.deadline.format("%Y-%m-%d %H:%M")
        ));
    }
    msg
}


#[cfg(test)]
mod tests {
    use super::test_support::assessment;
    use super::*;
    use crate::types::RiskType;

    fn fix_farm(mut alerts: Vec<Alert>, farm: &str) -> Vec<Alert> {
        for a in &mut alerts {
            a.state = AlertState::Scheduled;
            assert_eq!(a.farm_id, farm);
        }
        alerts
    }

    #[tokio::test]
    async fn admit_creates_pending_candidate() {
        let orch = AlertOrchestrator::default();
        let now = Utc::now();

        let first = orch.admit(&assessment("farm-1", RiskType::Drought, Severity::High, 0.85, now), &[], now).await;
        let c = &first.candidates()[0];
        assert_eq!(c.kind, AdmissionKind::Created);
        assert_eq!(c.alert.state, AlertState::Pending);
        assert_eq!(c.alert.farm_id, "farm-1");
        assert_eq!(c.alert.expiration_time, c.alert.event_time);
        // Nothing scheduled: slot stays empty
        assert!(first.commit(vec![]).is_empty());
        assert_eq!(orch.tracked_keys(), 1);
    }

    #[tokio::test]
    async fn refresh_in_place() {
        let orch = AlertOrchestrator::default();
        let now = Utc::now();

        let first = orch.admit(&assessment("farm-1", RiskType::Drought, Severity::High, 0.85, now), &[], now).await;
        let alerts = fix_farm(first.to_schedule(), "farm-1");
        let id = alerts[0].id.clone();
        first.commit(alerts);

        let later = now + Duration::hours(1);
        let second = orch.admit(&assessment("farm-1", RiskType::Drought, Severity::High, 0.9, later), &[], later).await;
        let c = &second.candidates()[0];
        assert_eq!(c.kind, AdmissionKind::Refreshed);
        assert_eq!(c.alert.id, id);
        assert_eq!(c.alert.revision, 1);
        assert_eq!(c.alert.created_at, now);
    }

    #[tokio::test]
    async fn dropped_admission_leaves_state() {
        let orch = AlertOrchestrator::default();
        let now = Utc::now();
        let key = AlertKey { farm_id: "farm-1".to_string(), risk_type: RiskType::Frost };

        let admission = orch.admit(&assessment("farm-1", RiskType::Frost, Severity::High, 0.85, now), &[], now).await;
        drop(admission);
        assert!(orch.current(&key).await.is_none());

        // Lock was released
        let again = orch.admit(&assessment("farm-1", RiskType::Frost, Severity::High, 0.85, now), &[], now).await;
        assert_eq!(again.candidates()[0].kind, AdmissionKind::Created);
    }

    #[tokio::test]
    async fn delivered_then_suppressed_then_escalated() {
        let orch = AlertOrchestrator::default();
        let now = Utc::now();
        let key = AlertKey { farm_id: "farm-1".to_string(), risk_type: RiskType::Drought };

        let first = orch.admit(&assessment("farm-1", RiskType::Drought, Severity::High, 0.85, now), &[], now).await;
        let alerts = fix_farm(first.to_schedule(), "farm-1");
        let id = alerts[0].id.clone();
        let sent = alerts[0].clone();
        first.commit(alerts);
        assert!(orch.mark_delivered(&sent, now).await.is_some());

        let t1 = now + Duration::hours(2);
        let second = orch.admit(&assessment("farm-1", RiskType::Drought, Severity::High, 0.85, t1), &[], t1).await;
        assert_eq!(second.candidates()[0].kind, AdmissionKind::Suppressed);
        assert!(second.to_schedule().is_empty());
        let audited = second.commit(vec![]);
        assert_eq!(audited.len(), 1);
        assert_eq!(audited[0].id, id);
        assert_eq!(audited[0].state, AlertState::Delivered);
        assert_eq!(audited[0].delivered_at, Some(now));
        assert_eq!(audited[0].suppressed_count, 1);
        assert_eq!(audited[0].last_suppressed_at, Some(t1));
        assert_eq!(orch.current(&key).await.unwrap().state, AlertState::Delivered);

        let t2 = now + Duration::hours(3);
        let third = orch.admit(&assessment("farm-1", RiskType::Drought, Severity::Critical, 0.85, t2), &[], t2).await;
        let c = &third.candidates()[0];
        assert_eq!(c.kind, AdmissionKind::Escalated);
        assert_eq!(c.alert.id, id);
        assert_eq!(c.alert.revision, 2);
        assert_eq!(c.alert.severity, Severity::Critical);
        assert_eq!(c.alert.state, AlertState::Pending);
        assert_eq!(c.alert.created_at, now);
    }

    #[tokio::test]
    async fn escalation_is_delivered_under_the_same_id() {
        let orch = AlertOrchestrator::default();
        let now = Utc::now();

        let first = orch.admit(&assessment("farm-1", RiskType::Frost, Severity::High, 0.85, now), &[], now).await;
        let alerts = fix_farm(first.to_schedule(), "farm-1");
        let sent = alerts[0].clone();
        first.commit(alerts);
        orch.mark_delivered(&sent, now).await.unwrap();

        let t1 = now + Duration::hours(1);
        let escalation = orch.admit(&assessment("farm-1", RiskType::Frost, Severity::Critical, 0.85, t1), &[], t1).await;
        let rescheduled = fix_farm(escalation.to_schedule(), "farm-1");
        assert_eq!(rescheduled.len(), 1);
        let resent = rescheduled[0].clone();
        escalation.commit(rescheduled);

        let delivered = orch.mark_delivered(&resent, t1).await.unwrap();
        assert_eq!(delivered.id, sent.id);
        assert_eq!(delivered.severity, Severity::Critical);

        // Critical is now the delivered severity: a later Critical is suppressed
        let t2 = now + Duration::hours(2);
        let repeat = orch.admit(&assessment("farm-1", RiskType::Frost, Severity::Critical, 0.85, t2), &[], t2).await;
        assert_eq!(repeat.candidates()[0].kind, AdmissionKind::Suppressed);
        assert_eq!(repeat.candidates()[0].alert.id, sent.id);
    }

    #[tokio::test]
    async fn older_revision_cannot_close_a_refresh() {
        let orch = AlertOrchestrator::default();
        let now = Utc::now();

        let first = orch.admit(&assessment("farm-1", RiskType::Drought, Severity::High, 0.85, now), &[], now).await;
        let alerts = fix_farm(first.to_schedule(), "farm-1");
        let stale = alerts[0].clone();
        first.commit(alerts);

        let second = orch.admit(&assessment("farm-1", RiskType::Drought, Severity::High, 0.9, now), &[], now).await;
        let refreshed = fix_farm(second.to_schedule(), "farm-1");
        second.commit(refreshed);

        assert!(orch.mark_delivered(&stale, now).await.is_none());
        let current = orch.current(&stale.key()).await.unwrap();
        assert_eq!(current.state, AlertState::Scheduled);
        assert_eq!(current.revision, stale.revision + 1);
    }

    #[tokio::test]
    async fn expire_due_marks_open_alerts() {
        let orch = AlertOrchestrator::default();
        let now = Utc::now();
        let admission = orch.admit(&assessment("farm-1", RiskType::Flood, Severity::High, 0.85, now), &[], now).await;
        let alerts = fix_farm(admission.to_schedule(), "farm-1");
        admission.commit(alerts);

        assert!(orch.expire_due(now + Duration::hours(1)).await.is_empty());
        let expired = orch.expire_due(now + Duration::hours(31)).await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].state, AlertState::Expired);
    }

    #[tokio::test]
    async fn uncertainty_in_message() {
        let orch = AlertOrchestrator::default();
        let now = Utc::now();
        let admission = orch.admit(&assessment("farm-1", RiskType::Drought, Severity::High, 0.5, now), &[], now).await;
        let alert = &admission.candidates()[0].alert;
        assert!(alert.uncertain);
        assert!(alert.message.contains("confidence is low"));
    }

    #[test]
    fn severity_dominates_priority() {
        let critical_far = priority_score(Severity::Critical, 500.0);
        let high_soon = priority_score(Severity::High, 0.0);
        assert!(critical_far > high_soon);
        assert!(priority_score(Severity::High, 10.0) > priority_score(Severity::High, 40.0));
    }
}
