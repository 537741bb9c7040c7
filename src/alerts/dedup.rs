//! Per-(farm, risk type) dedup state and the admission decision
//!
//! The decision is a pure function of the slot, so the cool-down rules are
//! tested here without any locking.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::types::{Alert, Severity};

/// Everything remembered about one alert lineage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AlertSlot {
    /// Most recent alert for the key, in whatever state it ended up
    pub current: Option<Alert>,
    /// When an alert for this key last reached a farmer
    pub last_delivered_at: Option<DateTime<Utc>>,
    /// Severity of that delivered alert
    pub last_delivered_severity: Option<Severity>,
}

impl AlertSlot {
    /// Inside the cool-down window of the last delivery.
    pub fn in_cooldown(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        self.last_delivered_at
            .is_some_and(|at| now - at < cooldown)
    }
}

/// What admitting a new qualifying prediction does to a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AdmissionKind {
    /// Fresh alert lineage (new id)
    Created,
    /// Undelivered alert updated in place (same id, revision + 1)
    Refreshed,
    /// Delivered within cool-down, but the new severity is strictly higher;
    /// re-scheduled under the same id (revision + 1)
    Escalated,
    /// Delivered within cool-down; data refreshed, stays `Delivered`
    Suppressed,
}

impl std::fmt::Display for AdmissionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionKind::Created => write!(f, "created"),
            AdmissionKind::Refreshed => write!(f, "refreshed"),
            AdmissionKind::Escalated => write!(f, "escalated"),
            AdmissionKind::Suppressed => write!(f, "suppressed"),
        }
    }
}

/// Decide how a new prediction of `severity` is admitted against `slot`.
pub fn decide(
    slot: &AlertSlot,
    severity: Severity,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> AdmissionKind {
    if let Some(current) = &slot.current {
        if current.state.is_open() && !current.is_expired(now) {
            return AdmissionKind::Refreshed;
        }
    }

    if slot.in_cooldown(now, cooldown) {
        let delivered = slot.last_delivered_severity.unwrap_or_default();
        return if severity > delivered {
            AdmissionKind::Escalated
        } else {
            AdmissionKind::Suppressed
        };
    }

    AdmissionKind::Created
}

/// Whether a stored alert should be expired at `now`.
pub fn should_expire(alert: &Alert, now: DateTime<Utc>) -> bool {
    alert.state.is_open() && alert.is_expired(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertState, RiskType};

    fn alert(state: AlertState, severity: Severity, now: DateTime<Utc>) -> Alert {
        Alert {
            id: "a-1".to_string(),
            farm_id: "farm-1".to_string(),
            risk_type: RiskType::Drought,
            severity,
            probability: 0.8,
            confidence: 0.85,
            uncertain: false,
            priority: 3000.0,
            recommendations: vec![],
            event_time: now + Duration::hours(30),
            delivery_time: now + Duration::hours(18),
            expiration_time: now + Duration::hours(30),
            state,
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
        }
    }

    #[test]
    fn empty_slot_creates() {
        let now = Utc::now();
        assert_eq!(
            decide(&AlertSlot::default(), Severity::High, now, Duration::hours(24)),
            AdmissionKind::Created
        );
    }

    #[test]
    fn open_alert_refreshes() {
        let now = Utc::now();
        for state in [AlertState::Pending, AlertState::Scheduled] {
            let slot = AlertSlot {
                current: Some(alert(state, Severity::High, now)),
                ..AlertSlot::default()
            };
            assert_eq!(decide(&slot, Severity::Medium, now, Duration::hours(24)), AdmissionKind::Refreshed);
        }
    }

    #[test]
    fn delivered_within_cooldown_suppresses() {
        let now = Utc::now();
        let slot = AlertSlot {
            current: Some(alert(AlertState::Delivered, Severity::High, now)),
            last_delivered_at: Some(now - Duration::hours(2)),
            last_delivered_severity: Some(Severity::High),
        };
        assert_eq!(decide(&slot, Severity::High, now, Duration::hours(24)), AdmissionKind::Suppressed);
        assert_eq!(decide(&slot, Severity::Medium, now, Duration::hours(24)), AdmissionKind::Suppressed);
        assert_eq!(decide(&slot, Severity::Critical, now, Duration::hours(24)), AdmissionKind::Escalated);
    }

    #[test]
    fn cooldown_elapsed_creates() {
        let now = Utc::now();
        let slot = AlertSlot {
            current: Some(alert(AlertState::Delivered, Severity::High, now)),
            last_delivered_at: Some(now - Duration::hours(25)),
            last_delivered_severity: Some(Severity::High),
        };
        assert_eq!(decide(&slot, Severity::High, now, Duration::hours(24)), AdmissionKind::Created);
    }

    #[test]
    fn expired_open_alert_is_replaced() {
        let now = Utc::now();
        let mut stale = alert(AlertState::Scheduled, Severity::High, now);
        stale.expiration_time = now - Duration::minutes(1);
        assert!(should_expire(&stale, now));
        let slot = AlertSlot { current: Some(stale), ..AlertSlot::default() };
        assert_eq!(decide(&slot, Severity::High, now, Duration::hours(24)), AdmissionKind::Created);
    }
}
