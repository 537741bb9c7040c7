//! Priority Scheduler (Stage 6)
//!
//! Assigns each alert a delivery time and returns the alerts in a
//! deterministic total order:
//!
//! 1. severity, highest first
//! 2. time to event, soonest first
//! 3. probability, highest first
//! 4. farm id, then risk type, then alert id (scheduling conflicts)
//!
//! Delivery time:
//! - High/Critical: `event_time - max(12h, lead_buffer)`
//! - Medium/Low: `max(now, event_time - 24h)`
//!
//! A computed time already in the past is delivered now and flagged
//! best-effort-immediate. Scheduling the same alerts again at the same
//! instant yields the same output.

use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
use tracing::{debug, warn};

use crate::config::defaults::{HIGH_SEVERITY_LEAD_HOURS, STANDARD_LEAD_HOURS};
use crate::config::SchedulerConfig;
use crate::types::{Alert, AlertState};

#[derive(Debug, Clone, Default)]
pub struct PriorityScheduler {
    config: SchedulerConfig,
}

impl PriorityScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Lead time applied to High/Critical alerts.
    pub fn urgent_lead(&self) -> Duration {
        Duration::hours(HIGH_SEVERITY_LEAD_HOURS.max(self.config.lead_buffer_hours))
    }

    /// Target delivery time before clamping to `now`.
    pub fn target_delivery(&self, alert: &Alert, now: DateTime<Utc>) -> DateTime<Utc> {
        if alert.severity.is_urgent() {
            alert.event_time - self.urgent_lead()
        } else {
            (alert.event_time - Duration::hours(STANDARD_LEAD_HOURS)).max(now)
        }
    }

    pub fn schedule(&self, mut alerts: Vec<Alert>, now: DateTime<Utc>) -> Vec<Alert> {
        alerts.sort_by(|a, b| compare(a, b, now));

        for alert in &mut alerts {
            let target = self.target_delivery(alert, now);
            if target < now {
                alert.delivery_time = now;
                alert.best_effort_immediate = true;
                warn!(
                    alert_id = %alert.id,
                    key = %alert.key(),
                    severity = %alert.severity,
                    missed_by_mins = (now - target).num_minutes(),
                    "Lead-time target already passed, delivering immediately"
                );
            } else {
                alert.delivery_time = target;
                alert.best_effort_immediate = false;
            }

            if alert.state != AlertState::Scheduled {
                alert.state = AlertState::Scheduled;
                alert.scheduled_at = Some(now);
            }
        }

        debug!(count = alerts.len(), "Alerts scheduled");
        alerts
    }
}

fn compare(a: &Alert, b: &Alert, now: DateTime<Utc>) -> Ordering {
    b.severity
        .cmp(&a.severity)
        .then_with(|| a.time_to_event(now).cmp(&b.time_to_event(now)))
        .then_with(|| b.probability.partial_cmp(&a.probability).unwrap_or(Ordering::Equal))
        .then_with(|| a.farm_id.cmp(&b.farm_id))
        .then_with(|| a.risk_type.cmp(&b.risk_type))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RiskType, Severity};

    fn alert(id: &str, farm: &str, severity: Severity, hours: i64, probability: f64, now: DateTime<Utc>) -> Alert {
        let event_time = now + Duration::hours(hours);
        Alert {
            id: id.to_string(),
            farm_id: farm.to_string(),
            risk_type: RiskType::Drought,
            severity,
            probability,
            confidence: 0.8,
            uncertain: false,
            priority: 0.0,
            recommendations: vec![],
            event_time,
            delivery_time: now,
            expiration_time: event_time,
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
        }
    }

    #[test]
    fn ordering_is_total_and_severity_first() {
        let now = Utc::now();
        let out = PriorityScheduler::default().schedule(
            vec![
                alert("a", "farm-2", Severity::Medium, 30, 0.5, now),
                alert("b", "farm-1", Severity::Critical, 90, 0.9, now),
                alert("c", "farm-1", Severity::High, 40, 0.7, now),
                alert("d", "farm-1", Severity::High, 30, 0.6, now),
                alert("e", "farm-3", Severity::High, 30, 0.6, now),
                alert("f", "farm-2", Severity::High, 30, 0.8, now),
            ],
            now,
        );
        let ids: Vec<&str> = out.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "f", "d", "e", "c", "a"]);
        for pair in out.windows(2) {
            assert!(pair[0].severity >= pair[1].severity);
            if pair[0].severity == pair[1].severity {
                assert!(pair[0].event_time <= pair[1].event_time);
            }
        }
    }

    #[test]
    fn urgent_alerts_get_twelve_hours() {
        let now = Utc::now();
        let out = PriorityScheduler::default().schedule(vec![alert("a", "farm-1", Severity::High, 30, 0.8, now)], now);
        assert_eq!(out[0].delivery_time, out[0].event_time - Duration::hours(12));
        assert_eq!(out[0].state, AlertState::Scheduled);
        assert_eq!(out[0].scheduled_at, Some(now));
        assert!(!out[0].best_effort_immediate);
    }

    #[test]
    fn lead_buffer_extends_urgent_lead() {
        let now = Utc::now();
        let scheduler = PriorityScheduler::new(SchedulerConfig { lead_buffer_hours: 18 });
        let out = scheduler.schedule(vec![alert("a", "farm-1", Severity::Critical, 30, 0.9, now)], now);
        assert_eq!(out[0].delivery_time, out[0].event_time - Duration::hours(18));
    }

    #[test]
    fn standard_alerts_clamped_to_now() {
        let now = Utc::now();
        let out = PriorityScheduler::default().schedule(
            vec![
                alert("near", "farm-1", Severity::Medium, 20, 0.5, now),
                alert("far", "farm-1", Severity::Low, 48, 0.5, now),
            ],
            now,
        );
        let near = out.iter().find(|a| a.id == "near").unwrap();
        let far = out.iter().find(|a| a.id == "far").unwrap();
        assert_eq!(near.delivery_time, now);
        assert!(!near.best_effort_immediate);
        assert_eq!(far.delivery_time, far.event_time - Duration::hours(24));
    }

    #[test]
    fn past_target_is_best_effort_immediate() {
        let now = Utc::now();
        let out = PriorityScheduler::default().schedule(vec![alert("a", "farm-1", Severity::Critical, 6, 0.9, now)], now);
        assert_eq!(out[0].delivery_time, now);
        assert!(out[0].best_effort_immediate);
    }

    #[test]
    fn idempotent() {
        let now = Utc::now();
        let scheduler = PriorityScheduler::default();
        let input = vec![
            alert("a", "farm-2", Severity::Medium, 30, 0.5, now),
            alert("b", "farm-1", Severity::Critical, 6, 0.9, now),
            alert("c", "farm-1", Severity::High, 40, 0.7, now),
        ];
        let once = scheduler.schedule(input, now);
        let twice = scheduler.schedule(once.clone(), now);
        assert_eq!(once, twice);
    }
}
