//! Test fixtures shared across stage tests

use chrono::{DateTime, Duration, Utc};

use super::{Alert, AlertState, Channel, DeliveryStatus, DeliveryTicket, RiskType, Severity};

/// A scheduled High frost alert for `farm`, event 30h after `now`.
pub fn alert(id: &str, farm: &str, now: DateTime<Utc>) -> Alert {
    Alert {
        id: id.to_string(),
        farm_id: farm.to_string(),
        risk_type: RiskType::Frost,
        severity: Severity::High,
        probability: 0.7,
        confidence: 0.8,
        uncertain: false,
        priority: 3004.0,
        recommendations: vec![],
        event_time: now + Duration::hours(30),
        delivery_time: now + Duration::hours(18),
        expiration_time: now + Duration::hours(30),
        state: AlertState::Scheduled,
        best_effort: false,
        best_effort_immediate: false,
        message: "Frost risk".to_string(),
        created_at: now,
        updated_at: now,
        scheduled_at: Some(now),
        delivered_at: None,
        revision: 0,
        suppressed_count: 0,
        last_suppressed_at: None,
    }
}

/// A sent SMS ticket for `alert_id`.
pub fn ticket(alert_id: &str, now: DateTime<Utc>) -> DeliveryTicket {
    DeliveryTicket {
        attempt_count: 1,
        status: DeliveryStatus::Sent,
        ..DeliveryTicket::new(alert_id, "farm-1", Channel::Sms, now)
    }
}
