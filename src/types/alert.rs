//! Stage 4-6 types: Recommendation, Alert, AlertState

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{FarmId, RiskType, Severity};

// ============================================================================
// Stage 4: Recommendations
// ============================================================================

/// How soon a recommendation must be acted upon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Urgency {
    /// Deadline inside the emergency window
    Immediate,
    /// Deadline within 24 hours
    Soon,
    /// Deadline further out
    Planned,
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Urgency::Immediate => write!(f, "IMMEDIATE"),
            Urgency::Soon => write!(f, "SOON"),
            Urgency::Planned => write!(f, "PLANNED"),
        }
    }
}

/// A ranked protective action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub risk_type: RiskType,
    pub action: String,
    pub urgency: Urgency,
    /// Expected reduction of the loss (0.0-1.0)
    pub expected_effectiveness: f64,
    /// Estimated cost (local currency)
    pub cost: f64,
    /// Latest time the action can start; never after the event
    pub deadline: DateTime<Utc>,
    /// Hours needed to put the action in place
    pub time_to_implement_hours: f64,
    /// effectiveness × feasibility / normalized cost
    pub score: f64,
    /// 1-based rank by score alone
    pub score_rank: usize,
    /// Deadline inside the emergency window; forced to the front
    pub emergency: bool,
}

// ============================================================================
// Stage 5-6: Alerts
// ============================================================================

/// Lifecycle of an alert for one (farm, risk type).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AlertState {
    Idle,
    Pending,
    Scheduled,
    Delivered,
    Expired,
}

impl AlertState {
    /// Not yet delivered and not terminal
    pub fn is_open(self) -> bool {
        matches!(self, AlertState::Pending | AlertState::Scheduled)
    }
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertState::Idle => write!(f, "IDLE"),
            AlertState::Pending => write!(f, "PENDING"),
            AlertState::Scheduled => write!(f, "SCHEDULED"),
            AlertState::Delivered => write!(f, "DELIVERED"),
            AlertState::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// Dedup key: one alert lineage per farm and risk type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlertKey {
    pub farm_id: FarmId,
    pub risk_type: RiskType,
}

impl std::fmt::Display for AlertKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.farm_id, self.risk_type.short_code())
    }
}

/// A farmer-facing notification unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: String,
    pub farm_id: FarmId,
    pub risk_type: RiskType,
    pub severity: Severity,
    pub probability: f64,
    pub confidence: f64,
    /// Confidence below threshold; surfaced in `message`
    pub uncertain: bool,
    /// Total-order score: severity dominates, sooner events break ties
    pub priority: f64,
    pub recommendations: Vec<Recommendation>,
    pub event_time: DateTime<Utc>,
    /// Assigned by the priority scheduler
    pub delivery_time: DateTime<Utc>,
    /// Defaults to `event_time`
    pub expiration_time: DateTime<Utc>,
    pub state: AlertState,
    /// Promoted with less than the minimum lead time
    pub best_effort: bool,
    /// Computed delivery time was already past; sent as soon as possible
    pub best_effort_immediate: bool,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When the alert last entered `Scheduled`
    pub scheduled_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    /// Incremented on every refresh; lets the dispatcher skip stale copies
    pub revision: u32,
    /// Repeats absorbed by the cool-down after delivery
    #[serde(default)]
    pub suppressed_count: u32,
    #[serde(default)]
    pub last_suppressed_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn key(&self) -> AlertKey {
        AlertKey {
            farm_id: self.farm_id.clone(),
            risk_type: self.risk_type,
        }
    }

    pub fn time_to_event(&self, now: DateTime<Utc>) -> Duration {
        self.event_time - now
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiration_time
    }
}
