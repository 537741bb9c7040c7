//! Outbound administrator events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Channel, RiskType};

/// Why administrators are being notified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdminReason {
    /// Ensemble fell back to the climatological baseline
    ModelDegradation {
        farm_id: String,
        risk_type: RiskType,
        responded: usize,
        expected: usize,
    },
    /// A farm cycle could not run (no data, lookup timeout, ...)
    DataSourceFailure { farm_id: String, detail: String },
    /// Every delivery channel was exhausted for an alert
    DeliveryEscalation {
        alert_id: String,
        farm_id: String,
        channels: Vec<Channel>,
    },
    /// Delivery completed later than the latency target
    DeliveryLatency {
        alert_id: String,
        farm_id: String,
        delay_secs: i64,
    },
}

impl std::fmt::Display for AdminReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdminReason::ModelDegradation {
                farm_id,
                risk_type,
                responded,
                expected,
            } => write!(
                f,
                "model degradation for {farm_id}/{risk_type}: {responded}/{expected} models responded"
            ),
            AdminReason::DataSourceFailure { farm_id, detail } => {
                write!(f, "data source failure for {farm_id}: {detail}")
            }
            AdminReason::DeliveryEscalation {
                alert_id, farm_id, ..
            } => write!(f, "delivery escalated for alert {alert_id} (farm {farm_id})"),
            AdminReason::DeliveryLatency {
                alert_id,
                delay_secs,
                ..
            } => write!(f, "alert {alert_id} delivered {delay_secs}s late"),
        }
    }
}

/// Rough blast radius of the condition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImpactEstimate {
    pub farms_affected: u32,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdminNotification {
    pub reason: AdminReason,
    pub impact_estimate: ImpactEstimate,
    pub raised_at: DateTime<Utc>,
}

impl AdminNotification {
    /// Notification scoped to a single farm.
    pub fn single_farm(reason: AdminReason, summary: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            reason,
            impact_estimate: ImpactEstimate {
                farms_affected: 1,
                summary: summary.into(),
            },
            raised_at: now,
        }
    }
}
