//! Stage 7 types: DeliveryTicket, DeliveryStatus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Channel;

/// Outcome of delivery on one channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    /// Transport accepted the message
    Sent,
    /// Transport reported a delivery receipt
    Confirmed,
    Failed,
    /// Every channel exhausted; handed to administrators
    Escalated,
}

impl DeliveryStatus {
    pub fn is_success(self) -> bool {
        matches!(self, DeliveryStatus::Sent | DeliveryStatus::Confirmed)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Sent => write!(f, "sent"),
            DeliveryStatus::Confirmed => write!(f, "confirmed"),
            DeliveryStatus::Failed => write!(f, "failed"),
            DeliveryStatus::Escalated => write!(f, "escalated"),
        }
    }
}

/// Delivery record for one alert on one channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryTicket {
    pub alert_id: String,
    pub farm_id: String,
    pub channel: Channel,
    pub attempt_count: u32,
    pub status: DeliveryStatus,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryTicket {
    pub fn new(alert_id: &str, farm_id: &str, channel: Channel, now: DateTime<Utc>) -> Self {
        Self {
            alert_id: alert_id.to_string(),
            farm_id: farm_id.to_string(),
            channel,
            attempt_count: 0,
            status: DeliveryStatus::Pending,
            last_error: None,
            updated_at: now,
        }
    }
}
