//! Notification transports
//!
//! Actual SMS/push/email/voice gateways live outside this crate. Only the
//! delivery coordinator calls a transport.

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::error::TransportError;
use crate::types::{Alert, Channel, RiskType, Severity};

/// What a transport is asked to send.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NotificationPayload {
    pub alert_id: String,
    pub farm_id: String,
    pub risk_type: RiskType,
    pub severity: Severity,
    pub message: String,
    pub language: String,
}

impl NotificationPayload {
    pub fn from_alert(alert: &Alert, language: &str) -> Self {
        Self {
            alert_id: alert.id.clone(),
            farm_id: alert.farm_id.clone(),
            risk_type: alert.risk_type,
            severity: alert.severity,
            message: alert.message.clone(),
            language: language.to_string(),
        }
    }
}

/// Transport acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    /// Provider reported a delivery receipt, not just acceptance
    pub confirmed: bool,
    pub provider_ref: Option<String>,
}

#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(&self, channel: Channel, payload: &NotificationPayload) -> Result<Ack, TransportError>;
}

/// Writes every notification to the log. Used by the standalone binary.
#[derive(Debug, Default, Clone)]
pub struct LogTransport;

#[async_trait]
impl NotificationTransport for LogTransport {
    async fn send(&self, channel: Channel, payload: &NotificationPayload) -> Result<Ack, TransportError> {
        info!(
            channel = %channel,
            alert_id = %payload.alert_id,
            farm_id = %payload.farm_id,
            severity = %payload.severity,
            "NOTIFY: {}",
            payload.message
        );
        Ok(Ack {
            confirmed: false,
            provider_ref: Some(format!("log-{}", uuid::Uuid::new_v4())),
        })
    }
}
