//! Delivery Coordinator (Stage 7)
//!
//! Sends a scheduled alert over the farm's channels in preference order:
//!
//! 1. Each channel gets `1 + max_retries` attempts, each bounded by
//!    `attempt_timeout_ms`, separated by exponential backoff with jitter
//! 2. A per-channel circuit breaker short-circuits channels that keep failing
//! 3. The first successful channel ends delivery
//! 4. If every channel is exhausted, all tickets are escalated and
//!    administrators are notified
//!
//! Ticket updates go out on the `tickets` port; admin notifications on the
//! `admin` port.

mod circuit;
pub mod dispatcher;
mod transport;

pub use circuit::{BreakerPermit, BreakerRegistry, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use dispatcher::{DeliveryDispatcher, DispatchRequest, DispatcherHandle};
pub use transport::{Ack, LogTransport, NotificationPayload, NotificationTransport};

use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::defaults::DELIVERY_LATENCY_TARGET_SECS;
use crate::config::DeliveryConfig;
use crate::error::TransportError;
use crate::ports::EventPort;
use crate::types::{AdminNotification, AdminReason, Alert, Channel, DeliveryStatus, DeliveryTicket};

#[derive(Clone)]
pub struct DeliveryCoordinator {
    transport: Arc<dyn NotificationTransport>,
    config: DeliveryConfig,
    breakers: Arc<BreakerRegistry>,
    tickets: EventPort<DeliveryTicket>,
    admin: EventPort<AdminNotification>,
}

impl DeliveryCoordinator {
    pub fn new(
        transport: Arc<dyn NotificationTransport>,
        config: DeliveryConfig,
        tickets: EventPort<DeliveryTicket>,
        admin: EventPort<AdminNotification>,
    ) -> Self {
        let breakers = Arc::new(BreakerRegistry::new(
            config.breaker_failure_threshold,
            Duration::from_secs(config.breaker_cooldown_secs),
        ));
        Self {
            transport,
            config,
            breakers,
            tickets,
            admin,
        }
    }

    /// Circuit-breaker state of every channel used so far.
    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.snapshots()
    }

    /// Deliver `alert` over `channels` (preference order).
    ///
    /// Returns one ticket per channel attempted. Channels after the first
    /// success are not attempted.
    pub async fn deliver(&self, alert: &Alert, channels: &[Channel], language: &str) -> Vec<DeliveryTicket> {
        let payload = NotificationPayload::from_alert(alert, language);
        let mut tickets = Vec::with_capacity(channels.len());

        for &channel in channels {
            let mut ticket = DeliveryTicket::new(&alert.id, &alert.farm_id, channel, Utc::now());
            self.attempt_channel(channel, &payload, &mut ticket).await;
            let delivered = ticket.status.is_success();
            self.tickets.emit(ticket.clone());
            tickets.push(ticket);
            if delivered {
                self.check_latency(alert);
                return tickets;
            }
            debug!(alert_id = %alert.id, channel = %channel, "Channel exhausted, failing over");
        }

        self.escalate(alert, channels, &mut tickets);
        tickets
    }

    async fn attempt_channel(&self, channel: Channel, payload: &NotificationPayload, ticket: &mut DeliveryTicket) {
        let breaker = self.breakers.get(channel);
        let attempts = self.config.max_retries.saturating_add(1);
        let attempt_timeout = Duration::from_millis(self.config.attempt_timeout_ms);

        for attempt in 0..attempts {
            let Some(permit) = breaker.try_acquire() else {
                ticket.status = DeliveryStatus::Failed;
                ticket.last_error = Some(format!("circuit open for {channel}"));
                ticket.updated_at = Utc::now();
                debug!(alert_id = %payload.alert_id, channel = %channel, "Circuit open, skipping channel");
                return;
            };

            ticket.attempt_count += 1;
            let outcome = match tokio::time::timeout(attempt_timeout, self.transport.send(channel, payload)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Unreachable {
                    channel,
                    reason: format!("timed out after {}ms", self.config.attempt_timeout_ms),
                }),
            };
            ticket.updated_at = Utc::now();

            match outcome {
                Ok(ack) => {
                    permit.success();
                    ticket.status = if ack.confirmed {
                        DeliveryStatus::Confirmed
                    } else {
                        DeliveryStatus::Sent
                    };
                    ticket.last_error = None;
                    info!(
                        alert_id = %payload.alert_id,
                        farm_id = %payload.farm_id,
                        channel = %channel,
                        attempts = ticket.attempt_count,
                        status = %ticket.status,
                        "Alert delivered"
                    );
                    return;
                }
                Err(e @ TransportError::Rejected { .. }) => {
                    // The gateway answered; retrying the same message won't help.
                    // Dropping the permit frees a half-open trial slot.
                    drop(permit);
                    ticket.status = DeliveryStatus::Failed;
                    ticket.last_error = Some(e.to_string());
                    warn!(alert_id = %payload.alert_id, channel = %channel, error = %e, "Message rejected");
                    return;
                }
                Err(e) => {
                    permit.failure();
                    ticket.status = DeliveryStatus::Failed;
                    ticket.last_error = Some(e.to_string());
                    warn!(
                        alert_id = %payload.alert_id,
                        channel = %channel,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        error = %e,
                        "Delivery attempt failed"
                    );
                    if attempt + 1 < attempts {
                        let delay = self.backoff(attempt);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    /// `base × 2^attempt`, capped, plus up to 50% random jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .config
            .backoff_base_ms
            .saturating_mul(1u64 << attempt.min(20))
            .min(self.config.backoff_max_ms);
        let jitter = if self.config.jitter && exp > 1 {
            rand::thread_rng().gen_range(0..=exp / 2)
        } else {
            0
        };
        Duration::from_millis(exp + jitter)
    }

    fn escalate(&self, alert: &Alert, channels: &[Channel], tickets: &mut [DeliveryTicket]) {
        let now = Utc::now();
        for ticket in tickets.iter_mut() {
            ticket.status = DeliveryStatus::Escalated;
            ticket.updated_at = now;
            self.tickets.emit(ticket.clone());
        }

        error!(
            alert_id = %alert.id,
            farm_id = %alert.farm_id,
            severity = %alert.severity,
            channels = channels.len(),
            "All delivery channels exhausted, escalating"
        );
        self.admin.emit(AdminNotification::single_farm(
            AdminReason::DeliveryEscalation {
                alert_id: alert.id.clone(),
                farm_id: alert.farm_id.clone(),
                channels: channels.to_vec(),
            },
            format!("{} {} alert could not be delivered", alert.severity, alert.risk_type),
            now,
        ));
    }

    fn check_latency(&self, alert: &Alert) {
        let now = Utc::now();
        let delay_secs = (now - alert.delivery_time).num_seconds();
        if delay_secs > DELIVERY_LATENCY_TARGET_SECS {
            warn!(alert_id = %alert.id, farm_id = %alert.farm_id, delay_secs, "Delivery exceeded latency target");
            self.admin.emit(AdminNotification::single_farm(
                AdminReason::DeliveryLatency {
                    alert_id: alert.id.clone(),
                    farm_id: alert.farm_id.clone(),
                    delay_secs,
                },
                format!("delivered {delay_secs}s after it became due"),
                now,
            ));
        }
    }
}
