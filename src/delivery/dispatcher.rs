//! Delivery dispatcher - time-ordered queue in front of the coordinator
//!
//! Pipeline cycles hand scheduled alerts over an mpsc queue. The dispatcher
//! keeps them in a heap ordered by delivery time and, on every message or
//! tick:
//!
//! - delivers alerts whose delivery time has come, unless the orchestrator
//!   has since refreshed, delivered or expired them
//! - parks a revision that comes due while an older revision of the same
//!   alert is still being sent, and re-queues it once that send finishes
//! - marks successful deliveries in the orchestrator
//! - sweeps expired alerts
//!
//! Every alert and ticket change is written to the audit store.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::DeliveryCoordinator;
use crate::alerts::AlertOrchestrator;
use crate::config::DeliveryConfig;
use crate::error::PipelineError;
use crate::storage::AuditStore;
use crate::types::{Alert, Channel};

// ============================================================================
// Requests
// ============================================================================

/// One scheduled alert plus where to send it.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub alert: Alert,
    pub channels: Vec<Channel>,
    pub language: String,
}

/// Heap entry: earliest delivery time first, then highest priority.
struct Queued(DispatchRequest);

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (&self.0.alert, &other.0.alert);
        // Reversed: BinaryHeap pops the greatest element
        b.delivery_time
            .cmp(&a.delivery_time)
            .then_with(|| a.priority.partial_cmp(&b.priority).unwrap_or(Ordering::Equal))
            .then_with(|| b.id.cmp(&a.id))
            .then_with(|| a.revision.cmp(&b.revision))
    }
}

/// Submit side of the dispatcher queue.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<DispatchRequest>,
}

impl DispatcherHandle {
    pub async fn submit(&self, request: DispatchRequest) -> Result<(), PipelineError> {
        self.tx.send(request).await.map_err(|_| PipelineError::QueueClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct DeliveryDispatcher {
    coordinator: DeliveryCoordinator,
    orchestrator: Arc<AlertOrchestrator>,
    audit: Arc<dyn AuditStore>,
    rx: mpsc::Receiver<DispatchRequest>,
    queue: BinaryHeap<Queued>,
    in_flight: JoinSet<String>,
    in_flight_ids: HashSet<String>,
    /// Newest revision waiting on an in-flight send of the same alert id
    deferred: HashMap<String, DispatchRequest>,
    tick: Duration,
}

impl DeliveryDispatcher {
    pub fn new(
        coordinator: DeliveryCoordinator,
        orchestrator: Arc<AlertOrchestrator>,
        audit: Arc<dyn AuditStore>,
        config: &DeliveryConfig,
        capacity: usize,
    ) -> (Self, DispatcherHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let dispatcher = Self {
            coordinator,
            orchestrator,
            audit,
            rx,
            queue: BinaryHeap::new(),
            in_flight: JoinSet::new(),
            in_flight_ids: HashSet::new(),
            deferred: HashMap::new(),
            tick: Duration::from_millis(config.dispatch_tick_ms.max(1)),
        };
        (dispatcher, DispatcherHandle { tx })
    }

    /// Alerts waiting for their delivery time or for an earlier send.
    pub fn pending(&self) -> usize {
        self.queue.len() + self.deferred.len()
    }

    /// Run until cancelled, or until every handle is dropped and the queue
    /// has drained.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(tick_ms = self.tick.as_millis(), "DeliveryDispatcher starting");

        let mut tick = tokio::time::interval(self.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut rx_open = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(pending = self.queue.len(), "Shutdown requested, stopping dispatcher");
                    break;
                }
                msg = self.rx.recv(), if rx_open => match msg {
                    Some(request) => {
                        self.enqueue(request);
                        self.dispatch_due(Utc::now()).await;
                    }
                    None => {
                        debug!("Dispatch queue closed, draining");
                        rx_open = false;
                    }
                },
                _ = tick.tick() => {
                    let now = Utc::now();
                    self.dispatch_due(now).await;
                    self.sweep_expired(now).await;
                }
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    self.finish(joined);
                }
            }

            if !rx_open && self.queue.is_empty() && self.deferred.is_empty() && self.in_flight.is_empty() {
                break;
            }
        }

        while let Some(joined) = self.in_flight.join_next().await {
            self.finish(joined);
        }
        info!(pending = self.pending(), "DeliveryDispatcher stopped");
    }

    fn enqueue(&mut self, request: DispatchRequest) {
        debug!(
            alert_id = %request.alert.id,
            revision = request.alert.revision,
            delivery_time = %request.alert.delivery_time,
            queue_depth = self.queue.len() + 1,
            "Alert queued for delivery"
        );
        self.queue.push(Queued(request));
    }

    async fn dispatch_due(&mut self, now: DateTime<Utc>) {
        while self.queue.peek().is_some_and(|q| q.0.alert.delivery_time <= now) {
            let Some(Queued(request)) = self.queue.pop() else { break };
            let alert = &request.alert;

            if self.in_flight_ids.contains(&alert.id) {
                self.defer(request);
                continue;
            }
            if !self.orchestrator.is_current(alert).await {
                debug!(
                    alert_id = %alert.id,
                    revision = alert.revision,
                    "Alert superseded or closed, skipping"
                );
                continue;
            }

            self.in_flight_ids.insert(alert.id.clone());
            let coordinator = self.coordinator.clone();
            let orchestrator = Arc::clone(&self.orchestrator);
            let audit = Arc::clone(&self.audit);
            self.in_flight
                .spawn(async move { deliver_one(coordinator, orchestrator, audit, request).await });
        }
    }

    /// Hold a request until the in-flight send of the same id completes.
    /// Only the highest revision is kept.
    fn defer(&mut self, request: DispatchRequest) {
        let id = request.alert.id.clone();
        match self.deferred.get(&id) {
            Some(parked) if parked.alert.revision >= request.alert.revision => {
                debug!(alert_id = %id, revision = request.alert.revision, "Older revision already superseded, dropping");
            }
            _ => {
                debug!(
                    alert_id = %id,
                    revision = request.alert.revision,
                    "Earlier revision still in flight, deferring"
                );
                self.deferred.insert(id, request);
            }
        }
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) {
        for alert in self.orchestrator.expire_due(now).await {
            if let Err(e) = self.audit.record_alert(&alert) {
                warn!(alert_id = %alert.id, error = %e, "Failed to audit expired alert");
            }
        }
    }

    fn finish(&mut self, joined: Result<String, tokio::task::JoinError>) {
        match joined {
            Ok(alert_id) => {
                self.in_flight_ids.remove(&alert_id);
                if let Some(request) = self.deferred.remove(&alert_id) {
                    self.enqueue(request);
                }
            }
            Err(e) => warn!(error = %e, "Delivery task failed"),
        }
    }
}

async fn deliver_one(
    coordinator: DeliveryCoordinator,
    orchestrator: Arc<AlertOrchestrator>,
    audit: Arc<dyn AuditStore>,
    request: DispatchRequest,
) -> String {
    let DispatchRequest { alert, channels, language } = request;
    let tickets = coordinator.deliver(&alert, &channels, &language).await;

    for ticket in &tickets {
        if let Err(e) = audit.record_ticket(ticket) {
            warn!(alert_id = %alert.id, channel = %ticket.channel, error = %e, "Failed to audit ticket");
        }
    }

    if tickets.iter().any(|t| t.status.is_success()) {
        match orchestrator.mark_delivered(&alert, Utc::now()).await {
            Some(delivered) => {
                if let Err(e) = audit.record_alert(&delivered) {
                    warn!(alert_id = %alert.id, error = %e, "Failed to audit delivered alert");
                }
            }
            None => debug!(
                alert_id = %alert.id,
                revision = alert.revision,
                "Alert moved on while delivery was in flight"
            ),
        }
    }

    alert.id
}
