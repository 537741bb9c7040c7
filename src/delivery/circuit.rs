//! Per-channel circuit breaker
//!
//! Closed → Open after N consecutive failures; Open → HalfOpen once the
//! cooldown elapses; a HalfOpen trial closes the breaker on success and
//! re-opens it on failure. Shared by every delivery in flight.
//!
//! Sends go through a [`BreakerPermit`]. A permit dropped without a verdict
//! (rejected message, cancelled task) frees the half-open trial slot so the
//! next send can try again.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::types::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "CLOSED"),
            BreakerState::Open => write!(f, "OPEN"),
            BreakerState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// A half-open trial is in flight
    trialing: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    channel: Channel,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

/// Point-in-time view for monitoring.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BreakerSnapshot {
    pub channel: Channel,
    pub state: BreakerState,
    pub consecutive_failures: u32,
}

impl CircuitBreaker {
    pub fn new(channel: Channel, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            channel,
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trialing: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!(channel = %self.channel, "Circuit breaker lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Permit for one send, or `None` while the breaker is open or another
    /// half-open trial is in flight. Moves Open → HalfOpen once the cooldown
    /// has elapsed.
    pub fn try_acquire(self: &Arc<Self>) -> Option<BreakerPermit> {
        let mut inner = self.lock();
        let trial = match inner.state {
            BreakerState::Closed => false,
            BreakerState::Open => {
                if !inner.opened_at.is_some_and(|t| t.elapsed() >= self.cooldown) {
                    return None;
                }
                inner.state = BreakerState::HalfOpen;
                info!(channel = %self.channel, "Circuit breaker half-open, allowing a trial send");
                true
            }
            BreakerState::HalfOpen => {
                if inner.trialing {
                    return None;
                }
                true
            }
        };
        if trial {
            inner.trialing = true;
        }
        Some(BreakerPermit {
            breaker: Arc::clone(self),
            trial,
            settled: false,
        })
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.trialing {
            inner.trialing = false;
            debug!(channel = %self.channel, "Half-open trial released without a verdict");
        }
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != BreakerState::Closed {
            info!(channel = %self.channel, "Circuit breaker closed");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trialing = false;
    }

    fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.trialing = false;
        let trip = inner.state == BreakerState::HalfOpen
            || inner.consecutive_failures >= self.failure_threshold;
        if trip && inner.state != BreakerState::Open {
            warn!(
                channel = %self.channel,
                failures = inner.consecutive_failures,
                "Circuit breaker opened"
            );
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        } else if trip {
            inner.opened_at = Some(Instant::now());
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            channel: self.channel,
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
        }
    }
}

/// Right to attempt one send on a channel.
///
/// Report the outcome with [`success`](Self::success) or
/// [`failure`](Self::failure). Dropping the permit without either leaves the
/// failure count alone and frees the trial slot.
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    settled: bool,
}

impl BreakerPermit {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.release_trial();
        }
    }
}

/// One breaker per channel, created on first use.
#[derive(Debug)]
pub struct BreakerRegistry {
    failure_threshold: u32,
    cooldown: Duration,
    breakers: Mutex<BTreeMap<Channel, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            breakers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, channel: Channel) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(|poisoned| {
            warn!("Breaker registry lock poisoned, recovering");
            poisoned.into_inner()
        });
        breakers
            .entry(channel)
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(channel, self.failure_threshold, self.cooldown))
            })
            .clone()
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let breakers = self.breakers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        breakers.values().map(|b| b.snapshot()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown: Duration) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(Channel::Sms, threshold, cooldown))
    }

    fn fail(b: &Arc<CircuitBreaker>) {
        b.try_acquire().unwrap().failure();
    }

    #[test]
    fn opens_after_threshold() {
        let b = breaker(3, Duration::from_secs(60));
        fail(&b);
        fail(&b);
        assert!(b.try_acquire().is_some());
        fail(&b);
        assert_eq!(b.state(), BreakerState::Open);
        assert!(b.try_acquire().is_none());
    }

    #[test]
    fn success_resets_count() {
        let b = breaker(2, Duration::from_secs(60));
        fail(&b);
        b.try_acquire().unwrap().success();
        fail(&b);
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.snapshot().consecutive_failures, 1);
    }

    #[test]
    fn half_open_single_trial() {
        let b = breaker(1, Duration::ZERO);
        fail(&b);
        assert_eq!(b.state(), BreakerState::Open);
        // Cooldown of zero: next permit is the trial
        let trial = b.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert!(b.try_acquire().is_none(), "only one trial at a time");
        trial.success();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn failed_trial_reopens() {
        let b = breaker(5, Duration::ZERO);
        for _ in 0..5 {
            fail(&b);
        }
        fail(&b);
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn unsettled_permit_frees_the_slot() {
        let b = breaker(1, Duration::ZERO);
        fail(&b);

        // Rejected message: neither success nor failure
        drop(b.try_acquire().unwrap());
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert_eq!(b.snapshot().consecutive_failures, 1);

        let next = b.try_acquire().expect("trial slot released");
        assert!(next.is_trial());
        next.success();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn aborted_send_frees_the_slot() {
        let b = breaker(1, Duration::ZERO);
        fail(&b);

        let trial = b.try_acquire().unwrap();
        let task = tokio::spawn(async move {
            let _trial = trial;
            std::future::pending::<()>().await;
        });
        tokio::task::yield_now().await;
        assert!(b.try_acquire().is_none());

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(b.try_acquire().is_some());
    }

    #[test]
    fn registry_shares_breakers() {
        let reg = BreakerRegistry::new(1, Duration::from_secs(60));
        fail(&reg.get(Channel::Email));
        assert_eq!(reg.get(Channel::Email).state(), BreakerState::Open);
        assert_eq!(reg.snapshots().len(), 1);
    }
}
