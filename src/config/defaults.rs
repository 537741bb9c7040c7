//! System-wide default constants.
//!
//! Timing guarantees that farmers rely on are constants, not config keys.
//! Grouped by pipeline stage for easy discovery.

// ============================================================================
// Timing Guarantees
// ============================================================================

/// Minimum time-to-event for a prediction to be actionable (hours).
pub const ACTIONABLE_LEAD_HOURS: i64 = 24;

/// Minimum lead time between delivery and event for High/Critical alerts (hours).
pub const HIGH_SEVERITY_LEAD_HOURS: i64 = 12;

/// Medium/Low alerts are delivered this long before the event (hours).
pub const STANDARD_LEAD_HOURS: i64 = 24;

/// Delivery should complete within this long of the alert becoming due (seconds).
pub const DELIVERY_LATENCY_TARGET_SECS: i64 = 300;

// ============================================================================
// Ensemble / Risk
// ============================================================================

/// Predictions with confidence below this carry an uncertainty flag.
pub const UNCERTAINTY_CONFIDENCE: f64 = 0.70;

/// Hard upper bound for the degraded confidence ceiling.
pub const MAX_DEGRADED_CONFIDENCE: f64 = 0.5;

/// Maximum variance of values bounded in [0, 1]; used to normalize agreement.
pub const MAX_PROBABILITY_VARIANCE: f64 = 0.25;

// ============================================================================
// Priority
// ============================================================================

/// Weight of the severity rank in the priority score (dominant term).
pub const PRIORITY_SEVERITY_WEIGHT: f64 = 1_000.0;

/// Weight of the inverse time-to-event term. Must stay below
/// `PRIORITY_SEVERITY_WEIGHT` so severity always dominates.
pub const PRIORITY_TIME_WEIGHT: f64 = 100.0;

// ============================================================================
// Pipeline / Runtime
// ============================================================================

/// Capacity of the pipeline → delivery dispatcher queue.
pub const DELIVERY_QUEUE_CAPACITY: usize = 256;

/// Maximum admin notifications retained for the monitoring API.
pub const ADMIN_EVENT_HISTORY: usize = 500;

/// Maximum records kept by the in-memory audit store, per record type.
pub const IN_MEMORY_AUDIT_LIMIT: usize = 5_000;

/// Config file searched in the working directory.
pub const CONFIG_FILE_NAME: &str = "cropwatch.toml";

/// Environment variable pointing at a config file.
pub const CONFIG_ENV_VAR: &str = "CROPWATCH_CONFIG";
