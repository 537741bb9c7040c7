//! Pipeline error taxonomy
//!
//! Only errors that make a whole farm cycle impossible surface as
//! `PipelineError`. Model and channel failures are absorbed by the ensemble
//! fallback and the delivery retry/failover logic respectively.

use crate::types::{Channel, FarmId};

/// Malformed or incomplete input; the snapshot never enters the pipeline.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("no usable observations for farm {0}")]
    Empty(FarmId),
    #[error("observation for farm {found} submitted to farm {expected}")]
    FarmMismatch { expected: FarmId, found: FarmId },
    #[error("observation from {source_id} is {secs}s in the future")]
    FutureTimestamp { source_id: String, secs: i64 },
    #[error("observation from {source_id} has quality {quality} outside [0, 1]")]
    QualityOutOfRange { source_id: String, quality: f64 },
    #[error("measurement '{name}' from {source_id} is not finite")]
    NonFinite { source_id: String, name: String },
    #[error("required feature '{0}' missing from snapshot")]
    MissingFeature(String),
}

/// One model adapter failed or timed out.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("model {model_id} timed out after {timeout_ms}ms")]
    Timeout { model_id: String, timeout_ms: u64 },
    #[error("model {model_id} unavailable: {reason}")]
    Unavailable { model_id: String, reason: String },
    #[error("model {model_id} returned invalid output: {reason}")]
    InvalidOutput { model_id: String, reason: String },
}

/// A notification transport refused or failed a send.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("channel {channel} rejected message: {reason}")]
    Rejected { channel: Channel, reason: String },
    #[error("channel {channel} unreachable: {reason}")]
    Unreachable { channel: Channel, reason: String },
}

/// Errors that abort (skip) a single farm's cycle.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid snapshot: {0}")]
    Validation(#[from] ValidationError),
    #[error("no observations available for farm {farm_id}: {detail}")]
    NoSnapshot { farm_id: FarmId, detail: String },
    #[error("farm profile unavailable for {farm_id}: {detail}")]
    ProfileUnavailable { farm_id: FarmId, detail: String },
    #[error("cycle for farm {0} cancelled")]
    Cancelled(FarmId),
    #[error("delivery queue closed")]
    QueueClosed,
}

/// The Farm/User service could not answer a lookup.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DirectoryError {
    #[error("farm {0} not registered")]
    UnknownFarm(FarmId),
    #[error("farm directory unavailable: {0}")]
    Unavailable(String),
}

/// The data processing pipeline could not supply observations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    #[error("no observations for farm {0}")]
    NoData(FarmId),
    #[error("observation source unavailable for farm {farm_id}: {reason}")]
    Unavailable { farm_id: FarmId, reason: String },
}
