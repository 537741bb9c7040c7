//! CropWatch: Farm Risk Decision Pipeline
//!
//! Turns per-farm environmental observations into prioritized, deduplicated,
//! actionable alerts and delivers them before the predicted event.
//!
//! ## Architecture
//!
//! - **Feature Aggregator**: observations → immutable `FeatureSnapshot`
//! - **Ensemble Predictor**: weighted combination of independent `Predictor`s
//! - **Risk Evaluator**: severity, lead-time and uncertainty rules
//! - **Recommendation Synthesizer**: ranked, resource-feasible actions
//! - **Alert Orchestrator**: per-(farm, risk type) state machine and dedup
//! - **Priority Scheduler**: deterministic ordering and delivery times
//! - **Delivery Coordinator**: multi-channel delivery with retry and failover

pub mod config;
pub mod error;
pub mod ports;
pub mod types;

// Pipeline stages
pub mod features;
pub mod ensemble;
pub mod risk;
pub mod recommend;
pub mod alerts;
pub mod scheduler;
pub mod delivery;

// Runtime and surfaces
pub mod storage;
pub mod pipeline;
pub mod api;

// Re-export configuration
pub use config::PipelineConfig;

// Re-export commonly used types
pub use types::{
    AdminNotification, Alert, AlertState, Channel, DeliveryTicket, EnsemblePrediction,
    FarmProfile, FeatureSnapshot, Observation, Recommendation, RiskAssessment, RiskType,
    Severity, ThresholdConfig,
};

// Re-export errors
pub use error::{PipelineError, ValidationError};

// Re-export stage entry points
pub use alerts::AlertOrchestrator;
pub use delivery::{DeliveryCoordinator, DeliveryDispatcher};
pub use ensemble::{EnsemblePredictor, ModelRegistry};
pub use features::FeatureAggregator;
pub use pipeline::PipelineCoordinator;
pub use recommend::RecommendationSynthesizer;
pub use risk::RiskEvaluator;
pub use scheduler::PriorityScheduler;
pub use storage::{AuditStore, InMemoryAudit, SledAudit};
