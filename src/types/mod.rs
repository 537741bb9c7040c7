//! Shared data structures for the farm risk decision pipeline
//!
//! This module defines the core types flowing through the pipeline stages:
//! - Stage 1: Observation → FeatureSnapshot (feature aggregation)
//! - Stage 2: ModelPrediction → EnsemblePrediction (ensemble predictor)
//! - Stage 3: RiskAssessment (risk evaluator)
//! - Stage 4: Recommendation (recommendation synthesizer)
//! - Stage 5-6: Alert (orchestrator + scheduler)
//! - Stage 7: DeliveryTicket (delivery coordinator)
//! - Side channel: AdminNotification

mod observation;
mod risk;
mod farm;
mod alert;
mod delivery;
mod events;

#[cfg(test)]
pub(crate) mod fixtures;

pub use observation::*;
pub use risk::*;
pub use farm::*;
pub use alert::*;
pub use delivery::*;
pub use events::*;
