//! Pipeline runtime
//!
//! - [`SnapshotSource`] / [`FarmDirectory`]: the external services a cycle reads
//! - [`PipelineCoordinator`]: runs stages 1-6 per farm and hands scheduled
//!   alerts to the delivery dispatcher

mod coordinator;
mod source;

pub use coordinator::{Collaborators, CycleOutcome, CycleReport, FarmFailure, PipelineCoordinator};
pub use source::{
    FarmDirectory, InMemoryFarmDirectory, Regime, SimulatedSource, SnapshotSource, StaticSource,
};
