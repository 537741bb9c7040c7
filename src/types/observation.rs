//! Stage 1 types: Observation, FeatureSnapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Farm identifier as issued by the Farm/User service.
pub type FarmId = String;

/// One validated environmental reading.
///
/// Quality scoring happens upstream in the data processing pipeline; the
/// decision pipeline only consumes `quality_score`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub farm_id: FarmId,
    pub timestamp: DateTime<Utc>,
    /// Weather station, satellite product, soil sensor, ...
    pub source_id: String,
    /// Named measurement values (e.g. `soil_moisture_pct`, `min_temp_c`)
    pub measurements: BTreeMap<String, f64>,
    /// Validator-assigned quality (0.0-1.0)
    pub quality_score: f64,
}

/// Aggregated per-farm feature vector for one assessment cycle.
///
/// Immutable once built. Owned by exactly one cycle and dropped afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureSnapshot {
    pub farm_id: FarmId,
    pub as_of: DateTime<Utc>,
    /// Ordered feature map (name → value)
    pub features: BTreeMap<String, f64>,
    /// Mean quality of the observations that contributed (0.0-1.0)
    pub data_quality_score: f64,
    /// Distinct source ids that contributed
    pub sources: BTreeSet<String>,
    /// Number of observations folded into the snapshot
    pub observation_count: usize,
}

impl FeatureSnapshot {
    /// Look up a feature by name.
    pub fn feature(&self, name: &str) -> Option<f64> {
        self.features.get(name).copied()
    }

    /// Number of independent sources feeding this snapshot.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}
