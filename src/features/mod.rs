//! Feature Aggregator (Stage 1)
//!
//! Folds the validated observations of one farm into a `FeatureSnapshot`:
//! each feature is the quality-weighted mean of every in-window reading of
//! that measurement. Anything malformed rejects the whole snapshot so a bad
//! reading can never silently skew a prediction.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::AggregationConfig;
use crate::error::ValidationError;
use crate::types::{FeatureSnapshot, Observation};

/// Stateless aggregator; one instance serves every farm.
#[derive(Debug, Clone)]
pub struct FeatureAggregator {
    config: AggregationConfig,
}

#[derive(Default)]
struct Accumulator {
    weighted_sum: f64,
    weight: f64,
    plain_sum: f64,
    count: usize,
}

impl Accumulator {
    fn push(&mut self, value: f64, quality: f64) {
        self.weighted_sum += value * quality;
        self.weight += quality;
        self.plain_sum += value;
        self.count += 1;
    }

    /// Zero-quality readings still count when nothing better exists.
    fn mean(&self) -> f64 {
        if self.weight > f64::EPSILON {
            self.weighted_sum / self.weight
        } else {
            self.plain_sum / self.count as f64
        }
    }
}

impl FeatureAggregator {
    pub fn new(config: AggregationConfig) -> Self {
        Self { config }
    }

    /// Build a snapshot for `farm_id` as of `as_of`.
    pub fn aggregate(
        &self,
        farm_id: &str,
        observations: &[Observation],
        as_of: DateTime<Utc>,
    ) -> Result<FeatureSnapshot, ValidationError> {
        let window_start = as_of - Duration::hours(self.config.lookback_hours);
        let skew = Duration::seconds(self.config.max_future_skew_secs);

        let mut features: BTreeMap<String, Accumulator> = BTreeMap::new();
        let mut sources = BTreeSet::new();
        let mut quality_sum = 0.0;
        let mut used = 0usize;
        let mut stale = 0usize;

        for obs in observations {
            if obs.farm_id != farm_id {
                return Err(ValidationError::FarmMismatch {
                    expected: farm_id.to_string(),
                    found: obs.farm_id.clone(),
                });
            }
            if obs.timestamp > as_of + skew {
                return Err(ValidationError::FutureTimestamp {
                    source_id: obs.source_id.clone(),
                    secs: (obs.timestamp - as_of).num_seconds(),
                });
            }
            if !obs.quality_score.is_finite() || !(0.0..=1.0).contains(&obs.quality_score) {
                return Err(ValidationError::QualityOutOfRange {
                    source_id: obs.source_id.clone(),
                    quality: obs.quality_score,
                });
            }
            if let Some((name, _)) = obs.measurements.iter().find(|(_, v)| !v.is_finite()) {
                return Err(ValidationError::NonFinite {
                    source_id: obs.source_id.clone(),
                    name: name.clone(),
                });
            }

            if obs.timestamp < window_start {
                stale += 1;
                continue;
            }

            for (name, value) in &obs.measurements {
                features
                    .entry(name.clone())
                    .or_default()
                    .push(*value, obs.quality_score);
            }
            sources.insert(obs.source_id.clone());
            quality_sum += obs.quality_score;
            used += 1;
        }

        if used == 0 || features.is_empty() {
            return Err(ValidationError::Empty(farm_id.to_string()));
        }

        let features: BTreeMap<String, f64> = features
            .into_iter()
            .map(|(name, acc)| (name, acc.mean()))
            .collect();

        if let Some(missing) = self
            .config
            .required_features
            .iter()
            .find(|f| !features.contains_key(f.as_str()))
        {
            return Err(ValidationError::MissingFeature(missing.clone()));
        }

        debug!(
            farm_id = %farm_id,
            used,
            stale,
            features = features.len(),
            sources = sources.len(),
            "Aggregated feature snapshot"
        );

        Ok(FeatureSnapshot {
            farm_id: farm_id.to_string(),
            as_of,
            features,
            data_quality_score: quality_sum / used as f64,
            sources,
            observation_count: used,
        })
    }
}

impl Default for FeatureAggregator {
    fn default() -> Self {
        Self::new(AggregationConfig::default())
    }
}
