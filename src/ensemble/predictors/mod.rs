//! Predictor trait and the built-in model adapters
//!
//! Each adapter scores one risk type from a feature snapshot. Remote models
//! (hosted inference, partner forecasts) implement the same trait; the
//! ensemble never knows the difference.
//!
//! ## Built-in Adapters
//!
//! 1. **water-balance** - Drought, Flood from soil moisture and rainfall
//! 2. **temperature-threshold** - Frost, Heat Stress from forecast extremes
//! 3. **logistic-climate** - every risk type, logistic regression on climate features
//! 4. **degree-day** - Pest Outbreak, Fungal Disease from heat units and leaf wetness

pub mod degree_day;
pub mod logistic;
pub mod temperature;
pub mod water_balance;

pub use degree_day::DegreeDayPredictor;
pub use logistic::LogisticClimatePredictor;
pub use temperature::TemperatureThresholdPredictor;
pub use water_balance::WaterBalancePredictor;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::error::ModelError;
use crate::types::{FeatureSnapshot, ModelPrediction, RiskType};

/// Feature carrying the forecast lead (hours) of the weather inputs.
pub const FORECAST_LEAD_FEATURE: &str = "forecast_lead_hours";

/// A model adapter.
///
/// `score` may suspend (remote inference); the ensemble bounds every call
/// with a timeout, so implementations need not enforce their own.
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Stable model id, used for accuracy lookup and audit
    fn id(&self) -> &str;

    /// Whether this model produces predictions for `risk`
    fn supports(&self, risk: RiskType) -> bool;

    async fn score(
        &self,
        snapshot: &FeatureSnapshot,
        risk: RiskType,
    ) -> Result<ModelPrediction, ModelError>;
}

/// Construct a built-in adapter by id.
pub fn builtin(id: &str) -> Option<Arc<dyn Predictor>> {
    match id {
        water_balance::MODEL_ID => Some(Arc::new(WaterBalancePredictor)),
        temperature::MODEL_ID => Some(Arc::new(TemperatureThresholdPredictor::default())),
        logistic::MODEL_ID => Some(Arc::new(LogisticClimatePredictor)),
        degree_day::MODEL_ID => Some(Arc::new(DegreeDayPredictor)),
        _ => None,
    }
}

/// Create the default set of 4 built-in adapters
pub fn default_predictors() -> Vec<Arc<dyn Predictor>> {
    vec![
        Arc::new(WaterBalancePredictor),
        Arc::new(TemperatureThresholdPredictor::default()),
        Arc::new(LogisticClimatePredictor),
        Arc::new(DegreeDayPredictor),
    ]
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Fetch a feature or report the model as unable to score.
pub(crate) fn require(
    snapshot: &FeatureSnapshot,
    model_id: &str,
    name: &str,
) -> Result<f64, ModelError> {
    snapshot.feature(name).ok_or_else(|| ModelError::Unavailable {
        model_id: model_id.to_string(),
        reason: format!("feature '{name}' missing"),
    })
}

/// Linear ramp: 0 at `lo`, 1 at `hi`, clamped.
pub(crate) fn ramp(value: f64, lo: f64, hi: f64) -> f64 {
    if (hi - lo).abs() < f64::EPSILON {
        return if value >= hi { 1.0 } else { 0.0 };
    }
    ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
}

/// Expected event time: forecast lead if the snapshot carries one, else the
/// model's own horizon.
pub(crate) fn event_time(snapshot: &FeatureSnapshot, default_hours: i64) -> DateTime<Utc> {
    let hours = snapshot
        .feature(FORECAST_LEAD_FEATURE)
        .filter(|h| *h > 0.0)
        .map(|h| (h * 60.0).round() as i64)
        .unwrap_or(default_hours * 60);
    snapshot.as_of + Duration::minutes(hours)
}

pub(crate) fn unsupported(model_id: &str, risk: RiskType) -> ModelError {
    ModelError::Unavailable {
        model_id: model_id.to_string(),
        reason: format!("risk type {risk} not supported"),
    }
}
