//! Temperature-threshold model - Frost and Heat Stress
//!
//! Treats the forecast extreme as the mean of a normal distribution and
//! reports the probability of crossing the damage threshold.

use async_trait::async_trait;
use statrs::distribution::{ContinuousCDF, Normal};

use super::{event_time, require, unsupported, Predictor};
use crate::error::ModelError;
use crate::types::{FeatureSnapshot, ModelPrediction, RiskType};

pub const MODEL_ID: &str = "temperature-threshold";

pub struct TemperatureThresholdPredictor {
    /// Air temperature at which frost damage starts (°C)
    pub frost_threshold_c: f64,
    /// Canopy temperature at which heat stress starts (°C)
    pub heat_threshold_c: f64,
    /// Forecast error (standard deviation, °C)
    pub forecast_sigma_c: f64,
}

impl Default for TemperatureThresholdPredictor {
    fn default() -> Self {
        Self {
            frost_threshold_c: 0.0,
            heat_threshold_c: 35.0,
            forecast_sigma_c: 2.0,
        }
    }
}

impl TemperatureThresholdPredictor {
    fn forecast(&self, mean: f64) -> Result<Normal, ModelError> {
        Normal::new(mean, self.forecast_sigma_c).map_err(|e| ModelError::InvalidOutput {
            model_id: MODEL_ID.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl Predictor for TemperatureThresholdPredictor {
    fn id(&self) -> &str {
        MODEL_ID
    }

    fn supports(&self, risk: RiskType) -> bool {
        matches!(risk, RiskType::Frost | RiskType::HeatStress)
    }

    async fn score(
        &self,
        snapshot: &FeatureSnapshot,
        risk: RiskType,
    ) -> Result<ModelPrediction, ModelError> {
        let (probability, horizon) = match risk {
            RiskType::Frost => {
                let t = require(snapshot, MODEL_ID, "forecast_min_temp_c")?;
                (self.forecast(t)?.cdf(self.frost_threshold_c), 30)
            }
            RiskType::HeatStress => {
                let t = require(snapshot, MODEL_ID, "forecast_max_temp_c")?;
                (1.0 - self.forecast(t)?.cdf(self.heat_threshold_c), 48)
            }
            other => return Err(unsupported(MODEL_ID, other)),
        };

        Ok(ModelPrediction {
            model_id: MODEL_ID.to_string(),
            risk_type: risk,
            probability: probability.clamp(0.0, 1.0),
            raw_confidence: 0.8,
            event_time: event_time(snapshot, horizon),
        })
    }
}
