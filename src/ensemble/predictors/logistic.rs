//! Logistic climate model - one regression per risk type over climate features

use async_trait::async_trait;
use statrs::function::logistic::logistic;

use super::{event_time, Predictor};
use crate::error::ModelError;
use crate::types::{FeatureSnapshot, ModelPrediction, RiskType};

pub const MODEL_ID: &str = "logistic-climate";

/// Fitted coefficients for one risk type.
struct Coefficients {
    intercept: f64,
    terms: &'static [(&'static str, f64)],
    horizon_hours: i64,
}

fn coefficients(risk: RiskType) -> Coefficients {
    match risk {
        RiskType::Drought => Coefficients {
            intercept: 2.0,
            terms: &[("soil_moisture_pct", -0.12), ("forecast_rain_mm", -0.15), ("max_temp_c", 0.05)],
            horizon_hours: 96,
        },
        RiskType::Frost => Coefficients {
            intercept: -1.0,
            terms: &[("forecast_min_temp_c", -0.9), ("humidity_pct", -0.01)],
            horizon_hours: 30,
        },
        RiskType::Flood => Coefficients {
            intercept: -6.0,
            terms: &[("forecast_rain_mm", 0.05), ("soil_moisture_pct", 0.03)],
            horizon_hours: 36,
        },
        RiskType::HeatStress => Coefficients {
            intercept: -12.0,
            terms: &[("forecast_max_temp_c", 0.33), ("humidity_pct", 0.01)],
            horizon_hours: 48,
        },
        RiskType::PestOutbreak => Coefficients {
            intercept: -5.0,
            terms: &[("growing_degree_days", 0.012), ("humidity_pct", 0.02)],
            horizon_hours: 120,
        },
        RiskType::FungalDisease => Coefficients {
            intercept: -6.0,
            terms: &[("leaf_wetness_hours", 0.3), ("humidity_pct", 0.04)],
            horizon_hours: 72,
        },
    }
}

pub struct LogisticClimatePredictor;

#[async_trait]
impl Predictor for LogisticClimatePredictor {
    fn id(&self) -> &str {
        MODEL_ID
    }

    fn supports(&self, _risk: RiskType) -> bool {
        true
    }

    async fn score(
        &self,
        snapshot: &FeatureSnapshot,
        risk: RiskType,
    ) -> Result<ModelPrediction, ModelError> {
        let coeffs = coefficients(risk);

        let mut z = coeffs.intercept;
        let mut present = 0usize;
        for (name, weight) in coeffs.terms {
            if let Some(v) = snapshot.feature(name) {
                z += weight * v;
                present += 1;
            }
        }
        if present == 0 {
            return Err(ModelError::Unavailable {
                model_id: MODEL_ID.to_string(),
                reason: format!("no predictors available for {risk}"),
            });
        }

        let probability = logistic(z);
        if !probability.is_finite() {
            return Err(ModelError::InvalidOutput {
                model_id: MODEL_ID.to_string(),
                reason: format!("non-finite logit {z}"),
            });
        }

        // Partial inputs lower the model's own confidence
        let coverage = present as f64 / coeffs.terms.len() as f64;

        Ok(ModelPrediction {
            model_id: MODEL_ID.to_string(),
            risk_type: risk,
            probability,
            raw_confidence: 0.5 + 0.3 * coverage,
            event_time: event_time(snapshot, coeffs.horizon_hours),
        })
    }
}
