//! Degree-day model - Pest Outbreak and Fungal Disease

use async_trait::async_trait;

use super::{event_time, ramp, require, unsupported, Predictor};
use crate::error::ModelError;
use crate::types::{FeatureSnapshot, ModelPrediction, RiskType};

pub const MODEL_ID: &str = "degree-day";

/// Heat-unit accumulation for insect development plus a leaf-wetness
/// infection index for fungal pathogens.
pub struct DegreeDayPredictor;

#[async_trait]
impl Predictor for DegreeDayPredictor {
    fn id(&self) -> &str {
        MODEL_ID
    }

    fn supports(&self, risk: RiskType) -> bool {
        matches!(risk, RiskType::PestOutbreak | RiskType::FungalDisease)
    }

    async fn score(
        &self,
        snapshot: &FeatureSnapshot,
        risk: RiskType,
    ) -> Result<ModelPrediction, ModelError> {
        let humidity = snapshot.feature("humidity_pct").unwrap_or(60.0);

        let (probability, horizon) = match risk {
            RiskType::PestOutbreak => {
                let gdd = require(snapshot, MODEL_ID, "growing_degree_days")?;
                (0.65 * ramp(gdd, 150.0, 450.0) + 0.35 * ramp(humidity, 50.0, 90.0), 120)
            }
            RiskType::FungalDisease => {
                let wetness = require(snapshot, MODEL_ID, "leaf_wetness_hours")?;
                // Most pathogens need mild temperatures to infect
                let temp = snapshot.feature("mean_temp_c").unwrap_or(20.0);
                let mild = if (12.0..=28.0).contains(&temp) { 1.0 } else { 0.4 };
                let index = 0.6 * ramp(wetness, 4.0, 14.0) + 0.4 * ramp(humidity, 70.0, 98.0);
                (index * mild, 72)
            }
            other => return Err(unsupported(MODEL_ID, other)),
        };

        Ok(ModelPrediction {
            model_id: MODEL_ID.to_string(),
            risk_type: risk,
            probability: probability.clamp(0.0, 1.0),
            raw_confidence: 0.7,
            event_time: event_time(snapshot, horizon),
        })
    }
}
