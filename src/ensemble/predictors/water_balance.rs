//! Water-balance model - Drought and Flood from soil moisture and rainfall

use async_trait::async_trait;

use super::{event_time, ramp, require, unsupported, Predictor};
use crate::error::ModelError;
use crate::types::{FeatureSnapshot, ModelPrediction, RiskType};

pub const MODEL_ID: &str = "water-balance";

/// Bucket-style soil water model.
///
/// Drought pressure rises as soil moisture drops below field capacity with no
/// rain forecast; flood pressure rises with heavy forecast rain on wet soil.
pub struct WaterBalancePredictor;

impl WaterBalancePredictor {
    fn drought(snapshot: &FeatureSnapshot) -> Result<(f64, f64), ModelError> {
        let moisture = require(snapshot, MODEL_ID, "soil_moisture_pct")?;
        let forecast_rain = snapshot.feature("forecast_rain_mm").unwrap_or(0.0);
        let recent_rain = snapshot.feature("rainfall_mm").unwrap_or(0.0);

        let deficit = ramp(moisture, 40.0, 10.0);
        let dry_outlook = ramp(forecast_rain, 15.0, 0.0);
        let dry_recent = ramp(recent_rain, 10.0, 0.0);
        let p = 0.6 * deficit + 0.3 * dry_outlook + 0.1 * dry_recent;

        // Less sure when the rain forecast is missing
        let confidence = if snapshot.feature("forecast_rain_mm").is_some() { 0.85 } else { 0.6 };
        Ok((p, confidence))
    }

    fn flood(snapshot: &FeatureSnapshot) -> Result<(f64, f64), ModelError> {
        let forecast_rain = require(snapshot, MODEL_ID, "forecast_rain_mm")?;
        let moisture = snapshot.feature("soil_moisture_pct").unwrap_or(50.0);

        let deluge = ramp(forecast_rain, 40.0, 150.0);
        let saturation = ramp(moisture, 60.0, 95.0);
        Ok((0.7 * deluge + 0.3 * saturation, 0.75))
    }
}

#[async_trait]
impl Predictor for WaterBalancePredictor {
    fn id(&self) -> &str {
        MODEL_ID
    }

    fn supports(&self, risk: RiskType) -> bool {
        matches!(risk, RiskType::Drought | RiskType::Flood)
    }

    async fn score(
        &self,
        snapshot: &FeatureSnapshot,
        risk: RiskType,
    ) -> Result<ModelPrediction, ModelError> {
        let (probability, raw_confidence, horizon) = match risk {
            RiskType::Drought => {
                let (p, c) = Self::drought(snapshot)?;
                (p, c, 96)
            }
            RiskType::Flood => {
                let (p, c) = Self::flood(snapshot)?;
                (p, c, 36)
            }
            other => return Err(unsupported(MODEL_ID, other)),
        };

        Ok(ModelPrediction {
            model_id: MODEL_ID.to_string(),
            risk_type: risk,
            probability: probability.clamp(0.0, 1.0),
            raw_confidence,
            event_time: event_time(snapshot, horizon),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::predictors::test_support::snapshot;
    use chrono::Utc;

    #[tokio::test]
    async fn dry_soil_scores_high_drought() {
        let snap = snapshot(
            &[("soil_moisture_pct", 12.0), ("forecast_rain_mm", 0.0), ("rainfall_mm", 0.0)],
            Utc::now(),
        );
        let p = WaterBalancePredictor.score(&snap, RiskType::Drought).await.unwrap();
        assert!(p.probability > 0.9, "got {}", p.probability);
    }

    #[tokio::test]
    async fn wet_soil_scores_low_drought() {
        let snap = snapshot(
            &[("soil_moisture_pct", 55.0), ("forecast_rain_mm", 20.0), ("rainfall_mm", 15.0)],
            Utc::now(),
        );
        let p = WaterBalancePredictor.score(&snap, RiskType::Drought).await.unwrap();
        assert!(p.probability < 0.1);
    }

    #[tokio::test]
    async fn missing_moisture_is_unavailable() {
        let snap = snapshot(&[("forecast_rain_mm", 0.0)], Utc::now());
        let err = WaterBalancePredictor.score(&snap, RiskType::Drought).await.unwrap_err();
        assert!(matches!(err, ModelError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn frost_not_supported() {
        let snap = snapshot(&[("soil_moisture_pct", 30.0)], Utc::now());
        assert!(!WaterBalancePredictor.supports(RiskType::Frost));
        assert!(WaterBalancePredictor.score(&snap, RiskType::Frost).await.is_err());
    }
}
