//! Ensemble Predictor (Stage 2)
//!
//! Runs every registered adapter that supports a risk type, in parallel,
//! and combines the responses into one `EnsemblePrediction`.
//!
//! ## Combination
//!
//! - Weight per model = historical accuracy × snapshot data quality
//! - Probability = weighted mean of responding models
//! - Confidence = agreement × response fraction × input quality, where
//!   agreement is `1 - variance / 0.25` and single-source snapshots take a
//!   penalty
//! - Event time = earliest responding model; the window spans to the latest
//!
//! ## Degraded Mode
//!
//! Too few responders, every call timing out, or no adapter for a risk type
//! all fall back to the climatological prior with confidence capped at the
//! degraded ceiling. The fallback never errors and always raises an
//! `AdminNotification`.

pub mod predictors;
pub mod registry;

pub use predictors::Predictor;
pub use registry::{ModelRegistry, RegisteredModel};

use chrono::Duration as ChronoDuration;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::defaults::{MAX_DEGRADED_CONFIDENCE, MAX_PROBABILITY_VARIANCE};
use crate::config::{EnsembleConfig, SeverityBands};
use crate::error::ModelError;
use crate::ports::EventPort;
use crate::types::{
    AdminNotification, AdminReason, EnsemblePrediction, FeatureSnapshot, ModelPrediction,
    RiskType, TimeWindow,
};

pub struct EnsemblePredictor {
    registry: Arc<ModelRegistry>,
    config: EnsembleConfig,
    bands: SeverityBands,
    workers: Arc<Semaphore>,
    admin: EventPort<AdminNotification>,
}

impl EnsemblePredictor {
    pub fn new(
        registry: Arc<ModelRegistry>,
        config: EnsembleConfig,
        admin: EventPort<AdminNotification>,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.max_concurrent_models.max(1)));
        Self {
            registry,
            config,
            bands: SeverityBands::default(),
            workers,
            admin,
        }
    }

    /// Bands used for the provisional severity on each prediction.
    pub fn with_bands(mut self, bands: SeverityBands) -> Self {
        self.bands = bands;
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// One prediction per requested risk type, in request order.
    pub async fn predict(
        &self,
        snapshot: &FeatureSnapshot,
        risks: &[RiskType],
    ) -> Vec<EnsemblePrediction> {
        join_all(risks.iter().map(|&risk| self.predict_risk(snapshot, risk))).await
    }

    async fn predict_risk(&self, snapshot: &FeatureSnapshot, risk: RiskType) -> EnsemblePrediction {
        let models = self.registry.for_risk(risk);
        let expected = models.len();

        let outcomes = join_all(models.iter().map(|m| self.call_model(m, snapshot, risk))).await;

        let mut responses: Vec<(ModelPrediction, f64)> = Vec::with_capacity(expected);
        let mut timeouts = 0usize;
        for (model, outcome) in models.iter().zip(outcomes) {
            match outcome {
                Ok(prediction) => responses.push((prediction, model.accuracy)),
                Err(e) => {
                    if matches!(e, ModelError::Timeout { .. }) {
                        timeouts += 1;
                    }
                    warn!(farm_id = %snapshot.farm_id, risk = %risk, error = %e, "Model call failed");
                }
            }
        }

        let min_responders = self.config.min_responders.max(1);
        if responses.len() < min_responders {
            let cause = if expected == 0 {
                "no models registered".to_string()
            } else if timeouts == expected {
                "all models timed out".to_string()
            } else {
                format!("{} of {} required responders", responses.len(), min_responders)
            };
            return self.fallback(snapshot, risk, responses.len(), expected, &cause);
        }

        self.combine(snapshot, risk, &responses, expected)
    }

    /// One bounded, validated model call.
    async fn call_model(
        &self,
        model: &RegisteredModel,
        snapshot: &FeatureSnapshot,
        risk: RiskType,
    ) -> Result<ModelPrediction, ModelError> {
        let model_id = model.predictor.id().to_string();
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| ModelError::Unavailable {
                model_id: model_id.clone(),
                reason: "worker pool closed".to_string(),
            })?;

        let timeout_ms = self.config.model_timeout_ms;
        let prediction = match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            model.predictor.score(snapshot, risk),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(ModelError::Timeout { model_id, timeout_ms }),
        };

        if prediction.risk_type != risk {
            return Err(ModelError::InvalidOutput {
                model_id,
                reason: format!("asked for {risk}, got {}", prediction.risk_type),
            });
        }
        if !(0.0..=1.0).contains(&prediction.probability)
            || !(0.0..=1.0).contains(&prediction.raw_confidence)
        {
            return Err(ModelError::InvalidOutput {
                model_id,
                reason: format!(
                    "probability {} / confidence {} outside [0, 1]",
                    prediction.probability, prediction.raw_confidence
                ),
            });
        }
        Ok(prediction)
    }

    fn combine(
        &self,
        snapshot: &FeatureSnapshot,
        risk: RiskType,
        responses: &[(ModelPrediction, f64)],
        expected: usize,
    ) -> EnsemblePrediction {
        let quality = snapshot.data_quality_score.clamp(0.0, 1.0);

        let mut weights: Vec<f64> = responses.iter().map(|(_, acc)| acc * quality).collect();
        let mut total: f64 = weights.iter().sum();
        if total <= f64::EPSILON {
            // Zero accuracy or zero quality everywhere: fall back to a plain mean
            weights = vec![1.0; responses.len()];
            total = responses.len() as f64;
        }

        let probability = responses
            .iter()
            .zip(&weights)
            .map(|((p, _), w)| p.probability * w)
            .sum::<f64>()
            / total;
        let variance = responses
            .iter()
            .zip(&weights)
            .map(|((p, _), w)| w * (p.probability - probability).powi(2))
            .sum::<f64>()
            / total;

        let agreement = (1.0 - variance / MAX_PROBABILITY_VARIANCE).clamp(0.0, 1.0);
        let response_fraction = responses.len() as f64 / expected.max(1) as f64;
        let confidence = (agreement * response_fraction * self.input_factor(snapshot)).clamp(0.0, 1.0);

        let earliest = responses.iter().map(|(p, _)| p.event_time).min().unwrap_or(snapshot.as_of);
        let latest = responses.iter().map(|(p, _)| p.event_time).max().unwrap_or(earliest);
        let probability = probability.clamp(0.0, 1.0);

        debug!(
            farm_id = %snapshot.farm_id,
            risk = %risk,
            probability,
            confidence,
            responded = responses.len(),
            expected,
            "Ensemble combined"
        );

        EnsemblePrediction {
            risk_type: risk,
            probability,
            severity: self.bands.classify(probability),
            confidence,
            contributing_models: responses.iter().map(|(p, _)| p.model_id.clone()).collect(),
            expected_models: expected,
            time_window: TimeWindow { start: earliest, end: latest },
            event_time: earliest,
            degraded: false,
            data_quality_score: quality,
        }
    }

    /// Input-quality component of confidence: snapshot quality, penalised for
    /// a single source.
    fn input_factor(&self, snapshot: &FeatureSnapshot) -> f64 {
        let diversity = if snapshot.source_count() >= 2 {
            1.0
        } else {
            self.config.single_source_factor
        };
        snapshot.data_quality_score.clamp(0.0, 1.0) * diversity
    }

    fn fallback(
        &self,
        snapshot: &FeatureSnapshot,
        risk: RiskType,
        responded: usize,
        expected: usize,
        cause: &str,
    ) -> EnsemblePrediction {
        let ceiling = self.config.degraded_confidence_ceiling.min(MAX_DEGRADED_CONFIDENCE);
        let probability = self.config.prior_for(risk).clamp(0.0, 1.0);
        let confidence = (ceiling * self.input_factor(snapshot)).clamp(0.0, ceiling);
        let event_time = snapshot.as_of + ChronoDuration::hours(self.config.baseline_horizon_hours);

        warn!(
            farm_id = %snapshot.farm_id,
            risk = %risk,
            responded,
            expected,
            cause,
            "Ensemble degraded, using climatological prior"
        );
        self.admin.emit(AdminNotification::single_farm(
            AdminReason::ModelDegradation {
                farm_id: snapshot.farm_id.clone(),
                risk_type: risk,
                responded,
                expected,
            },
            cause,
            snapshot.as_of,
        ));

        EnsemblePrediction {
            risk_type: risk,
            probability,
            severity: self.bands.classify(probability),
            confidence,
            contributing_models: Vec::new(),
            expected_models: expected,
            time_window: TimeWindow::instant(event_time),
            event_time,
            degraded: true,
            data_quality_score: snapshot.data_quality_score.clamp(0.0, 1.0),
        }
    }
}
