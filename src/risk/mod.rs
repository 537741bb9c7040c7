//! Risk Evaluator (Stage 3)
//!
//! Re-derives each prediction's severity from `probability × impact` against
//! the configured bands, applies the farmer's thresholds and the 24-hour
//! actionability rule, and folds the result into one `RiskAssessment`.
//!
//! Non-actionable predictions are kept in the assessment for audit but never
//! qualify for alerting (unless the best-effort override promotes a
//! High/Critical one).

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::config::defaults::{ACTIONABLE_LEAD_HOURS, UNCERTAINTY_CONFIDENCE};
use crate::config::RiskConfig;
use crate::types::{AssessedPrediction, EnsemblePrediction, RiskAssessment, Severity, ThresholdConfig};

#[derive(Debug, Clone, Default)]
pub struct RiskEvaluator {
    config: RiskConfig,
}

impl RiskEvaluator {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// Severity of a prediction after applying the risk type's impact.
    pub fn severity_of(&self, prediction: &EnsemblePrediction) -> Severity {
        let score = prediction.probability * self.config.impact_for(prediction.risk_type);
        self.config.bands.classify(score)
    }

    /// Evaluate one cycle's predictions against a threshold snapshot.
    ///
    /// `thresholds_defaulted` records that `thresholds` is the conservative
    /// fallback rather than the farmer's own configuration.
    pub fn evaluate(
        &self,
        farm_id: &str,
        predictions: &[EnsemblePrediction],
        thresholds: &ThresholdConfig,
        thresholds_defaulted: bool,
        now: DateTime<Utc>,
    ) -> RiskAssessment {
        let min_lead = Duration::hours(ACTIONABLE_LEAD_HOURS);

        let assessed: Vec<AssessedPrediction> = predictions
            .iter()
            .map(|p| {
                let mut prediction = p.clone();
                prediction.severity = self.severity_of(p);

                let lead = prediction.time_to_event(now);
                let actionable = lead >= min_lead;
                let threshold = thresholds.threshold_for(prediction.risk_type);
                let meets_threshold = prediction.severity >= threshold;
                let best_effort = !actionable
                    && self.config.best_effort_override
                    && prediction.severity.is_urgent()
                    && lead > Duration::zero();
                let uncertain = prediction.confidence < UNCERTAINTY_CONFIDENCE;

                if meets_threshold && !actionable && !best_effort {
                    debug!(
                        farm_id = %farm_id,
                        risk = %prediction.risk_type,
                        hours = lead.num_hours(),
                        "Prediction inside lead-time window, not actionable"
                    );
                }

                AssessedPrediction {
                    prediction,
                    actionable,
                    meets_threshold,
                    best_effort,
                    uncertain,
                    threshold,
                }
            })
            .collect();

        let overall_severity = assessed
            .iter()
            .filter(|a| a.qualifies())
            .map(|a| a.prediction.severity)
            .max();

        let data_quality_score = predictions
            .first()
            .map(|p| p.data_quality_score)
            .unwrap_or(0.0);
        let uncertain = assessed.iter().any(|a| a.uncertain);

        if let Some(sev) = overall_severity {
            info!(
                farm_id = %farm_id,
                severity = %sev,
                qualifying = assessed.iter().filter(|a| a.qualifies()).count(),
                "Risk assessment qualifies for alerting"
            );
        }

        RiskAssessment {
            farm_id: farm_id.to_string(),
            assessed_at: now,
            predictions: assessed,
            overall_severity,
            data_quality_score,
            uncertain,
            threshold_version: thresholds.updated_at,
            thresholds_defaulted,
        }
    }
}
