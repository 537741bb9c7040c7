//! Stage 2-3 types: RiskType, Severity, ModelPrediction, EnsemblePrediction,
//! RiskAssessment

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::FarmId;

// ============================================================================
// Risk Type
// ============================================================================

/// Category of agronomic risk a prediction is about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskType {
    Drought,
    Frost,
    Flood,
    HeatStress,
    PestOutbreak,
    FungalDisease,
}

impl RiskType {
    /// Every risk type, in stable order.
    pub const ALL: [RiskType; 6] = [
        RiskType::Drought,
        RiskType::Frost,
        RiskType::Flood,
        RiskType::HeatStress,
        RiskType::PestOutbreak,
        RiskType::FungalDisease,
    ];

    /// Short code for logging and storage keys
    pub fn short_code(&self) -> &'static str {
        match self {
            RiskType::Drought => "drought",
            RiskType::Frost => "frost",
            RiskType::Flood => "flood",
            RiskType::HeatStress => "heat",
            RiskType::PestOutbreak => "pest",
            RiskType::FungalDisease => "fungal",
        }
    }
}

impl std::fmt::Display for RiskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskType::Drought => write!(f, "Drought"),
            RiskType::Frost => write!(f, "Frost"),
            RiskType::Flood => write!(f, "Flood"),
            RiskType::HeatStress => write!(f, "Heat Stress"),
            RiskType::PestOutbreak => write!(f, "Pest Outbreak"),
            RiskType::FungalDisease => write!(f, "Fungal Disease"),
        }
    }
}

// ============================================================================
// Severity
// ============================================================================

/// Severity level of a risk. Ordering is significant: `Low < Critical`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
pub enum Severity {
    #[default]
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Severity {
    /// Numeric rank (1-4) used by priority scoring
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// High and Critical alerts carry the 12-hour lead-time guarantee.
    pub fn is_urgent(self) -> bool {
        matches!(self, Severity::High | Severity::Critical)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

// ============================================================================
// Stage 2: Predictions
// ============================================================================

/// One model adapter's raw output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelPrediction {
    pub model_id: String,
    pub risk_type: RiskType,
    /// Event probability (0.0-1.0)
    pub probability: f64,
    /// Model's own confidence in the output (0.0-1.0)
    pub raw_confidence: f64,
    /// When the model expects the event to materialise
    pub event_time: DateTime<Utc>,
}

/// Span of time in which the predicted event is expected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn instant(at: DateTime<Utc>) -> Self {
        Self { start: at, end: at }
    }
}

/// Combined prediction for one risk type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnsemblePrediction {
    pub risk_type: RiskType,
    /// Combined probability (0.0-1.0)
    pub probability: f64,
    /// Provisional severity; re-derived by the risk evaluator
    pub severity: Severity,
    /// Combined confidence (0.0-1.0)
    pub confidence: f64,
    /// Model ids that actually responded
    pub contributing_models: Vec<String>,
    /// Number of registered models expected to respond
    pub expected_models: usize,
    pub time_window: TimeWindow,
    pub event_time: DateTime<Utc>,
    /// True when produced by the climatological fallback
    pub degraded: bool,
    /// Quality of the snapshot the prediction was made from
    pub data_quality_score: f64,
}

impl EnsemblePrediction {
    /// Signed time remaining until the event.
    pub fn time_to_event(&self, now: DateTime<Utc>) -> Duration {
        self.event_time - now
    }
}

// ============================================================================
// Stage 3: Risk Assessment
// ============================================================================

/// A prediction annotated by the risk evaluator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssessedPrediction {
    pub prediction: EnsemblePrediction,
    /// Event is at least the minimum lead time away
    pub actionable: bool,
    /// Severity met the farmer's threshold
    pub meets_threshold: bool,
    /// Promoted despite a short lead time (override enabled)
    pub best_effort: bool,
    /// Confidence fell below the uncertainty threshold
    pub uncertain: bool,
    /// Threshold applied for this risk type
    pub threshold: Severity,
}

impl AssessedPrediction {
    /// Whether this prediction may become an alert.
    pub fn qualifies(&self) -> bool {
        self.meets_threshold && (self.actionable || self.best_effort)
    }
}

/// Farm-level summary for one cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAssessment {
    pub farm_id: FarmId,
    pub assessed_at: DateTime<Utc>,
    pub predictions: Vec<AssessedPrediction>,
    /// Max severity among qualifying predictions; `None` means no alert
    pub overall_severity: Option<Severity>,
    pub data_quality_score: f64,
    /// At least one prediction is below the confidence threshold
    pub uncertain: bool,
    /// `updated_at` of the threshold snapshot used
    pub threshold_version: DateTime<Utc>,
    /// Conservative built-in thresholds were substituted
    pub thresholds_defaulted: bool,
}

impl RiskAssessment {
    /// Predictions eligible for alerting.
    pub fn qualifying(&self) -> impl Iterator<Item = &AssessedPrediction> {
        self.predictions.iter().filter(|p| p.qualifies())
    }

    pub fn triggers_alert(&self) -> bool {
        self.overall_severity.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
        assert_eq!(Severity::Critical.rank(), 4);
        assert!(Severity::High.is_urgent());
        assert!(!Severity::Medium.is_urgent());
    }

    #[test]
    fn risk_type_serializes_snake_case() {
        let json = serde_json::to_string(&RiskType::HeatStress).unwrap();
        assert_eq!(json, "\"heat_stress\"");
    }
}
