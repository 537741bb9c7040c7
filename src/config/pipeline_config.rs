//! Pipeline Configuration - every tunable of the decision pipeline as TOML
//!
//! Each struct implements `Default`, so a deployment without a config file
//! runs with the built-in values. Farmer-specific settings (thresholds,
//! channels, crops) are NOT here; they come from the Farm/User service.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults::{CONFIG_ENV_VAR, CONFIG_FILE_NAME, MAX_DEGRADED_CONFIDENCE};
use crate::types::{RiskType, Severity};

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a CropWatch deployment.
///
/// Load with `PipelineConfig::load()` which searches:
/// 1. `$CROPWATCH_CONFIG` env var
/// 2. `./cropwatch.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PipelineConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pipeline: CycleConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub ensemble: EnsembleConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub recommendations: RecommendationConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub models: ModelsConfig,
}

impl PipelineConfig {
    /// Load configuration using the standard search order.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded pipeline config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded pipeline config from ./{}", CONFIG_FILE_NAME);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", CONFIG_FILE_NAME);
                }
            }
        }

        info!("No {} found, using built-in defaults", CONFIG_FILE_NAME);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    ///
    /// Unknown keys are logged as warnings, never rejected.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        for w in super::validation::validate_operational_ranges(&config) {
            warn!("{}", w);
        }
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate all values for internal consistency.
    ///
    /// Collects every problem before returning so operators fix a file in one pass.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        // Severity bands: critical > high > medium > 0, all within (0, 1]
        let b = &self.risk.bands;
        for (name, v) in [("critical", b.critical), ("high", b.high), ("medium", b.medium)] {
            if !v.is_finite() || v <= 0.0 || v > 1.0 {
                errors.push(format!("risk.bands.{name} = {v} must be in (0, 1]"));
            }
        }
        if !(b.critical > b.high && b.high > b.medium) {
            errors.push(format!(
                "risk.bands must be strictly ordered critical ({:.2}) > high ({:.2}) > medium ({:.2})",
                b.critical, b.high, b.medium
            ));
        }
        for (risk, impact) in &self.risk.impact {
            if !impact.is_finite() || *impact <= 0.0 || *impact > 1.0 {
                errors.push(format!("risk.impact.{risk:?} = {impact} must be in (0, 1]"));
            }
        }

        // Ensemble
        let e = &self.ensemble;
        if e.degraded_confidence_ceiling <= 0.0
            || e.degraded_confidence_ceiling > MAX_DEGRADED_CONFIDENCE
        {
            errors.push(format!(
                "ensemble.degraded_confidence_ceiling = {} must be in (0, {MAX_DEGRADED_CONFIDENCE}]",
                e.degraded_confidence_ceiling
            ));
        }
        if e.min_responders == 0 {
            errors.push("ensemble.min_responders must be > 0".to_string());
        }
        if e.max_concurrent_models == 0 {
            errors.push("ensemble.max_concurrent_models must be > 0".to_string());
        }
        if e.model_timeout_ms == 0 {
            errors.push("ensemble.model_timeout_ms must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&e.single_source_factor) {
            errors.push(format!(
                "ensemble.single_source_factor = {} must be in [0, 1]",
                e.single_source_factor
            ));
        }
        if e.baseline_horizon_hours <= 0 {
            errors.push("ensemble.baseline_horizon_hours must be > 0".to_string());
        }
        for (risk, prior) in &e.climatological_priors {
            if !(0.0..=1.0).contains(prior) {
                errors.push(format!(
                    "ensemble.climatological_priors.{risk:?} = {prior} must be in [0, 1]"
                ));
            }
        }

        // Aggregation
        if self.aggregation.lookback_hours <= 0 {
            errors.push("aggregation.lookback_hours must be > 0".to_string());
        }

        // Recommendations
        let r = &self.recommendations;
        if r.cost_reference <= 0.0 {
            errors.push("recommendations.cost_reference must be > 0 (used as divisor)".to_string());
        }
        if r.emergency_window_hours < 0 {
            errors.push("recommendations.emergency_window_hours cannot be negative".to_string());
        }
        if r.max_per_alert == 0 {
            errors.push("recommendations.max_per_alert must be > 0".to_string());
        }

        // Alerts / scheduler
        if self.alerts.cooldown_hours < 0 {
            errors.push("alerts.cooldown_hours cannot be negative".to_string());
        }
        if self.scheduler.lead_buffer_hours < 0 {
            errors.push("scheduler.lead_buffer_hours cannot be negative".to_string());
        }

        // Delivery
        let d = &self.delivery;
        if d.attempt_timeout_ms == 0 {
            errors.push("delivery.attempt_timeout_ms must be > 0".to_string());
        }
        if d.backoff_max_ms < d.backoff_base_ms {
            errors.push(format!(
                "delivery.backoff_max_ms ({}) must be >= backoff_base_ms ({})",
                d.backoff_max_ms, d.backoff_base_ms
            ));
        }
        if d.breaker_failure_threshold == 0 {
            errors.push("delivery.breaker_failure_threshold must be > 0".to_string());
        }
        if d.dispatch_tick_ms == 0 {
            errors.push("delivery.dispatch_tick_ms must be > 0".to_string());
        }

        // Models
        for (model, accuracy) in &self.models.accuracy {
            if !(0.0..=1.0).contains(accuracy) {
                errors.push(format!("models.accuracy.{model} = {accuracy} must be in [0, 1]"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Server
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Monitoring API bind address
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

fn default_server_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
        }
    }
}

// ============================================================================
// Cycle
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleConfig {
    /// Interval between assessment cycles for every farm
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,
    /// Timeout for Farm/User service lookups
    #[serde(default = "default_profile_timeout")]
    pub profile_lookup_timeout_ms: u64,
    /// Timeout for fetching observations from the data pipeline
    #[serde(default = "default_source_timeout")]
    pub source_timeout_ms: u64,
}

fn default_cycle_interval() -> u64 { 3_600 }
fn default_profile_timeout() -> u64 { 2_000 }
fn default_source_timeout() -> u64 { 5_000 }

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval(),
            profile_lookup_timeout_ms: default_profile_timeout(),
            source_timeout_ms: default_source_timeout(),
        }
    }
}

// ============================================================================
// Aggregation
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregationConfig {
    /// Observations older than this are ignored
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: i64,
    /// Clock skew tolerated before a timestamp counts as "in the future"
    #[serde(default = "default_future_skew")]
    pub max_future_skew_secs: i64,
    /// Features that must be present for a snapshot to be valid
    #[serde(default)]
    pub required_features: Vec<String>,
}

fn default_lookback_hours() -> i64 { 24 }
fn default_future_skew() -> i64 { 60 }

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            lookback_hours: default_lookback_hours(),
            max_future_skew_secs: default_future_skew(),
            required_features: Vec::new(),
        }
    }
}

// ============================================================================
// Ensemble
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnsembleConfig {
    /// Per-model inference timeout
    #[serde(default = "default_model_timeout")]
    pub model_timeout_ms: u64,
    /// Worker pool bound for concurrent model calls
    #[serde(default = "default_max_concurrent_models")]
    pub max_concurrent_models: usize,
    /// Below this many responders the climatological fallback is used
    #[serde(default = "default_min_responders")]
    pub min_responders: usize,
    /// Confidence cap applied to fallback predictions
    #[serde(default = "default_degraded_ceiling")]
    pub degraded_confidence_ceiling: f64,
    /// Confidence multiplier for snapshots built from a single source
    #[serde(default = "default_single_source_factor")]
    pub single_source_factor: f64,
    /// Event horizon assumed by the fallback baseline
    #[serde(default = "default_baseline_horizon")]
    pub baseline_horizon_hours: i64,
    /// Climatological prior probability per risk type
    #[serde(default = "default_priors")]
    pub climatological_priors: BTreeMap<RiskType, f64>,
}

fn default_model_timeout() -> u64 { 1_500 }
fn default_max_concurrent_models() -> usize { 8 }
fn default_min_responders() -> usize { 2 }
fn default_degraded_ceiling() -> f64 { 0.5 }
fn default_single_source_factor() -> f64 { 0.85 }
fn default_baseline_horizon() -> i64 { 72 }

fn default_priors() -> BTreeMap<RiskType, f64> {
    BTreeMap::from([
        (RiskType::Drought, 0.15),
        (RiskType::Frost, 0.10),
        (RiskType::Flood, 0.05),
        (RiskType::HeatStress, 0.12),
        (RiskType::PestOutbreak, 0.10),
        (RiskType::FungalDisease, 0.10),
    ])
}

impl EnsembleConfig {
    pub fn prior_for(&self, risk: RiskType) -> f64 {
        self.climatological_priors.get(&risk).copied().unwrap_or(0.1)
    }
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            model_timeout_ms: default_model_timeout(),
            max_concurrent_models: default_max_concurrent_models(),
            min_responders: default_min_responders(),
            degraded_confidence_ceiling: default_degraded_ceiling(),
            single_source_factor: default_single_source_factor(),
            baseline_horizon_hours: default_baseline_horizon(),
            climatological_priors: default_priors(),
        }
    }
}

// ============================================================================
// Risk
// ============================================================================

/// Lower bounds of each severity band on `probability × impact`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SeverityBands {
    #[serde(default = "default_band_critical")]
    pub critical: f64,
    #[serde(default = "default_band_high")]
    pub high: f64,
    #[serde(default = "default_band_medium")]
    pub medium: f64,
}

fn default_band_critical() -> f64 { 0.85 }
fn default_band_high() -> f64 { 0.60 }
fn default_band_medium() -> f64 { 0.35 }

impl Default for SeverityBands {
    fn default() -> Self {
        Self {
            critical: default_band_critical(),
            high: default_band_high(),
            medium: default_band_medium(),
        }
    }
}

impl SeverityBands {
    /// Map a risk score (probability × impact) to a severity level.
    pub fn classify(&self, score: f64) -> Severity {
        if score >= self.critical {
            Severity::Critical
        } else if score >= self.high {
            Severity::High
        } else if score >= self.medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskConfig {
    #[serde(default)]
    pub bands: SeverityBands,
    /// Impact multiplier per risk type (0.0-1.0); missing entries count as 1.0
    #[serde(default = "default_impact")]
    pub impact: BTreeMap<RiskType, f64>,
    /// Let High/Critical predictions inside the lead-time window through,
    /// flagged best-effort
    #[serde(default)]
    pub best_effort_override: bool,
}

fn default_impact() -> BTreeMap<RiskType, f64> {
    BTreeMap::from([
        (RiskType::Drought, 1.0),
        (RiskType::Frost, 1.0),
        (RiskType::Flood, 1.0),
        (RiskType::HeatStress, 0.95),
        (RiskType::PestOutbreak, 0.9),
        (RiskType::FungalDisease, 0.9),
    ])
}

impl RiskConfig {
    pub fn impact_for(&self, risk: RiskType) -> f64 {
        self.impact.get(&risk).copied().unwrap_or(1.0)
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            bands: SeverityBands::default(),
            impact: default_impact(),
            best_effort_override: false,
        }
    }
}

// ============================================================================
// Recommendations
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationConfig {
    /// Deadlines closer than this are emergencies
    #[serde(default = "default_emergency_window")]
    pub emergency_window_hours: i64,
    /// Cost that counts as one normalized unit
    #[serde(default = "default_cost_reference")]
    pub cost_reference: f64,
    /// Recommendations attached to a single alert
    #[serde(default = "default_max_per_alert")]
    pub max_per_alert: usize,
}

fn default_emergency_window() -> i64 { 6 }
fn default_cost_reference() -> f64 { 500.0 }
fn default_max_per_alert() -> usize { 5 }

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            emergency_window_hours: default_emergency_window(),
            cost_reference: default_cost_reference(),
            max_per_alert: default_max_per_alert(),
        }
    }
}

// ============================================================================
// Alerts / Scheduler
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertConfig {
    /// A delivered alert suppresses repeats for this long
    #[serde(default = "default_cooldown_hours")]
    pub cooldown_hours: i64,
}

fn default_cooldown_hours() -> i64 { 24 }

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown_hours: default_cooldown_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Extra lead time for High/Critical alerts; the effective lead is
    /// `max(12h, lead_buffer_hours)`
    #[serde(default = "default_lead_buffer")]
    pub lead_buffer_hours: i64,
}

fn default_lead_buffer() -> i64 { 12 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lead_buffer_hours: default_lead_buffer(),
        }
    }
}

// ============================================================================
// Delivery
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryConfig {
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_ms: u64,
    /// Retries per channel after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
    /// Add random jitter (up to 50% of the delay) to each backoff
    #[serde(default = "default_true")]
    pub jitter: bool,
    /// Consecutive failures that open a channel's circuit breaker
    #[serde(default = "default_breaker_threshold")]
    pub breaker_failure_threshold: u32,
    /// Time an open breaker waits before allowing a trial send
    #[serde(default = "default_breaker_cooldown")]
    pub breaker_cooldown_secs: u64,
    /// Dispatcher wake-up interval
    #[serde(default = "default_dispatch_tick")]
    pub dispatch_tick_ms: u64,
}

fn default_attempt_timeout() -> u64 { 5_000 }
fn default_max_retries() -> u32 { 3 }
fn default_backoff_base() -> u64 { 500 }
fn default_backoff_max() -> u64 { 30_000 }
fn default_true() -> bool { true }
fn default_breaker_threshold() -> u32 { 5 }
fn default_breaker_cooldown() -> u64 { 60 }
fn default_dispatch_tick() -> u64 { 1_000 }

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: default_attempt_timeout(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            jitter: default_true(),
            breaker_failure_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown(),
            dispatch_tick_ms: default_dispatch_tick(),
        }
    }
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Sled,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Audit records older than this are pruned at startup
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_storage_backend() -> StorageBackend { StorageBackend::Sled }
fn default_data_dir() -> String { "./data".to_string() }
fn default_retention_days() -> u32 { 365 }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            data_dir: default_data_dir(),
            retention_days: default_retention_days(),
        }
    }
}

// ============================================================================
// Models
// ============================================================================

/// Which built-in model adapters are active, and their historical accuracy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelsConfig {
    #[serde(default = "default_enabled_models")]
    pub enabled: Vec<String>,
    /// Historical accuracy per model id (0.0-1.0), maintained externally
    #[serde(default)]
    pub accuracy: BTreeMap<String, f64>,
    /// Accuracy assumed for models missing from `accuracy`
    #[serde(default = "default_accuracy")]
    pub default_accuracy: f64,
}

fn default_enabled_models() -> Vec<String> {
    vec![
        "water-balance".to_string(),
        "temperature-threshold".to_string(),
        "logistic-climate".to_string(),
        "degree-day".to_string(),
    ]
}

fn default_accuracy() -> f64 { 0.7 }

impl ModelsConfig {
    pub fn accuracy_for(&self, model_id: &str) -> f64 {
        self.accuracy
            .get(model_id)
            .copied()
            .unwrap_or(self.default_accuracy)
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_models(),
            accuracy: BTreeMap::new(),
            default_accuracy: default_accuracy(),
        }
    }
}
