//! Config validation: unknown-key detection with Levenshtein suggestions
//! and operational range warnings.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::HashSet;

use crate::types::RiskType;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for PipelineConfig.
///
/// Maintained by hand to match the struct hierarchy in pipeline_config.rs.
/// Keyed maps (priors, impact, accuracy) are listed in [`keyed_tables`].
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [server]
        "server",
        "server.addr",
        // [pipeline]
        "pipeline",
        "pipeline.cycle_interval_secs",
        "pipeline.profile_lookup_timeout_ms",
        "pipeline.source_timeout_ms",
        // [aggregation]
        "aggregation",
        "aggregation.lookback_hours",
        "aggregation.max_future_skew_secs",
        "aggregation.required_features",
        // [ensemble]
        "ensemble",
        "ensemble.model_timeout_ms",
        "ensemble.max_concurrent_models",
        "ensemble.min_responders",
        "ensemble.degraded_confidence_ceiling",
        "ensemble.single_source_factor",
        "ensemble.baseline_horizon_hours",
        "ensemble.climatological_priors",
        // [risk]
        "risk",
        "risk.best_effort_override",
        "risk.bands",
        "risk.bands.critical",
        "risk.bands.high",
        "risk.bands.medium",
        "risk.impact",
        // [recommendations]
        "recommendations",
        "recommendations.emergency_window_hours",
        "recommendations.cost_reference",
        "recommendations.max_per_alert",
        // [alerts]
        "alerts",
        "alerts.cooldown_hours",
        // [scheduler]
        "scheduler",
        "scheduler.lead_buffer_hours",
        // [delivery]
        "delivery",
        "delivery.attempt_timeout_ms",
        "delivery.max_retries",
        "delivery.backoff_base_ms",
        "delivery.backoff_max_ms",
        "delivery.jitter",
        "delivery.breaker_failure_threshold",
        "delivery.breaker_cooldown_secs",
        "delivery.dispatch_tick_ms",
        // [storage]
        "storage",
        "storage.backend",
        "storage.data_dir",
        "storage.retention_days",
        // [models]
        "models",
        "models.enabled",
        "models.accuracy",
        "models.default_accuracy",
    ];
    keys.iter().copied().collect()
}

/// Tables whose children are map entries rather than struct fields.
///
/// The bool marks tables keyed by risk type; their keys are checked against
/// the known risk names. Other keyed tables accept any key.
fn keyed_tables() -> &'static [(&'static str, bool)] {
    &[
        ("ensemble.climatological_priors", true),
        ("risk.impact", true),
        ("models.accuracy", false),
    ]
}

fn risk_key_names() -> Vec<String> {
    RiskType::ALL
        .iter()
        .filter_map(|r| serde_json::to_value(r).ok())
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest candidate for an unknown key, if within edit distance 3.
pub fn suggest_correction<'a, I>(unknown: &str, known: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(&str, usize)> = None;
    for k in known {
        let dist = levenshtein(unknown, k);
        if dist > 3 {
            continue;
        }
        // Ties resolve alphabetically so suggestions are stable across runs
        let better = match best {
            None => true,
            Some((best_k, best_dist)) => dist < best_dist || (dist == best_dist && k < best_k),
        };
        if better {
            best = Some((k, dist));
        }
    }
    best.map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// Never fails on unknown keys; it only warns.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are handled by serde later
    };

    let known = known_config_keys();
    let risk_names = risk_key_names();
    let mut warnings = Vec::new();

    for key in walk_toml_keys(&value, "") {
        if known.contains(key.as_str()) {
            continue;
        }

        let keyed = keyed_tables()
            .iter()
            .find(|(table, _)| key.starts_with(&format!("{table}.")));
        if let Some((table, by_risk)) = keyed {
            if !by_risk {
                continue;
            }
            let entry = &key[table.len() + 1..];
            if risk_names.iter().any(|r| r == entry) {
                continue;
            }
            warnings.push(ValidationWarning {
                field: key.clone(),
                message: format!("Unknown risk type '{entry}' in [{table}]"),
                suggestion: suggest_correction(entry, risk_names.iter().map(String::as_str)),
            });
            continue;
        }

        warnings.push(ValidationWarning {
            field: key.clone(),
            message: format!("Unknown config key '{key}'"),
            suggestion: suggest_correction(&key, known.iter().copied()),
        });
    }

    warnings
}

// ============================================================================
// Operational Range Warnings
// ============================================================================

/// Flag values that are legal but unlikely to be intended.
///
/// Hard errors live in `PipelineConfig::validate`.
pub fn validate_operational_ranges(config: &super::PipelineConfig) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    let enabled = config.models.enabled.len();
    if config.ensemble.min_responders > enabled {
        warnings.push(ValidationWarning {
            field: "ensemble.min_responders".to_string(),
            message: format!(
                "ensemble.min_responders = {} exceeds the {} enabled models; every prediction will use the climatological fallback",
                config.ensemble.min_responders, enabled
            ),
            suggestion: None,
        });
    }

    if config.alerts.cooldown_hours > 24 * 7 {
        warnings.push(ValidationWarning {
            field: "alerts.cooldown_hours".to_string(),
            message: format!(
                "alerts.cooldown_hours = {} is longer than a week",
                config.alerts.cooldown_hours
            ),
            suggestion: None,
        });
    }

    if config.pipeline.cycle_interval_secs < 60 {
        warnings.push(ValidationWarning {
            field: "pipeline.cycle_interval_secs".to_string(),
            message: format!(
                "pipeline.cycle_interval_secs = {} re-assesses every farm more than once a minute",
                config.pipeline.cycle_interval_secs
            ),
            suggestion: None,
        });
    }

    if config.ensemble.model_timeout_ms > config.pipeline.source_timeout_ms * 4 {
        warnings.push(ValidationWarning {
            field: "ensemble.model_timeout_ms".to_string(),
            message: format!(
                "ensemble.model_timeout_ms = {} is far above pipeline.source_timeout_ms = {}",
                config.ensemble.model_timeout_ms, config.pipeline.source_timeout_ms
            ),
            suggestion: None,
        });
    }

    warnings
}

// ============================================================================
// Tests
// ============================================================================
