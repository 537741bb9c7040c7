//! Config Validation Tests
//!
//! Typo detection, hard validation errors and operational range warnings,
//! exercised through the public config API.

use cropwatch::config::validation::{
    known_config_keys, suggest_correction, validate_operational_ranges, validate_unknown_keys,
};
use cropwatch::config::{ConfigError, PipelineConfig, StorageBackend};
use cropwatch::types::RiskType;

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn typo_in_alert_section_warns_with_suggestion() {
    let toml_str = r#"
[alerts]
cooldwn_hours = 12
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert!(warnings[0].field.contains("cooldwn_hours"));
    assert_eq!(warnings[0].suggestion.as_deref(), Some("alerts.cooldown_hours"));
}

#[test]
fn unknown_risk_type_in_impact_table_warns() {
    let toml_str = r#"
[risk.impact]
drougth = 0.9
frost = 1.0
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("drougth"));
    assert_eq!(warnings[0].suggestion.as_deref(), Some("drought"));
}

#[test]
fn model_accuracy_accepts_any_model_id() {
    let toml_str = r#"
[models.accuracy]
"partner-forecast-v2" = 0.82
"#;
    assert!(validate_unknown_keys(toml_str).is_empty());
}

#[test]
fn valid_config_produces_zero_warnings() {
    let toml_str = r#"
[server]
addr = "127.0.0.1:9000"

[pipeline]
cycle_interval_secs = 1800

[ensemble]
min_responders = 2
model_timeout_ms = 1000

[ensemble.climatological_priors]
frost = 0.2

[risk]
best_effort_override = true

[risk.bands]
critical = 0.9
high = 0.65
medium = 0.4

[delivery]
max_retries = 5
jitter = false

[storage]
backend = "memory"
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
}

#[test]
fn far_off_key_has_no_suggestion() {
    let warnings = validate_unknown_keys("completely_unrelated_section = 1\n");
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].suggestion.is_none());
}

#[test]
fn known_keys_cover_every_section() {
    let keys = known_config_keys();
    for section in [
        "server", "pipeline", "aggregation", "ensemble", "risk", "recommendations", "alerts",
        "scheduler", "delivery", "storage", "models",
    ] {
        assert!(keys.contains(section), "missing section {section}");
    }
}

#[test]
fn suggestion_prefers_closest_key() {
    let suggestion = suggest_correction("delivery.max_retry", known_config_keys().into_iter());
    assert_eq!(suggestion.as_deref(), Some("delivery.max_retries"));
}

// ============================================================================
// Hard Validation
// ============================================================================

#[test]
fn parsed_file_applies_values_and_defaults() {
    let config = PipelineConfig::from_toml_str(
        r#"
[risk]
best_effort_override = true

[risk.impact]
pest_outbreak = 0.5

[storage]
backend = "memory"
retention_days = 30
"#,
    )
    .unwrap();
    assert!(config.risk.best_effort_override);
    assert_eq!(config.risk.impact_for(RiskType::PestOutbreak), 0.5);
    // Entries missing from a user-supplied impact table count as full impact
    assert_eq!(config.risk.impact_for(RiskType::Frost), 1.0);
    assert_eq!(config.storage.backend, StorageBackend::Memory);
    assert_eq!(config.storage.retention_days, 30);
    assert_eq!(config.alerts.cooldown_hours, 24);
}

#[test]
fn every_problem_reported_at_once() {
    let err = PipelineConfig::from_toml_str(
        r#"
[ensemble]
min_responders = 0
degraded_confidence_ceiling = 0.9

[recommendations]
cost_reference = 0.0

[delivery]
backoff_base_ms = 5000
backoff_max_ms = 100
"#,
    )
    .unwrap_err();

    match err {
        ConfigError::Validation(errors) => {
            assert_eq!(errors.len(), 4, "errors: {errors:?}");
            assert!(errors.iter().any(|e| e.contains("min_responders")));
            assert!(errors.iter().any(|e| e.contains("degraded_confidence_ceiling")));
            assert!(errors.iter().any(|e| e.contains("cost_reference")));
            assert!(errors.iter().any(|e| e.contains("backoff_max_ms")));
        }
        other => panic!("expected validation error, got {other}"),
    }
}

#[test]
fn out_of_range_accuracy_rejected() {
    let err = PipelineConfig::from_toml_str(
        r#"
[models.accuracy]
"water-balance" = 1.4
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("models.accuracy.water-balance"));
}

#[test]
fn malformed_toml_is_parse_error() {
    let err = PipelineConfig::from_toml_str("[alerts\ncooldown_hours = ").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(..)));
}

#[test]
fn load_from_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cropwatch.toml");
    std::fs::write(&path, "[scheduler]\nlead_buffer_hours = 18\n").unwrap();
    let config = PipelineConfig::load_from_file(&path).unwrap();
    assert_eq!(config.scheduler.lead_buffer_hours, 18);

    let missing = dir.path().join("absent.toml");
    let err = PipelineConfig::load_from_file(&missing).unwrap_err();
    assert!(matches!(err, ConfigError::Io(ref p, _) if p == &missing));
}

// ============================================================================
// Operational Ranges
// ============================================================================

#[test]
fn defaults_produce_no_range_warnings() {
    assert!(validate_operational_ranges(&PipelineConfig::default()).is_empty());
}

#[test]
fn min_responders_above_enabled_models_warns() {
    let mut config = PipelineConfig::default();
    config.models.enabled = vec!["water-balance".to_string()];
    config.ensemble.min_responders = 2;
    let warnings = validate_operational_ranges(&config);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].field, "ensemble.min_responders");
}

#[test]
fn aggressive_cycle_interval_warns_but_loads() {
    let config = PipelineConfig::from_toml_str("[pipeline]\ncycle_interval_secs = 10\n").unwrap();
    assert_eq!(config.pipeline.cycle_interval_secs, 10);
    let warnings = validate_operational_ranges(&config);
    assert!(warnings.iter().any(|w| w.field == "pipeline.cycle_interval_secs"));
}
