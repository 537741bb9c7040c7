//! Pipeline Scenario Tests
//!
//! End-to-end assessment cycles through the public API: static observations
//! and in-memory farm profiles in, scheduled alerts and audit records out.
//! Model adapters are scripted so every scenario is deterministic.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use cropwatch::config::defaults::DELIVERY_QUEUE_CAPACITY;
use cropwatch::config::PipelineConfig;
use cropwatch::delivery::{DeliveryCoordinator, DeliveryDispatcher, LogTransport};
use cropwatch::ensemble::{ModelRegistry, Predictor};
use cropwatch::error::{ModelError, PipelineError};
use cropwatch::pipeline::{Collaborators, InMemoryFarmDirectory, PipelineCoordinator, SnapshotSource, StaticSource};
use cropwatch::ports::EventPort;
use cropwatch::storage::{AuditStore, InMemoryAudit};
use cropwatch::types::{
    AdminNotification, AdminReason, AlertKey, AlertState, Channel, CropProfile, CropType,
    DeliveryStatus, Equipment, FarmProfile, FeatureSnapshot, GrowthStage, ModelPrediction,
    NotificationPreferences, Observation, ResourceConstraints, RiskType, Severity, ThresholdConfig,
};
use cropwatch::AlertOrchestrator;

// ============================================================================
// Scripted models
// ============================================================================

/// Returns a fixed probability for its risk types, optionally after a delay.
struct Scripted {
    id: &'static str,
    risks: Vec<RiskType>,
    probability_bits: AtomicU64,
    event_hours: i64,
    delay_ms: u64,
}

impl Scripted {
    fn new(id: &'static str, risks: Vec<RiskType>, probability: f64, event_hours: i64) -> Self {
        Self {
            id,
            risks,
            probability_bits: AtomicU64::new(probability.to_bits()),
            event_hours,
            delay_ms: 0,
        }
    }

    fn slow(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    fn set_probability(&self, probability: f64) {
        self.probability_bits.store(probability.to_bits(), Ordering::SeqCst);
    }
}

#[async_trait]
impl Predictor for Scripted {
    fn id(&self) -> &str {
        self.id
    }

    fn supports(&self, risk: RiskType) -> bool {
        self.risks.contains(&risk)
    }

    async fn score(&self, snapshot: &FeatureSnapshot, risk: RiskType) -> Result<ModelPrediction, ModelError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        Ok(ModelPrediction {
            model_id: self.id.to_string(),
            risk_type: risk,
            probability: f64::from_bits(self.probability_bits.load(Ordering::SeqCst)),
            raw_confidence: 0.9,
            event_time: snapshot.as_of + ChronoDuration::hours(self.event_hours),
        })
    }
}

fn calm_risks() -> Vec<RiskType> {
    RiskType::ALL.into_iter().filter(|r| *r != RiskType::Drought).collect()
}

/// Two agreeing drought models plus two calm models for everything else.
fn drought_models(probability: f64, event_hours: i64) -> (ModelRegistry, Vec<Arc<Scripted>>) {
    let drought = vec![
        Arc::new(Scripted::new("drought-a", vec![RiskType::Drought], probability, event_hours)),
        Arc::new(Scripted::new("drought-b", vec![RiskType::Drought], probability, event_hours)),
    ];
    let mut registry = ModelRegistry::new();
    for model in &drought {
        registry.register(model.clone(), 0.8);
    }
    registry.register(Arc::new(Scripted::new("calm-a", calm_risks(), 0.05, 72)), 0.8);
    registry.register(Arc::new(Scripted::new("calm-b", calm_risks(), 0.05, 72)), 0.8);
    (registry, drought)
}

// ============================================================================
// Fixtures
// ============================================================================

fn observations(farm: &str) -> Vec<Observation> {
    let at = Utc::now() - ChronoDuration::hours(1);
    ["station-1", "satellite-1"]
        .into_iter()
        .map(|source| Observation {
            farm_id: farm.to_string(),
            timestamp: at,
            source_id: source.to_string(),
            measurements: BTreeMap::from([
                ("soil_moisture_pct".to_string(), 11.0),
                ("rain_forecast_72h_mm".to_string(), 0.0),
                ("max_temp_c".to_string(), 34.0),
            ]),
            quality_score: 0.95,
        })
        .collect()
}

fn profile(farm: &str, crop_type: CropType) -> FarmProfile {
    FarmProfile {
        farm_id: farm.to_string(),
        thresholds: Some(ThresholdConfig {
            farm_id: farm.to_string(),
            min_severity: BTreeMap::new(),
            default_min_severity: Severity::Medium,
            updated_at: Utc::now(),
        }),
        preferences: NotificationPreferences {
            channels: vec![Channel::Sms, Channel::Push],
            language: "en".to_string(),
        },
        crop: CropProfile {
            crop_type,
            growth_stage: GrowthStage::Vegetative,
            area_ha: 4.0,
        },
        resources: ResourceConstraints {
            budget: 2_000.0,
            labor_hours: 40.0,
            water_m3: 500.0,
            equipment: BTreeSet::from([Equipment::Irrigation]),
        },
    }
}

struct Harness {
    coordinator: Arc<PipelineCoordinator>,
    orchestrator: Arc<AlertOrchestrator>,
    audit: Arc<InMemoryAudit>,
    source: Arc<StaticSource>,
    directory: Arc<InMemoryFarmDirectory>,
    admin_rx: mpsc::Receiver<AdminNotification>,
    dispatcher: Option<DeliveryDispatcher>,
}

impl Harness {
    fn new(config: PipelineConfig, registry: ModelRegistry, farms: Vec<FarmProfile>) -> Self {
        let (admin, admin_rx) = EventPort::channel("admin", 256);
        let audit = Arc::new(InMemoryAudit::new());
        let orchestrator = Arc::new(AlertOrchestrator::new(config.alerts.clone()));
        let delivery = DeliveryCoordinator::new(
            Arc::new(LogTransport),
            config.delivery.clone(),
            EventPort::disconnected("tickets"),
            admin.clone(),
        );
        let audit_dyn: Arc<dyn AuditStore> = audit.clone();
        let (dispatcher, handle) = DeliveryDispatcher::new(
            delivery,
            Arc::clone(&orchestrator),
            Arc::clone(&audit_dyn),
            &config.delivery,
            DELIVERY_QUEUE_CAPACITY,
        );

        let source = Arc::new(StaticSource::new());
        for farm in &farms {
            source.set(&farm.farm_id, observations(&farm.farm_id));
        }
        let directory = Arc::new(InMemoryFarmDirectory::new(farms));

        let coordinator = Arc::new(PipelineCoordinator::new(
            &config,
            Collaborators {
                source: source.clone(),
                directory: directory.clone(),
                registry: Arc::new(registry),
                orchestrator: Arc::clone(&orchestrator),
                dispatcher: handle,
                audit: audit_dyn,
                admin,
            },
        ));

        Self {
            coordinator,
            orchestrator,
            audit,
            source,
            directory,
            admin_rx,
            dispatcher: Some(dispatcher),
        }
    }

    fn admin_events(&mut self) -> Vec<AdminNotification> {
        let mut events = Vec::new();
        while let Ok(event) = self.admin_rx.try_recv() {
            events.push(event);
        }
        events
    }
}

fn drought_key(farm: &str) -> AlertKey {
    AlertKey {
        farm_id: farm.to_string(),
        risk_type: RiskType::Drought,
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn drought_produces_one_high_alert_delivered_twelve_hours_ahead() {
    let (registry, _) = drought_models(0.7, 30);
    let h = Harness::new(PipelineConfig::default(), registry, vec![profile("farm-1", CropType::Wheat)]);

    let outcome = h.coordinator.run_cycle("farm-1", &CancellationToken::new()).await.unwrap();

    assert_eq!(outcome.dispatched.len(), 1);
    assert_eq!(outcome.degraded, 0);
    let alert = &outcome.dispatched[0];
    assert_eq!(alert.risk_type, RiskType::Drought);
    assert_eq!(alert.severity, Severity::High);
    assert_eq!(alert.state, AlertState::Scheduled);
    assert!(!alert.uncertain);
    assert_eq!(alert.delivery_time, alert.event_time - ChronoDuration::hours(12));
    assert!(!alert.best_effort_immediate);

    assert!(!alert.recommendations.is_empty());
    assert!(alert.recommendations.iter().all(|r| r.risk_type == RiskType::Drought));
    for pair in alert.recommendations.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert!(alert.recommendations.iter().all(|r| r.deadline <= alert.event_time));

    assert_eq!(outcome.assessment.overall_severity, Some(Severity::High));
    assert!(!outcome.assessment.thresholds_defaulted);
    assert_eq!(h.audit.recent_assessments(10).unwrap().len(), 1);
    assert_eq!(h.audit.alerts_for_farm("farm-1", 10).unwrap().len(), 1);
}

#[tokio::test]
async fn repeat_cycles_refresh_then_suppress_then_escalate() {
    let (registry, drought) = drought_models(0.7, 30);
    let h = Harness::new(PipelineConfig::default(), registry, vec![profile("farm-1", CropType::Wheat)]);
    let cancel = CancellationToken::new();

    let first = h.coordinator.run_cycle("farm-1", &cancel).await.unwrap();
    let original = first.dispatched[0].clone();

    // Undelivered: same alert, next revision
    let second = h.coordinator.run_cycle("farm-1", &cancel).await.unwrap();
    assert_eq!(second.dispatched.len(), 1);
    assert_eq!(second.dispatched[0].id, original.id);
    assert_eq!(second.dispatched[0].revision, original.revision + 1);
    assert_eq!(h.orchestrator.tracked_keys(), 1);
    let audited = h.audit.alerts_for_farm("farm-1", 10).unwrap();
    assert_eq!(audited.len(), 1);
    assert_eq!(audited[0].revision, original.revision + 1);

    // Delivered: inside the cool-down nothing new goes out
    let delivered = h
        .orchestrator
        .mark_delivered(&second.dispatched[0], Utc::now())
        .await
        .unwrap();
    h.audit.record_alert(&delivered).unwrap();
    let third = h.coordinator.run_cycle("farm-1", &cancel).await.unwrap();
    assert!(third.dispatched.is_empty());
    assert_eq!(third.suppressed, 1);
    let current = h.orchestrator.current(&drought_key("farm-1")).await.unwrap();
    assert_eq!(current.id, original.id);
    assert_eq!(current.state, AlertState::Delivered);
    assert_eq!(current.suppressed_count, 1);

    // The audit trail still shows the delivery
    let audited = h.audit.alerts_for_farm("farm-1", 10).unwrap();
    assert_eq!(audited.len(), 1);
    assert_eq!(audited[0].state, AlertState::Delivered);
    assert_eq!(audited[0].delivered_at, delivered.delivered_at);
    assert_eq!(audited[0].suppressed_count, 1);

    // Strictly higher severity breaks through the cool-down, same alert id
    for model in &drought {
        model.set_probability(0.92);
    }
    let fourth = h.coordinator.run_cycle("farm-1", &cancel).await.unwrap();
    assert_eq!(fourth.dispatched.len(), 1);
    assert_eq!(fourth.dispatched[0].severity, Severity::Critical);
    assert_eq!(fourth.dispatched[0].id, original.id);
    assert!(fourth.dispatched[0].revision > delivered.revision);
    assert_eq!(h.audit.alerts_for_farm("farm-1", 10).unwrap().len(), 1);
}

#[tokio::test]
async fn partial_model_timeout_lowers_confidence_without_degrading() {
    let (mut registry, _) = drought_models(0.7, 30);
    registry.register(
        Arc::new(Scripted::new("drought-slow", vec![RiskType::Drought], 0.7, 30).slow(2_000)),
        0.8,
    );
    let mut config = PipelineConfig::default();
    config.ensemble.model_timeout_ms = 50;
    let mut h = Harness::new(config, registry, vec![profile("farm-1", CropType::Wheat)]);

    let outcome = h.coordinator.run_cycle("farm-1", &CancellationToken::new()).await.unwrap();

    let drought = outcome
        .assessment
        .predictions
        .iter()
        .find(|p| p.prediction.risk_type == RiskType::Drought)
        .unwrap();
    assert!(!drought.prediction.degraded);
    assert_eq!(drought.prediction.contributing_models.len(), 2);
    assert_eq!(drought.prediction.expected_models, 3);
    assert!(drought.prediction.confidence < 0.7);
    assert!(drought.uncertain);
    assert_eq!(outcome.dispatched.len(), 1);
    assert!(outcome.dispatched[0].uncertain);
    assert!(outcome.dispatched[0].message.contains("confidence is low"));
    assert!(!h
        .admin_events()
        .iter()
        .any(|e| matches!(e.reason, AdminReason::ModelDegradation { .. })));
}

#[tokio::test]
async fn total_model_timeout_falls_back_to_baseline() {
    let mut registry = ModelRegistry::new();
    registry.register(
        Arc::new(Scripted::new("drought-a", vec![RiskType::Drought], 0.9, 30).slow(2_000)),
        0.8,
    );
    registry.register(
        Arc::new(Scripted::new("drought-b", vec![RiskType::Drought], 0.9, 30).slow(2_000)),
        0.8,
    );
    registry.register(Arc::new(Scripted::new("calm-a", calm_risks(), 0.05, 72)), 0.8);
    registry.register(Arc::new(Scripted::new("calm-b", calm_risks(), 0.05, 72)), 0.8);
    let mut config = PipelineConfig::default();
    config.ensemble.model_timeout_ms = 50;
    let mut h = Harness::new(config, registry, vec![profile("farm-1", CropType::Wheat)]);

    let outcome = h.coordinator.run_cycle("farm-1", &CancellationToken::new()).await.unwrap();

    assert_eq!(outcome.degraded, 1);
    let drought = outcome
        .assessment
        .predictions
        .iter()
        .find(|p| p.prediction.risk_type == RiskType::Drought)
        .unwrap();
    assert!(drought.prediction.degraded);
    assert!(drought.prediction.confidence <= 0.5);
    assert!(drought.prediction.contributing_models.is_empty());
    // Climatological prior is Low, below the farm's Medium threshold
    assert!(outcome.dispatched.is_empty());

    let events = h.admin_events();
    assert!(events.iter().any(|e| matches!(
        &e.reason,
        AdminReason::ModelDegradation { farm_id, risk_type: RiskType::Drought, responded: 0, expected: 2 }
            if farm_id == "farm-1"
    )));
}

#[tokio::test]
async fn cancelled_cycle_leaves_no_state() {
    let (registry, _) = drought_models(0.7, 30);
    let h = Harness::new(PipelineConfig::default(), registry, vec![profile("farm-1", CropType::Wheat)]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h.coordinator.run_cycle("farm-1", &cancel).await.unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled(ref f) if f == "farm-1"));
    assert_eq!(h.orchestrator.tracked_keys(), 0);
    assert!(h.audit.recent_alerts(10).unwrap().is_empty());

    let report = h.coordinator.run_directory(&cancel).await.unwrap();
    assert_eq!(report.cancelled, vec!["farm-1".to_string()]);
    assert!(report.completed.is_empty());
}

#[tokio::test]
async fn missing_thresholds_use_conservative_defaults() {
    let (registry, _) = drought_models(0.7, 30);
    let mut farm = profile("farm-1", CropType::Wheat);
    farm.thresholds = None;
    let h = Harness::new(PipelineConfig::default(), registry, vec![farm]);

    let outcome = h.coordinator.run_cycle("farm-1", &CancellationToken::new()).await.unwrap();

    assert!(outcome.assessment.thresholds_defaulted);
    // Conservative defaults alert on every severity, so the calm risks qualify too
    assert_eq!(outcome.dispatched.len(), RiskType::ALL.len());
    assert_eq!(outcome.dispatched[0].severity, Severity::High);
    assert!(outcome.dispatched[1..].iter().all(|a| a.severity == Severity::Low));
}

#[tokio::test]
async fn missing_observations_skip_farm_and_notify_admin() {
    let (registry, _) = drought_models(0.7, 30);
    let mut h = Harness::new(PipelineConfig::default(), registry, vec![profile("farm-1", CropType::Wheat)]);
    h.source.set("farm-1", Vec::new());

    let err = h.coordinator.run_cycle("farm-1", &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, PipelineError::NoSnapshot { .. }));
    assert!(h.audit.recent_assessments(10).unwrap().is_empty());

    let events = h.admin_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0].reason,
        AdminReason::DataSourceFailure { farm_id, .. } if farm_id == "farm-1"
    ));
}

#[tokio::test]
async fn crop_changes_recommendation_scores() {
    let (registry, _) = drought_models(0.7, 30);
    let h = Harness::new(
        PipelineConfig::default(),
        registry,
        vec![profile("farm-wheat", CropType::Wheat), profile("farm-soy", CropType::Soybean)],
    );

    let report = h.coordinator.run_directory(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.completed.len(), 2);

    let mulch_score = |farm: &str| {
        report
            .completed
            .iter()
            .find(|c| c.farm_id == farm)
            .and_then(|c| c.dispatched.first())
            .and_then(|a| a.recommendations.iter().find(|r| r.action.starts_with("Apply mulch")))
            .map(|r| r.score)
            .unwrap()
    };
    assert_ne!(mulch_score("farm-wheat"), mulch_score("farm-soy"));
}

#[tokio::test]
async fn one_farm_failing_does_not_affect_others() {
    let (registry, _) = drought_models(0.7, 30);
    let h = Harness::new(
        PipelineConfig::default(),
        registry,
        vec![profile("farm-a", CropType::Wheat), profile("farm-b", CropType::Maize)],
    );
    h.source.set("farm-b", Vec::new());
    h.source.set("farm-c", observations("farm-c"));

    let farms = vec!["farm-c".to_string(), "farm-b".to_string(), "farm-a".to_string()];
    let report = h.coordinator.run_all(farms, &CancellationToken::new()).await;

    assert_eq!(report.completed.len(), 1);
    assert_eq!(report.completed[0].farm_id, "farm-a");
    assert_eq!(report.alerts_dispatched(), 1);
    let failed: Vec<&str> = report.failed.iter().map(|f| f.farm_id.as_str()).collect();
    assert_eq!(failed, vec!["farm-b", "farm-c"]);
    assert!(report.failed[1].error.contains("farm-c"));
}

#[tokio::test]
async fn profile_update_applies_to_next_cycle() {
    let (registry, _) = drought_models(0.7, 30);
    let h = Harness::new(PipelineConfig::default(), registry, vec![profile("farm-1", CropType::Wheat)]);
    let cancel = CancellationToken::new();

    let mut raised = profile("farm-1", CropType::Wheat);
    raised.thresholds = Some(ThresholdConfig {
        farm_id: "farm-1".to_string(),
        min_severity: BTreeMap::from([(RiskType::Drought, Severity::Critical)]),
        default_min_severity: Severity::Medium,
        updated_at: Utc::now(),
    });
    h.directory.upsert(raised);

    let outcome = h.coordinator.run_cycle("farm-1", &cancel).await.unwrap();
    assert!(outcome.dispatched.is_empty());
    assert_eq!(outcome.assessment.overall_severity, None);
}

#[tokio::test]
async fn short_notice_alert_delivered_immediately_with_override() {
    let (registry, _) = drought_models(0.7, 10);
    let mut config = PipelineConfig::default();
    config.risk.best_effort_override = true;
    config.delivery.dispatch_tick_ms = 10;
    let mut h = Harness::new(config, registry, vec![profile("farm-1", CropType::Wheat)]);

    let cancel = CancellationToken::new();
    let dispatcher = h.dispatcher.take().unwrap();
    let running = tokio::spawn(dispatcher.run(cancel.clone()));

    let outcome = h.coordinator.run_cycle("farm-1", &cancel).await.unwrap();
    let alert = outcome.dispatched[0].clone();
    assert!(alert.best_effort);
    assert!(alert.best_effort_immediate);
    assert!(alert.message.contains("Short notice"));

    let mut delivered = None;
    for _ in 0..200 {
        let current = h.orchestrator.current(&drought_key("farm-1")).await.unwrap();
        if current.state == AlertState::Delivered {
            delivered = Some(current);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let delivered = delivered.expect("alert was not delivered");
    assert_eq!(delivered.id, alert.id);

    let tickets = h.audit.recent_tickets(10).unwrap();
    assert_eq!(tickets.len(), 1);
    assert_eq!(tickets[0].channel, Channel::Sms);
    assert_eq!(tickets[0].status, DeliveryStatus::Sent);

    cancel.cancel();
    running.await.unwrap();
}

#[tokio::test]
async fn short_notice_alert_dropped_without_override() {
    let (registry, _) = drought_models(0.7, 10);
    let h = Harness::new(PipelineConfig::default(), registry, vec![profile("farm-1", CropType::Wheat)]);

    let outcome = h.coordinator.run_cycle("farm-1", &CancellationToken::new()).await.unwrap();
    assert!(outcome.dispatched.is_empty());
    let drought = outcome
        .assessment
        .predictions
        .iter()
        .find(|p| p.prediction.risk_type == RiskType::Drought)
        .unwrap();
    assert!(drought.meets_threshold);
    assert!(!drought.actionable);
}

#[test]
fn static_source_serves_latest_observations() {
    let source = StaticSource::new();
    source.set("farm-1", observations("farm-1"));
    let first = tokio_test::block_on(source.observations("farm-1", Utc::now())).unwrap();
    assert_eq!(first.len(), 2);

    source.set("farm-1", observations("farm-1").into_iter().take(1).collect());
    let second = tokio_test::block_on(source.observations("farm-1", Utc::now())).unwrap();
    assert_eq!(second.len(), 1);
}
