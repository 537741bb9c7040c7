//! Pipeline Coordinator - one assessment cycle per farm
//!
//! ```text
//! STAGE 0: Fetch observations + farm profile (concurrent, timeout-bounded)
//! STAGE 1: Feature Aggregator        → FeatureSnapshot
//! STAGE 2: Ensemble Predictor        → EnsemblePrediction per risk type
//! STAGE 3: Risk Evaluator            → RiskAssessment (audited)
//! STAGE 4: Recommendation Synthesizer
//! STAGE 5: Alert Orchestrator        → admission (per-key locks held)
//! STAGE 6: Priority Scheduler        → commit, audit, hand to dispatcher
//! ```
//!
//! Cancellation is checked between stages. A cycle cancelled before commit
//! drops its admission, so no per-key state changes and nothing is
//! dispatched. Cycles for different farms share nothing but the
//! orchestrator, whose per-key locks serialize overlapping keys.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{FarmDirectory, SnapshotSource};
use crate::alerts::{AdmissionKind, AlertOrchestrator};
use crate::config::{CycleConfig, PipelineConfig};
use crate::delivery::{DispatchRequest, DispatcherHandle};
use crate::ensemble::{EnsemblePredictor, ModelRegistry};
use crate::error::PipelineError;
use crate::features::FeatureAggregator;
use crate::ports::EventPort;
use crate::recommend::RecommendationSynthesizer;
use crate::risk::RiskEvaluator;
use crate::scheduler::PriorityScheduler;
use crate::storage::AuditStore;
use crate::types::{
    AdminNotification, AdminReason, Alert, FarmId, FarmProfile, Observation, RiskAssessment,
    RiskType, ThresholdConfig,
};

/// External services and shared state a coordinator is wired to.
pub struct Collaborators {
    pub source: Arc<dyn SnapshotSource>,
    pub directory: Arc<dyn FarmDirectory>,
    pub registry: Arc<ModelRegistry>,
    pub orchestrator: Arc<AlertOrchestrator>,
    pub dispatcher: DispatcherHandle,
    pub audit: Arc<dyn AuditStore>,
    pub admin: EventPort<AdminNotification>,
}

/// Result of one completed farm cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleOutcome {
    pub farm_id: FarmId,
    pub assessment: RiskAssessment,
    /// Alerts scheduled and handed to the dispatcher, in delivery order
    pub dispatched: Vec<Alert>,
    /// Qualifying predictions suppressed by the cool-down
    pub suppressed: usize,
    /// Risk types that fell back to the climatological baseline
    pub degraded: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FarmFailure {
    pub farm_id: FarmId,
    pub error: String,
}

/// Summary of a multi-farm run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub completed: Vec<CycleOutcome>,
    pub failed: Vec<FarmFailure>,
    pub cancelled: Vec<FarmId>,
}

impl CycleReport {
    pub fn alerts_dispatched(&self) -> usize {
        self.completed.iter().map(|c| c.dispatched.len()).sum()
    }
}

pub struct PipelineCoordinator {
    config: CycleConfig,
    aggregator: FeatureAggregator,
    ensemble: EnsemblePredictor,
    evaluator: RiskEvaluator,
    synthesizer: RecommendationSynthesizer,
    orchestrator: Arc<AlertOrchestrator>,
    scheduler: PriorityScheduler,
    source: Arc<dyn SnapshotSource>,
    directory: Arc<dyn FarmDirectory>,
    dispatcher: DispatcherHandle,
    audit: Arc<dyn AuditStore>,
    admin: EventPort<AdminNotification>,
}

impl PipelineCoordinator {
    pub fn new(config: &PipelineConfig, parts: Collaborators) -> Self {
        info!(
            models = parts.registry.len(),
            source = parts.source.source_name(),
            audit = parts.audit.backend_name(),
            "Initializing pipeline coordinator"
        );
        let ensemble = EnsemblePredictor::new(parts.registry, config.ensemble.clone(), parts.admin.clone())
            .with_bands(config.risk.bands);
        Self {
            config: config.pipeline.clone(),
            aggregator: FeatureAggregator::new(config.aggregation.clone()),
            ensemble,
            evaluator: RiskEvaluator::new(config.risk.clone()),
            synthesizer: RecommendationSynthesizer::new(config.recommendations.clone()),
            orchestrator: parts.orchestrator,
            scheduler: PriorityScheduler::new(config.scheduler.clone()),
            source: parts.source,
            directory: parts.directory,
            dispatcher: parts.dispatcher,
            audit: parts.audit,
            admin: parts.admin,
        }
    }

    pub fn orchestrator(&self) -> &Arc<AlertOrchestrator> {
        &self.orchestrator
    }

    /// Run one cycle for every farm in the directory.
    pub async fn run_directory(self: &Arc<Self>, cancel: &CancellationToken) -> Result<CycleReport, PipelineError> {
        let farms = self.directory.farm_ids().await.map_err(|e| PipelineError::ProfileUnavailable {
            farm_id: "*".to_string(),
            detail: e.to_string(),
        })?;
        Ok(self.run_all(farms, cancel).await)
    }

    /// Run cycles for `farms` concurrently. One farm's failure never affects
    /// another's.
    pub async fn run_all(self: &Arc<Self>, farms: Vec<FarmId>, cancel: &CancellationToken) -> CycleReport {
        let mut set = JoinSet::new();
        for farm_id in farms {
            let this = Arc::clone(self);
            let cancel = cancel.clone();
            set.spawn(async move {
                let result = this.run_cycle(&farm_id, &cancel).await;
                (farm_id, result)
            });
        }

        let mut report = CycleReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => report.completed.push(outcome),
                Ok((farm_id, Err(PipelineError::Cancelled(_)))) => report.cancelled.push(farm_id),
                Ok((farm_id, Err(e))) => report.failed.push(FarmFailure {
                    farm_id,
                    error: e.to_string(),
                }),
                Err(e) => error!(error = %e, "Farm cycle task panicked"),
            }
        }

        report.completed.sort_by(|a, b| a.farm_id.cmp(&b.farm_id));
        report.failed.sort_by(|a, b| a.farm_id.cmp(&b.farm_id));
        report.cancelled.sort();
        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            cancelled = report.cancelled.len(),
            alerts = report.alerts_dispatched(),
            "Pipeline run finished"
        );
        report
    }

    /// Run stages 0-6 for one farm.
    pub async fn run_cycle(&self, farm_id: &str, cancel: &CancellationToken) -> Result<CycleOutcome, PipelineError> {
        let now = Utc::now();
        let cancelled = || PipelineError::Cancelled(farm_id.to_string());

        // STAGE 0: inputs
        let (observations, profile) = tokio::join!(self.fetch_observations(farm_id, now), self.fetch_profile(farm_id));
        let observations = observations.map_err(|e| self.report_failure(farm_id, e, now))?;
        let profile = profile.map_err(|e| self.report_failure(farm_id, e, now))?;

        let (thresholds, thresholds_defaulted) = match &profile.thresholds {
            Some(t) => (t.clone(), false),
            None => {
                warn!(farm_id = %farm_id, "No threshold configuration, using conservative defaults");
                (ThresholdConfig::conservative_default(farm_id), true)
            }
        };

        // STAGE 1: snapshot
        let snapshot = self
            .aggregator
            .aggregate(farm_id, &observations, now)
            .map_err(|e| self.report_failure(farm_id, PipelineError::from(e), now))?;
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        // STAGE 2: ensemble
        let predictions = self.ensemble.predict(&snapshot, &RiskType::ALL).await;
        let degraded = predictions.iter().filter(|p| p.degraded).count();
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        // STAGE 3: risk
        let assessment = self
            .evaluator
            .evaluate(farm_id, &predictions, &thresholds, thresholds_defaulted, now);
        if let Err(e) = self.audit.record_assessment(&assessment) {
            warn!(farm_id = %farm_id, error = %e, "Failed to audit assessment");
        }
        if !assessment.triggers_alert() {
            debug!(farm_id = %farm_id, "No qualifying risk this cycle");
            return Ok(CycleOutcome {
                farm_id: farm_id.to_string(),
                assessment,
                dispatched: Vec::new(),
                suppressed: 0,
                degraded,
            });
        }

        // STAGE 4: recommendations
        let recommendations = self
            .synthesizer
            .synthesize(&assessment, &profile.crop, &profile.resources, now);
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        // STAGE 5: admission (locks held until commit or drop)
        let admission = self.orchestrator.admit(&assessment, &recommendations, now).await;
        let suppressed = admission
            .candidates()
            .iter()
            .filter(|c| c.kind == AdmissionKind::Suppressed)
            .count();
        if cancel.is_cancelled() {
            debug!(farm_id = %farm_id, "Cycle cancelled, discarding admission");
            return Err(cancelled());
        }

        // STAGE 6: schedule + commit
        let scheduled = self.scheduler.schedule(admission.to_schedule(), now);
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        let committed = admission.commit(scheduled.clone());
        for alert in &committed {
            if let Err(e) = self.audit.record_alert(alert) {
                warn!(alert_id = %alert.id, error = %e, "Failed to audit alert");
            }
        }

        for alert in &scheduled {
            self.dispatcher
                .submit(DispatchRequest {
                    alert: alert.clone(),
                    channels: profile.preferences.channels.clone(),
                    language: profile.preferences.language.clone(),
                })
                .await?;
        }

        info!(
            farm_id = %farm_id,
            severity = ?assessment.overall_severity,
            scheduled = scheduled.len(),
            suppressed,
            degraded,
            "Cycle complete"
        );
        Ok(CycleOutcome {
            farm_id: farm_id.to_string(),
            assessment,
            dispatched: scheduled,
            suppressed,
            degraded,
        })
    }

    async fn fetch_observations(&self, farm_id: &str, now: DateTime<Utc>) -> Result<Vec<Observation>, PipelineError> {
        let limit = Duration::from_millis(self.config.source_timeout_ms);
        match tokio::time::timeout(limit, self.source.observations(farm_id, now)).await {
            Ok(Ok(observations)) => Ok(observations),
            Ok(Err(e)) => Err(PipelineError::NoSnapshot {
                farm_id: farm_id.to_string(),
                detail: e.to_string(),
            }),
            Err(_) => Err(PipelineError::NoSnapshot {
                farm_id: farm_id.to_string(),
                detail: format!("{} timed out after {}ms", self.source.source_name(), limit.as_millis()),
            }),
        }
    }

    async fn fetch_profile(&self, farm_id: &str) -> Result<Arc<FarmProfile>, PipelineError> {
        let limit = Duration::from_millis(self.config.profile_lookup_timeout_ms);
        match tokio::time::timeout(limit, self.directory.profile(farm_id)).await {
            Ok(Ok(profile)) => Ok(profile),
            Ok(Err(e)) => Err(PipelineError::ProfileUnavailable {
                farm_id: farm_id.to_string(),
                detail: e.to_string(),
            }),
            Err(_) => Err(PipelineError::ProfileUnavailable {
                farm_id: farm_id.to_string(),
                detail: format!("lookup timed out after {}ms", limit.as_millis()),
            }),
        }
    }

    /// Log and raise a data-source failure for a cycle that cannot run.
    fn report_failure(&self, farm_id: &str, err: PipelineError, now: DateTime<Utc>) -> PipelineError {
        warn!(farm_id = %farm_id, error = %err, "Skipping farm cycle");
        self.admin.emit(AdminNotification::single_farm(
            AdminReason::DataSourceFailure {
                farm_id: farm_id.to_string(),
                detail: err.to_string(),
            },
            "farm skipped for this cycle",
            now,
        ));
        err
    }
}
