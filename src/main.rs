//! CropWatch - Farm Risk Decision Pipeline
//!
//! Runs assessment cycles for a set of farms, delivers alerts through the
//! logging transport and serves the monitoring API.
//!
//! # Usage
//!
//! ```bash
//! # Twelve simulated farms, one cycle per minute
//! cargo run --release -- --farms 12 --interval-secs 60
//!
//! # Three cycles, JSON logs, in-memory audit
//! CROPWATCH_CONFIG=./memory.toml cargo run -- --cycles 3 --json
//! ```
//!
//! # Environment Variables
//!
//! - `CROPWATCH_CONFIG`: Path to the pipeline config (default: ./cropwatch.toml)
//! - `RUST_LOG`: Logging level (default: info)
//! - `RESET_DB`: Set to "true" to wipe the audit database on startup

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cropwatch::api::{create_app, AdminEventLog, ApiState};
use cropwatch::config::defaults::{ADMIN_EVENT_HISTORY, DELIVERY_QUEUE_CAPACITY};
use cropwatch::config::{PipelineConfig, StorageBackend};
use cropwatch::delivery::{DeliveryCoordinator, DeliveryDispatcher, LogTransport};
use cropwatch::pipeline::{Collaborators, InMemoryFarmDirectory, PipelineCoordinator, SimulatedSource};
use cropwatch::ports::{EventPort, DEFAULT_PORT_CAPACITY};
use cropwatch::storage::{AuditStore, InMemoryAudit, SledAudit};
use cropwatch::types::{
    AdminNotification, Channel, CropProfile, CropType, DeliveryTicket, Equipment, FarmProfile,
    GrowthStage, NotificationPreferences, ResourceConstraints, RiskType, Severity, ThresholdConfig,
};
use cropwatch::{AlertOrchestrator, ModelRegistry};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "cropwatch")]
#[command(about = "CropWatch Farm Risk Decision Pipeline")]
#[command(version)]
struct CliArgs {
    /// Number of simulated farms to register
    #[arg(long, default_value = "6")]
    farms: usize,

    /// Stop scheduling new cycles after this many (0 = run until Ctrl+C)
    #[arg(long, default_value = "0")]
    cycles: u64,

    /// Override the cycle interval from the config file
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Override the monitoring API address (default: "0.0.0.0:8080")
    #[arg(short, long)]
    addr: Option<String>,

    /// Override the audit data directory (default: "./data")
    #[arg(long)]
    data_dir: Option<String>,

    /// Explicit config file (otherwise $CROPWATCH_CONFIG, then ./cropwatch.toml)
    #[arg(long, env = "CROPWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Seed for the simulated observation source
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Wipe the audit database on startup.
    /// WARNING: This is destructive and cannot be undone!
    /// Can also be set via RESET_DB=true environment variable.
    #[arg(long)]
    reset_db: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,
}

/// Check if database reset is requested via CLI flag or environment variable.
fn should_reset_db(cli_flag: bool) -> bool {
    if cli_flag {
        return true;
    }
    if let Ok(val) = std::env::var("RESET_DB") {
        let val_lower = val.to_lowercase();
        return val_lower == "true" || val_lower == "1" || val_lower == "yes";
    }
    false
}

/// Remove the audit data directory and all its contents.
fn reset_data_directory(data_path: &Path) -> Result<()> {
    if !data_path.exists() {
        info!("Data directory does not exist, nothing to reset");
        return Ok(());
    }
    warn!(path = %data_path.display(), "RESET_DB requested, wiping audit data");
    std::fs::remove_dir_all(data_path).context("Failed to remove data directory")?;
    Ok(())
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    Dispatcher,
    CycleLoop,
    AdminDrain,
    TicketDrain,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::Dispatcher => write!(f, "Dispatcher"),
            TaskName::CycleLoop => write!(f, "CycleLoop"),
            TaskName::AdminDrain => write!(f, "AdminDrain"),
            TaskName::TicketDrain => write!(f, "TicketDrain"),
        }
    }
}

// ============================================================================
// Wiring
// ============================================================================

fn open_audit(config: &PipelineConfig) -> Result<Arc<dyn AuditStore>> {
    let audit: Arc<dyn AuditStore> = match config.storage.backend {
        StorageBackend::Memory => Arc::new(InMemoryAudit::new()),
        StorageBackend::Sled => {
            let path = Path::new(&config.storage.data_dir).join("audit.db");
            Arc::new(
                SledAudit::open(&path)
                    .with_context(|| format!("Failed to open audit database at {}", path.display()))?,
            )
        }
    };

    let cutoff = Utc::now() - ChronoDuration::days(i64::from(config.storage.retention_days));
    match audit.prune_older_than(cutoff) {
        Ok(0) => {}
        Ok(n) => info!(removed = n, retention_days = config.storage.retention_days, "Pruned old audit records"),
        Err(e) => warn!(error = %e, "Failed to prune audit records"),
    }
    info!(backend = audit.backend_name(), "Audit store ready");
    Ok(audit)
}

/// Profiles for `count` simulated farms, cycling through crops and stages.
/// Every fourth farm has no threshold configuration.
fn demo_farms(count: usize) -> Vec<FarmProfile> {
    const CROPS: [CropType; 6] = [
        CropType::Maize,
        CropType::Wheat,
        CropType::Rice,
        CropType::Soybean,
        CropType::Vegetables,
        CropType::Orchard,
    ];
    const STAGES: [GrowthStage; 5] = [
        GrowthStage::Seedling,
        GrowthStage::Vegetative,
        GrowthStage::Flowering,
        GrowthStage::Fruiting,
        GrowthStage::Maturity,
    ];
    const CHANNELS: [&[Channel]; 3] = [
        &[Channel::Push, Channel::Sms],
        &[Channel::Sms, Channel::Voice],
        &[Channel::Email, Channel::Push],
    ];

    (0..count)
        .map(|i| {
            let farm_id = format!("farm-{:03}", i + 1);
            let thresholds = (i % 4 != 3).then(|| ThresholdConfig {
                farm_id: farm_id.clone(),
                min_severity: BTreeMap::from([(RiskType::PestOutbreak, Severity::High)]),
                default_min_severity: Severity::Medium,
                updated_at: Utc::now(),
            });
            let equipment: BTreeSet<Equipment> = match i % 3 {
                0 => BTreeSet::from([Equipment::Irrigation, Equipment::Sprayer]),
                1 => BTreeSet::from([Equipment::FrostFan, Equipment::CoverFabric, Equipment::DrainagePump]),
                _ => BTreeSet::new(),
            };
            FarmProfile {
                farm_id,
                thresholds,
                preferences: NotificationPreferences {
                    channels: CHANNELS[i % CHANNELS.len()].to_vec(),
                    language: "en".to_string(),
                },
                crop: CropProfile {
                    crop_type: CROPS[i % CROPS.len()],
                    growth_stage: STAGES[(i / 2) % STAGES.len()],
                    area_ha: 2.0 + (i % 5) as f64 * 3.0,
                },
                resources: ResourceConstraints {
                    equipment,
                    ..ResourceConstraints::default()
                },
            }
        })
        .collect()
}

// ============================================================================
// Tasks
// ============================================================================

/// Spawn the HTTP server task into the JoinSet.
fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: axum::Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await
            .context("HTTP server error")?;
        info!("[HttpServer] Graceful shutdown complete");
        Ok(TaskName::HttpServer)
    });
}

/// Record admin notifications for the API and log them.
fn spawn_admin_drain(
    task_set: &mut JoinSet<Result<TaskName>>,
    mut rx: mpsc::Receiver<AdminNotification>,
    log: AdminEventLog,
) {
    task_set.spawn(async move {
        while let Some(event) = rx.recv().await {
            warn!(
                farms_affected = event.impact_estimate.farms_affected,
                "ADMIN: {} ({})",
                event.reason,
                event.impact_estimate.summary
            );
            log.push(event);
        }
        Ok(TaskName::AdminDrain)
    });
}

fn spawn_ticket_drain(task_set: &mut JoinSet<Result<TaskName>>, mut rx: mpsc::Receiver<DeliveryTicket>) {
    task_set.spawn(async move {
        while let Some(ticket) = rx.recv().await {
            debug!(
                alert_id = %ticket.alert_id,
                channel = %ticket.channel,
                status = %ticket.status,
                attempts = ticket.attempt_count,
                "Ticket update"
            );
        }
        Ok(TaskName::TicketDrain)
    });
}

fn spawn_cycle_loop(
    task_set: &mut JoinSet<Result<TaskName>>,
    coordinator: Arc<PipelineCoordinator>,
    interval: Duration,
    max_cycles: u64,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        let mut cycle = 0u64;
        loop {
            cycle += 1;
            info!(cycle, "[CycleLoop] Starting assessment cycle");
            match coordinator.run_directory(&cancel_token).await {
                Ok(report) => {
                    for failure in &report.failed {
                        warn!(farm_id = %failure.farm_id, error = %failure.error, "[CycleLoop] Farm skipped");
                    }
                }
                Err(e) => error!(error = %e, "[CycleLoop] Could not list farms"),
            }

            if max_cycles > 0 && cycle >= max_cycles {
                info!(cycles = cycle, "[CycleLoop] Cycle limit reached");
                break;
            }
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        Ok(TaskName::CycleLoop)
    });
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(task_set: &mut JoinSet<Result<TaskName>>, cancel_token: CancellationToken) -> Result<()> {
    info!("Supervisor: all tasks spawned, monitoring");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => match result {
                Some(Ok(Ok(task_name))) => info!("Supervisor: task {} completed normally", task_name),
                Some(Ok(Err(e))) => {
                    error!("Supervisor: task failed with error: {:#}", e);
                    cancel_token.cancel();
                    return Err(e);
                }
                Some(Err(e)) => {
                    error!("Supervisor: task panicked: {}", e);
                    cancel_token.cancel();
                    return Err(anyhow::anyhow!("Task panicked: {}", e));
                }
                None => {
                    info!("Supervisor: all tasks completed");
                    break;
                }
            }
        }
    }

    // Let the remaining tasks observe cancellation and finish
    while let Some(result) = task_set.join_next().await {
        if let Ok(Ok(task_name)) = result {
            debug!("Supervisor: task {} stopped", task_name);
        }
    }
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.json);

    let mut config = match &args.config {
        Some(path) => PipelineConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => PipelineConfig::load(),
    };
    if let Some(addr) = args.addr.clone() {
        config.server.addr = addr;
    }
    if let Some(dir) = args.data_dir.clone() {
        config.storage.data_dir = dir;
    }
    if let Some(secs) = args.interval_secs {
        config.pipeline.cycle_interval_secs = secs;
    }
    config.validate().context("Invalid configuration after CLI overrides")?;

    info!("CropWatch Farm Risk Decision Pipeline");
    info!(
        farms = args.farms,
        cycles = args.cycles,
        interval_secs = config.pipeline.cycle_interval_secs,
        models = ?config.models.enabled,
        "Configuration loaded"
    );

    if should_reset_db(args.reset_db) {
        reset_data_directory(Path::new(&config.storage.data_dir))?;
    }
    let audit = open_audit(&config)?;

    // Outbound ports
    let (admin, admin_rx) = EventPort::channel("admin", DEFAULT_PORT_CAPACITY);
    let (tickets, ticket_rx) = EventPort::channel("tickets", DEFAULT_PORT_CAPACITY);
    let admin_log = AdminEventLog::new(ADMIN_EVENT_HISTORY);

    // Stages and shared state
    let registry = Arc::new(ModelRegistry::from_config(&config.models));
    if registry.is_empty() {
        warn!("No models enabled, every prediction will use the climatological baseline");
    }
    let orchestrator = Arc::new(AlertOrchestrator::new(config.alerts.clone()));
    let delivery = DeliveryCoordinator::new(Arc::new(LogTransport), config.delivery.clone(), tickets, admin.clone());
    let (dispatcher, dispatch_handle) = DeliveryDispatcher::new(
        delivery.clone(),
        Arc::clone(&orchestrator),
        Arc::clone(&audit),
        &config.delivery,
        DELIVERY_QUEUE_CAPACITY,
    );
    let directory = Arc::new(InMemoryFarmDirectory::new(demo_farms(args.farms)));
    info!(farms = directory.len(), "Farm directory ready");

    let coordinator = Arc::new(PipelineCoordinator::new(
        &config,
        Collaborators {
            source: Arc::new(SimulatedSource::new(args.seed, 2)),
            directory,
            registry: Arc::clone(&registry),
            orchestrator: Arc::clone(&orchestrator),
            dispatcher: dispatch_handle,
            audit: Arc::clone(&audit),
            admin,
        },
    ));

    // Monitoring API
    let app = create_app(ApiState {
        orchestrator,
        audit,
        delivery,
        registry,
        admin_events: admin_log.clone(),
        started_at: Utc::now(),
    });
    let listener = tokio::net::TcpListener::bind(&config.server.addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.addr))?;
    info!(addr = %config.server.addr, "Monitoring API listening");

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown");
        shutdown_token.cancel();
    });

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    spawn_http_server(&mut task_set, listener, app, cancel_token.clone());
    spawn_admin_drain(&mut task_set, admin_rx, admin_log);
    spawn_ticket_drain(&mut task_set, ticket_rx);
    {
        let cancel = cancel_token.clone();
        task_set.spawn(async move {
            dispatcher.run(cancel).await;
            Ok(TaskName::Dispatcher)
        });
    }
    spawn_cycle_loop(
        &mut task_set,
        coordinator,
        Duration::from_secs(config.pipeline.cycle_interval_secs),
        args.cycles,
        cancel_token.clone(),
    );

    run_supervisor(&mut task_set, cancel_token).await
}
