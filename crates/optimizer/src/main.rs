//! Infrastructure Optimizer - audit, plan and apply cluster optimizations
//!
//! One process hosts the decision engine and the applier. Several processes
//! may run side by side; the elected leader runs the periodic jobs.

use anyhow::{Context, Result};
use clap::Parser;
use optimizer_lib::{
    action::ActionContext,
    applier::Applier,
    bus::StatusBus,
    collector::{
        BaremetalModelBuilder, CollectorManager, ComputeModelBuilder, DataModelCollector,
        StorageModelBuilder,
    },
    datasource::MetricsClient,
    decision::DecisionEngine,
    health::HealthRegistry,
    observability::{OptimizerMetrics, StructuredLogger},
    rpc::Dispatcher,
    service::{Runtime, SERVICE_NAME},
    simulator::SimulatedCloud,
    store::InMemoryStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const OPTIMIZER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "infra-optimizer", version, about = "Infrastructure optimization service")]
struct Args {
    /// TOML configuration file
    #[arg(long, env = "OPTIMIZER_CONFIG")]
    config: Option<PathBuf>,
}

fn collectors(config: &config::OptimizerConfig, cloud: &Arc<SimulatedCloud>) -> CollectorManager {
    let sections = &config.collectors;
    let mut manager = CollectorManager::new();
    if sections.compute.enabled {
        manager = manager.with_compute(DataModelCollector::new(
            ComputeModelBuilder::new(cloud.clone()),
            config.collector(&sections.compute),
        ));
    }
    if sections.storage.enabled {
        manager = manager.with_storage(DataModelCollector::new(
            StorageModelBuilder::new(cloud.clone()),
            config.collector(&sections.storage),
        ));
    }
    if sections.baremetal.enabled {
        manager = manager.with_baremetal(DataModelCollector::new(
            BaremetalModelBuilder::new(cloud.clone()),
            config.collector(&sections.baremetal),
        ));
    }
    manager
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let args = Args::parse();
    info!("Starting infra-optimizer");

    let config = config::OptimizerConfig::load_from(args.config.as_deref())?;
    info!(host = %config.service.host, api_port = config.service.api_port, "Optimizer configured");

    let cloud = match &config.inventory {
        Some(path) => Arc::new(
            SimulatedCloud::from_file(path)
                .await
                .with_context(|| format!("Failed to load inventory {}", path.display()))?,
        ),
        None => {
            warn!("No inventory configured, starting with an empty simulated cloud");
            Arc::new(SimulatedCloud::default())
        }
    };

    let metrics = OptimizerMetrics::new();
    let logger = StructuredLogger::new(&config.service.host);
    logger.log_startup(SERVICE_NAME, OPTIMIZER_VERSION);

    let store = Arc::new(InMemoryStore::new());
    let bus = StatusBus::default();
    let context = ActionContext::new()
        .with_compute(cloud.clone())
        .with_baremetal(cloud.clone())
        .with_storage(cloud.clone())
        .with_retry(config.api.retry_policy());

    let applier = Applier::builder()
        .store(store.clone())
        .context(context)
        .bus(bus.clone())
        .config(config.applier.clone())
        .planner_config(config.planner.clone())
        .logger(logger.clone())
        .build()?;

    let engine = DecisionEngine::builder()
        .store(store.clone())
        .collectors(Arc::new(collectors(&config, &cloud)))
        .applier(applier.clone())
        .metrics_client(
            MetricsClient::new(cloud.datasource()).with_timeout(config.datasource.query_timeout()),
        )
        .bus(bus)
        .planner_config(config.planner.clone())
        .config(config.decision_engine.clone())
        .logger(logger.clone())
        .build()?;

    let health_registry = HealthRegistry::new();
    let mut runtime = Runtime::builder()
        .store(store)
        .engine(engine.clone())
        .applier(applier.clone())
        .service(config.service.clone())
        .health(health_registry.clone())
        .build()?;
    runtime.start().await.context("Failed to start optimizer")?;

    // Create shared application state
    let app_state = Arc::new(api::AppState::new(
        health_registry,
        metrics,
        Dispatcher::new(engine, applier),
    ));

    // Start health, metrics and RPC server
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let api_handle = tokio::spawn(api::serve(config.service.api_port, app_state, async move {
        let _ = stop_rx.await;
    }));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown(SERVICE_NAME, "SIGINT received");
    info!("Shutting down");

    let _ = stop_tx.send(());
    runtime.shutdown().await;
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server failed"),
        Err(e) => warn!(error = %e, "API server task ended abnormally"),
        Ok(Ok(())) => {}
    }

    Ok(())
}
