//! Process runtime
//!
//! Wires the decision engine, the applier and the collectors of one
//! process to their background loops and stops them together.

use super::{PluginSyncer, ServiceConfig, ServiceMonitor, SERVICE_NAME};
use crate::applier::Applier;
use crate::collector::{CollectorManager, SyncLoopBuilder};
use crate::decision::{DecisionEngine, PeriodicJobs};
use crate::health::{components, HealthRegistry};
use crate::store::Store;
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct Runtime {
    store: Arc<dyn Store>,
    collectors: Arc<CollectorManager>,
    engine: DecisionEngine,
    applier: Applier,
    monitor: Arc<ServiceMonitor>,
    health: HealthRegistry,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn applier(&self) -> &Applier {
        &self.applier
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn monitor(&self) -> &Arc<ServiceMonitor> {
        &self.monitor
    }

    /// Synchronize plugins and models, then start every background loop
    pub async fn start(&mut self) -> Result<()> {
        self.health.register(components::DECISION_ENGINE).await;
        self.health.register(components::APPLIER).await;
        for collector in self.collectors.all() {
            self.health
                .register(components::collector(collector.domain()))
                .await;
        }

        let syncer = PluginSyncer::new(
            self.store.clone(),
            self.engine.goals().clone(),
            self.engine.strategies().clone(),
            self.engine.scoring().clone(),
        );
        if let Err(e) = syncer.sync() {
            self.health
                .set_unhealthy(components::DECISION_ENGINE, e.to_string())
                .await;
            return Err(e).context("Plugin synchronization failed");
        }

        self.monitor
            .tick(Utc::now())
            .context("Initial heartbeat failed")?;

        let failures = self.collectors.synchronize_all().await;
        for collector in self.collectors.all() {
            if collector.is_stale() {
                self.health.report_model(collector.domain(), true).await;
            }
        }
        if failures > 0 {
            warn!(failures, "Some models failed their initial synchronization");
        }

        let monitor = self.monitor.clone();
        self.tasks
            .push(tokio::spawn(monitor.run(self.shutdown.subscribe())));

        for collector in self.collectors.all() {
            let sync_loop = SyncLoopBuilder::new()
                .collector(collector)
                .leadership(self.monitor.leadership())
                .build()?;
            self.tasks
                .push(tokio::spawn(sync_loop.run(self.shutdown.subscribe())));
        }

        let jobs = PeriodicJobs::new(self.engine.clone()).with_leadership(self.monitor.leadership());
        self.tasks
            .push(tokio::spawn(jobs.run(self.shutdown.subscribe())));

        self.health.set_ready(true).await;
        info!(
            host = %self.monitor.host(),
            leader = self.monitor.is_leader(),
            engine = self.applier.engine_name(),
            "Optimizer runtime started"
        );
        Ok(())
    }

    /// Stop every loop and wait for them to exit
    pub async fn shutdown(self) {
        self.health.set_ready(false).await;
        let _ = self.shutdown.send(());
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Optimizer runtime stopped");
    }
}

/// Builder for a [`Runtime`]
#[derive(Default)]
pub struct RuntimeBuilder {
    store: Option<Arc<dyn Store>>,
    engine: Option<DecisionEngine>,
    applier: Option<Applier>,
    service: ServiceConfig,
    health: Option<HealthRegistry>,
}

impl RuntimeBuilder {
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn engine(mut self, engine: DecisionEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn applier(mut self, applier: Applier) -> Self {
        self.applier = Some(applier);
        self
    }

    pub fn service(mut self, service: ServiceConfig) -> Self {
        self.service = service;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<Runtime> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("Store is required"))?;
        let engine = self
            .engine
            .ok_or_else(|| anyhow::anyhow!("Decision engine is required"))?;
        let applier = self
            .applier
            .ok_or_else(|| anyhow::anyhow!("Applier is required"))?;
        let (shutdown, _) = broadcast::channel(1);

        Ok(Runtime {
            monitor: Arc::new(ServiceMonitor::new(store.clone(), SERVICE_NAME, self.service)),
            collectors: engine.collectors().clone(),
            store,
            engine,
            applier,
            health: self.health.unwrap_or_default(),
            shutdown,
            tasks: Vec::new(),
        })
    }
}
