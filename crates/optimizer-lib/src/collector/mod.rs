//! Cluster data model collectors
//!
//! One collector per resource domain owns the live model. It rebuilds the
//! model from the infrastructure adapters on a period, applies change
//! notifications incrementally, and hands strategies deep copies. A failed
//! rebuild leaves the previous model in place but flags it stale, and stale
//! models are refused to strategies.

mod baremetal;
mod compute;
mod r#loop;
mod notification;
mod storage;

#[cfg(test)]
mod tests;

pub use baremetal::BaremetalModelBuilder;
pub use compute::ComputeModelBuilder;
pub use notification::{
    BaremetalEvent, ComputeEvent, Notification, NotificationEndpoint, StorageEvent,
};
pub use r#loop::{SyncLoop, SyncLoopBuilder};
pub use storage::StorageModelBuilder;

use crate::adapters::{BaremetalApi, ComputeApi, StorageApi};
use crate::cdm::{DataModel, Domain};
use crate::error::{OptimizerError, Result};
use crate::health::{components, HealthRegistry};
use crate::observability::{OptimizerMetrics, StructuredLogger};
use crate::retry::{retry, RetryPolicy};
use crate::scope::{Scopable, ScopeHandler};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Default period between two full rebuilds
pub const DEFAULT_SYNC_PERIOD: Duration = Duration::from_secs(3600);

/// Builds a fresh model of one domain from external providers
#[async_trait]
pub trait ModelBuilder: Send + Sync + 'static {
    type Model: Scopable;

    async fn build(&self) -> anyhow::Result<Self::Model>;

    /// Handlers for the change events relevant to this domain
    fn notification_endpoints(&self) -> Vec<Box<dyn NotificationEndpoint<Self::Model>>>;
}

/// Configuration of one collector
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub period: Duration,
    pub retry: RetryPolicy,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_SYNC_PERIOD,
            retry: RetryPolicy::default(),
        }
    }
}

/// Owner of the live model of one domain
pub struct DataModelCollector<B: ModelBuilder> {
    builder: B,
    model: RwLock<B::Model>,
    stale: AtomicBool,
    /// Held across a rebuild and every notification update, so an event
    /// arriving mid-build lands on the fresh model
    sync_lock: Mutex<()>,
    generation: AtomicU64,
    endpoints: Vec<Box<dyn NotificationEndpoint<B::Model>>>,
    config: CollectorConfig,
    metrics: OptimizerMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
}

impl<B: ModelBuilder> DataModelCollector<B> {
    /// A new collector starts empty and stale; the first read triggers a build
    pub fn new(builder: B, config: CollectorConfig) -> Self {
        let endpoints = builder.notification_endpoints();
        Self {
            builder,
            model: RwLock::new(B::Model::default()),
            stale: AtomicBool::new(true),
            sync_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            endpoints,
            config,
            metrics: OptimizerMetrics::new(),
            logger: StructuredLogger::new("localhost"),
            health: None,
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn domain(&self) -> Domain {
        <B::Model as DataModel>::DOMAIN
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    /// Number of successful rebuilds so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Rebuild the model; on failure the live model is kept and flagged stale
    pub async fn synchronize(&self) -> Result<()> {
        let _guard = self.sync_lock.lock().await;
        let domain = self.domain();
        let start = Instant::now();
        let operation = format!("synchronize {} model", domain);

        match retry(&self.config.retry, &operation, || self.builder.build()).await {
            Ok(fresh) => {
                let nodes = fresh.node_count();
                *self.model.write().await = fresh;
                self.stale.store(false, Ordering::SeqCst);
                self.generation.fetch_add(1, Ordering::SeqCst);
                self.metrics.set_cdm_stale(domain, false);
                self.logger
                    .log_cdm_synchronized(domain, nodes, start.elapsed().as_millis() as u64);
                if let Some(health) = &self.health {
                    health.set_healthy(components::collector(domain)).await;
                }
                Ok(())
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                self.mark_stale(&reason).await;
                self.metrics.inc_sync_failures(domain);
                Err(OptimizerError::ExternalUnavailable(reason))
            }
        }
    }

    async fn mark_stale(&self, reason: &str) {
        let domain = self.domain();
        self.stale.store(true, Ordering::SeqCst);
        self.metrics.set_cdm_stale(domain, true);
        self.logger.log_cdm_stale(domain, reason);
        if let Some(health) = &self.health {
            health
                .set_degraded(
                    components::collector(domain),
                    format!("cluster data model is stale: {}", reason),
                )
                .await;
        }
    }

    /// Deep copy of the live model
    ///
    /// A stale model gets one rebuild attempt first; if that fails the caller
    /// receives `cdm_stale`.
    pub async fn get_latest_cluster_data_model(&self) -> Result<B::Model> {
        if self.is_stale() {
            debug!(domain = %self.domain(), "Model is stale, synchronizing on demand");
            if self.synchronize().await.is_err() {
                return Err(OptimizerError::CdmStale(self.domain()));
            }
        }
        Ok(self.model.read().await.clone())
    }

    pub fn get_audit_scope_handler(&self, scope: &Value) -> Result<Box<dyn ScopeHandler<B::Model>>> {
        <B::Model as Scopable>::scope_handler(scope)
    }

    /// Scoped deep copy of the live model
    ///
    /// An empty live model is `cdm_empty`; a scope that filters everything
    /// out yields an empty but valid model.
    pub async fn get_scoped_model(&self, scope: &Value) -> Result<B::Model> {
        let handler = self.get_audit_scope_handler(scope)?;
        let model = self.get_latest_cluster_data_model().await?;
        if model.is_empty() {
            return Err(OptimizerError::CdmEmpty(self.domain()));
        }
        handler.apply(model)
    }

    pub fn notification_endpoints(&self) -> &[Box<dyn NotificationEndpoint<B::Model>>] {
        &self.endpoints
    }

    /// Apply one change event under the rebuild lock
    ///
    /// Returns whether any endpoint handled the event. A failed update means
    /// the model no longer mirrors the provider, so it is flagged stale.
    pub async fn handle_notification(&self, notification: &Notification) -> Result<bool> {
        let _guard = self.sync_lock.lock().await;
        let mut handled = false;
        let mut model = self.model.write().await;
        for endpoint in self.endpoints.iter().filter(|e| e.accepts(notification)) {
            handled = true;
            if let Err(e) = endpoint.apply(&mut *model, notification) {
                drop(model);
                warn!(
                    endpoint = endpoint.name(),
                    error = %e,
                    "Notification could not be applied"
                );
                self.mark_stale(&e.to_string()).await;
                return Err(e);
            }
        }
        Ok(handled)
    }

    pub async fn node_count(&self) -> usize {
        self.model.read().await.node_count()
    }
}

/// Type-erased view of a collector used by periodic jobs and the RPC layer
#[async_trait]
pub trait Collector: Send + Sync {
    fn domain(&self) -> Domain;
    fn period(&self) -> Duration;
    fn is_stale(&self) -> bool;
    async fn synchronize(&self) -> Result<()>;
    async fn handle_notification(&self, notification: &Notification) -> Result<bool>;
    async fn node_count(&self) -> usize;
}

#[async_trait]
impl<B: ModelBuilder> Collector for DataModelCollector<B> {
    fn domain(&self) -> Domain {
        DataModelCollector::domain(self)
    }

    fn period(&self) -> Duration {
        self.config.period
    }

    fn is_stale(&self) -> bool {
        DataModelCollector::is_stale(self)
    }

    async fn synchronize(&self) -> Result<()> {
        DataModelCollector::synchronize(self).await
    }

    async fn handle_notification(&self, notification: &Notification) -> Result<bool> {
        DataModelCollector::handle_notification(self, notification).await
    }

    async fn node_count(&self) -> usize {
        DataModelCollector::node_count(self).await
    }
}

pub type ComputeCollector = DataModelCollector<ComputeModelBuilder>;
pub type StorageCollector = DataModelCollector<StorageModelBuilder>;
pub type BaremetalCollector = DataModelCollector<BaremetalModelBuilder>;

/// The enabled collectors of a process, one per domain
#[derive(Default, Clone)]
pub struct CollectorManager {
    compute: Option<Arc<ComputeCollector>>,
    storage: Option<Arc<StorageCollector>>,
    baremetal: Option<Arc<BaremetalCollector>>,
}

impl CollectorManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collectors for every domain, all fed by one provider
    pub fn for_provider<P>(provider: Arc<P>, config: CollectorConfig) -> Self
    where
        P: ComputeApi + StorageApi + BaremetalApi + 'static,
    {
        Self::new()
            .with_compute(DataModelCollector::new(
                ComputeModelBuilder::new(provider.clone()),
                config.clone(),
            ))
            .with_storage(DataModelCollector::new(
                StorageModelBuilder::new(provider.clone()),
                config.clone(),
            ))
            .with_baremetal(DataModelCollector::new(
                BaremetalModelBuilder::new(provider),
                config,
            ))
    }

    pub fn with_compute(mut self, collector: ComputeCollector) -> Self {
        self.compute = Some(Arc::new(collector));
        self
    }

    pub fn with_storage(mut self, collector: StorageCollector) -> Self {
        self.storage = Some(Arc::new(collector));
        self
    }

    pub fn with_baremetal(mut self, collector: BaremetalCollector) -> Self {
        self.baremetal = Some(Arc::new(collector));
        self
    }

    fn disabled(domain: Domain) -> OptimizerError {
        OptimizerError::invalid(format!("{} collector is not enabled", domain))
    }

    pub fn compute(&self) -> Result<&Arc<ComputeCollector>> {
        self.compute
            .as_ref()
            .ok_or_else(|| Self::disabled(Domain::Compute))
    }

    pub fn storage(&self) -> Result<&Arc<StorageCollector>> {
        self.storage
            .as_ref()
            .ok_or_else(|| Self::disabled(Domain::Storage))
    }

    pub fn baremetal(&self) -> Result<&Arc<BaremetalCollector>> {
        self.baremetal
            .as_ref()
            .ok_or_else(|| Self::disabled(Domain::Baremetal))
    }

    pub fn is_enabled(&self, domain: Domain) -> bool {
        match domain {
            Domain::Compute => self.compute.is_some(),
            Domain::Storage => self.storage.is_some(),
            Domain::Baremetal => self.baremetal.is_some(),
        }
    }

    /// Every enabled collector behind the type-erased interface
    pub fn all(&self) -> Vec<Arc<dyn Collector>> {
        let mut all: Vec<Arc<dyn Collector>> = Vec::new();
        if let Some(c) = &self.compute {
            all.push(c.clone());
        }
        if let Some(c) = &self.storage {
            all.push(c.clone());
        }
        if let Some(c) = &self.baremetal {
            all.push(c.clone());
        }
        all
    }

    /// Route a notification to the collector of its domain
    pub async fn dispatch(&self, notification: &Notification) -> Result<bool> {
        let domain = notification.domain();
        match domain {
            Domain::Compute => self.compute()?.handle_notification(notification).await,
            Domain::Storage => self.storage()?.handle_notification(notification).await,
            Domain::Baremetal => self.baremetal()?.handle_notification(notification).await,
        }
    }

    /// Synchronize every collector, logging failures
    pub async fn synchronize_all(&self) -> usize {
        let mut failures = 0;
        for collector in self.all() {
            if let Err(e) = collector.synchronize().await {
                failures += 1;
                warn!(domain = %collector.domain(), error = %e, "Initial synchronization failed");
            }
        }
        failures
    }
}
