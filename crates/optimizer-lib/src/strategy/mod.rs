//! Strategy framework
//!
//! A strategy reads a scoped snapshot of the cluster and proposes a
//! [`Solution`]. Snapshots are deep copies handed out by the collectors and
//! are only ever borrowed immutably; strategies that need to simulate moves
//! clone them first.

mod balance;
mod consolidation;
mod dummy;
mod energy;
mod maintenance;
mod thermal;

#[cfg(test)]
mod tests;

pub use balance::WorkloadBalance;
pub use consolidation::BasicConsolidation;
pub use dummy::{Actuator, DummyStrategy, DummyWithScorer};
pub use energy::SavingEnergy;
pub use maintenance::HostMaintenance;
pub use thermal::OutletTemperature;

use crate::action::{CHANGE_NOVA_SERVICE_STATE, MIGRATE};
use crate::cdm::{BaremetalModel, ComputeModel, ComputeNode, Domain, Instance, StorageModel};
use crate::collector::CollectorManager;
use crate::datasource::MetricsClient;
use crate::error::{OptimizerError, Result};
use crate::schema::ParamSchema;
use crate::scoring::ScoringRegistry;
use crate::solution::{ActionDescriptor, Solution};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Scoped copies of the models a strategy asked for
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub compute: Option<ComputeModel>,
    pub storage: Option<StorageModel>,
    pub baremetal: Option<BaremetalModel>,
}

impl ClusterSnapshot {
    /// Load the scoped models of `domains` from the collectors
    ///
    /// Fails with `cdm_stale` or `cdm_empty` when a model is unusable.
    pub async fn load(collectors: &CollectorManager, domains: &[Domain], scope: &Value) -> Result<Self> {
        let mut snapshot = Self::default();
        for domain in domains {
            match domain {
                Domain::Compute => {
                    snapshot.compute = Some(collectors.compute()?.get_scoped_model(scope).await?)
                }
                Domain::Storage => {
                    snapshot.storage = Some(collectors.storage()?.get_scoped_model(scope).await?)
                }
                Domain::Baremetal => {
                    snapshot.baremetal = Some(collectors.baremetal()?.get_scoped_model(scope).await?)
                }
            }
        }
        Ok(snapshot)
    }

    pub fn compute(&self) -> Result<&ComputeModel> {
        self.compute
            .as_ref()
            .ok_or_else(|| OptimizerError::internal("compute model was not loaded"))
    }

    pub fn storage(&self) -> Result<&StorageModel> {
        self.storage
            .as_ref()
            .ok_or_else(|| OptimizerError::internal("storage model was not loaded"))
    }

    pub fn baremetal(&self) -> Result<&BaremetalModel> {
        self.baremetal
            .as_ref()
            .ok_or_else(|| OptimizerError::internal("baremetal model was not loaded"))
    }
}

/// Everything a strategy run may look at
pub struct StrategyContext {
    pub audit_uuid: Uuid,
    /// Audit parameters after schema validation
    pub parameters: Map<String, Value>,
    pub snapshot: ClusterSnapshot,
    pub metrics: Option<MetricsClient>,
    pub scoring: ScoringRegistry,
}

impl StrategyContext {
    pub fn new(audit_uuid: Uuid, parameters: Map<String, Value>, snapshot: ClusterSnapshot) -> Self {
        Self {
            audit_uuid,
            parameters,
            snapshot,
            metrics: None,
            scoring: ScoringRegistry::builtin(),
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsClient) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_scoring(mut self, scoring: ScoringRegistry) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn f64_param(&self, name: &str, default: f64) -> f64 {
        crate::schema::get_f64(&self.parameters, name).unwrap_or(default)
    }

    pub fn str_param(&self, name: &str) -> Option<&str> {
        crate::schema::get_str(&self.parameters, name)
    }

    /// A period parameter expressed in seconds
    pub fn period_param(&self, name: &str, default_secs: f64) -> Duration {
        Duration::from_secs_f64(self.f64_param(name, default_secs).max(0.0))
    }

    pub async fn host_cpu_usage(&self, hostname: &str, period: Duration) -> Option<f64> {
        match &self.metrics {
            Some(m) => m.host_cpu_usage(hostname, period).await,
            None => None,
        }
    }

    pub async fn host_outlet_temp(&self, hostname: &str, period: Duration) -> Option<f64> {
        match &self.metrics {
            Some(m) => m.host_outlet_temp(hostname, period).await,
            None => None,
        }
    }

    pub async fn instance_cpu_usage(&self, uuid: &str, period: Duration) -> Option<f64> {
        match &self.metrics {
            Some(m) => m.instance_cpu_usage(uuid, period).await,
            None => None,
        }
    }

    pub async fn instance_ram_usage(&self, uuid: &str, period: Duration) -> Option<f64> {
        match &self.metrics {
            Some(m) => m.instance_ram_usage(uuid, period).await,
            None => None,
        }
    }
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    /// Goal this strategy serves
    fn goal(&self) -> &'static str;

    /// Models the strategy needs loaded
    fn domains(&self) -> &'static [Domain] {
        &[Domain::Compute]
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
    }

    async fn execute(&self, ctx: &StrategyContext) -> Result<Solution>;
}

/// Name -> strategy lookup
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: BTreeMap<&'static str, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(DummyStrategy));
        registry.register(Arc::new(DummyWithScorer));
        registry.register(Arc::new(Actuator));
        registry.register(Arc::new(BasicConsolidation));
        registry.register(Arc::new(OutletTemperature));
        registry.register(Arc::new(WorkloadBalance));
        registry.register(Arc::new(HostMaintenance));
        registry.register(Arc::new(SavingEnergy));
        registry
    }

    pub fn register(&mut self, strategy: Arc<dyn Strategy>) {
        self.strategies.insert(strategy.name(), strategy);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Strategy>> {
        self.strategies
            .get(name)
            .cloned()
            .ok_or_else(|| OptimizerError::invalid(format!("unknown strategy '{}'", name)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Strategy>> {
        self.strategies.values()
    }

    /// Strategies serving `goal`, in name order
    pub fn for_goal(&self, goal: &str) -> Vec<Arc<dyn Strategy>> {
        self.strategies
            .values()
            .filter(|s| s.goal() == goal)
            .cloned()
            .collect()
    }

    /// Pick the strategy for an audit
    ///
    /// An explicit strategy must serve `goal`; without one the first
    /// strategy registered for the goal is used.
    pub fn select(&self, goal: &str, strategy: Option<&str>) -> Result<Arc<dyn Strategy>> {
        match strategy {
            Some(name) => {
                let strategy = self.get(name)?;
                if strategy.goal() != goal {
                    return Err(OptimizerError::invalid(format!(
                        "strategy '{}' serves goal '{}', not '{}'",
                        name,
                        strategy.goal(),
                        goal
                    )));
                }
                Ok(strategy)
            }
            None => self.for_goal(goal).into_iter().next().ok_or_else(|| {
                OptimizerError::invalid(format!("no strategy available for goal '{}'", goal))
            }),
        }
    }
}

/// Descriptor for moving `instance` off `source`
pub(crate) fn migration(instance: &str, source: &ComputeNode, destination: Option<&ComputeNode>) -> ActionDescriptor {
    let descriptor = ActionDescriptor::new(MIGRATE, instance)
        .param("migration_type", "live")
        .param("source_node", source.hostname.as_str());
    match destination {
        Some(d) => descriptor.param("destination_node", d.hostname.as_str()),
        None => descriptor,
    }
}

pub(crate) fn disable_service(node: &ComputeNode, reason: &str) -> ActionDescriptor {
    ActionDescriptor::new(CHANGE_NOVA_SERVICE_STATE, node.hostname.as_str())
        .param("state", "disabled")
        .param("disabled_reason", reason)
}

/// Whether `instance` fits on `node` given the current placements in `model`
pub(crate) fn fits(model: &ComputeModel, node: &str, instance: &Instance) -> bool {
    model
        .node_free(node)
        .map_or(false, |free| free.fits(&instance.resources()))
}

/// Nodes eligible to receive or give away workload
pub(crate) fn schedulable_nodes(model: &ComputeModel) -> Vec<ComputeNode> {
    model
        .nodes()
        .filter(|n| n.is_schedulable())
        .cloned()
        .collect()
}
