//! In-memory cloud implementing every infrastructure adapter
//!
//! Loaded from a JSON inventory. Mutations apply immediately, so a migration
//! is complete by the time the first completion poll runs. Individual
//! operations can be made to fail to exercise retries and rollback.

use crate::adapters::{
    BaremetalApi, ComputeApi, Flavor, HostedInstance, HostedPool, PooledVolume, StorageApi,
};
use crate::cdm::{
    ComputeNode, HostAggregate, IronicNode, PowerState, ServiceStatus, StorageNode,
};
use crate::datasource::StaticDataSource;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// One metric value served by the simulated datasource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub resource: String,
    pub metric: String,
    pub value: f64,
}

/// Serialized description of a simulated cloud
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Inventory {
    pub hypervisors: Vec<ComputeNode>,
    pub instances: Vec<HostedInstance>,
    pub aggregates: Vec<HostAggregate>,
    pub flavors: Vec<Flavor>,
    pub baremetal_nodes: Vec<IronicNode>,
    pub storage_nodes: Vec<StorageNode>,
    pub pools: Vec<HostedPool>,
    pub volumes: Vec<PooledVolume>,
    pub metrics: Vec<MetricSample>,
}

impl Inventory {
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read inventory {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse inventory {}", path.display()))
    }
}

/// How an injected failure behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Always,
    Times(u32),
}

/// Simulated compute, baremetal and storage services
pub struct SimulatedCloud {
    state: Mutex<Inventory>,
    faults: DashMap<String, Fault>,
    calls: DashMap<String, u32>,
    datasource: Arc<StaticDataSource>,
}

impl Default for SimulatedCloud {
    fn default() -> Self {
        Self::new(Inventory::default())
    }
}

impl SimulatedCloud {
    pub fn new(inventory: Inventory) -> Self {
        let datasource = StaticDataSource::new();
        for sample in &inventory.metrics {
            datasource.set(sample.resource.clone(), sample.metric.clone(), sample.value);
        }
        info!(
            hypervisors = inventory.hypervisors.len(),
            instances = inventory.instances.len(),
            baremetal_nodes = inventory.baremetal_nodes.len(),
            pools = inventory.pools.len(),
            "Simulated cloud ready"
        );
        Self {
            state: Mutex::new(inventory),
            faults: DashMap::new(),
            calls: DashMap::new(),
            datasource: Arc::new(datasource),
        }
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        Ok(Self::new(Inventory::load(path).await?))
    }

    /// Metrics backing this cloud
    pub fn datasource(&self) -> Arc<StaticDataSource> {
        self.datasource.clone()
    }

    /// Make `operation` fail on every call
    pub fn fail(&self, operation: &str) {
        self.faults.insert(operation.to_string(), Fault::Always);
    }

    /// Make the next `times` calls of `operation` fail
    pub fn fail_times(&self, operation: &str, times: u32) {
        self.faults.insert(operation.to_string(), Fault::Times(times));
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    /// Number of calls made to `operation`, failed ones included
    pub fn calls(&self, operation: &str) -> u32 {
        self.calls.get(operation).map(|c| *c).unwrap_or(0)
    }

    /// Copy of the current inventory
    pub fn snapshot(&self) -> Result<Inventory> {
        Ok(self.state()?.clone())
    }

    /// Apply an out-of-band change, as an operator would
    pub fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Inventory),
    {
        f(&mut *self.state()?);
        Ok(())
    }

    fn state(&self) -> Result<MutexGuard<'_, Inventory>> {
        self.state
            .lock()
            .map_err(|e| anyhow!("simulated cloud state poisoned: {}", e))
    }

    fn enter(&self, operation: &str) -> Result<()> {
        *self.calls.entry(operation.to_string()).or_insert(0) += 1;

        let fault = self.faults.get(operation).map(|f| *f);
        match fault {
            Some(Fault::Always) => bail!("{} failed (injected)", operation),
            Some(Fault::Times(n)) if n > 0 => {
                if n == 1 {
                    self.faults.remove(operation);
                } else {
                    self.faults.insert(operation.to_string(), Fault::Times(n - 1));
                }
                bail!("{} failed (injected)", operation)
            }
            _ => Ok(()),
        }
    }

    fn pick_destination(inventory: &Inventory, instance: &HostedInstance) -> Result<String> {
        inventory
            .hypervisors
            .iter()
            .filter(|h| h.uuid != instance.node && h.is_schedulable())
            .map(|h| h.uuid.clone())
            .next()
            .ok_or_else(|| anyhow!("no valid host for instance {}", instance.instance.uuid))
    }

    fn move_instance(&self, operation: &str, uuid: &str, destination: Option<&str>) -> Result<()> {
        self.enter(operation)?;
        let mut state = self.state()?;
        let current = state
            .instances
            .iter()
            .find(|i| i.instance.uuid == uuid)
            .cloned()
            .ok_or_else(|| anyhow!("instance {} not found", uuid))?;

        let target = match destination {
            Some(dest) => state
                .hypervisors
                .iter()
                .find(|h| h.uuid == dest || h.hostname == dest)
                .map(|h| h.uuid.clone())
                .ok_or_else(|| anyhow!("destination {} not found", dest))?,
            None => Self::pick_destination(&state, &current)?,
        };

        if let Some(entry) = state.instances.iter_mut().find(|i| i.instance.uuid == uuid) {
            entry.node = target.clone();
        }
        debug!(operation, instance = %uuid, from = %current.node, to = %target, "Instance moved");
        Ok(())
    }
}

#[async_trait]
impl ComputeApi for SimulatedCloud {
    async fn list_hypervisors(&self) -> Result<Vec<ComputeNode>> {
        self.enter("list_hypervisors")?;
        Ok(self.state()?.hypervisors.clone())
    }

    async fn list_instances(&self) -> Result<Vec<HostedInstance>> {
        self.enter("list_instances")?;
        Ok(self.state()?.instances.clone())
    }

    async fn list_aggregates(&self) -> Result<Vec<HostAggregate>> {
        self.enter("list_aggregates")?;
        Ok(self.state()?.aggregates.clone())
    }

    async fn get_instance(&self, uuid: &str) -> Result<Option<HostedInstance>> {
        self.enter("get_instance")?;
        Ok(self
            .state()?
            .instances
            .iter()
            .find(|i| i.instance.uuid == uuid)
            .cloned())
    }

    async fn get_flavor(&self, name: &str) -> Result<Option<Flavor>> {
        self.enter("get_flavor")?;
        Ok(self.state()?.flavors.iter().find(|f| f.name == name).cloned())
    }

    async fn live_migrate(&self, instance: &str, destination: Option<&str>) -> Result<()> {
        self.move_instance("live_migrate", instance, destination)
    }

    async fn cold_migrate(&self, instance: &str, destination: Option<&str>) -> Result<()> {
        self.move_instance("cold_migrate", instance, destination)
    }

    async fn resize(&self, instance: &str, flavor: &str) -> Result<()> {
        self.enter("resize")?;
        let mut state = self.state()?;
        let target = state
            .flavors
            .iter()
            .find(|f| f.name == flavor)
            .cloned()
            .ok_or_else(|| anyhow!("flavor {} not found", flavor))?;
        let entry = state
            .instances
            .iter_mut()
            .find(|i| i.instance.uuid == instance)
            .ok_or_else(|| anyhow!("instance {} not found", instance))?;
        entry.instance.flavor = target.name;
        entry.instance.vcpus = target.vcpus;
        entry.instance.memory_mb = target.memory_mb;
        entry.instance.disk_gb = target.disk_gb;
        Ok(())
    }

    async fn set_service_state(&self, hostname: &str, status: ServiceStatus, reason: Option<&str>) -> Result<()> {
        self.enter("set_service_state")?;
        let mut state = self.state()?;
        let node = state
            .hypervisors
            .iter_mut()
            .find(|h| h.hostname == hostname)
            .ok_or_else(|| anyhow!("compute service on {} not found", hostname))?;
        node.status = status;
        node.disabled_reason = reason.map(str::to_string);
        Ok(())
    }
}

#[async_trait]
impl BaremetalApi for SimulatedCloud {
    async fn list_nodes(&self) -> Result<Vec<IronicNode>> {
        self.enter("list_nodes")?;
        Ok(self.state()?.baremetal_nodes.clone())
    }

    async fn get_power_state(&self, uuid: &str) -> Result<PowerState> {
        self.enter("get_power_state")?;
        self.state()?
            .baremetal_nodes
            .iter()
            .find(|n| n.uuid == uuid)
            .map(|n| n.power_state)
            .ok_or_else(|| anyhow!("baremetal node {} not found", uuid))
    }

    async fn set_power_state(&self, uuid: &str, power_state: PowerState) -> Result<()> {
        self.enter("set_power_state")?;
        let mut state = self.state()?;
        let node = state
            .baremetal_nodes
            .iter_mut()
            .find(|n| n.uuid == uuid)
            .ok_or_else(|| anyhow!("baremetal node {} not found", uuid))?;
        if node.maintenance {
            bail!("baremetal node {} is in maintenance", uuid);
        }
        node.power_state = power_state;
        Ok(())
    }
}

#[async_trait]
impl StorageApi for SimulatedCloud {
    async fn list_storage_nodes(&self) -> Result<Vec<StorageNode>> {
        self.enter("list_storage_nodes")?;
        Ok(self.state()?.storage_nodes.clone())
    }

    async fn list_pools(&self) -> Result<Vec<HostedPool>> {
        self.enter("list_pools")?;
        Ok(self.state()?.pools.clone())
    }

    async fn list_volumes(&self) -> Result<Vec<PooledVolume>> {
        self.enter("list_volumes")?;
        Ok(self.state()?.volumes.clone())
    }

    async fn get_volume(&self, uuid: &str) -> Result<Option<PooledVolume>> {
        self.enter("get_volume")?;
        Ok(self
            .state()?
            .volumes
            .iter()
            .find(|v| v.volume.uuid == uuid)
            .cloned())
    }

    async fn migrate_volume(&self, uuid: &str, destination_pool: &str) -> Result<()> {
        self.enter("migrate_volume")?;
        let mut state = self.state()?;
        if !state.pools.iter().any(|p| p.pool.name == destination_pool) {
            bail!("pool {} not found", destination_pool);
        }
        let volume = state
            .volumes
            .iter_mut()
            .find(|v| v.volume.uuid == uuid)
            .ok_or_else(|| anyhow!("volume {} not found", uuid))?;
        volume.pool = destination_pool.to_string();
        Ok(())
    }

    async fn retype_volume(&self, uuid: &str, volume_type: &str) -> Result<()> {
        self.enter("retype_volume")?;
        let mut state = self.state()?;
        let volume = state
            .volumes
            .iter_mut()
            .find(|v| v.volume.uuid == uuid)
            .ok_or_else(|| anyhow!("volume {} not found", uuid))?;
        volume.volume.volume_type = volume_type.to_string();
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::cdm::{Instance, Pool, Volume};
    use crate::datasource::metrics;

    /// Two hypervisors, three instances, one baremetal node and a small storage backend
    pub(crate) fn small_inventory() -> Inventory {
        Inventory {
            hypervisors: vec![
                ComputeNode::new("node-1", "host-1")
                    .with_capacity(16, 32768, 500)
                    .with_zone("az1"),
                ComputeNode::new("node-2", "host-2")
                    .with_capacity(16, 32768, 500)
                    .with_zone("az2"),
            ],
            instances: vec![
                HostedInstance {
                    instance: Instance::new("vm-1").with_resources(2, 4096, 20),
                    node: "node-1".to_string(),
                },
                HostedInstance {
                    instance: Instance::new("vm-2")
                        .with_resources(2, 4096, 20)
                        .with_project("p1"),
                    node: "node-1".to_string(),
                },
                HostedInstance {
                    instance: Instance::new("vm-3").with_resources(1, 2048, 10),
                    node: "node-2".to_string(),
                },
            ],
            aggregates: vec![HostAggregate {
                id: 1,
                name: "agg-1".to_string(),
                hosts: ["host-1".to_string()].into_iter().collect(),
            }],
            flavors: vec![Flavor {
                name: "m1.large".to_string(),
                vcpus: 4,
                memory_mb: 8192,
                disk_gb: 40,
            }],
            baremetal_nodes: vec![IronicNode::new("bm-1").with_hostname("host-2")],
            storage_nodes: vec![StorageNode::new("host@lvm")],
            pools: vec![
                HostedPool {
                    pool: Pool::new("host@lvm#a", 100.0),
                    host: "host@lvm".to_string(),
                },
                HostedPool {
                    pool: Pool::new("host@lvm#b", 100.0),
                    host: "host@lvm".to_string(),
                },
            ],
            volumes: vec![PooledVolume {
                volume: Volume::new("vol-1", 10),
                pool: "host@lvm#a".to_string(),
            }],
            metrics: vec![
                MetricSample {
                    resource: "host-1".to_string(),
                    metric: metrics::HOST_CPU_USAGE.to_string(),
                    value: 60.0,
                },
                MetricSample {
                    resource: "host-2".to_string(),
                    metric: metrics::HOST_CPU_USAGE.to_string(),
                    value: 5.0,
                },
            ],
        }
    }
}
