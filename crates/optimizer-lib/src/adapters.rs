//! Infrastructure provider interfaces
//!
//! Collectors enumerate through these traits and actions mutate through them.
//! Implementations normalize provider payloads into cluster data model
//! elements, so nothing above this layer sees provider-specific types.

use crate::cdm::{ComputeNode, HostAggregate, Instance, IronicNode, Pool, PowerState, ServiceStatus, StorageNode, Volume};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An instance together with the hypervisor it runs on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostedInstance {
    #[serde(flatten)]
    pub instance: Instance,
    /// Uuid of the hosting compute node
    pub node: String,
}

/// A storage pool together with its backend host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostedPool {
    #[serde(flatten)]
    pub pool: Pool,
    pub host: String,
}

/// A volume together with the pool it lives in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PooledVolume {
    #[serde(flatten)]
    pub volume: Volume,
    pub pool: String,
}

/// Flavor definition used when resizing instances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flavor {
    pub name: String,
    pub vcpus: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
}

/// How an instance is moved between hypervisors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationType {
    Live,
    Cold,
}

impl MigrationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationType::Live => "live",
            MigrationType::Cold => "cold",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "live" => Some(MigrationType::Live),
            "cold" => Some(MigrationType::Cold),
            _ => None,
        }
    }
}

/// Compute service (hypervisors, instances, aggregates)
#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn list_hypervisors(&self) -> Result<Vec<ComputeNode>>;

    async fn list_instances(&self) -> Result<Vec<HostedInstance>>;

    async fn list_aggregates(&self) -> Result<Vec<HostAggregate>>;

    async fn get_instance(&self, uuid: &str) -> Result<Option<HostedInstance>>;

    async fn get_flavor(&self, name: &str) -> Result<Option<Flavor>>;

    /// Start a live migration; completion is observed through [`ComputeApi::get_instance`]
    async fn live_migrate(&self, instance: &str, destination: Option<&str>) -> Result<()>;

    async fn cold_migrate(&self, instance: &str, destination: Option<&str>) -> Result<()>;

    async fn resize(&self, instance: &str, flavor: &str) -> Result<()>;

    /// Enable or disable the compute service of a hypervisor
    async fn set_service_state(&self, hostname: &str, status: ServiceStatus, reason: Option<&str>) -> Result<()>;
}

/// Baremetal provisioning service
#[async_trait]
pub trait BaremetalApi: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<IronicNode>>;

    async fn get_power_state(&self, uuid: &str) -> Result<PowerState>;

    async fn set_power_state(&self, uuid: &str, state: PowerState) -> Result<()>;
}

/// Block storage service
#[async_trait]
pub trait StorageApi: Send + Sync {
    async fn list_storage_nodes(&self) -> Result<Vec<StorageNode>>;

    async fn list_pools(&self) -> Result<Vec<HostedPool>>;

    async fn list_volumes(&self) -> Result<Vec<PooledVolume>>;

    async fn get_volume(&self, uuid: &str) -> Result<Option<PooledVolume>>;

    async fn migrate_volume(&self, uuid: &str, destination_pool: &str) -> Result<()>;

    async fn retype_volume(&self, uuid: &str, volume_type: &str) -> Result<()>;
}
