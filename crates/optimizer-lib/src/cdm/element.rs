//! Typed elements stored in the cluster data models

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Liveness of a hypervisor or storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    #[default]
    Up,
    Down,
}

/// Scheduling status of a compute or storage service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    #[default]
    Enabled,
    Disabled,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Enabled => "enabled",
            ServiceStatus::Disabled => "disabled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "enabled" => Some(ServiceStatus::Enabled),
            "disabled" => Some(ServiceStatus::Disabled),
            _ => None,
        }
    }
}

/// A hypervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeNode {
    pub uuid: String,
    pub hostname: String,
    #[serde(default)]
    pub state: NodeState,
    #[serde(default)]
    pub status: ServiceStatus,
    #[serde(default)]
    pub disabled_reason: Option<String>,
    pub vcpus: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
    #[serde(default = "default_ratio")]
    pub vcpu_ratio: f64,
    #[serde(default = "default_ratio")]
    pub memory_ratio: f64,
    #[serde(default = "default_ratio")]
    pub disk_ratio: f64,
    #[serde(default)]
    pub availability_zone: String,
}

fn default_ratio() -> f64 {
    1.0
}

impl ComputeNode {
    pub fn new(uuid: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            hostname: hostname.into(),
            state: NodeState::Up,
            status: ServiceStatus::Enabled,
            disabled_reason: None,
            vcpus: 0,
            memory_mb: 0,
            disk_gb: 0,
            vcpu_ratio: 1.0,
            memory_ratio: 1.0,
            disk_ratio: 1.0,
            availability_zone: String::new(),
        }
    }

    pub fn with_capacity(mut self, vcpus: u32, memory_mb: u64, disk_gb: u64) -> Self {
        self.vcpus = vcpus;
        self.memory_mb = memory_mb;
        self.disk_gb = disk_gb;
        self
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.availability_zone = zone.into();
        self
    }

    /// Whether the scheduler may place instances here
    pub fn is_schedulable(&self) -> bool {
        self.state == NodeState::Up && self.status == ServiceStatus::Enabled
    }

    /// Capacity after overcommit ratios are applied
    pub fn capacity(&self) -> Resources {
        Resources {
            vcpus: self.vcpus as f64 * self.vcpu_ratio,
            memory_mb: self.memory_mb as f64 * self.memory_ratio,
            disk_gb: self.disk_gb as f64 * self.disk_ratio,
        }
    }
}

/// Lifecycle state of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    #[default]
    Active,
    Building,
    Paused,
    Suspended,
    Stopped,
    Error,
}

/// A virtual machine placed on a compute node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: InstanceState,
    pub vcpus: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
    #[serde(default)]
    pub flavor: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Set by scope handlers: strategies must not move this instance
    #[serde(default)]
    pub watcher_exclude: bool,
}

impl Instance {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: String::new(),
            state: InstanceState::Active,
            vcpus: 0,
            memory_mb: 0,
            disk_gb: 0,
            flavor: String::new(),
            project_id: String::new(),
            metadata: BTreeMap::new(),
            watcher_exclude: false,
        }
    }

    pub fn with_resources(mut self, vcpus: u32, memory_mb: u64, disk_gb: u64) -> Self {
        self.vcpus = vcpus;
        self.memory_mb = memory_mb;
        self.disk_gb = disk_gb;
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = project_id.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn resources(&self) -> Resources {
        Resources {
            vcpus: self.vcpus as f64,
            memory_mb: self.memory_mb as f64,
            disk_gb: self.disk_gb as f64,
        }
    }

    /// Whether a strategy may propose to move this instance
    pub fn is_migratable(&self) -> bool {
        !self.watcher_exclude && matches!(self.state, InstanceState::Active | InstanceState::Stopped)
    }
}

/// A named group of hosts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAggregate {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub hosts: BTreeSet<String>,
}

/// Resource triple used for capacity arithmetic
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Resources {
    pub vcpus: f64,
    pub memory_mb: f64,
    pub disk_gb: f64,
}

impl Resources {
    pub fn add(&self, other: &Resources) -> Resources {
        Resources {
            vcpus: self.vcpus + other.vcpus,
            memory_mb: self.memory_mb + other.memory_mb,
            disk_gb: self.disk_gb + other.disk_gb,
        }
    }

    pub fn sub(&self, other: &Resources) -> Resources {
        Resources {
            vcpus: self.vcpus - other.vcpus,
            memory_mb: self.memory_mb - other.memory_mb,
            disk_gb: self.disk_gb - other.disk_gb,
        }
    }

    /// Whether `other` fits inside `self`
    pub fn fits(&self, other: &Resources) -> bool {
        other.vcpus <= self.vcpus && other.memory_mb <= self.memory_mb && other.disk_gb <= self.disk_gb
    }
}

/// A block storage backend service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageNode {
    /// Backend host in `host@backend` form
    pub host: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub status: ServiceStatus,
    #[serde(default)]
    pub state: NodeState,
    #[serde(default)]
    pub volume_types: Vec<String>,
}

impl StorageNode {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            zone: String::new(),
            status: ServiceStatus::Enabled,
            state: NodeState::Up,
            volume_types: Vec::new(),
        }
    }
}

/// A capacity pool exposed by a storage backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    /// Pool name in `host@backend#pool` form
    pub name: String,
    pub total_capacity_gb: f64,
    pub free_capacity_gb: f64,
    #[serde(default)]
    pub allocated_capacity_gb: f64,
    #[serde(default)]
    pub total_volumes: u64,
}

impl Pool {
    pub fn new(name: impl Into<String>, total_capacity_gb: f64) -> Self {
        Self {
            name: name.into(),
            total_capacity_gb,
            free_capacity_gb: total_capacity_gb,
            allocated_capacity_gb: 0.0,
            total_volumes: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeStatus {
    #[default]
    Available,
    InUse,
    Creating,
    Migrating,
    Error,
}

/// A block storage volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    pub size_gb: u64,
    #[serde(default)]
    pub status: VolumeStatus,
    #[serde(default)]
    pub volume_type: String,
    #[serde(default)]
    pub project_id: String,
    /// Instance UUIDs the volume is attached to
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub bootable: bool,
    #[serde(default)]
    pub watcher_exclude: bool,
}

impl Volume {
    pub fn new(uuid: impl Into<String>, size_gb: u64) -> Self {
        Self {
            uuid: uuid.into(),
            name: String::new(),
            size_gb,
            status: VolumeStatus::Available,
            volume_type: String::new(),
            project_id: String::new(),
            attachments: Vec::new(),
            bootable: false,
            watcher_exclude: false,
        }
    }
}

/// Power state of a baremetal node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    #[default]
    On,
    Off,
    /// ACPI S3 (suspend to RAM)
    Suspended,
}

impl PowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::On => "on",
            PowerState::Off => "off",
            PowerState::Suspended => "suspended",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "on" => Some(PowerState::On),
            "off" => Some(PowerState::Off),
            "suspended" => Some(PowerState::Suspended),
            _ => None,
        }
    }
}

/// A physical machine managed by the baremetal service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IronicNode {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub power_state: PowerState,
    #[serde(default)]
    pub maintenance: bool,
    /// Hostname of the hypervisor running on this machine, if any
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub watcher_exclude: bool,
}

impl IronicNode {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: String::new(),
            power_state: PowerState::On,
            maintenance: false,
            hostname: None,
            watcher_exclude: false,
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }
}
