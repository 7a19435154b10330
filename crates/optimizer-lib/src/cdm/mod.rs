//! Cluster Data Models
//!
//! One in-memory graph per resource domain:
//! - compute: instances placed on hypervisors, plus host aggregates
//! - storage: volumes in pools on storage backends
//! - baremetal: physical machines and their power state
//!
//! Models are plain owned values. The live copy of each model belongs to its
//! collector (see [`crate::collector`]), which guards it with a lock and hands
//! out deep copies to strategies.

mod baremetal;
mod compute;
pub mod element;
mod storage;

#[cfg(test)]
mod tests;

pub use baremetal::BaremetalModel;
pub use compute::{ComputeModel, ComputeModelDocument, PlacementEdge};
pub use element::{
    ComputeNode, HostAggregate, Instance, InstanceState, IronicNode, NodeState, Pool, PowerState,
    Resources, ServiceStatus, StorageNode, Volume, VolumeStatus,
};
pub use storage::{StorageModel, StorageModelDocument};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Resource domain of a cluster data model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Compute,
    Storage,
    Baremetal,
}

impl Domain {
    pub const ALL: [Domain; 3] = [Domain::Compute, Domain::Storage, Domain::Baremetal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Compute => "compute",
            Domain::Storage => "storage",
            Domain::Baremetal => "baremetal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "compute" => Some(Domain::Compute),
            "storage" => Some(Domain::Storage),
            "baremetal" => Some(Domain::Baremetal),
            _ => None,
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common behaviour of every cluster data model
pub trait DataModel:
    Clone + Default + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const DOMAIN: Domain;

    /// Number of top-level nodes (hypervisors, storage backends, machines)
    fn node_count(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.node_count() == 0
    }
}
