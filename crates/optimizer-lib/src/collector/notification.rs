//! Change events pushed by infrastructure services
//!
//! Endpoints translate one kind of event into an in-place model update. They
//! run under the collector's write lock, the same lock a rebuild takes.

use crate::cdm::{
    BaremetalModel, ComputeModel, ComputeNode, Domain, Instance, IronicNode, NodeState, Pool,
    PowerState, ServiceStatus, StorageModel, Volume,
};
use crate::error::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ComputeEvent {
    InstanceCreated { instance: Instance, node: String },
    InstanceUpdated { instance: Instance },
    InstanceDeleted { uuid: String },
    InstanceMigrated { uuid: String, destination: String },
    NodeCreated { node: ComputeNode },
    NodeDeleted { uuid: String },
    ServiceUpdated {
        hostname: String,
        status: ServiceStatus,
        state: NodeState,
        #[serde(default)]
        disabled_reason: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StorageEvent {
    VolumeCreated { volume: Volume, pool: String },
    VolumeUpdated { volume: Volume },
    VolumeDeleted { uuid: String },
    VolumeMigrated { uuid: String, pool: String },
    PoolUpdated { pool: Pool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BaremetalEvent {
    NodeCreated { node: IronicNode },
    NodeDeleted { uuid: String },
    PowerStateChanged { uuid: String, power_state: PowerState },
    MaintenanceChanged { uuid: String, maintenance: bool },
}

/// A change event of any domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "domain", content = "payload", rename_all = "lowercase")]
pub enum Notification {
    Compute(ComputeEvent),
    Storage(StorageEvent),
    Baremetal(BaremetalEvent),
}

impl Notification {
    pub fn domain(&self) -> Domain {
        match self {
            Notification::Compute(_) => Domain::Compute,
            Notification::Storage(_) => Domain::Storage,
            Notification::Baremetal(_) => Domain::Baremetal,
        }
    }
}

/// Applies one family of change events to a model
pub trait NotificationEndpoint<M>: Send + Sync {
    fn name(&self) -> &'static str;

    fn accepts(&self, notification: &Notification) -> bool;

    fn apply(&self, model: &mut M, notification: &Notification) -> Result<()>;
}

/// Instance lifecycle events
pub struct InstanceEndpoint;

impl NotificationEndpoint<ComputeModel> for InstanceEndpoint {
    fn name(&self) -> &'static str {
        "compute.instance"
    }

    fn accepts(&self, notification: &Notification) -> bool {
        matches!(
            notification,
            Notification::Compute(
                ComputeEvent::InstanceCreated { .. }
                    | ComputeEvent::InstanceUpdated { .. }
                    | ComputeEvent::InstanceDeleted { .. }
                    | ComputeEvent::InstanceMigrated { .. }
            )
        )
    }

    fn apply(&self, model: &mut ComputeModel, notification: &Notification) -> Result<()> {
        let Notification::Compute(event) = notification else {
            return Ok(());
        };
        match event {
            ComputeEvent::InstanceCreated { instance, node } => {
                // Replayed creations refresh the instance in place.
                if model.get_instance(&instance.uuid).is_some() {
                    model.update_instance(instance.clone())?;
                    if model.node_of_instance(&instance.uuid).map(|n| n.uuid.as_str()) != Some(node.as_str()) {
                        model.migrate_instance(&instance.uuid, node)?;
                    }
                    Ok(())
                } else {
                    model.add_instance(instance.clone(), node)
                }
            }
            ComputeEvent::InstanceUpdated { instance } => model.update_instance(instance.clone()),
            ComputeEvent::InstanceDeleted { uuid } => model.remove_instance(uuid).map(|_| ()),
            ComputeEvent::InstanceMigrated { uuid, destination } => {
                let target = model
                    .find_node(destination)
                    .map(|n| n.uuid.clone())
                    .unwrap_or_else(|| destination.clone());
                model.migrate_instance(uuid, &target).map(|_| ())
            }
            _ => Ok(()),
        }
    }
}

/// Hypervisor and compute service events
pub struct ComputeServiceEndpoint;

impl NotificationEndpoint<ComputeModel> for ComputeServiceEndpoint {
    fn name(&self) -> &'static str {
        "compute.service"
    }

    fn accepts(&self, notification: &Notification) -> bool {
        matches!(
            notification,
            Notification::Compute(
                ComputeEvent::NodeCreated { .. }
                    | ComputeEvent::NodeDeleted { .. }
                    | ComputeEvent::ServiceUpdated { .. }
            )
        )
    }

    fn apply(&self, model: &mut ComputeModel, notification: &Notification) -> Result<()> {
        let Notification::Compute(event) = notification else {
            return Ok(());
        };
        match event {
            ComputeEvent::NodeCreated { node } => {
                if model.get_node(&node.uuid).is_some() {
                    model.update_node(node.clone())
                } else {
                    model.add_node(node.clone())
                }
            }
            ComputeEvent::NodeDeleted { uuid } => model.remove_node(uuid).map(|_| ()),
            ComputeEvent::ServiceUpdated {
                hostname,
                status,
                state,
                disabled_reason,
            } => {
                let mut node = model
                    .get_node_by_hostname(hostname)
                    .cloned()
                    .ok_or_else(|| crate::error::OptimizerError::not_found("compute node", hostname))?;
                node.status = *status;
                node.state = *state;
                node.disabled_reason = disabled_reason.clone();
                model.update_node(node)
            }
            _ => Ok(()),
        }
    }
}

/// Volume and pool events
pub struct VolumeEndpoint;

impl NotificationEndpoint<StorageModel> for VolumeEndpoint {
    fn name(&self) -> &'static str {
        "storage.volume"
    }

    fn accepts(&self, notification: &Notification) -> bool {
        matches!(notification, Notification::Storage(_))
    }

    fn apply(&self, model: &mut StorageModel, notification: &Notification) -> Result<()> {
        let Notification::Storage(event) = notification else {
            return Ok(());
        };
        match event {
            StorageEvent::VolumeCreated { volume, pool } => {
                if model.get_volume(&volume.uuid).is_some() {
                    model.update_volume(volume.clone())
                } else {
                    model.add_volume(volume.clone(), pool)
                }
            }
            StorageEvent::VolumeUpdated { volume } => model.update_volume(volume.clone()),
            StorageEvent::VolumeDeleted { uuid } => model.remove_volume(uuid).map(|_| ()),
            StorageEvent::VolumeMigrated { uuid, pool } => {
                model.migrate_volume(uuid, pool).map(|_| ())
            }
            StorageEvent::PoolUpdated { pool } => model.update_pool(pool.clone()),
        }
    }
}

/// Baremetal node events
pub struct IronicNodeEndpoint;

impl NotificationEndpoint<BaremetalModel> for IronicNodeEndpoint {
    fn name(&self) -> &'static str {
        "baremetal.node"
    }

    fn accepts(&self, notification: &Notification) -> bool {
        matches!(notification, Notification::Baremetal(_))
    }

    fn apply(&self, model: &mut BaremetalModel, notification: &Notification) -> Result<()> {
        let Notification::Baremetal(event) = notification else {
            return Ok(());
        };
        match event {
            BaremetalEvent::NodeCreated { node } => {
                if model.get_node(&node.uuid).is_some() {
                    model.update_node(node.clone())
                } else {
                    model.add_node(node.clone())
                }
            }
            BaremetalEvent::NodeDeleted { uuid } => model.remove_node(uuid).map(|_| ()),
            BaremetalEvent::PowerStateChanged { uuid, power_state } => {
                model.set_power_state(uuid, *power_state)
            }
            BaremetalEvent::MaintenanceChanged { uuid, maintenance } => {
                let mut node = model
                    .get_node(uuid)
                    .cloned()
                    .ok_or_else(|| crate::error::OptimizerError::not_found("ironic node", uuid))?;
                node.maintenance = *maintenance;
                model.update_node(node)
            }
        }
    }
}
