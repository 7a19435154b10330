//! Baremetal cluster data model

use super::element::{IronicNode, PowerState};
use super::{DataModel, Domain};
use crate::error::{OptimizerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaremetalModel {
    nodes: BTreeMap<String, IronicNode>,
}

impl DataModel for BaremetalModel {
    const DOMAIN: Domain = Domain::Baremetal;

    fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl BaremetalModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: IronicNode) -> Result<()> {
        if self.nodes.contains_key(&node.uuid) {
            return Err(OptimizerError::conflict(format!(
                "ironic node {} already exists",
                node.uuid
            )));
        }
        self.nodes.insert(node.uuid.clone(), node);
        Ok(())
    }

    pub fn update_node(&mut self, node: IronicNode) -> Result<()> {
        match self.nodes.get_mut(&node.uuid) {
            Some(existing) => {
                *existing = node;
                Ok(())
            }
            None => Err(OptimizerError::not_found("ironic node", &node.uuid)),
        }
    }

    pub fn remove_node(&mut self, uuid: &str) -> Result<IronicNode> {
        self.nodes
            .remove(uuid)
            .ok_or_else(|| OptimizerError::not_found("ironic node", uuid))
    }

    pub fn set_power_state(&mut self, uuid: &str, state: PowerState) -> Result<()> {
        let node = self
            .nodes
            .get_mut(uuid)
            .ok_or_else(|| OptimizerError::not_found("ironic node", uuid))?;
        node.power_state = state;
        Ok(())
    }

    pub fn get_node(&self, uuid: &str) -> Option<&IronicNode> {
        self.nodes.get(uuid)
    }

    /// Node backing the hypervisor with the given hostname
    pub fn node_for_hostname(&self, hostname: &str) -> Option<&IronicNode> {
        self.nodes
            .values()
            .find(|n| n.hostname.as_deref() == Some(hostname))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &IronicNode> {
        self.nodes.values()
    }
}
