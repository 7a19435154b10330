//! Compute cluster data model
//!
//! Hypervisors and instances are stored by id; placement is a set of
//! `instance -> compute node` edges with a reverse index. No element holds
//! a reference to another element.

use super::element::{ComputeNode, HostAggregate, Instance, Resources, ServiceStatus};
use super::{DataModel, Domain};
use crate::error::{OptimizerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Graph of compute nodes and the instances placed on them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ComputeModelDocument", into = "ComputeModelDocument")]
pub struct ComputeModel {
    nodes: BTreeMap<String, ComputeNode>,
    instances: BTreeMap<String, Instance>,
    /// instance uuid -> node uuid
    placement: BTreeMap<String, String>,
    /// node uuid -> hosted instance uuids
    hosted: BTreeMap<String, BTreeSet<String>>,
    aggregates: BTreeMap<u64, HostAggregate>,
}

impl DataModel for ComputeModel {
    const DOMAIN: Domain = Domain::Compute;

    fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl ComputeModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: ComputeNode) -> Result<()> {
        if self.nodes.contains_key(&node.uuid) {
            return Err(OptimizerError::conflict(format!(
                "compute node {} already exists",
                node.uuid
            )));
        }
        if self.nodes.values().any(|n| n.hostname == node.hostname) {
            return Err(OptimizerError::conflict(format!(
                "compute node hostname {} already exists",
                node.hostname
            )));
        }
        self.hosted.insert(node.uuid.clone(), BTreeSet::new());
        self.nodes.insert(node.uuid.clone(), node);
        Ok(())
    }

    /// Replace the attributes of an existing node
    pub fn update_node(&mut self, node: ComputeNode) -> Result<()> {
        if self
            .nodes
            .values()
            .any(|n| n.uuid != node.uuid && n.hostname == node.hostname)
        {
            return Err(OptimizerError::conflict(format!(
                "compute node hostname {} already exists",
                node.hostname
            )));
        }
        match self.nodes.get_mut(&node.uuid) {
            Some(existing) => {
                *existing = node;
                Ok(())
            }
            None => Err(OptimizerError::not_found("compute node", &node.uuid)),
        }
    }

    /// Remove a node together with every instance placed on it
    pub fn remove_node(&mut self, uuid: &str) -> Result<ComputeNode> {
        let node = self
            .nodes
            .remove(uuid)
            .ok_or_else(|| OptimizerError::not_found("compute node", uuid))?;
        for instance in self.hosted.remove(uuid).unwrap_or_default() {
            self.placement.remove(&instance);
            self.instances.remove(&instance);
        }
        Ok(node)
    }

    /// Add an instance and place it on `node_uuid`
    pub fn add_instance(&mut self, instance: Instance, node_uuid: &str) -> Result<()> {
        if self.instances.contains_key(&instance.uuid) {
            return Err(OptimizerError::conflict(format!(
                "instance {} already exists",
                instance.uuid
            )));
        }
        let hosted = self
            .hosted
            .get_mut(node_uuid)
            .ok_or_else(|| OptimizerError::not_found("compute node", node_uuid))?;
        hosted.insert(instance.uuid.clone());
        self.placement
            .insert(instance.uuid.clone(), node_uuid.to_string());
        self.instances.insert(instance.uuid.clone(), instance);
        Ok(())
    }

    pub fn update_instance(&mut self, instance: Instance) -> Result<()> {
        match self.instances.get_mut(&instance.uuid) {
            Some(existing) => {
                *existing = instance;
                Ok(())
            }
            None => Err(OptimizerError::not_found("instance", &instance.uuid)),
        }
    }

    pub fn remove_instance(&mut self, uuid: &str) -> Result<Instance> {
        let instance = self
            .instances
            .remove(uuid)
            .ok_or_else(|| OptimizerError::not_found("instance", uuid))?;
        if let Some(node) = self.placement.remove(uuid) {
            if let Some(hosted) = self.hosted.get_mut(&node) {
                hosted.remove(uuid);
            }
        }
        Ok(instance)
    }

    /// Remap an instance onto another node. Returns the previous node uuid.
    pub fn migrate_instance(&mut self, instance_uuid: &str, destination: &str) -> Result<String> {
        if !self.instances.contains_key(instance_uuid) {
            return Err(OptimizerError::not_found("instance", instance_uuid));
        }
        if !self.nodes.contains_key(destination) {
            return Err(OptimizerError::not_found("compute node", destination));
        }
        let source = self
            .placement
            .get(instance_uuid)
            .cloned()
            .ok_or_else(|| OptimizerError::internal(format!("instance {} is unplaced", instance_uuid)))?;
        if source == destination {
            return Ok(source);
        }
        if let Some(hosted) = self.hosted.get_mut(&source) {
            hosted.remove(instance_uuid);
        }
        if let Some(hosted) = self.hosted.get_mut(destination) {
            hosted.insert(instance_uuid.to_string());
        }
        self.placement
            .insert(instance_uuid.to_string(), destination.to_string());
        Ok(source)
    }

    pub fn set_node_status(
        &mut self,
        uuid: &str,
        status: ServiceStatus,
        reason: Option<String>,
    ) -> Result<()> {
        let node = self
            .nodes
            .get_mut(uuid)
            .ok_or_else(|| OptimizerError::not_found("compute node", uuid))?;
        node.status = status;
        node.disabled_reason = reason;
        Ok(())
    }

    pub fn mark_instance_excluded(&mut self, uuid: &str) -> Result<()> {
        let instance = self
            .instances
            .get_mut(uuid)
            .ok_or_else(|| OptimizerError::not_found("instance", uuid))?;
        instance.watcher_exclude = true;
        Ok(())
    }

    pub fn add_aggregate(&mut self, aggregate: HostAggregate) {
        self.aggregates.insert(aggregate.id, aggregate);
    }

    pub fn aggregates(&self) -> impl Iterator<Item = &HostAggregate> {
        self.aggregates.values()
    }

    pub fn get_node(&self, uuid: &str) -> Option<&ComputeNode> {
        self.nodes.get(uuid)
    }

    pub fn get_node_by_hostname(&self, hostname: &str) -> Option<&ComputeNode> {
        self.nodes.values().find(|n| n.hostname == hostname)
    }

    /// Resolve a node by uuid, falling back to hostname
    pub fn find_node(&self, id_or_hostname: &str) -> Option<&ComputeNode> {
        self.get_node(id_or_hostname)
            .or_else(|| self.get_node_by_hostname(id_or_hostname))
    }

    pub fn get_instance(&self, uuid: &str) -> Option<&Instance> {
        self.instances.get(uuid)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ComputeNode> {
        self.nodes.values()
    }

    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Node hosting the given instance
    pub fn node_of_instance(&self, instance_uuid: &str) -> Option<&ComputeNode> {
        self.placement
            .get(instance_uuid)
            .and_then(|node| self.nodes.get(node))
    }

    /// Instances placed on the given node, in uuid order
    pub fn instances_on(&self, node_uuid: &str) -> Vec<&Instance> {
        self.hosted
            .get(node_uuid)
            .map(|ids| ids.iter().filter_map(|id| self.instances.get(id)).collect())
            .unwrap_or_default()
    }

    /// Sum of resources requested by the instances on a node
    pub fn node_used(&self, node_uuid: &str) -> Resources {
        self.instances_on(node_uuid)
            .iter()
            .fold(Resources::default(), |acc, i| acc.add(&i.resources()))
    }

    /// Remaining capacity of a node after overcommit ratios
    pub fn node_free(&self, node_uuid: &str) -> Option<Resources> {
        self.nodes
            .get(node_uuid)
            .map(|n| n.capacity().sub(&self.node_used(node_uuid)))
    }

    /// Placement edges as `(instance uuid, node uuid)` pairs
    pub fn placement_edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.placement
            .iter()
            .map(|(instance, node)| (instance.as_str(), node.as_str()))
    }
}

/// Serialized form: flat node/instance lists plus explicit placement edges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeModelDocument {
    pub nodes: Vec<ComputeNode>,
    pub instances: Vec<Instance>,
    pub edges: Vec<PlacementEdge>,
    #[serde(default)]
    pub aggregates: Vec<HostAggregate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementEdge {
    pub instance: String,
    pub node: String,
}

impl From<ComputeModel> for ComputeModelDocument {
    fn from(model: ComputeModel) -> Self {
        let edges = model
            .placement
            .iter()
            .map(|(instance, node)| PlacementEdge {
                instance: instance.clone(),
                node: node.clone(),
            })
            .collect();
        Self {
            nodes: model.nodes.into_values().collect(),
            instances: model.instances.into_values().collect(),
            edges,
            aggregates: model.aggregates.into_values().collect(),
        }
    }
}

impl TryFrom<ComputeModelDocument> for ComputeModel {
    type Error = OptimizerError;

    fn try_from(doc: ComputeModelDocument) -> Result<Self> {
        let mut model = ComputeModel::new();
        for node in doc.nodes {
            model.add_node(node)?;
        }

        let mut placement: BTreeMap<String, String> = BTreeMap::new();
        for edge in doc.edges {
            if placement.insert(edge.instance.clone(), edge.node).is_some() {
                return Err(OptimizerError::invalid(format!(
                    "instance {} has more than one placement edge",
                    edge.instance
                )));
            }
        }

        for instance in doc.instances {
            let node = placement.remove(&instance.uuid).ok_or_else(|| {
                OptimizerError::invalid(format!("instance {} has no placement edge", instance.uuid))
            })?;
            model.add_instance(instance, &node)?;
        }

        if let Some(instance) = placement.keys().next() {
            return Err(OptimizerError::invalid(format!(
                "placement edge references unknown instance {}",
                instance
            )));
        }

        for aggregate in doc.aggregates {
            model.add_aggregate(aggregate);
        }
        Ok(model)
    }
}
