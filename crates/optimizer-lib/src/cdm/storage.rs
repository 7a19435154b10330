//! Storage cluster data model: `volume -> pool -> storage node`

use super::element::{Pool, StorageNode, Volume};
use super::{DataModel, Domain};
use crate::error::{OptimizerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StorageModelDocument", into = "StorageModelDocument")]
pub struct StorageModel {
    nodes: BTreeMap<String, StorageNode>,
    pools: BTreeMap<String, Pool>,
    volumes: BTreeMap<String, Volume>,
    /// pool name -> storage node host
    pool_node: BTreeMap<String, String>,
    /// volume uuid -> pool name
    volume_pool: BTreeMap<String, String>,
    node_pools: BTreeMap<String, BTreeSet<String>>,
    pool_volumes: BTreeMap<String, BTreeSet<String>>,
}

impl DataModel for StorageModel {
    const DOMAIN: Domain = Domain::Storage;

    fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl StorageModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: StorageNode) -> Result<()> {
        if self.nodes.contains_key(&node.host) {
            return Err(OptimizerError::conflict(format!(
                "storage node {} already exists",
                node.host
            )));
        }
        self.node_pools.insert(node.host.clone(), BTreeSet::new());
        self.nodes.insert(node.host.clone(), node);
        Ok(())
    }

    /// Remove a storage node with its pools and their volumes
    pub fn remove_node(&mut self, host: &str) -> Result<StorageNode> {
        let node = self
            .nodes
            .remove(host)
            .ok_or_else(|| OptimizerError::not_found("storage node", host))?;
        for pool in self.node_pools.remove(host).unwrap_or_default() {
            self.drop_pool(&pool);
        }
        Ok(node)
    }

    pub fn add_pool(&mut self, pool: Pool, host: &str) -> Result<()> {
        if self.pools.contains_key(&pool.name) {
            return Err(OptimizerError::conflict(format!(
                "pool {} already exists",
                pool.name
            )));
        }
        let pools = self
            .node_pools
            .get_mut(host)
            .ok_or_else(|| OptimizerError::not_found("storage node", host))?;
        pools.insert(pool.name.clone());
        self.pool_node.insert(pool.name.clone(), host.to_string());
        self.pool_volumes.insert(pool.name.clone(), BTreeSet::new());
        self.pools.insert(pool.name.clone(), pool);
        Ok(())
    }

    pub fn update_pool(&mut self, pool: Pool) -> Result<()> {
        match self.pools.get_mut(&pool.name) {
            Some(existing) => {
                *existing = pool;
                Ok(())
            }
            None => Err(OptimizerError::not_found("pool", &pool.name)),
        }
    }

    pub fn remove_pool(&mut self, name: &str) -> Result<Pool> {
        let host = self
            .pool_node
            .get(name)
            .cloned()
            .ok_or_else(|| OptimizerError::not_found("pool", name))?;
        if let Some(pools) = self.node_pools.get_mut(&host) {
            pools.remove(name);
        }
        self.drop_pool(name)
            .ok_or_else(|| OptimizerError::not_found("pool", name))
    }

    fn drop_pool(&mut self, name: &str) -> Option<Pool> {
        self.pool_node.remove(name);
        for volume in self.pool_volumes.remove(name).unwrap_or_default() {
            self.volume_pool.remove(&volume);
            self.volumes.remove(&volume);
        }
        self.pools.remove(name)
    }

    pub fn add_volume(&mut self, volume: Volume, pool: &str) -> Result<()> {
        if self.volumes.contains_key(&volume.uuid) {
            return Err(OptimizerError::conflict(format!(
                "volume {} already exists",
                volume.uuid
            )));
        }
        let volumes = self
            .pool_volumes
            .get_mut(pool)
            .ok_or_else(|| OptimizerError::not_found("pool", pool))?;
        volumes.insert(volume.uuid.clone());
        self.volume_pool
            .insert(volume.uuid.clone(), pool.to_string());
        self.volumes.insert(volume.uuid.clone(), volume);
        Ok(())
    }

    pub fn update_volume(&mut self, volume: Volume) -> Result<()> {
        match self.volumes.get_mut(&volume.uuid) {
            Some(existing) => {
                *existing = volume;
                Ok(())
            }
            None => Err(OptimizerError::not_found("volume", &volume.uuid)),
        }
    }

    pub fn remove_volume(&mut self, uuid: &str) -> Result<Volume> {
        let volume = self
            .volumes
            .remove(uuid)
            .ok_or_else(|| OptimizerError::not_found("volume", uuid))?;
        if let Some(pool) = self.volume_pool.remove(uuid) {
            if let Some(volumes) = self.pool_volumes.get_mut(&pool) {
                volumes.remove(uuid);
            }
        }
        Ok(volume)
    }

    /// Remap a volume onto another pool. Returns the previous pool name.
    pub fn migrate_volume(&mut self, uuid: &str, destination: &str) -> Result<String> {
        if !self.volumes.contains_key(uuid) {
            return Err(OptimizerError::not_found("volume", uuid));
        }
        if !self.pools.contains_key(destination) {
            return Err(OptimizerError::not_found("pool", destination));
        }
        let source = self
            .volume_pool
            .get(uuid)
            .cloned()
            .ok_or_else(|| OptimizerError::internal(format!("volume {} has no pool", uuid)))?;
        if source != destination {
            if let Some(volumes) = self.pool_volumes.get_mut(&source) {
                volumes.remove(uuid);
            }
            if let Some(volumes) = self.pool_volumes.get_mut(destination) {
                volumes.insert(uuid.to_string());
            }
            self.volume_pool
                .insert(uuid.to_string(), destination.to_string());
        }
        Ok(source)
    }

    pub fn mark_volume_excluded(&mut self, uuid: &str) -> Result<()> {
        let volume = self
            .volumes
            .get_mut(uuid)
            .ok_or_else(|| OptimizerError::not_found("volume", uuid))?;
        volume.watcher_exclude = true;
        Ok(())
    }

    pub fn get_node(&self, host: &str) -> Option<&StorageNode> {
        self.nodes.get(host)
    }

    pub fn get_pool(&self, name: &str) -> Option<&Pool> {
        self.pools.get(name)
    }

    pub fn get_volume(&self, uuid: &str) -> Option<&Volume> {
        self.volumes.get(uuid)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &StorageNode> {
        self.nodes.values()
    }

    pub fn pools(&self) -> impl Iterator<Item = &Pool> {
        self.pools.values()
    }

    pub fn volumes(&self) -> impl Iterator<Item = &Volume> {
        self.volumes.values()
    }

    pub fn pools_of(&self, host: &str) -> Vec<&Pool> {
        self.node_pools
            .get(host)
            .map(|names| names.iter().filter_map(|n| self.pools.get(n)).collect())
            .unwrap_or_default()
    }

    pub fn volumes_in(&self, pool: &str) -> Vec<&Volume> {
        self.pool_volumes
            .get(pool)
            .map(|ids| ids.iter().filter_map(|id| self.volumes.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn pool_of_volume(&self, uuid: &str) -> Option<&Pool> {
        self.volume_pool.get(uuid).and_then(|p| self.pools.get(p))
    }

    pub fn node_of_pool(&self, pool: &str) -> Option<&StorageNode> {
        self.pool_node.get(pool).and_then(|h| self.nodes.get(h))
    }
}

/// Serialized form with explicit containment edges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageModelDocument {
    pub nodes: Vec<StorageNode>,
    pub pools: Vec<Pool>,
    pub volumes: Vec<Volume>,
    /// `(pool, storage node)` edges
    pub pool_edges: Vec<(String, String)>,
    /// `(volume, pool)` edges
    pub volume_edges: Vec<(String, String)>,
}

impl From<StorageModel> for StorageModelDocument {
    fn from(model: StorageModel) -> Self {
        Self {
            pool_edges: model.pool_node.into_iter().collect(),
            volume_edges: model.volume_pool.into_iter().collect(),
            nodes: model.nodes.into_values().collect(),
            pools: model.pools.into_values().collect(),
            volumes: model.volumes.into_values().collect(),
        }
    }
}

impl TryFrom<StorageModelDocument> for StorageModel {
    type Error = OptimizerError;

    fn try_from(doc: StorageModelDocument) -> Result<Self> {
        let mut model = StorageModel::new();
        for node in doc.nodes {
            model.add_node(node)?;
        }

        let mut pool_hosts: BTreeMap<String, String> = doc.pool_edges.into_iter().collect();
        for pool in doc.pools {
            let host = pool_hosts.remove(&pool.name).ok_or_else(|| {
                OptimizerError::invalid(format!("pool {} has no storage node edge", pool.name))
            })?;
            model.add_pool(pool, &host)?;
        }

        let mut volume_pools: BTreeMap<String, String> = doc.volume_edges.into_iter().collect();
        for volume in doc.volumes {
            let pool = volume_pools.remove(&volume.uuid).ok_or_else(|| {
                OptimizerError::invalid(format!("volume {} has no pool edge", volume.uuid))
            })?;
            model.add_volume(volume, &pool)?;
        }

        if !pool_hosts.is_empty() || !volume_pools.is_empty() {
            return Err(OptimizerError::invalid(
                "storage model contains dangling edges",
            ));
        }
        Ok(model)
    }
}
