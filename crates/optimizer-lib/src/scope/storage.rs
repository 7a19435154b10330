use super::{
    domain_items, merge_selector, parse_keys, parse_selector, single_entry, unknown_key, ScopeHandler,
    Selector,
};
use crate::cdm::{Domain, StorageModel};
use crate::error::{OptimizerError, Result};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

/// Storage domain scope
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageScope {
    pub availability_zones: Selector,
    pub volume_types: Selector,
    pub exclude_volumes: BTreeSet<String>,
    pub exclude_storage_pools: BTreeSet<String>,
    pub exclude_storage_nodes: BTreeSet<String>,
    pub exclude_projects: BTreeSet<String>,
}

impl StorageScope {
    pub fn parse(scope: &Value) -> Result<Self> {
        let mut parsed = StorageScope::default();

        for item in domain_items(scope, Domain::Storage)? {
            let (key, value) = single_entry(item)?;
            match key {
                "availability_zones" => {
                    let selector = parse_selector(value, key, &["name"])?;
                    parsed.availability_zones =
                        merge_selector(std::mem::take(&mut parsed.availability_zones), selector);
                }
                "volume_types" => {
                    let selector = parse_selector(value, key, &["name"])?;
                    parsed.volume_types =
                        merge_selector(std::mem::take(&mut parsed.volume_types), selector);
                }
                "exclude" => {
                    let items = value
                        .as_array()
                        .ok_or_else(|| OptimizerError::invalid("storage exclude must be a list"))?;
                    for item in items {
                        let (key, value) = single_entry(item)?;
                        let target = match key {
                            "volumes" => &mut parsed.exclude_volumes,
                            "storage_pools" => &mut parsed.exclude_storage_pools,
                            "storage_nodes" => &mut parsed.exclude_storage_nodes,
                            "projects" => &mut parsed.exclude_projects,
                            other => return Err(unknown_key(Domain::Storage, other)),
                        };
                        target.extend(parse_keys(value, key, &["uuid", "name"])?);
                    }
                }
                other => return Err(unknown_key(Domain::Storage, other)),
            }
        }

        Ok(parsed)
    }
}

impl ScopeHandler<StorageModel> for StorageScope {
    fn apply(&self, mut model: StorageModel) -> Result<StorageModel> {
        let doomed_nodes: Vec<String> = model
            .nodes()
            .filter(|n| {
                let zone_ok = match &self.availability_zones {
                    Selector::Only(zones) => zones.contains(&n.zone),
                    _ => true,
                };
                let type_ok = match &self.volume_types {
                    Selector::Only(types) => n.volume_types.iter().any(|t| types.contains(t)),
                    _ => true,
                };
                !zone_ok || !type_ok || self.exclude_storage_nodes.contains(&n.host)
            })
            .map(|n| n.host.clone())
            .collect();
        for host in &doomed_nodes {
            model.remove_node(host)?;
        }

        let doomed_pools: Vec<String> = model
            .pools()
            .filter(|p| self.exclude_storage_pools.contains(&p.name))
            .map(|p| p.name.clone())
            .collect();
        for pool in &doomed_pools {
            model.remove_pool(pool)?;
        }

        let marked: Vec<String> = model
            .volumes()
            .filter(|v| {
                self.exclude_volumes.contains(&v.uuid) || self.exclude_projects.contains(&v.project_id)
            })
            .map(|v| v.uuid.clone())
            .collect();
        for uuid in &marked {
            model.mark_volume_excluded(uuid)?;
        }

        debug!(
            removed_nodes = doomed_nodes.len(),
            removed_pools = doomed_pools.len(),
            excluded_volumes = marked.len(),
            "Applied storage scope"
        );
        Ok(model)
    }
}
