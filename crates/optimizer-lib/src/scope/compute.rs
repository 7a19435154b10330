use super::{
    domain_items, merge_selector, parse_keys, parse_selector, single_entry, unknown_key, ScopeHandler,
    Selector,
};
use crate::cdm::{ComputeModel, Domain};
use crate::error::{OptimizerError, Result};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Compute domain scope
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComputeScope {
    pub host_aggregates: Selector,
    pub availability_zones: Selector,
    pub exclude_instances: BTreeSet<String>,
    pub exclude_compute_nodes: BTreeSet<String>,
    pub exclude_host_aggregates: BTreeSet<String>,
    pub exclude_instance_metadata: BTreeMap<String, String>,
    pub exclude_projects: BTreeSet<String>,
}

impl ComputeScope {
    pub fn parse(scope: &Value) -> Result<Self> {
        let mut parsed = ComputeScope::default();

        for item in domain_items(scope, Domain::Compute)? {
            let (key, value) = single_entry(item)?;
            match key {
                "host_aggregates" => {
                    let selector = parse_selector(value, key, &["id", "name"])?;
                    parsed.host_aggregates =
                        merge_selector(std::mem::take(&mut parsed.host_aggregates), selector);
                }
                "availability_zones" => {
                    let selector = parse_selector(value, key, &["name"])?;
                    parsed.availability_zones =
                        merge_selector(std::mem::take(&mut parsed.availability_zones), selector);
                }
                "exclude" => parsed.parse_exclusions(value)?,
                other => return Err(unknown_key(Domain::Compute, other)),
            }
        }

        Ok(parsed)
    }

    fn parse_exclusions(&mut self, list: &Value) -> Result<()> {
        let items = list
            .as_array()
            .ok_or_else(|| OptimizerError::invalid("compute exclude must be a list"))?;
        for item in items {
            let (key, value) = single_entry(item)?;
            match key {
                "instances" => self
                    .exclude_instances
                    .extend(parse_keys(value, key, &["uuid"])?),
                "compute_nodes" => self
                    .exclude_compute_nodes
                    .extend(parse_keys(value, key, &["name", "uuid"])?),
                "host_aggregates" => self
                    .exclude_host_aggregates
                    .extend(parse_keys(value, key, &["id", "name"])?),
                "projects" => self
                    .exclude_projects
                    .extend(parse_keys(value, key, &["uuid"])?),
                "instance_metadata" => {
                    let entries = value.as_array().ok_or_else(|| {
                        OptimizerError::invalid("instance_metadata must be a list")
                    })?;
                    for entry in entries {
                        let obj = entry.as_object().ok_or_else(|| {
                            OptimizerError::invalid("instance_metadata entries must be objects")
                        })?;
                        for (k, v) in obj {
                            let v = match v {
                                Value::String(s) => s.clone(),
                                other => other.to_string(),
                            };
                            self.exclude_instance_metadata.insert(k.clone(), v);
                        }
                    }
                }
                other => return Err(unknown_key(Domain::Compute, other)),
            }
        }
        Ok(())
    }

    fn aggregate_hosts(model: &ComputeModel, refs: &[String]) -> BTreeSet<String> {
        model
            .aggregates()
            .filter(|a| refs.iter().any(|r| *r == a.id.to_string() || *r == a.name))
            .flat_map(|a| a.hosts.iter().cloned())
            .collect()
    }

    /// Hostnames allowed by the include lists; `None` means every host
    fn allowed_hosts(&self, model: &ComputeModel) -> Option<BTreeSet<String>> {
        if matches!(self.host_aggregates, Selector::All)
            || matches!(self.availability_zones, Selector::All)
        {
            return None;
        }
        if !self.host_aggregates.is_declared() && !self.availability_zones.is_declared() {
            return None;
        }

        let mut allowed = BTreeSet::new();
        if let Selector::Only(refs) = &self.host_aggregates {
            allowed.extend(Self::aggregate_hosts(model, refs));
        }
        if let Selector::Only(zones) = &self.availability_zones {
            allowed.extend(
                model
                    .nodes()
                    .filter(|n| zones.contains(&n.availability_zone))
                    .map(|n| n.hostname.clone()),
            );
        }
        Some(allowed)
    }

    fn instance_excluded(&self, model: &ComputeModel, uuid: &str) -> bool {
        if self.exclude_instances.contains(uuid) {
            return true;
        }
        let Some(instance) = model.get_instance(uuid) else {
            return false;
        };
        self.exclude_projects.contains(&instance.project_id)
            || self
                .exclude_instance_metadata
                .iter()
                .any(|(k, v)| instance.metadata.get(k) == Some(v))
    }
}

impl ScopeHandler<ComputeModel> for ComputeScope {
    fn apply(&self, mut model: ComputeModel) -> Result<ComputeModel> {
        let allowed = self.allowed_hosts(&model);
        let excluded_hosts: BTreeSet<String> = {
            let refs: Vec<String> = self.exclude_host_aggregates.iter().cloned().collect();
            Self::aggregate_hosts(&model, &refs)
        };

        let doomed: Vec<String> = model
            .nodes()
            .filter(|n| {
                let not_allowed = allowed
                    .as_ref()
                    .map_or(false, |hosts| !hosts.contains(&n.hostname));
                not_allowed
                    || excluded_hosts.contains(&n.hostname)
                    || self.exclude_compute_nodes.contains(&n.hostname)
                    || self.exclude_compute_nodes.contains(&n.uuid)
            })
            .map(|n| n.uuid.clone())
            .collect();
        for uuid in &doomed {
            model.remove_node(uuid)?;
        }

        let marked: Vec<String> = model
            .instances()
            .filter(|i| self.instance_excluded(&model, &i.uuid))
            .map(|i| i.uuid.clone())
            .collect();
        for uuid in &marked {
            model.mark_instance_excluded(uuid)?;
        }

        debug!(
            removed_nodes = doomed.len(),
            excluded_instances = marked.len(),
            remaining_nodes = model.nodes().count(),
            "Applied compute scope"
        );
        Ok(model)
    }
}
