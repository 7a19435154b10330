use super::{domain_items, parse_keys, single_entry, unknown_key, ScopeHandler};
use crate::cdm::{BaremetalModel, Domain};
use crate::error::{OptimizerError, Result};
use serde_json::Value;
use std::collections::BTreeSet;

/// Baremetal domain scope; only exclusions are meaningful here
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaremetalScope {
    pub exclude_ironic_nodes: BTreeSet<String>,
}

impl BaremetalScope {
    pub fn parse(scope: &Value) -> Result<Self> {
        let mut parsed = BaremetalScope::default();

        for item in domain_items(scope, Domain::Baremetal)? {
            let (key, value) = single_entry(item)?;
            if key != "exclude" {
                return Err(unknown_key(Domain::Baremetal, key));
            }
            let items = value
                .as_array()
                .ok_or_else(|| OptimizerError::invalid("baremetal exclude must be a list"))?;
            for item in items {
                let (key, value) = single_entry(item)?;
                match key {
                    "ironic_nodes" => parsed
                        .exclude_ironic_nodes
                        .extend(parse_keys(value, key, &["uuid", "name"])?),
                    other => return Err(unknown_key(Domain::Baremetal, other)),
                }
            }
        }

        Ok(parsed)
    }
}

impl ScopeHandler<BaremetalModel> for BaremetalScope {
    fn apply(&self, mut model: BaremetalModel) -> Result<BaremetalModel> {
        let marked: Vec<_> = model
            .nodes()
            .filter(|n| {
                self.exclude_ironic_nodes.contains(&n.uuid)
                    || self.exclude_ironic_nodes.contains(&n.name)
            })
            .cloned()
            .collect();
        for mut node in marked {
            node.watcher_exclude = true;
            model.update_node(node)?;
        }
        Ok(model)
    }
}
