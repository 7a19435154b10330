//! Audit scope handling
//!
//! A scope is a JSON list of blocks keyed by domain:
//!
//! ```json
//! [
//!   {"compute": [
//!     {"host_aggregates": [{"id": 1}, {"name": "fast"}]},
//!     {"availability_zones": [{"name": "az1"}]},
//!     {"exclude": [
//!       {"instances": [{"uuid": "..."}]},
//!       {"compute_nodes": [{"name": "host-3"}]}
//!     ]}
//!   ]},
//!   {"storage": [{"exclude": [{"volumes": [{"uuid": "..."}]}]}]}
//! ]
//! ```
//!
//! Each domain handler only reads the blocks keyed by its own domain; several
//! blocks for the same domain are merged. Includes build an allow-list, `*`
//! meaning everything and only valid on its own.

mod baremetal;
mod compute;
mod storage;


pub use baremetal::BaremetalScope;
pub use compute::ComputeScope;
pub use storage::StorageScope;

use crate::cdm::{BaremetalModel, ComputeModel, DataModel, Domain, StorageModel};
use crate::error::{OptimizerError, Result};
use serde_json::Value;

pub const WILDCARD: &str = "*";

/// Produces a scoped copy of a cluster data model
pub trait ScopeHandler<M>: Send + Sync {
    fn apply(&self, model: M) -> Result<M>;
}

/// Models that know how to parse a scope declaration for their domain
pub trait Scopable: DataModel {
    fn scope_handler(scope: &Value) -> Result<Box<dyn ScopeHandler<Self>>>;
}

impl Scopable for ComputeModel {
    fn scope_handler(scope: &Value) -> Result<Box<dyn ScopeHandler<Self>>> {
        Ok(Box::new(ComputeScope::parse(scope)?))
    }
}

impl Scopable for StorageModel {
    fn scope_handler(scope: &Value) -> Result<Box<dyn ScopeHandler<Self>>> {
        Ok(Box::new(StorageScope::parse(scope)?))
    }
}

impl Scopable for BaremetalModel {
    fn scope_handler(scope: &Value) -> Result<Box<dyn ScopeHandler<Self>>> {
        Ok(Box::new(BaremetalScope::parse(scope)?))
    }
}

/// Validate the overall shape of a scope without applying it
pub fn validate(scope: &Value) -> Result<()> {
    ComputeScope::parse(scope)?;
    StorageScope::parse(scope)?;
    BaremetalScope::parse(scope)?;
    for block in as_list(scope, "scope")? {
        let obj = block
            .as_object()
            .ok_or_else(|| OptimizerError::invalid("scope blocks must be objects"))?;
        for key in obj.keys() {
            if Domain::parse(key).is_none() {
                return Err(OptimizerError::invalid(format!(
                    "unknown scope domain '{}'",
                    key
                )));
            }
        }
    }
    Ok(())
}

/// Allow-list parsed from an include list
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selector {
    /// Nothing declared
    #[default]
    Unrestricted,
    /// `*`
    All,
    Only(Vec<String>),
}

impl Selector {
    fn merge(self, other: Selector) -> Selector {
        match (self, other) {
            (Selector::Unrestricted, s) | (s, Selector::Unrestricted) => s,
            (Selector::All, _) | (_, Selector::All) => Selector::All,
            (Selector::Only(mut a), Selector::Only(b)) => {
                a.extend(b);
                Selector::Only(a)
            }
        }
    }

    pub fn is_declared(&self) -> bool {
        !matches!(self, Selector::Unrestricted)
    }
}

fn as_list<'a>(value: &'a Value, what: &str) -> Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| OptimizerError::invalid(format!("{} must be a list", what)))
}

/// Every item declared for `domain`, across all blocks
pub(crate) fn domain_items(scope: &Value, domain: Domain) -> Result<Vec<&Value>> {
    if scope.is_null() {
        return Ok(Vec::new());
    }
    let mut items = Vec::new();
    for block in as_list(scope, "scope")? {
        let obj = block
            .as_object()
            .ok_or_else(|| OptimizerError::invalid("scope blocks must be objects"))?;
        if let Some(entries) = obj.get(domain.as_str()) {
            items.extend(as_list(entries, domain.as_str())?.iter());
        }
    }
    Ok(items)
}

/// Split an item into its single key and value
pub(crate) fn single_entry(item: &Value) -> Result<(&str, &Value)> {
    let obj = item
        .as_object()
        .filter(|o| o.len() == 1)
        .ok_or_else(|| OptimizerError::invalid(format!("malformed scope entry: {}", item)))?;
    obj.iter()
        .next()
        .map(|(k, v)| (k.as_str(), v))
        .ok_or_else(|| OptimizerError::invalid("empty scope entry"))
}

/// Read the identifier out of `{"uuid": ..}`, `{"name": ..}`, `{"id": ..}` or a bare string
pub(crate) fn entry_key(entry: &Value, fields: &[&str]) -> Result<String> {
    match entry {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Object(obj) => fields
            .iter()
            .find_map(|f| obj.get(*f))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| {
                OptimizerError::invalid(format!(
                    "scope entry {} needs one of {:?}",
                    entry, fields
                ))
            }),
        _ => Err(OptimizerError::invalid(format!(
            "malformed scope entry: {}",
            entry
        ))),
    }
}

/// Parse an include list, enforcing that `*` stands alone
pub(crate) fn parse_selector(list: &Value, what: &str, fields: &[&str]) -> Result<Selector> {
    let keys = parse_keys(list, what, fields)?;
    let wildcard = keys.iter().any(|k| k == WILDCARD);
    if wildcard && keys.len() > 1 {
        return Err(OptimizerError::invalid(format!(
            "wildcard '*' in {} cannot be combined with other entries",
            what
        )));
    }
    Ok(if wildcard {
        Selector::All
    } else {
        Selector::Only(keys)
    })
}

pub(crate) fn parse_keys(list: &Value, what: &str, fields: &[&str]) -> Result<Vec<String>> {
    as_list(list, what)?
        .iter()
        .map(|entry| entry_key(entry, fields))
        .collect()
}

pub(crate) fn merge_selector(current: Selector, next: Selector) -> Selector {
    current.merge(next)
}

pub(crate) fn unknown_key(domain: Domain, key: &str) -> OptimizerError {
    OptimizerError::invalid(format!("unknown {} scope key '{}'", domain, key))
}
