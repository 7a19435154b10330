//! Strategy output
//!
//! A solution is an unordered proposal: the planner decides execution order.
//! It lives only between the strategy returning and the plan being committed.

use crate::goal::Indicators;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One proposed infrastructure change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub action_type: String,
    #[serde(default)]
    pub resource_id: String,
    #[serde(default)]
    pub input_parameters: Map<String, Value>,
}

impl ActionDescriptor {
    pub fn new(action_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            resource_id: resource_id.into(),
            input_parameters: Map::new(),
        }
    }

    pub fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.input_parameters.insert(name.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub actions: Vec<ActionDescriptor>,
    pub indicators: Indicators,
}

impl Solution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_action(&mut self, action: ActionDescriptor) {
        self.actions.push(action);
    }

    pub fn set_indicator(&mut self, name: &str, value: f64) {
        self.indicators.insert(name.to_string(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Number of actions of one type
    pub fn count(&self, action_type: &str) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .count()
    }
}
