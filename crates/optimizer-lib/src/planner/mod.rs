//! Planning: turning a solution into an executable action plan
//!
//! The only bundled planner is `weight`: actions are grouped in buckets of
//! equal weight, heavier buckets run first, and each action type advances in
//! chunks no larger than its parallelization limit.

mod weight;


pub use weight::WeightPlanner;

use crate::action::{
    CHANGE_NODE_POWER_STATE, CHANGE_NOVA_SERVICE_STATE, MIGRATE, NOP, RESIZE, SLEEP,
    TURN_HOST_TO_ACPI_S3_STATE, VOLUME_MIGRATE,
};
use crate::error::Result;
use crate::goal::Goal;
use crate::models::{ActionPlan, Audit};
use crate::solution::Solution;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordering and concurrency knobs of the weight planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Higher weights run earlier; unknown types weigh 0
    pub weights: BTreeMap<String, i64>,
    /// Maximum actions of a type started together; unknown types get 1
    pub parallelization: BTreeMap<String, usize>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        let table = [
            (TURN_HOST_TO_ACPI_S3_STATE, 10, 2),
            (RESIZE, 20, 2),
            (MIGRATE, 30, 2),
            (SLEEP, 40, 1),
            (CHANGE_NOVA_SERVICE_STATE, 50, 1),
            (NOP, 60, 1),
            (CHANGE_NODE_POWER_STATE, 70, 2),
            (VOLUME_MIGRATE, 80, 2),
        ];
        Self {
            weights: table
                .iter()
                .map(|(t, w, _)| (t.to_string(), *w))
                .collect(),
            parallelization: table
                .iter()
                .map(|(t, _, p)| (t.to_string(), *p))
                .collect(),
        }
    }
}

impl PlannerConfig {
    /// A config with no weights and every type limited to one at a time
    pub fn empty() -> Self {
        Self {
            weights: BTreeMap::new(),
            parallelization: BTreeMap::new(),
        }
    }

    pub fn with_weight(mut self, action_type: &str, weight: i64) -> Self {
        self.weights.insert(action_type.to_string(), weight);
        self
    }

    pub fn with_parallelization(mut self, action_type: &str, limit: usize) -> Self {
        self.parallelization.insert(action_type.to_string(), limit);
        self
    }

    pub fn weight(&self, action_type: &str) -> i64 {
        self.weights.get(action_type).copied().unwrap_or(0)
    }

    pub fn parallelization(&self, action_type: &str) -> usize {
        self.parallelization
            .get(action_type)
            .copied()
            .unwrap_or(1)
            .max(1)
    }

    /// Sum of the per-type limits, the most actions a plan can run at once
    pub fn max_parallelism(&self) -> usize {
        self.parallelization.values().map(|p| (*p).max(1)).sum::<usize>().max(1)
    }
}

/// Produces and persists action plans
pub trait Planner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Persist a plan for `solution` produced by `strategy` for `audit`
    ///
    /// On failure nothing of the new plan stays visible.
    fn schedule(&self, audit: &Audit, strategy: &str, goal: &Goal, solution: &Solution) -> Result<ActionPlan>;
}
