//! Optimization goals
//!
//! The goal set is fixed at build time. Each goal owns the efficacy
//! specification every solution produced for it must satisfy.

pub mod efficacy;

pub use efficacy::{
    indicators, EfficacySpecification, GlobalEfficacyFn, IndicatorSpec, Indicators,
};

use crate::error::{OptimizerError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DUMMY: &str = "dummy";
pub const UNCLASSIFIED: &str = "unclassified";
pub const SERVER_CONSOLIDATION: &str = "server_consolidation";
pub const THERMAL_OPTIMIZATION: &str = "thermal_optimization";
pub const WORKLOAD_BALANCING: &str = "workload_balancing";
pub const CLUSTER_MAINTAINING: &str = "cluster_maintaining";
pub const SAVING_ENERGY: &str = "saving_energy";

/// An optimization objective
#[derive(Debug, Clone)]
pub struct Goal {
    pub name: &'static str,
    pub display_name: &'static str,
    pub efficacy: EfficacySpecification,
}

impl Goal {
    pub fn new(name: &'static str, display_name: &'static str, efficacy: EfficacySpecification) -> Self {
        Self {
            name,
            display_name,
            efficacy,
        }
    }
}

fn migrations() -> IndicatorSpec {
    IndicatorSpec::count(
        indicators::INSTANCE_MIGRATIONS_COUNT,
        "The number of VM migrations to be performed",
    )
}

fn builtin_goals() -> Vec<Goal> {
    vec![
        Goal::new(DUMMY, "Dummy goal", EfficacySpecification::new()),
        Goal::new(UNCLASSIFIED, "Unclassified", EfficacySpecification::new()),
        Goal::new(
            SERVER_CONSOLIDATION,
            "Server Consolidation",
            EfficacySpecification::new()
                .indicator(IndicatorSpec::count(
                    indicators::COMPUTE_NODES_COUNT,
                    "The total number of enabled compute nodes",
                ))
                .indicator(IndicatorSpec::count(
                    indicators::RELEASED_COMPUTE_NODES_COUNT,
                    "The number of compute nodes to be released",
                ))
                .indicator(migrations())
                .global(efficacy::released_nodes_ratio),
        ),
        Goal::new(
            THERMAL_OPTIMIZATION,
            "Thermal Optimization",
            EfficacySpecification::new().indicator(migrations().optional()),
        ),
        Goal::new(
            WORKLOAD_BALANCING,
            "Workload Balancing",
            EfficacySpecification::new()
                .indicator(migrations().optional())
                .indicator(
                    IndicatorSpec::new(
                        indicators::STANDARD_DEVIATION_BEFORE,
                        "Standard deviation of host load before the plan",
                        "%",
                    )
                    .optional()
                    .min(0.0),
                )
                .indicator(
                    IndicatorSpec::new(
                        indicators::STANDARD_DEVIATION_AFTER,
                        "Standard deviation of host load after the plan",
                        "%",
                    )
                    .optional()
                    .min(0.0),
                )
                .global(efficacy::standard_deviation_reduction),
        ),
        Goal::new(
            CLUSTER_MAINTAINING,
            "Cluster Maintaining",
            EfficacySpecification::new().indicator(migrations().optional()),
        ),
        Goal::new(
            SAVING_ENERGY,
            "Saving Energy",
            EfficacySpecification::new()
                .indicator(
                    IndicatorSpec::count(
                        indicators::POWERED_OFF_NODES_COUNT,
                        "The number of nodes to be powered off",
                    )
                    .optional(),
                )
                .indicator(
                    IndicatorSpec::count(
                        indicators::POWERED_ON_NODES_COUNT,
                        "The number of nodes to be powered on",
                    )
                    .optional(),
                ),
        ),
    ]
}

/// Name -> goal lookup
#[derive(Debug, Clone)]
pub struct GoalRegistry {
    goals: BTreeMap<&'static str, Arc<Goal>>,
}

impl Default for GoalRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl GoalRegistry {
    pub fn empty() -> Self {
        Self {
            goals: BTreeMap::new(),
        }
    }

    /// Registry holding every bundled goal
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for goal in builtin_goals() {
            registry.register(goal);
        }
        registry
    }

    pub fn register(&mut self, goal: Goal) {
        self.goals.insert(goal.name, Arc::new(goal));
    }

    pub fn get(&self, name: &str) -> Result<Arc<Goal>> {
        self.goals
            .get(name)
            .cloned()
            .ok_or_else(|| OptimizerError::invalid(format!("unknown goal '{}'", name)))
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.goals.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Goal>> {
        self.goals.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn values(pairs: &[(&str, f64)]) -> Indicators {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_builtin_goals() {
        let registry = GoalRegistry::builtin();
        assert_eq!(registry.names().count(), 7);
        assert!(registry.get(SERVER_CONSOLIDATION).is_ok());
        assert_eq!(
            registry.get("world_peace").unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_missing_required_indicator() {
        let goal = GoalRegistry::builtin().get(SERVER_CONSOLIDATION).unwrap();
        let err = goal
            .efficacy
            .validate(&values(&[(indicators::COMPUTE_NODES_COUNT, 4.0)]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EfficacyViolation);
    }

    #[test]
    fn test_value_outside_schema() {
        let goal = GoalRegistry::builtin().get(SERVER_CONSOLIDATION).unwrap();
        let err = goal
            .efficacy
            .validate(&values(&[
                (indicators::COMPUTE_NODES_COUNT, 4.0),
                (indicators::RELEASED_COMPUTE_NODES_COUNT, -1.0),
                (indicators::INSTANCE_MIGRATIONS_COUNT, 2.0),
            ]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EfficacyViolation);

        let err = goal
            .efficacy
            .validate(&values(&[
                (indicators::COMPUTE_NODES_COUNT, f64::NAN),
                (indicators::RELEASED_COMPUTE_NODES_COUNT, 1.0),
                (indicators::INSTANCE_MIGRATIONS_COUNT, 2.0),
            ]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EfficacyViolation);
    }

    #[test]
    fn test_validation_is_repeatable_and_global_efficacy() {
        let goal = GoalRegistry::builtin().get(SERVER_CONSOLIDATION).unwrap();
        let reported = values(&[
            (indicators::COMPUTE_NODES_COUNT, 4.0),
            (indicators::RELEASED_COMPUTE_NODES_COUNT, 1.0),
            (indicators::INSTANCE_MIGRATIONS_COUNT, 2.0),
        ]);
        goal.efficacy.validate(&reported).unwrap();
        goal.efficacy.validate(&reported).unwrap();

        let global = goal.efficacy.get_global_efficacy_indicator(&reported);
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].value, 25.0);
        assert_eq!(global[0].unit, "%");
    }

    #[test]
    fn test_unknown_indicator_rejected() {
        let goal = GoalRegistry::builtin().get(DUMMY).unwrap();
        assert!(goal.efficacy.validate(&Indicators::new()).is_ok());
        assert!(goal.efficacy.validate(&values(&[("bogus", 1.0)])).is_err());
        assert!(goal.efficacy.get_global_efficacy_indicator(&Indicators::new()).is_empty());
    }

    #[test]
    fn test_spec_serialization() {
        let goal = GoalRegistry::builtin().get(SERVER_CONSOLIDATION).unwrap();
        let json = goal.efficacy.to_json();
        assert_eq!(json.as_array().unwrap().len(), 3);
        assert_eq!(json[0]["name"], "compute_nodes_count");
        assert_eq!(json[0]["required"], true);
    }
}
