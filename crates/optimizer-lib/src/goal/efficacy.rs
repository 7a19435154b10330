//! Efficacy specifications
//!
//! A goal declares the indicators a solution must report. Validation runs
//! after the strategy returns and before anything is persisted.

use crate::error::{OptimizerError, Result};
use crate::models::GlobalEfficacy;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Indicator values keyed by name, as reported by a strategy
pub type Indicators = BTreeMap<String, f64>;

/// Derives the aggregated indicators of a plan
pub type GlobalEfficacyFn = fn(&Indicators) -> Vec<GlobalEfficacy>;

/// Declaration of one efficacy indicator
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub unit: &'static str,
    pub required: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl IndicatorSpec {
    pub fn new(name: &'static str, description: &'static str, unit: &'static str) -> Self {
        Self {
            name,
            description,
            unit,
            required: true,
            min: None,
            max: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    /// Count indicators: required, at least zero
    pub fn count(name: &'static str, description: &'static str) -> Self {
        Self::new(name, description, "").min(0.0)
    }

    fn check(&self, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(OptimizerError::EfficacyViolation(format!(
                "indicator {} is not a finite number",
                self.name
            )));
        }
        if let Some(min) = self.min.filter(|m| value < *m) {
            return Err(OptimizerError::EfficacyViolation(format!(
                "indicator {} = {} is below the minimum {}",
                self.name, value, min
            )));
        }
        if let Some(max) = self.max.filter(|m| value > *m) {
            return Err(OptimizerError::EfficacyViolation(format!(
                "indicator {} = {} is above the maximum {}",
                self.name, value, max
            )));
        }
        Ok(())
    }
}

/// Indicator contract of a goal
#[derive(Debug, Clone, Default)]
pub struct EfficacySpecification {
    indicators: Vec<IndicatorSpec>,
    global: Option<GlobalEfficacyFn>,
}

impl EfficacySpecification {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn indicator(mut self, spec: IndicatorSpec) -> Self {
        self.indicators.push(spec);
        self
    }

    pub fn global(mut self, global: GlobalEfficacyFn) -> Self {
        self.global = Some(global);
        self
    }

    pub fn indicators_specs(&self) -> &[IndicatorSpec] {
        &self.indicators
    }

    pub fn spec(&self, name: &str) -> Option<&IndicatorSpec> {
        self.indicators.iter().find(|s| s.name == name)
    }

    /// Check a solution's indicators; pure, so revalidating gives the same answer
    pub fn validate(&self, indicators: &Indicators) -> Result<()> {
        for spec in &self.indicators {
            match indicators.get(spec.name) {
                Some(value) => spec.check(*value)?,
                None if spec.required => {
                    return Err(OptimizerError::EfficacyViolation(format!(
                        "required indicator {} is missing",
                        spec.name
                    )))
                }
                None => {}
            }
        }
        if let Some(unknown) = indicators.keys().find(|k| self.spec(k).is_none()) {
            return Err(OptimizerError::EfficacyViolation(format!(
                "indicator {} is not part of the goal's efficacy specification",
                unknown
            )));
        }
        Ok(())
    }

    pub fn get_global_efficacy_indicator(&self, indicators: &Indicators) -> Vec<GlobalEfficacy> {
        self.global.map(|f| f(indicators)).unwrap_or_default()
    }

    /// Serialized form stored with the goal
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.indicators
                .iter()
                .map(|s| {
                    json!({
                        "name": s.name,
                        "description": s.description,
                        "unit": s.unit,
                        "required": s.required,
                        "schema": {"type": "number", "minimum": s.min, "maximum": s.max},
                    })
                })
                .collect(),
        )
    }
}

pub mod indicators {
    pub const COMPUTE_NODES_COUNT: &str = "compute_nodes_count";
    pub const RELEASED_COMPUTE_NODES_COUNT: &str = "released_compute_nodes_count";
    pub const INSTANCE_MIGRATIONS_COUNT: &str = "instance_migrations_count";
    pub const POWERED_OFF_NODES_COUNT: &str = "powered_off_nodes_count";
    pub const POWERED_ON_NODES_COUNT: &str = "powered_on_nodes_count";
    pub const STANDARD_DEVIATION_BEFORE: &str = "standard_deviation_before";
    pub const STANDARD_DEVIATION_AFTER: &str = "standard_deviation_after";
}

/// Percentage of compute nodes released by the plan
pub fn released_nodes_ratio(values: &Indicators) -> Vec<GlobalEfficacy> {
    let total = values
        .get(indicators::COMPUTE_NODES_COUNT)
        .copied()
        .unwrap_or(0.0);
    let released = values
        .get(indicators::RELEASED_COMPUTE_NODES_COUNT)
        .copied()
        .unwrap_or(0.0);
    let value = if total > 0.0 {
        released / total * 100.0
    } else {
        0.0
    };
    vec![GlobalEfficacy {
        name: "released_nodes_ratio".to_string(),
        description: "Ratio of released compute nodes divided by the total number of enabled compute nodes".to_string(),
        unit: "%".to_string(),
        value,
    }]
}

/// Relative reduction of the workload standard deviation
pub fn standard_deviation_reduction(values: &Indicators) -> Vec<GlobalEfficacy> {
    let (Some(before), Some(after)) = (
        values.get(indicators::STANDARD_DEVIATION_BEFORE),
        values.get(indicators::STANDARD_DEVIATION_AFTER),
    ) else {
        return Vec::new();
    };
    if *before <= 0.0 {
        return Vec::new();
    }
    vec![GlobalEfficacy {
        name: "standard_deviation_reduction".to_string(),
        description: "Reduction of the standard deviation of host load".to_string(),
        unit: "%".to_string(),
        value: (before - after) / before * 100.0,
    }]
}
