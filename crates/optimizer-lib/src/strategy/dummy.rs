use super::{Strategy, StrategyContext};
use crate::action::{NOP, SLEEP};
use crate::cdm::{DataModel, Domain};
use crate::error::{OptimizerError, Result};
use crate::goal::{DUMMY, UNCLASSIFIED};
use crate::schema::{Field, FieldType, ParamSchema};
use crate::scoring::DummyScorer;
use crate::solution::{ActionDescriptor, Solution};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Emits two `nop` actions and one `sleep`
pub struct DummyStrategy;

#[async_trait]
impl Strategy for DummyStrategy {
    fn name(&self) -> &'static str {
        "dummy"
    }

    fn display_name(&self) -> &'static str {
        "Dummy strategy"
    }

    fn goal(&self) -> &'static str {
        DUMMY
    }

    fn domains(&self) -> &'static [Domain] {
        &[]
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
            .field(
                Field::new("para1", FieldType::Number { min: Some(0.0), max: None })
                    .default_value(json!(1.0))
                    .describe("Sleep duration of the sleep action, in seconds"),
            )
            .field(
                Field::new("para2", FieldType::String)
                    .default_value(json!("hello"))
                    .describe("Message of the nop actions"),
            )
    }

    async fn execute(&self, ctx: &StrategyContext) -> Result<Solution> {
        let duration = ctx.f64_param("para1", 1.0);
        let message = ctx.str_param("para2").unwrap_or("hello");
        debug!(audit_uuid = %ctx.audit_uuid, duration, "Running dummy strategy");

        let mut solution = Solution::new();
        solution.add_action(ActionDescriptor::new(NOP, "").param("message", message));
        solution.add_action(ActionDescriptor::new(NOP, "").param("message", "Welcome"));
        solution.add_action(ActionDescriptor::new(SLEEP, "").param("duration", duration));
        Ok(solution)
    }
}

/// Dummy strategy that asks a scoring engine to classify the cluster load
pub struct DummyWithScorer;

impl DummyWithScorer {
    async fn features(&self, ctx: &StrategyContext) -> Result<Vec<f64>> {
        let model = ctx.snapshot.compute()?;
        let period = Duration::from_secs(3600);

        let mut cpu = Vec::new();
        let mut ram = Vec::new();
        let mut disk = Vec::new();
        for node in model.nodes() {
            let capacity = node.capacity();
            let used = model.node_used(&node.uuid);
            let cpu_pct = match ctx.host_cpu_usage(&node.hostname, period).await {
                Some(v) => v,
                None if capacity.vcpus > 0.0 => used.vcpus / capacity.vcpus * 100.0,
                None => 0.0,
            };
            cpu.push(cpu_pct);
            ram.push(percent(used.memory_mb, capacity.memory_mb));
            disk.push(percent(used.disk_gb, capacity.disk_gb));
        }

        Ok(vec![
            mean(&cpu),
            max(&cpu),
            mean(&ram),
            max(&ram),
            mean(&disk),
            max(&disk),
            model.instance_count() as f64,
            model.node_count() as f64,
            0.0,
        ])
    }
}

fn percent(used: f64, total: f64) -> f64 {
    if total > 0.0 {
        used / total * 100.0
    } else {
        0.0
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn max(values: &[f64]) -> f64 {
    values.iter().copied().fold(0.0, f64::max)
}

#[async_trait]
impl Strategy for DummyWithScorer {
    fn name(&self) -> &'static str {
        "dummy_with_scorer"
    }

    fn display_name(&self) -> &'static str {
        "Dummy strategy using a scoring engine"
    }

    fn goal(&self) -> &'static str {
        DUMMY
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
            .field(
                Field::new("scoring_engine", FieldType::NonEmptyString)
                    .default_value(json!(DummyScorer::NAME)),
            )
            .field(
                Field::new("sleep", FieldType::Number { min: Some(0.0), max: None })
                    .default_value(json!(0.0)),
            )
    }

    async fn execute(&self, ctx: &StrategyContext) -> Result<Solution> {
        let engine = ctx
            .scoring
            .get(ctx.str_param("scoring_engine").unwrap_or(DummyScorer::NAME))?;
        let features = self.features(ctx).await?;
        let scores = engine.calculate_score(&features).await?;
        let class = scores
            .first()
            .copied()
            .ok_or_else(|| OptimizerError::internal(format!("{} returned no score", engine.name())))?;

        let mut solution = Solution::new();
        solution.add_action(
            ActionDescriptor::new(NOP, "")
                .param("message", format!("{} load class: {}", engine.name(), class)),
        );
        let sleep = ctx.f64_param("sleep", 0.0);
        if sleep > 0.0 {
            solution.add_action(ActionDescriptor::new(SLEEP, "").param("duration", sleep));
        }
        Ok(solution)
    }
}

/// Pass-through strategy: the actions are given as the `actions` parameter
pub struct Actuator;

#[async_trait]
impl Strategy for Actuator {
    fn name(&self) -> &'static str {
        "actuator"
    }

    fn display_name(&self) -> &'static str {
        "Actuator"
    }

    fn goal(&self) -> &'static str {
        UNCLASSIFIED
    }

    fn domains(&self) -> &'static [Domain] {
        &[]
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new().field(
            Field::new("actions", FieldType::Array)
                .required()
                .describe("Action descriptors: action_type, resource_id, input_parameters"),
        )
    }

    async fn execute(&self, ctx: &StrategyContext) -> Result<Solution> {
        let actions = ctx
            .parameters
            .get("actions")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        let actions: Vec<ActionDescriptor> = serde_json::from_value(actions)
            .map_err(|e| OptimizerError::invalid(format!("invalid 'actions' parameter: {}", e)))?;

        let mut solution = Solution::new();
        for action in actions {
            solution.add_action(action);
        }
        Ok(solution)
    }
}
