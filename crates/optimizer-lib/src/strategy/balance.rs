//! Workload balancing
//!
//! Moves instances off hosts whose utilisation exceeds the threshold onto
//! the least loaded host that stays below it.

use super::{fits, migration, schedulable_nodes, Strategy, StrategyContext};
use crate::cdm::{ComputeModel, ComputeNode, Instance};
use crate::datasource::metrics;
use crate::error::Result;
use crate::goal::{indicators, WORKLOAD_BALANCING};
use crate::schema::{Field, FieldType, ParamSchema};
use crate::solution::Solution;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use tracing::info;

pub struct WorkloadBalance;

const METRICS: &[&str] = &[metrics::INSTANCE_CPU_USAGE, metrics::INSTANCE_RAM_USAGE];

/// Absolute usage per instance, in vcpus or MB depending on the metric
async fn instance_usage(ctx: &StrategyContext, model: &ComputeModel, metric: &str) -> HashMap<String, f64> {
    let period = ctx.period_param("period", 300.0);
    let mut usage = HashMap::new();
    for instance in model.instances() {
        let value = if metric == metrics::INSTANCE_RAM_USAGE {
            ctx.instance_ram_usage(&instance.uuid, period)
                .await
                .unwrap_or(instance.memory_mb as f64)
        } else {
            ctx.instance_cpu_usage(&instance.uuid, period)
                .await
                .map(|pct| pct.clamp(0.0, 100.0) / 100.0 * instance.vcpus as f64)
                .unwrap_or(instance.vcpus as f64)
        };
        usage.insert(instance.uuid.clone(), value);
    }
    usage
}

fn capacity(node: &ComputeNode, metric: &str) -> f64 {
    let capacity = node.capacity();
    if metric == metrics::INSTANCE_RAM_USAGE {
        capacity.memory_mb
    } else {
        capacity.vcpus
    }
}

/// Utilisation of every node in percent
fn utilisation(model: &ComputeModel, nodes: &[ComputeNode], usage: &HashMap<String, f64>, metric: &str) -> HashMap<String, f64> {
    nodes
        .iter()
        .map(|node| {
            let used: f64 = model
                .instances_on(&node.uuid)
                .iter()
                .map(|i| usage.get(&i.uuid).copied().unwrap_or(0.0))
                .sum();
            let total = capacity(node, metric);
            let pct = if total > 0.0 { used / total * 100.0 } else { 0.0 };
            (node.uuid.clone(), pct)
        })
        .collect()
}

fn standard_deviation(values: &HashMap<String, f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.values().sum::<f64>() / n;
    (values.values().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

#[async_trait]
impl Strategy for WorkloadBalance {
    fn name(&self) -> &'static str {
        "workload_balance"
    }

    fn display_name(&self) -> &'static str {
        "Workload Balance Migration Strategy"
    }

    fn goal(&self) -> &'static str {
        WORKLOAD_BALANCING
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
            .field(
                Field::new("metrics", FieldType::Enum(METRICS))
                    .default_value(json!(metrics::INSTANCE_CPU_USAGE)),
            )
            .field(
                Field::new("threshold", FieldType::Number { min: Some(0.0), max: Some(100.0) })
                    .default_value(json!(25.0))
                    .describe("Host utilisation above which workload is moved, in percent"),
            )
            .field(
                Field::new("period", FieldType::Number { min: Some(0.0), max: None })
                    .default_value(json!(300.0)),
            )
    }

    async fn execute(&self, ctx: &StrategyContext) -> Result<Solution> {
        let model = ctx.snapshot.compute()?;
        let metric = ctx.str_param("metrics").unwrap_or(metrics::INSTANCE_CPU_USAGE);
        let threshold = ctx.f64_param("threshold", 25.0);
        let usage = instance_usage(ctx, model, metric).await;
        let nodes = schedulable_nodes(model);

        let before = utilisation(model, &nodes, &usage, metric);
        let mut simulated = model.clone();
        let mut current = before.clone();
        let mut solution = Solution::new();

        let mut overloaded: Vec<&ComputeNode> = nodes
            .iter()
            .filter(|n| current.get(&n.uuid).copied().unwrap_or(0.0) > threshold)
            .collect();
        overloaded.sort_by(|a, b| current[&b.uuid].total_cmp(&current[&a.uuid]));

        for source in overloaded {
            let source_total = capacity(source, metric);
            if source_total <= 0.0 {
                continue;
            }
            let mut candidates: Vec<Instance> = simulated
                .instances_on(&source.uuid)
                .into_iter()
                .filter(|i| i.is_migratable())
                .cloned()
                .collect();
            let share = |i: &Instance| usage.get(&i.uuid).copied().unwrap_or(0.0);
            candidates.sort_by(|a, b| share(a).total_cmp(&share(b)).then_with(|| a.uuid.cmp(&b.uuid)));

            // Smallest instance that brings the host under the threshold,
            // otherwise the biggest one.
            let source_pct = current[&source.uuid];
            let pick = candidates
                .iter()
                .find(|i| source_pct - share(i) / source_total * 100.0 <= threshold)
                .or_else(|| candidates.last());
            let Some(instance) = pick else {
                continue;
            };

            let mut targets: Vec<&ComputeNode> = nodes
                .iter()
                .filter(|n| n.uuid != source.uuid && fits(&simulated, &n.uuid, instance))
                .filter(|n| {
                    let total = capacity(n, metric);
                    total > 0.0 && current[&n.uuid] + share(instance) / total * 100.0 <= threshold
                })
                .collect();
            targets.sort_by(|a, b| current[&a.uuid].total_cmp(&current[&b.uuid]));
            let Some(target) = targets.first() else {
                continue;
            };

            simulated.migrate_instance(&instance.uuid, &target.uuid)?;
            if let Some(pct) = current.get_mut(&source.uuid) {
                *pct -= share(instance) / source_total * 100.0;
            }
            if let Some(pct) = current.get_mut(&target.uuid) {
                *pct += share(instance) / capacity(target, metric) * 100.0;
            }
            solution.add_action(migration(&instance.uuid, source, Some(target)));
        }

        let (sd_before, sd_after) = (standard_deviation(&before), standard_deviation(&current));
        info!(
            audit_uuid = %ctx.audit_uuid,
            metric,
            migrations = solution.len(),
            sd_before,
            sd_after,
            "Workload balance computed"
        );
        solution.set_indicator(indicators::INSTANCE_MIGRATIONS_COUNT, solution.len() as f64);
        solution.set_indicator(indicators::STANDARD_DEVIATION_BEFORE, sd_before);
        solution.set_indicator(indicators::STANDARD_DEVIATION_AFTER, sd_after);
        Ok(solution)
    }
}
