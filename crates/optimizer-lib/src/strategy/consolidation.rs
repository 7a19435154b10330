//! Basic offline server consolidation
//!
//! Empties the least loaded hypervisors onto the busier ones (first fit,
//! busiest target first) and disables the hosts it freed. A host is only
//! released when every instance on it can be moved.

use super::{disable_service, fits, migration, schedulable_nodes, Strategy, StrategyContext};
use crate::cdm::{ComputeModel, Instance};
use crate::error::Result;
use crate::goal::{indicators, SERVER_CONSOLIDATION};
use crate::schema::{get_i64, Field, FieldType, ParamSchema};
use crate::solution::Solution;
use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

pub struct BasicConsolidation;

/// CPU demand of each instance in vcpus
async fn instance_loads(ctx: &StrategyContext, model: &ComputeModel) -> HashMap<String, f64> {
    let period = ctx.period_param("period", 7200.0);
    let mut loads = HashMap::new();
    for instance in model.instances() {
        let load = match ctx.instance_cpu_usage(&instance.uuid, period).await {
            Some(pct) => pct.clamp(0.0, 100.0) / 100.0 * instance.vcpus as f64,
            // No telemetry: assume the instance uses everything it asked for.
            None => instance.vcpus as f64,
        };
        loads.insert(instance.uuid.clone(), load);
    }
    loads
}

fn node_load(model: &ComputeModel, node: &str, loads: &HashMap<String, f64>) -> f64 {
    model
        .instances_on(node)
        .iter()
        .map(|i| loads.get(&i.uuid).copied().unwrap_or(0.0))
        .sum()
}

#[async_trait]
impl Strategy for BasicConsolidation {
    fn name(&self) -> &'static str {
        "basic"
    }

    fn display_name(&self) -> &'static str {
        "Basic offline consolidation"
    }

    fn goal(&self) -> &'static str {
        SERVER_CONSOLIDATION
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
            .field(
                Field::new("migration_attempts", FieldType::Integer { min: Some(0), max: None })
                    .default_value(json!(0))
                    .describe("Maximum number of migrations, 0 for no limit"),
            )
            .field(
                Field::new("period", FieldType::Number { min: Some(0.0), max: None })
                    .default_value(json!(7200.0))
                    .describe("Time window of the CPU statistics, in seconds"),
            )
    }

    async fn execute(&self, ctx: &StrategyContext) -> Result<Solution> {
        let model = ctx.snapshot.compute()?;
        let limit = get_i64(&ctx.parameters, "migration_attempts").unwrap_or(0).max(0) as usize;
        let loads = instance_loads(ctx, model).await;

        let mut simulated = model.clone();
        let mut nodes = schedulable_nodes(model);
        nodes.sort_by(|a, b| {
            node_load(model, &a.uuid, &loads)
                .total_cmp(&node_load(model, &b.uuid, &loads))
                .then_with(|| a.uuid.cmp(&b.uuid))
        });

        let mut solution = Solution::new();
        let mut released = BTreeSet::new();
        let mut migrations = 0usize;

        for candidate in &nodes {
            // Keep at least one host to run the workload.
            if released.len() + 1 >= nodes.len() {
                break;
            }
            let mut hosted: Vec<Instance> = simulated
                .instances_on(&candidate.uuid)
                .into_iter()
                .cloned()
                .collect();
            if hosted.iter().any(|i| !i.is_migratable()) {
                debug!(host = %candidate.hostname, "Host runs instances that cannot move");
                continue;
            }
            if limit > 0 && migrations + hosted.len() > limit {
                continue;
            }
            hosted.sort_by(|a, b| {
                loads
                    .get(&b.uuid)
                    .copied()
                    .unwrap_or(0.0)
                    .total_cmp(&loads.get(&a.uuid).copied().unwrap_or(0.0))
            });

            let mut attempt = simulated.clone();
            let mut moves = Vec::new();
            for instance in &hosted {
                let mut targets: Vec<_> = nodes
                    .iter()
                    .filter(|n| n.uuid != candidate.uuid && !released.contains(&n.uuid))
                    .filter(|n| fits(&attempt, &n.uuid, instance))
                    .collect();
                targets.sort_by(|a, b| {
                    node_load(&attempt, &b.uuid, &loads)
                        .total_cmp(&node_load(&attempt, &a.uuid, &loads))
                        .then_with(|| a.uuid.cmp(&b.uuid))
                });
                let Some(target) = targets.first() else {
                    break;
                };
                attempt.migrate_instance(&instance.uuid, &target.uuid)?;
                moves.push((instance.uuid.clone(), (*target).clone()));
            }
            if moves.len() != hosted.len() {
                continue;
            }

            for (instance, target) in &moves {
                solution.add_action(migration(instance, candidate, Some(target)));
            }
            solution.add_action(disable_service(candidate, "optimizer: server consolidation"));
            migrations += moves.len();
            released.insert(candidate.uuid.clone());
            simulated = attempt;
        }

        info!(
            audit_uuid = %ctx.audit_uuid,
            released = released.len(),
            migrations,
            "Consolidation computed"
        );
        solution.set_indicator(indicators::COMPUTE_NODES_COUNT, nodes.len() as f64);
        solution.set_indicator(indicators::RELEASED_COMPUTE_NODES_COUNT, released.len() as f64);
        solution.set_indicator(indicators::INSTANCE_MIGRATIONS_COUNT, migrations as f64);
        Ok(solution)
    }
}
