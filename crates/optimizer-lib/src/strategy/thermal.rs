//! Outlet temperature based migration
//!
//! Hosts whose outlet temperature exceeds the threshold shed one instance
//! each to the coolest host below the threshold that can take it.

use super::{fits, migration, schedulable_nodes, Strategy, StrategyContext};
use crate::cdm::ComputeNode;
use crate::error::Result;
use crate::goal::{indicators, THERMAL_OPTIMIZATION};
use crate::schema::{Field, FieldType, ParamSchema};
use crate::solution::Solution;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

pub struct OutletTemperature;

#[async_trait]
impl Strategy for OutletTemperature {
    fn name(&self) -> &'static str {
        "outlet_temperature"
    }

    fn display_name(&self) -> &'static str {
        "Outlet temperature based strategy"
    }

    fn goal(&self) -> &'static str {
        THERMAL_OPTIMIZATION
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
            .field(
                Field::new("threshold", FieldType::Number { min: None, max: None })
                    .default_value(json!(35.0))
                    .describe("Outlet temperature above which a host is offloaded, in Celsius"),
            )
            .field(
                Field::new("period", FieldType::Number { min: Some(0.0), max: None })
                    .default_value(json!(30.0)),
            )
    }

    async fn execute(&self, ctx: &StrategyContext) -> Result<Solution> {
        let model = ctx.snapshot.compute()?;
        let threshold = ctx.f64_param("threshold", 35.0);
        let period = ctx.period_param("period", 30.0);

        let mut hot: Vec<(ComputeNode, f64)> = Vec::new();
        let mut cool: Vec<(ComputeNode, f64)> = Vec::new();
        for node in schedulable_nodes(model) {
            match ctx.host_outlet_temp(&node.hostname, period).await {
                Some(t) if t >= threshold => hot.push((node, t)),
                Some(t) => cool.push((node, t)),
                None => debug!(host = %node.hostname, "No outlet temperature"),
            }
        }
        hot.sort_by(|a, b| b.1.total_cmp(&a.1));
        cool.sort_by(|a, b| a.1.total_cmp(&b.1));

        let mut simulated = model.clone();
        let mut solution = Solution::new();
        for (source, temperature) in &hot {
            // Largest movable instance first: it sheds the most heat.
            let mut candidates: Vec<_> = simulated
                .instances_on(&source.uuid)
                .into_iter()
                .filter(|i| i.is_migratable())
                .cloned()
                .collect();
            candidates.sort_by(|a, b| b.vcpus.cmp(&a.vcpus).then_with(|| a.uuid.cmp(&b.uuid)));

            let choice = candidates.iter().find_map(|instance| {
                cool.iter()
                    .find(|(target, _)| fits(&simulated, &target.uuid, instance))
                    .map(|(target, _)| (instance.clone(), target.clone()))
            });
            let Some((instance, target)) = choice else {
                debug!(host = %source.hostname, temperature, "No cooler host can take an instance");
                continue;
            };
            simulated.migrate_instance(&instance.uuid, &target.uuid)?;
            solution.add_action(migration(&instance.uuid, source, Some(&target)));
        }

        info!(
            audit_uuid = %ctx.audit_uuid,
            hot_hosts = hot.len(),
            migrations = solution.len(),
            "Thermal optimization computed"
        );
        solution.set_indicator(indicators::INSTANCE_MIGRATIONS_COUNT, solution.len() as f64);
        Ok(solution)
    }
}
