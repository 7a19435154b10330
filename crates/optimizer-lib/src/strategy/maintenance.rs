//! Host maintenance
//!
//! Disables a hypervisor and evacuates its instances, onto the backup host
//! when one is given and has room, otherwise onto any host that fits.

use super::{disable_service, fits, migration, schedulable_nodes, Strategy, StrategyContext};
use crate::error::{OptimizerError, Result};
use crate::goal::{indicators, CLUSTER_MAINTAINING};
use crate::schema::{Field, FieldType, ParamSchema};
use crate::solution::Solution;
use async_trait::async_trait;
use tracing::{info, warn};

pub struct HostMaintenance;

#[async_trait]
impl Strategy for HostMaintenance {
    fn name(&self) -> &'static str {
        "host_maintenance"
    }

    fn display_name(&self) -> &'static str {
        "Host Maintenance Strategy"
    }

    fn goal(&self) -> &'static str {
        CLUSTER_MAINTAINING
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
            .field(
                Field::new("maintenance_node", FieldType::NonEmptyString)
                    .required()
                    .describe("Hostname of the hypervisor to put in maintenance"),
            )
            .field(
                Field::new("backup_node", FieldType::NonEmptyString)
                    .describe("Preferred destination of the evacuated instances"),
            )
    }

    async fn execute(&self, ctx: &StrategyContext) -> Result<Solution> {
        let model = ctx.snapshot.compute()?;
        let name = ctx.str_param("maintenance_node").unwrap_or_default();
        let node = model
            .find_node(name)
            .cloned()
            .ok_or_else(|| OptimizerError::invalid(format!("maintenance node '{}' is not in scope", name)))?;
        let backup = match ctx.str_param("backup_node") {
            Some(b) => Some(
                model
                    .find_node(b)
                    .cloned()
                    .ok_or_else(|| OptimizerError::invalid(format!("backup node '{}' is not in scope", b)))?,
            ),
            None => None,
        };

        let mut solution = Solution::new();
        solution.add_action(disable_service(&node, "watcher_maintaining"));

        let others: Vec<_> = schedulable_nodes(model)
            .into_iter()
            .filter(|n| n.uuid != node.uuid)
            .collect();
        let mut simulated = model.clone();
        let mut migrations = 0usize;
        let hosted: Vec<_> = model.instances_on(&node.uuid).into_iter().cloned().collect();
        for instance in hosted {
            if instance.watcher_exclude {
                warn!(instance = %instance.uuid, "Excluded instance left on maintenance host");
                continue;
            }
            let target = backup
                .iter()
                .filter(|b| b.uuid != node.uuid && b.is_schedulable() && fits(&simulated, &b.uuid, &instance))
                .chain(others.iter().filter(|n| fits(&simulated, &n.uuid, &instance)))
                .next()
                .cloned();
            match &target {
                Some(t) => {
                    simulated.migrate_instance(&instance.uuid, &t.uuid)?;
                }
                None => warn!(instance = %instance.uuid, "No host with room, leaving placement to the scheduler"),
            }
            solution.add_action(migration(&instance.uuid, &node, target.as_ref()));
            migrations += 1;
        }

        info!(
            audit_uuid = %ctx.audit_uuid,
            host = %node.hostname,
            migrations,
            "Host maintenance computed"
        );
        solution.set_indicator(indicators::INSTANCE_MIGRATIONS_COUNT, migrations as f64);
        Ok(solution)
    }
}
