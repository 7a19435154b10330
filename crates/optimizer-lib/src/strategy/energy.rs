//! Saving energy
//!
//! Keeps a pool of empty hypervisors powered on, sized from the number of
//! busy ones, and powers the remaining empty machines off. Only machines the
//! baremetal service maps to a hypervisor are considered.

use super::{Strategy, StrategyContext};
use crate::action::CHANGE_NODE_POWER_STATE;
use crate::cdm::{Domain, IronicNode, PowerState};
use crate::error::Result;
use crate::goal::{indicators, SAVING_ENERGY};
use crate::schema::{get_i64, Field, FieldType, ParamSchema};
use crate::solution::{ActionDescriptor, Solution};
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

pub struct SavingEnergy;

fn power(node: &IronicNode, state: PowerState) -> ActionDescriptor {
    ActionDescriptor::new(CHANGE_NODE_POWER_STATE, node.uuid.as_str()).param("state", state.as_str())
}

#[async_trait]
impl Strategy for SavingEnergy {
    fn name(&self) -> &'static str {
        "saving_energy"
    }

    fn display_name(&self) -> &'static str {
        "Saving Energy Strategy"
    }

    fn goal(&self) -> &'static str {
        SAVING_ENERGY
    }

    fn domains(&self) -> &'static [Domain] {
        &[Domain::Compute, Domain::Baremetal]
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
            .field(
                Field::new("free_used_percent", FieldType::Number { min: Some(0.0), max: None })
                    .default_value(json!(10.0))
                    .describe("Free hosts to keep on, as a percentage of used hosts"),
            )
            .field(
                Field::new("min_free_hosts_num", FieldType::Integer { min: Some(0), max: None })
                    .default_value(json!(1))
                    .describe("Minimum number of free hosts to keep on"),
            )
    }

    async fn execute(&self, ctx: &StrategyContext) -> Result<Solution> {
        let compute = ctx.snapshot.compute()?;
        let baremetal = ctx.snapshot.baremetal()?;
        let percent = ctx.f64_param("free_used_percent", 10.0);
        let minimum = get_i64(&ctx.parameters, "min_free_hosts_num").unwrap_or(1).max(0) as usize;

        let mut used = 0usize;
        let mut free_on = Vec::new();
        let mut off = Vec::new();
        for machine in baremetal.nodes() {
            if machine.watcher_exclude || machine.maintenance {
                continue;
            }
            let Some(hypervisor) = machine.hostname.as_deref().and_then(|h| compute.get_node_by_hostname(h)) else {
                continue;
            };
            let empty = compute.instances_on(&hypervisor.uuid).is_empty();
            match machine.power_state {
                PowerState::On if !empty => used += 1,
                PowerState::On if hypervisor.is_schedulable() => free_on.push(machine.clone()),
                PowerState::Off => off.push(machine.clone()),
                _ => {}
            }
        }

        let wanted = minimum.max((used as f64 * percent / 100.0).ceil() as usize);
        let mut solution = Solution::new();
        let (mut powered_off, mut powered_on) = (0usize, 0usize);
        if free_on.len() > wanted {
            for machine in free_on.iter().skip(wanted) {
                solution.add_action(power(machine, PowerState::Off));
                powered_off += 1;
            }
        } else {
            for machine in off.iter().take(wanted - free_on.len()) {
                solution.add_action(power(machine, PowerState::On));
                powered_on += 1;
            }
        }

        info!(
            audit_uuid = %ctx.audit_uuid,
            used,
            free = free_on.len(),
            wanted,
            powered_off,
            powered_on,
            "Energy saving computed"
        );
        solution.set_indicator(indicators::POWERED_OFF_NODES_COUNT, powered_off as f64);
        solution.set_indicator(indicators::POWERED_ON_NODES_COUNT, powered_on as f64);
        Ok(solution)
    }
}
