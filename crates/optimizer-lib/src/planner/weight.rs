use super::{Planner, PlannerConfig};
use crate::action::ActionRegistry;
use crate::error::{ErrorKind, Result};
use crate::goal::Goal;
use crate::models::{Action, ActionPlan, ActionPlanState, Audit, EfficacyIndicator};
use crate::solution::Solution;
use crate::store::{ActionPlanFilter, Store};
use chrono::Utc;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Weight and parallelization based planner
pub struct WeightPlanner {
    store: Arc<dyn Store>,
    actions: ActionRegistry,
    config: PlannerConfig,
}

impl WeightPlanner {
    pub fn new(store: Arc<dyn Store>, actions: ActionRegistry, config: PlannerConfig) -> Self {
        Self {
            store,
            actions,
            config,
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Validate every descriptor and wire the DAG
    ///
    /// Heavier buckets come first. Inside a bucket every type is chunked on
    /// its own; the first chunk hangs off the previous bucket's tail and each
    /// later chunk off the one before it. The tail of a bucket is the union
    /// of the last chunk of each of its types.
    pub fn build_actions(&self, plan_uuid: Uuid, solution: &Solution) -> Result<Vec<Action>> {
        let mut buckets: BTreeMap<Reverse<i64>, BTreeMap<&str, Vec<Action>>> = BTreeMap::new();
        for descriptor in &solution.actions {
            let params = self
                .actions
                .validate(&descriptor.action_type, &descriptor.input_parameters)?;
            let action = Action::new(
                plan_uuid,
                descriptor.action_type.as_str(),
                descriptor.resource_id.as_str(),
                params,
            );
            buckets
                .entry(Reverse(self.config.weight(&descriptor.action_type)))
                .or_default()
                .entry(descriptor.action_type.as_str())
                .or_default()
                .push(action);
        }

        let mut ordered = Vec::with_capacity(solution.len());
        let mut tail: Vec<Uuid> = Vec::new();
        for (Reverse(weight), by_type) in buckets {
            let mut bucket_tail = Vec::new();
            for (action_type, mut actions) in by_type {
                let limit = self.config.parallelization(action_type);
                let mut parents = tail.clone();
                for chunk in actions.chunks_mut(limit) {
                    for action in chunk.iter_mut() {
                        action.parents = parents.clone();
                    }
                    parents = chunk.iter().map(|a| a.uuid).collect();
                }
                debug!(weight, action_type, count = actions.len(), limit, "Bucket planned");
                bucket_tail.extend(parents);
                ordered.extend(actions);
            }
            tail = bucket_tail;
        }
        Ok(ordered)
    }

    fn persist(&self, plan: ActionPlan, actions: Vec<Action>, goal: &Goal, solution: &Solution) -> Result<ActionPlan> {
        let plan = self.store.create_action_plan(plan)?;
        for action in actions {
            self.store.create_action(action)?;
        }
        for (name, value) in &solution.indicators {
            let (description, unit) = goal
                .efficacy
                .spec(name)
                .map(|s| (s.description.to_string(), s.unit.to_string()))
                .unwrap_or_default();
            self.store.create_efficacy_indicator(EfficacyIndicator {
                uuid: Uuid::new_v4(),
                action_plan_uuid: plan.uuid,
                name: name.clone(),
                description,
                unit,
                value: *value,
                created_at: Utc::now(),
                deleted_at: None,
            })?;
        }
        Ok(plan)
    }

    /// Older recommendations of the same audit can no longer be started
    fn supersede_previous(&self, audit_uuid: Uuid, current: Uuid) -> Result<()> {
        let filter = ActionPlanFilter {
            audit_uuid: Some(audit_uuid),
            state: Some(ActionPlanState::Recommended),
            include_deleted: false,
        };
        for mut plan in self.store.list_action_plans(&filter)? {
            if plan.uuid == current {
                continue;
            }
            let from = plan.transition(ActionPlanState::Superseded)?;
            match self.store.transition_action_plan(&plan, from) {
                Ok(()) => {
                    info!(action_plan = %plan.uuid, superseded_by = %current, "Action plan superseded")
                }
                // Launched or cancelled since it was listed.
                Err(e) if e.kind() == ErrorKind::Conflict => {
                    debug!(action_plan = %plan.uuid, error = %e, "Action plan left as is")
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl Planner for WeightPlanner {
    fn name(&self) -> &'static str {
        "weight"
    }

    fn schedule(&self, audit: &Audit, strategy: &str, goal: &Goal, solution: &Solution) -> Result<ActionPlan> {
        let mut plan = ActionPlan::new(audit.uuid, strategy);
        plan.global_efficacy = goal.efficacy.get_global_efficacy_indicator(&solution.indicators);
        let actions = self.build_actions(plan.uuid, solution)?;
        if actions.is_empty() {
            // Nothing to apply: the plan is born complete.
            plan.state = ActionPlanState::Succeeded;
        }

        let plan_uuid = plan.uuid;
        let count = actions.len();
        let plan = match self.persist(plan, actions, goal, solution) {
            Ok(plan) => plan,
            Err(e) => {
                if let Err(cleanup) = self.store.soft_delete_action_plan(plan_uuid) {
                    warn!(action_plan = %plan_uuid, error = %cleanup, "Failed to clean up partial action plan");
                }
                return Err(e);
            }
        };
        self.supersede_previous(audit.uuid, plan.uuid)?;

        info!(
            audit_uuid = %audit.uuid,
            action_plan = %plan.uuid,
            actions = count,
            state = ?plan.state,
            "Action plan created"
        );
        Ok(plan)
    }
}
