//! Action plan execution
//!
//! The applier owns the plan lifecycle: RECOMMENDED plans are launched,
//! handed to the configured workflow engine and given their final state
//! from what happened to their actions.

mod workflow;

#[cfg(test)]
mod tests;

pub use workflow::{topological_order, CancelFlag, DagWorkflow, WorkflowEngine, WorkflowOutcome, DAG};

use crate::action::{ActionContext, ActionRegistry};
use crate::bus::{StatusBus, StatusEvent};
use crate::error::{OptimizerError, Result};
use crate::models::{ActionPlan, ActionPlanState, ActionState};
use crate::observability::{OptimizerMetrics, StructuredLogger};
use crate::planner::PlannerConfig;
use crate::store::{ActionFilter, Store};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplierConfig {
    pub workflow_engine: String,
    /// Workers added on top of the summed parallelization limits
    pub pool_margin: usize,
}

impl Default for ApplierConfig {
    fn default() -> Self {
        Self {
            workflow_engine: DAG.to_string(),
            pool_margin: 2,
        }
    }
}

/// Launches, runs and cancels action plans
#[derive(Clone)]
pub struct Applier {
    store: Arc<dyn Store>,
    engine: Arc<dyn WorkflowEngine>,
    bus: StatusBus,
    logger: StructuredLogger,
    metrics: OptimizerMetrics,
    running: Arc<DashMap<Uuid, CancelFlag>>,
}

impl Applier {
    pub fn new(store: Arc<dyn Store>, engine: Arc<dyn WorkflowEngine>, bus: StatusBus) -> Self {
        Self {
            store,
            engine,
            bus,
            logger: StructuredLogger::new("applier"),
            metrics: OptimizerMetrics::new(),
            running: Arc::new(DashMap::new()),
        }
    }

    pub fn builder() -> ApplierBuilder {
        ApplierBuilder::default()
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Move a plan to `next` unless another writer moved it first
    fn transition_plan(&self, uuid: Uuid, next: ActionPlanState, reason: Option<String>) -> Result<ActionPlan> {
        let mut plan = self.store.get_action_plan(uuid)?;
        let from = plan.transition(next)?;
        if reason.is_some() {
            plan.status_message = reason.clone();
        }
        self.store.transition_action_plan(&plan, from)?;
        self.bus.publish(StatusEvent::plan(uuid, from, next, reason));
        Ok(plan)
    }

    /// Check the plan can start and move it to PENDING
    fn accept(&self, uuid: Uuid) -> Result<ActionPlan> {
        let plan = self.store.get_action_plan(uuid)?;
        if plan.state != ActionPlanState::Recommended {
            return Err(OptimizerError::conflict(format!(
                "action plan {} is {}, only RECOMMENDED plans can be launched",
                uuid,
                plan.state.as_str()
            )));
        }
        let plan = self.transition_plan(uuid, ActionPlanState::Pending, None)?;
        self.running.insert(uuid, CancelFlag::new());
        Ok(plan)
    }

    /// Start a plan in the background, returning it in PENDING
    pub fn launch_action_plan(&self, uuid: Uuid) -> Result<ActionPlan> {
        let plan = self.accept(uuid)?;
        let applier = self.clone();
        tokio::spawn(async move {
            if let Err(e) = applier.run(uuid).await {
                error!(action_plan = %uuid, error = %e, "Action plan run failed");
            }
        });
        Ok(plan)
    }

    /// Start a plan and wait for its final state
    pub async fn apply_action_plan(&self, uuid: Uuid) -> Result<ActionPlan> {
        self.accept(uuid)?;
        self.run(uuid).await
    }

    /// Drive an accepted plan to a terminal state
    async fn run(&self, uuid: Uuid) -> Result<ActionPlan> {
        let cancel = self
            .running
            .entry(uuid)
            .or_insert_with(CancelFlag::new)
            .clone();
        let result = self.run_accepted(uuid, cancel).await;
        self.running.remove(&uuid);
        result
    }

    async fn run_accepted(&self, uuid: Uuid, cancel: CancelFlag) -> Result<ActionPlan> {
        let plan = self.store.get_action_plan(uuid)?;
        if plan.state != ActionPlanState::Pending {
            // Cancelled before it got going.
            info!(action_plan = %uuid, state = plan.state.as_str(), "Action plan no longer pending");
            return Ok(plan);
        }
        self.transition_plan(uuid, ActionPlanState::Ongoing, None)?;

        let start = Instant::now();
        let actions = self.store.list_actions(&ActionFilter::for_plan(uuid))?;
        self.logger.log_plan_launched(uuid, actions.len());
        let outcome = self.engine.execute(uuid, actions, cancel).await;

        let current = self.store.get_action_plan(uuid)?.state;
        let (next, reason) = match outcome {
            Err(e) => {
                error!(action_plan = %uuid, error = %e, "Workflow engine error");
                (ActionPlanState::Failed, Some(e.to_string()))
            }
            Ok(o) if o.failure.is_some() => (ActionPlanState::Failed, o.failure),
            Ok(_) if current == ActionPlanState::Cancelling => (ActionPlanState::Cancelled, None),
            Ok(o) if o.all_succeeded() => (ActionPlanState::Succeeded, None),
            Ok(o) => (
                ActionPlanState::Failed,
                Some(format!("{} of {} actions did not succeed", o.failed + o.cancelled, o.succeeded + o.failed + o.cancelled)),
            ),
        };
        let plan = self.transition_plan(uuid, next, reason)?;
        self.metrics.inc_action_plan(next.as_str());
        self.logger
            .log_plan_finished(uuid, next.as_str(), start.elapsed().as_millis() as u64);
        Ok(plan)
    }

    /// Cancel a plan
    ///
    /// A plan that has not started is cancelled outright together with its
    /// actions. A running plan stops scheduling, lets in-flight actions
    /// finish and ends CANCELLED.
    pub fn cancel_action_plan(&self, uuid: Uuid) -> Result<ActionPlan> {
        let plan = self.store.get_action_plan(uuid)?;
        match plan.state {
            ActionPlanState::Recommended | ActionPlanState::Pending => {
                let plan = self.transition_plan(uuid, ActionPlanState::Cancelled, None)?;
                self.cancel_pending_actions(uuid)?;
                self.metrics.inc_action_plan(ActionPlanState::Cancelled.as_str());
                info!(action_plan = %uuid, "Action plan cancelled before start");
                Ok(plan)
            }
            ActionPlanState::Ongoing => {
                let plan = self.transition_plan(uuid, ActionPlanState::Cancelling, None)?;
                match self.running.get(&uuid) {
                    Some(flag) => flag.cancel(),
                    None => warn!(action_plan = %uuid, "Ongoing plan is not running in this process"),
                }
                info!(action_plan = %uuid, "Action plan cancellation requested");
                Ok(plan)
            }
            ActionPlanState::Cancelling => Ok(plan),
            state => Err(OptimizerError::conflict(format!(
                "action plan {} is already {}",
                uuid,
                state.as_str()
            ))),
        }
    }

    fn cancel_pending_actions(&self, uuid: Uuid) -> Result<()> {
        for mut action in self.store.list_actions(&ActionFilter::for_plan(uuid))? {
            if action.state != ActionState::Pending {
                continue;
            }
            let from = action.transition(ActionState::Cancelled)?;
            self.store.update_action(&action)?;
            self.bus
                .publish(StatusEvent::action(uuid, action.uuid, from, ActionState::Cancelled, None));
        }
        Ok(())
    }

    /// Plans currently executing in this process
    pub fn running_plans(&self) -> Vec<Uuid> {
        self.running.iter().map(|e| *e.key()).collect()
    }
}

/// Builder for an [`Applier`] using one of the bundled workflow engines
#[derive(Default)]
pub struct ApplierBuilder {
    store: Option<Arc<dyn Store>>,
    registry: Option<ActionRegistry>,
    context: Option<ActionContext>,
    bus: Option<StatusBus>,
    config: ApplierConfig,
    planner: PlannerConfig,
    logger: Option<StructuredLogger>,
}

impl ApplierBuilder {
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(mut self, registry: ActionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn context(mut self, context: ActionContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn bus(mut self, bus: StatusBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn config(mut self, config: ApplierConfig) -> Self {
        self.config = config;
        self
    }

    /// Parallelization limits used to size the worker pool
    pub fn planner_config(mut self, planner: PlannerConfig) -> Self {
        self.planner = planner;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> anyhow::Result<Applier> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("Store is required"))?;
        let context = self
            .context
            .ok_or_else(|| anyhow::anyhow!("Action context is required"))?;
        let registry = self.registry.unwrap_or_else(ActionRegistry::builtin);
        let bus = self.bus.unwrap_or_default();
        let logger = self
            .logger
            .unwrap_or_else(|| StructuredLogger::new("applier"));
        let pool_size = self.planner.max_parallelism() + self.config.pool_margin;

        let engine: Arc<dyn WorkflowEngine> = match self.config.workflow_engine.as_str() {
            DAG => Arc::new(
                DagWorkflow::new(store.clone(), registry, context, bus.clone(), pool_size)
                    .with_logger(logger.clone()),
            ),
            other => anyhow::bail!("Unknown workflow engine '{}'", other),
        };
        info!(engine = engine.name(), pool_size, "Applier ready");
        Ok(Applier::new(store, engine, bus).with_logger(logger))
    }
}
