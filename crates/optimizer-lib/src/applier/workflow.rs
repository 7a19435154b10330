//! DAG workflow engine
//!
//! Walks the plan's parent edges: an action becomes runnable once every
//! parent has succeeded. Runnable actions go to a bounded pool. The first
//! failure stops scheduling; once the pool drains, everything still pending
//! is cancelled and the succeeded actions are reverted newest first.

use crate::action::{ActionContext, ActionHandler, ActionRegistry};
use crate::bus::{StatusBus, StatusEvent};
use crate::error::{OptimizerError, Result};
use crate::models::{Action, ActionState};
use crate::observability::{OptimizerMetrics, StructuredLogger};
use crate::pool::WorkerPool;
use crate::store::Store;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DAG: &str = "dag";

/// Cooperative cancellation checked between action executions
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened to the actions of one plan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowOutcome {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub reverted: usize,
    pub revert_errors: usize,
    /// Scheduling stopped because of a cancel request
    pub cancelled_by_request: bool,
    /// Reason of the first failure
    pub failure: Option<String>,
}

impl WorkflowOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.cancelled == 0 && self.failure.is_none()
    }
}

/// Executes the actions of a plan
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, plan_uuid: Uuid, actions: Vec<Action>, cancel: CancelFlag) -> Result<WorkflowOutcome>;
}

type ActionTask = Pin<Box<dyn Future<Output = Finished> + Send>>;

/// Output of one worker task
struct Finished {
    uuid: Uuid,
    handler: Box<dyn ActionHandler>,
    result: Result<bool>,
    elapsed_ms: u64,
}

/// Parents first, keeping the input order among independent actions
///
/// Fails with `internal` on an unknown parent or a cycle.
pub fn topological_order(actions: &[Action]) -> Result<Vec<Uuid>> {
    let ids: HashSet<Uuid> = actions.iter().map(|a| a.uuid).collect();
    let mut missing: HashMap<Uuid, usize> = HashMap::new();
    let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for action in actions {
        for parent in &action.parents {
            if !ids.contains(parent) {
                return Err(OptimizerError::internal(format!(
                    "action {} depends on {} which is not part of the plan",
                    action.uuid, parent
                )));
            }
            children.entry(*parent).or_default().push(action.uuid);
        }
        missing.insert(action.uuid, action.parents.len());
    }

    let mut queue: VecDeque<Uuid> = actions
        .iter()
        .filter(|a| a.parents.is_empty())
        .map(|a| a.uuid)
        .collect();
    let mut order = Vec::with_capacity(actions.len());
    while let Some(id) = queue.pop_front() {
        order.push(id);
        for child in children.get(&id).into_iter().flatten() {
            if let Some(left) = missing.get_mut(child) {
                *left -= 1;
                if *left == 0 {
                    queue.push_back(*child);
                }
            }
        }
    }
    if order.len() != actions.len() {
        return Err(OptimizerError::internal("action plan contains a cycle"));
    }
    Ok(order)
}

/// The `dag` workflow engine
pub struct DagWorkflow {
    store: Arc<dyn Store>,
    registry: ActionRegistry,
    context: ActionContext,
    bus: StatusBus,
    logger: StructuredLogger,
    metrics: OptimizerMetrics,
    pool_size: usize,
}

impl DagWorkflow {
    pub fn new(
        store: Arc<dyn Store>,
        registry: ActionRegistry,
        context: ActionContext,
        bus: StatusBus,
        pool_size: usize,
    ) -> Self {
        Self {
            store,
            registry,
            context,
            bus,
            logger: StructuredLogger::new("applier"),
            metrics: OptimizerMetrics::new(),
            pool_size: pool_size.max(1),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    fn cancel_pending(&self, order: &[Uuid], by_id: &mut HashMap<Uuid, Action>) {
        for id in order {
            if let Some(action) = by_id.get_mut(id) {
                if action.state == ActionState::Pending {
                    self.record(action, ActionState::Cancelled, None);
                }
            }
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Persist and announce one action state change
    fn record(&self, action: &mut Action, to: ActionState, reason: Option<String>) {
        let from = match action.transition(to) {
            Ok(from) => from,
            Err(e) => {
                warn!(action = %action.uuid, error = %e, "Skipping illegal action transition");
                return;
            }
        };
        action.status_message = reason.clone();
        if let Err(e) = self.store.update_action(action) {
            error!(action = %action.uuid, error = %e, "Failed to persist action state");
        }
        self.logger.log_action_transition(
            action.action_plan_uuid,
            action.uuid,
            &action.action_type,
            from.as_str(),
            to.as_str(),
        );
        if to.is_terminal() {
            self.metrics.inc_action(to.as_str());
        }
        self.bus
            .publish(StatusEvent::action(action.action_plan_uuid, action.uuid, from, to, reason));
    }

    /// Build the handler and mark the action ONGOING; the returned task runs it
    fn start(&self, action: &mut Action) -> Result<ActionTask> {
        let mut handler =
            self.registry
                .build(&action.action_type, &action.resource_id, &action.input_parameters, &self.context)?;
        self.record(action, ActionState::Ongoing, None);

        let uuid = action.uuid;
        Ok(Box::pin(async move {
            let start = Instant::now();
            let result = async {
                handler.pre_condition().await?;
                let done = handler.execute().await?;
                if done {
                    handler.post_condition().await?;
                }
                Ok::<bool, OptimizerError>(done)
            }
            .await;
            Finished {
                uuid,
                handler,
                result,
                elapsed_ms: start.elapsed().as_millis() as u64,
            }
        }))
    }

    async fn rollback(&self, plan_uuid: Uuid, completed: &mut [(Uuid, Box<dyn ActionHandler>)]) -> (usize, usize) {
        let (mut reverted, mut errors) = (0usize, 0usize);
        for (uuid, handler) in completed.iter_mut().rev() {
            match handler.revert().await {
                Ok(()) => {
                    reverted += 1;
                    debug!(action_plan = %plan_uuid, action = %uuid, "Action reverted");
                }
                Err(e) => {
                    errors += 1;
                    warn!(action_plan = %plan_uuid, action = %uuid, error = %e, "Revert failed, continuing rollback");
                }
            }
        }
        self.metrics.inc_rollbacks();
        self.logger.log_rollback(plan_uuid, reverted, errors);
        (reverted, errors)
    }
}

#[async_trait]
impl WorkflowEngine for DagWorkflow {
    fn name(&self) -> &'static str {
        DAG
    }

    async fn execute(&self, plan_uuid: Uuid, actions: Vec<Action>, cancel: CancelFlag) -> Result<WorkflowOutcome> {
        let order = topological_order(&actions)?;
        let done: HashSet<Uuid> = actions
            .iter()
            .filter(|a| a.state == ActionState::Succeeded)
            .map(|a| a.uuid)
            .collect();
        let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        let mut waiting: HashMap<Uuid, usize> = HashMap::new();
        for action in &actions {
            for parent in &action.parents {
                children.entry(*parent).or_default().push(action.uuid);
            }
            let unmet = action.parents.iter().filter(|p| !done.contains(p)).count();
            waiting.insert(action.uuid, unmet);
        }
        let mut by_id: HashMap<Uuid, Action> = actions.into_iter().map(|a| (a.uuid, a)).collect();

        let mut ready: VecDeque<Uuid> = order
            .iter()
            .filter(|id| waiting.get(id) == Some(&0))
            .filter(|id| by_id.get(id).map_or(false, |a| a.state == ActionState::Pending))
            .copied()
            .collect();

        let mut pool: WorkerPool<Finished> = WorkerPool::new("applier", self.pool_size);
        let mut in_flight: HashSet<Uuid> = HashSet::new();
        let mut completed: Vec<(Uuid, Box<dyn ActionHandler>)> = Vec::new();
        let mut outcome = WorkflowOutcome::default();
        let mut pending_cancelled = false;

        info!(action_plan = %plan_uuid, actions = by_id.len(), pool = self.pool_size, "Running action plan");

        loop {
            if outcome.failure.is_none() && !cancel.is_cancelled() {
                while pool.has_capacity() {
                    let Some(id) = ready.pop_front() else {
                        break;
                    };
                    let Some(action) = by_id.get_mut(&id) else {
                        continue;
                    };
                    match self.start(action) {
                        Ok(task) => {
                            in_flight.insert(id);
                            pool.spawn(task);
                        }
                        Err(e) => {
                            let reason = e.to_string();
                            self.record(action, ActionState::Failed, Some(reason.clone()));
                            outcome.failure = Some(reason);
                            break;
                        }
                    }
                }
            } else if cancel.is_cancelled() && outcome.failure.is_none() {
                outcome.cancelled_by_request = true;
            }

            // Not-yet-started actions are cancelled before waiting on in-flight ones.
            if !pending_cancelled && (outcome.failure.is_some() || cancel.is_cancelled()) {
                self.cancel_pending(&order, &mut by_id);
                pending_cancelled = true;
            }

            let Some(joined) = pool.join_next().await else {
                break;
            };
            let Ok(finished) = joined else {
                outcome
                    .failure
                    .get_or_insert_with(|| "action worker panicked".to_string());
                continue;
            };
            in_flight.remove(&finished.uuid);
            let Some(action) = by_id.get_mut(&finished.uuid) else {
                continue;
            };

            match finished.result {
                Ok(true) => {
                    debug!(action = %finished.uuid, elapsed_ms = finished.elapsed_ms, "Action succeeded");
                    self.record(action, ActionState::Succeeded, None);
                    completed.push((finished.uuid, finished.handler));
                    for child in children.get(&finished.uuid).into_iter().flatten() {
                        if let Some(left) = waiting.get_mut(child) {
                            *left = left.saturating_sub(1);
                            if *left == 0 {
                                ready.push_back(*child);
                            }
                        }
                    }
                }
                Ok(false) => {
                    let reason = format!("action {} ({}) did not succeed", finished.uuid, action.action_type);
                    self.record(action, ActionState::Failed, Some(reason.clone()));
                    outcome.failure.get_or_insert(reason);
                }
                Err(e) => {
                    let reason = format!("action {} ({}) failed: {}", finished.uuid, action.action_type, e);
                    self.record(action, ActionState::Failed, Some(e.to_string()));
                    outcome.failure.get_or_insert(reason);
                }
            }
        }

        // Workers that panicked never reported back.
        for id in in_flight {
            if let Some(action) = by_id.get_mut(&id) {
                self.record(action, ActionState::Failed, Some("action worker panicked".to_string()));
            }
        }
        if cancel.is_cancelled() && outcome.failure.is_none() {
            outcome.cancelled_by_request = true;
        }

        self.cancel_pending(&order, &mut by_id);
        for action in by_id.values() {
            match action.state {
                ActionState::Succeeded => outcome.succeeded += 1,
                ActionState::Failed => outcome.failed += 1,
                ActionState::Cancelled => outcome.cancelled += 1,
                _ => {}
            }
        }

        if outcome.failure.is_some() && !completed.is_empty() {
            let (reverted, errors) = self.rollback(plan_uuid, &mut completed).await;
            outcome.reverted = reverted;
            outcome.revert_errors = errors;
        }
        Ok(outcome)
    }
}
