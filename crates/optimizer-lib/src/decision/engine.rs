use super::{AuditRequest, DecisionEngineConfig};
use crate::action::ActionRegistry;
use crate::applier::Applier;
use crate::bus::{StatusBus, StatusEvent};
use crate::collector::{CollectorManager, Notification};
use crate::datasource::MetricsClient;
use crate::error::{OptimizerError, Result};
use crate::goal::GoalRegistry;
use crate::models::{ActionPlan, ActionPlanState, Audit, AuditState, AuditType};
use crate::observability::{OptimizerMetrics, StructuredLogger};
use crate::planner::{Planner, PlannerConfig, WeightPlanner};
use crate::pool::TaskPool;
use crate::scoring::ScoringRegistry;
use crate::store::{ActionPlanFilter, Store};
use crate::strategy::{ClusterSnapshot, StrategyContext, StrategyRegistry};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Marks an audit as running until dropped
struct RunGuard {
    running: Arc<DashMap<Uuid, ()>>,
    uuid: Uuid,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.remove(&self.uuid);
    }
}

/// Runs audits and turns their solutions into action plans
#[derive(Clone)]
pub struct DecisionEngine {
    store: Arc<dyn Store>,
    collectors: Arc<CollectorManager>,
    goals: GoalRegistry,
    strategies: StrategyRegistry,
    scoring: ScoringRegistry,
    planner: Arc<dyn Planner>,
    applier: Option<Applier>,
    metrics_client: Option<MetricsClient>,
    bus: StatusBus,
    config: DecisionEngineConfig,
    audit_pool: TaskPool,
    general_pool: TaskPool,
    running: Arc<DashMap<Uuid, ()>>,
    logger: StructuredLogger,
    metrics: OptimizerMetrics,
}

impl DecisionEngine {
    pub fn builder() -> DecisionEngineBuilder {
        DecisionEngineBuilder::default()
    }

    pub fn config(&self) -> &DecisionEngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn collectors(&self) -> &Arc<CollectorManager> {
        &self.collectors
    }

    pub fn goals(&self) -> &GoalRegistry {
        &self.goals
    }

    pub fn strategies(&self) -> &StrategyRegistry {
        &self.strategies
    }

    pub fn scoring(&self) -> &ScoringRegistry {
        &self.scoring
    }

    pub fn bus(&self) -> &StatusBus {
        &self.bus
    }

    pub fn applier(&self) -> Option<&Applier> {
        self.applier.as_ref()
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    /// Validate and persist a new audit
    pub fn create_audit(&self, request: AuditRequest) -> Result<Audit> {
        let template = request
            .audit_template
            .map(|uuid| self.store.get_audit_template(uuid))
            .transpose()?;
        let audit = request.resolve(template.as_ref(), &self.goals, &self.strategies)?;
        let audit = self.store.create_audit(audit)?;
        info!(
            audit_uuid = %audit.uuid,
            goal = %audit.goal,
            audit_type = ?audit.audit_type,
            "Audit created"
        );
        Ok(audit)
    }

    pub fn create_audit_from_template(&self, template: Uuid, mut request: AuditRequest) -> Result<Audit> {
        request.audit_template = Some(template);
        self.create_audit(request)
    }

    pub fn get_audit(&self, uuid: Uuid) -> Result<Audit> {
        self.store.get_audit(uuid)
    }

    pub fn is_running(&self, uuid: Uuid) -> bool {
        self.running.contains_key(&uuid)
    }

    fn claim(&self, uuid: Uuid) -> Result<RunGuard> {
        match self.running.entry(uuid) {
            Entry::Occupied(_) => Err(OptimizerError::conflict(format!(
                "audit {} is already running",
                uuid
            ))),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(RunGuard {
                    running: self.running.clone(),
                    uuid,
                })
            }
        }
    }

    fn ensure_runnable(audit: &Audit) -> Result<()> {
        if audit.state.is_terminal() || audit.state == AuditState::Suspended {
            return Err(OptimizerError::conflict(format!(
                "audit {} is {} and cannot run",
                audit.uuid,
                audit.state.as_str()
            )));
        }
        Ok(())
    }

    /// Queue a run of the audit on the audit pool
    pub fn trigger_audit(&self, uuid: Uuid, request_id: Uuid) -> Result<Audit> {
        let audit = self.store.get_audit(uuid)?;
        Self::ensure_runnable(&audit)?;
        let guard = self.claim(uuid)?;

        let engine = self.clone();
        self.audit_pool.spawn(async move {
            let _guard = guard;
            engine.metrics.audit_worker_started();
            if let Err(e) = engine.run_claimed(uuid, request_id).await {
                debug!(audit_uuid = %uuid, error = %e, "Queued audit run failed");
            }
            engine.metrics.audit_worker_finished();
        });
        debug!(audit_uuid = %uuid, request_id = %request_id, "Audit queued");
        Ok(audit)
    }

    /// Run the audit on the calling task and return the plan it produced
    pub async fn run_audit(&self, uuid: Uuid, request_id: Uuid) -> Result<ActionPlan> {
        let _guard = self.claim(uuid)?;
        self.run_claimed(uuid, request_id).await
    }

    async fn run_claimed(&self, uuid: Uuid, request_id: Uuid) -> Result<ActionPlan> {
        let mut audit = self.store.get_audit(uuid)?;
        Self::ensure_runnable(&audit)?;
        audit.transition(AuditState::Ongoing)?;
        audit.status_message = None;
        self.store.update_audit(&audit)?;
        self.bus.publish(StatusEvent::StrategyStarted {
            audit_uuid: uuid,
            request_id,
        });

        let start = Instant::now();
        match self.execute(&audit).await {
            Ok((plan, actions)) => {
                let plan = self.finish(uuid, plan)?;
                self.bus.publish(StatusEvent::StrategySucceeded {
                    audit_uuid: uuid,
                    request_id,
                    action_plan_uuid: plan.uuid,
                });
                self.logger
                    .log_audit_succeeded(uuid, plan.uuid, actions, start.elapsed().as_millis() as u64);
                self.metrics.inc_audit("succeeded");
                if audit.auto_trigger {
                    self.launch(&plan);
                }
                Ok(plan)
            }
            Err(e) => {
                self.fail(uuid, &e);
                self.bus.publish(StatusEvent::strategy_failed(uuid, request_id, &e));
                self.logger
                    .log_audit_failed(uuid, &e.kind().to_string(), &e.to_string());
                self.metrics.inc_audit("failed");
                Err(e)
            }
        }
    }

    /// Select, run and plan; returns the plan and its action count
    async fn execute(&self, audit: &Audit) -> Result<(ActionPlan, usize)> {
        let goal = self.goals.get(&audit.goal)?;
        let strategy = self
            .strategies
            .select(&audit.goal, audit.strategy.as_deref())?;
        let parameters = strategy.schema().validate(&audit.parameters)?;
        self.logger
            .log_audit_started(audit.uuid, goal.name, strategy.name());

        let snapshot = ClusterSnapshot::load(&self.collectors, strategy.domains(), &audit.scope).await?;
        let mut ctx = StrategyContext::new(audit.uuid, parameters, snapshot).with_scoring(self.scoring.clone());
        if let Some(client) = &self.metrics_client {
            ctx = ctx.with_metrics(client.clone());
        }

        let start = Instant::now();
        let limit = self.config.strategy_timeout();
        let solution = timeout(limit, strategy.execute(&ctx))
            .await
            .map_err(|_| {
                OptimizerError::internal(format!(
                    "strategy '{}' did not finish within {}s",
                    strategy.name(),
                    limit.as_secs()
                ))
            })??;
        self.metrics
            .observe_strategy_latency(start.elapsed().as_secs_f64());

        goal.efficacy.validate(&solution.indicators)?;
        let plan = self
            .planner
            .schedule(audit, strategy.name(), &goal, &solution)?;
        Ok((plan, solution.len()))
    }

    /// Record a successful run on the audit
    fn finish(&self, uuid: Uuid, plan: ActionPlan) -> Result<ActionPlan> {
        let mut audit = self.store.get_audit(uuid)?;
        if audit.state == AuditState::Cancelled {
            // Cancelled while the strategy ran; the plan must not be launched.
            if plan.state == ActionPlanState::Recommended {
                self.cancel_plan(plan.uuid)?;
            }
            return self.store.get_action_plan(plan.uuid);
        }

        let now = Utc::now();
        match audit.audit_type {
            AuditType::Continuous if audit.end_time.map_or(true, |end| end > now) => {
                let every = audit
                    .interval
                    .unwrap_or(self.config.continuous_audit_interval_secs);
                audit.next_run_time = Some(now + chrono::Duration::seconds(every as i64));
            }
            _ => {
                audit.transition(AuditState::Succeeded)?;
                audit.next_run_time = None;
            }
        }
        audit.updated_at = now;
        self.store.update_audit(&audit)?;
        Ok(plan)
    }

    fn fail(&self, uuid: Uuid, err: &OptimizerError) {
        let mut audit = match self.store.get_audit(uuid) {
            Ok(audit) => audit,
            Err(e) => {
                error!(audit_uuid = %uuid, error = %e, "Cannot load audit to record failure");
                return;
            }
        };
        if audit.state.is_terminal() {
            return;
        }
        if let Err(e) = audit.transition(AuditState::Failed) {
            warn!(audit_uuid = %uuid, error = %e, "Cannot mark audit failed");
            return;
        }
        audit.status_message = Some(err.to_string());
        audit.next_run_time = None;
        if let Err(e) = self.store.update_audit(&audit) {
            error!(audit_uuid = %uuid, error = %e, "Failed to persist audit failure");
        }
    }

    fn launch(&self, plan: &ActionPlan) {
        if plan.state != ActionPlanState::Recommended {
            return;
        }
        match &self.applier {
            Some(applier) => match applier.launch_action_plan(plan.uuid) {
                Ok(_) => info!(action_plan = %plan.uuid, "Action plan auto-triggered"),
                Err(e) => warn!(action_plan = %plan.uuid, error = %e, "Auto-trigger failed"),
            },
            None => warn!(action_plan = %plan.uuid, "auto_trigger set but no applier is configured"),
        }
    }

    fn cancel_plan(&self, uuid: Uuid) -> Result<()> {
        if let Some(applier) = &self.applier {
            return applier.cancel_action_plan(uuid).map(|_| ());
        }
        let mut plan = self.store.get_action_plan(uuid)?;
        let from = plan.transition(ActionPlanState::Cancelled)?;
        self.store.transition_action_plan(&plan, from)?;
        self.bus
            .publish(StatusEvent::plan(uuid, from, ActionPlanState::Cancelled, None));
        Ok(())
    }

    /// Cancel an audit and the plans it left RECOMMENDED
    ///
    /// A run in progress finishes, but its plan is cancelled as soon as it
    /// is stored.
    pub fn cancel_audit(&self, uuid: Uuid) -> Result<Audit> {
        let mut audit = self.store.get_audit(uuid)?;
        audit.transition(AuditState::Cancelled)?;
        audit.next_run_time = None;
        self.store.update_audit(&audit)?;

        let filter = ActionPlanFilter {
            audit_uuid: Some(uuid),
            state: Some(ActionPlanState::Recommended),
            ..Default::default()
        };
        for plan in self.store.list_action_plans(&filter)? {
            if let Err(e) = self.cancel_plan(plan.uuid) {
                warn!(audit_uuid = %uuid, action_plan = %plan.uuid, error = %e, "Failed to cancel plan of cancelled audit");
            }
        }
        info!(audit_uuid = %uuid, "Audit cancelled");
        Ok(audit)
    }

    /// Stop scheduling a CONTINUOUS audit until resumed
    pub fn suspend_audit(&self, uuid: Uuid) -> Result<Audit> {
        let mut audit = self.store.get_audit(uuid)?;
        if audit.audit_type != AuditType::Continuous {
            return Err(OptimizerError::invalid(format!(
                "only CONTINUOUS audits can be suspended, {} is {:?}",
                uuid, audit.audit_type
            )));
        }
        audit.transition(AuditState::Suspended)?;
        self.store.update_audit(&audit)?;
        info!(audit_uuid = %uuid, "Audit suspended");
        Ok(audit)
    }

    pub fn resume_audit(&self, uuid: Uuid) -> Result<Audit> {
        let mut audit = self.store.get_audit(uuid)?;
        if audit.state != AuditState::Suspended {
            return Err(OptimizerError::conflict(format!(
                "audit {} is {}, not SUSPENDED",
                uuid,
                audit.state.as_str()
            )));
        }
        audit.transition(AuditState::Ongoing)?;
        audit.next_run_time = None;
        self.store.update_audit(&audit)?;
        info!(audit_uuid = %uuid, "Audit resumed");
        Ok(audit)
    }

    /// Apply a change event on the general pool
    pub fn notify(&self, notification: Notification) -> JoinHandle<Result<bool>> {
        let collectors = self.collectors.clone();
        self.general_pool
            .spawn(async move { collectors.dispatch(&notification).await })
    }
}

/// Builder for a [`DecisionEngine`]
#[derive(Default)]
pub struct DecisionEngineBuilder {
    store: Option<Arc<dyn Store>>,
    collectors: Option<Arc<CollectorManager>>,
    goals: Option<GoalRegistry>,
    strategies: Option<StrategyRegistry>,
    scoring: Option<ScoringRegistry>,
    planner: Option<Arc<dyn Planner>>,
    planner_config: PlannerConfig,
    applier: Option<Applier>,
    metrics_client: Option<MetricsClient>,
    bus: Option<StatusBus>,
    config: DecisionEngineConfig,
    logger: Option<StructuredLogger>,
}

impl DecisionEngineBuilder {
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn collectors(mut self, collectors: Arc<CollectorManager>) -> Self {
        self.collectors = Some(collectors);
        self
    }

    pub fn goals(mut self, goals: GoalRegistry) -> Self {
        self.goals = Some(goals);
        self
    }

    pub fn strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = Some(strategies);
        self
    }

    pub fn scoring(mut self, scoring: ScoringRegistry) -> Self {
        self.scoring = Some(scoring);
        self
    }

    /// Use a custom planner instead of the weight planner
    pub fn planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn planner_config(mut self, config: PlannerConfig) -> Self {
        self.planner_config = config;
        self
    }

    /// Applier used for auto-triggered plans and plan cancellation
    pub fn applier(mut self, applier: Applier) -> Self {
        self.applier = Some(applier);
        self
    }

    pub fn metrics_client(mut self, client: MetricsClient) -> Self {
        self.metrics_client = Some(client);
        self
    }

    pub fn bus(mut self, bus: StatusBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn config(mut self, config: DecisionEngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> anyhow::Result<DecisionEngine> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("Store is required"))?;
        let collectors = self
            .collectors
            .ok_or_else(|| anyhow::anyhow!("Collector manager is required"))?;
        let planner = match self.planner {
            Some(planner) => planner,
            None => Arc::new(WeightPlanner::new(
                store.clone(),
                ActionRegistry::builtin(),
                self.planner_config,
            )),
        };

        let logger = self
            .logger
            .unwrap_or_else(|| StructuredLogger::new("decision-engine"));
        let config = self.config;
        info!(
            planner = planner.name(),
            audit_workers = config.max_audit_workers,
            general_workers = config.max_general_workers,
            "Decision engine ready"
        );

        Ok(DecisionEngine {
            store,
            collectors,
            goals: self.goals.unwrap_or_else(GoalRegistry::builtin),
            strategies: self.strategies.unwrap_or_else(StrategyRegistry::builtin),
            scoring: self.scoring.unwrap_or_else(ScoringRegistry::builtin),
            planner,
            applier: self.applier,
            metrics_client: self.metrics_client,
            bus: self.bus.unwrap_or_default(),
            audit_pool: TaskPool::new("audit", config.max_audit_workers),
            general_pool: TaskPool::new("general", config.max_general_workers),
            config,
            running: Arc::new(DashMap::new()),
            logger,
            metrics: OptimizerMetrics::new(),
        })
    }
}
