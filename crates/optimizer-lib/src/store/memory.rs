//! In-memory store backed by concurrent maps

use super::{ActionFilter, ActionPlanFilter, AuditFilter, Store};
use crate::error::{OptimizerError, Result};
use crate::models::{
    Action, ActionPlan, ActionPlanState, Audit, AuditTemplate, EfficacyIndicator, GoalRecord, ScoringEngineRecord,
    ServiceRecord, StrategyRecord,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

const NO_FAULT: usize = usize::MAX;

/// Dashmap-backed [`Store`] implementation
///
/// Rows are cloned in and out; callers never hold references into the maps.
pub struct InMemoryStore {
    goals: DashMap<Uuid, GoalRecord>,
    strategies: DashMap<Uuid, StrategyRecord>,
    scoring_engines: DashMap<Uuid, ScoringEngineRecord>,
    services: DashMap<Uuid, ServiceRecord>,
    audit_templates: DashMap<Uuid, AuditTemplate>,
    audits: DashMap<Uuid, Audit>,
    action_plans: DashMap<Uuid, ActionPlan>,
    actions: DashMap<Uuid, Action>,
    /// action plan uuid -> action uuids in creation order
    plan_actions: DashMap<Uuid, Vec<Uuid>>,
    indicators: DashMap<Uuid, EfficacyIndicator>,
    /// Serializes unique-constraint checks with their inserts
    write_lock: Mutex<()>,
    /// Fault injection: number of further action writes allowed to succeed
    action_writes_left: AtomicUsize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            goals: DashMap::new(),
            strategies: DashMap::new(),
            scoring_engines: DashMap::new(),
            services: DashMap::new(),
            audit_templates: DashMap::new(),
            audits: DashMap::new(),
            action_plans: DashMap::new(),
            actions: DashMap::new(),
            plan_actions: DashMap::new(),
            indicators: DashMap::new(),
            write_lock: Mutex::new(()),
            action_writes_left: AtomicUsize::new(NO_FAULT),
        }
    }

    /// Make action creation fail once `n` more actions have been written
    pub fn fail_action_writes_after(&self, n: usize) {
        self.action_writes_left.store(n, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|e| OptimizerError::internal(format!("store lock poisoned: {}", e)))
    }

    fn take_action_write(&self) -> Result<()> {
        let left = self.action_writes_left.load(Ordering::SeqCst);
        if left == NO_FAULT {
            return Ok(());
        }
        if left == 0 {
            return Err(OptimizerError::internal("injected action write failure"));
        }
        self.action_writes_left.store(left - 1, Ordering::SeqCst);
        Ok(())
    }
}

fn sorted_by_creation<T, F>(mut rows: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> (DateTime<Utc>, Uuid),
{
    rows.sort_by_key(|r| key(r));
    rows
}

impl Store for InMemoryStore {
    fn create_goal(&self, goal: GoalRecord) -> Result<GoalRecord> {
        let _guard = self.lock()?;
        if self
            .goals
            .iter()
            .any(|g| g.deleted_at.is_none() && g.name == goal.name)
        {
            return Err(OptimizerError::conflict(format!(
                "goal {} already exists",
                goal.name
            )));
        }
        self.goals.insert(goal.uuid, goal.clone());
        Ok(goal)
    }

    fn get_goal(&self, uuid: Uuid) -> Result<GoalRecord> {
        self.goals
            .get(&uuid)
            .filter(|g| g.deleted_at.is_none())
            .map(|g| g.clone())
            .ok_or_else(|| OptimizerError::not_found("goal", uuid))
    }

    fn get_goal_by_name(&self, name: &str) -> Result<GoalRecord> {
        self.goals
            .iter()
            .find(|g| g.deleted_at.is_none() && g.name == name)
            .map(|g| g.clone())
            .ok_or_else(|| OptimizerError::not_found("goal", name))
    }

    fn list_goals(&self) -> Result<Vec<GoalRecord>> {
        let rows = self
            .goals
            .iter()
            .filter(|g| g.deleted_at.is_none())
            .map(|g| g.clone())
            .collect();
        Ok(sorted_by_creation(rows, |g| (g.created_at, g.uuid)))
    }

    fn soft_delete_goal(&self, uuid: Uuid) -> Result<()> {
        let mut goal = self
            .goals
            .get_mut(&uuid)
            .filter(|g| g.deleted_at.is_none())
            .ok_or_else(|| OptimizerError::not_found("goal", uuid))?;
        goal.deleted_at = Some(Utc::now());
        Ok(())
    }

    fn create_strategy(&self, strategy: StrategyRecord) -> Result<StrategyRecord> {
        let _guard = self.lock()?;
        if self.strategies.iter().any(|s| {
            s.deleted_at.is_none() && s.name == strategy.name && s.goal_uuid == strategy.goal_uuid
        }) {
            return Err(OptimizerError::conflict(format!(
                "strategy {} already exists for goal {}",
                strategy.name, strategy.goal_uuid
            )));
        }
        self.strategies.insert(strategy.uuid, strategy.clone());
        Ok(strategy)
    }

    fn get_strategy_by_name(&self, name: &str) -> Result<StrategyRecord> {
        self.strategies
            .iter()
            .find(|s| s.deleted_at.is_none() && s.name == name)
            .map(|s| s.clone())
            .ok_or_else(|| OptimizerError::not_found("strategy", name))
    }

    fn list_strategies(&self, goal_uuid: Option<Uuid>) -> Result<Vec<StrategyRecord>> {
        let rows = self
            .strategies
            .iter()
            .filter(|s| s.deleted_at.is_none() && goal_uuid.map_or(true, |g| s.goal_uuid == g))
            .map(|s| s.clone())
            .collect();
        Ok(sorted_by_creation(rows, |s| (s.created_at, s.uuid)))
    }

    fn soft_delete_strategy(&self, uuid: Uuid) -> Result<()> {
        let mut strategy = self
            .strategies
            .get_mut(&uuid)
            .filter(|s| s.deleted_at.is_none())
            .ok_or_else(|| OptimizerError::not_found("strategy", uuid))?;
        strategy.deleted_at = Some(Utc::now());
        Ok(())
    }

    fn create_scoring_engine(&self, engine: ScoringEngineRecord) -> Result<ScoringEngineRecord> {
        let _guard = self.lock()?;
        if self
            .scoring_engines
            .iter()
            .any(|e| e.deleted_at.is_none() && e.name == engine.name)
        {
            return Err(OptimizerError::conflict(format!(
                "scoring engine {} already exists",
                engine.name
            )));
        }
        self.scoring_engines.insert(engine.uuid, engine.clone());
        Ok(engine)
    }

    fn list_scoring_engines(&self) -> Result<Vec<ScoringEngineRecord>> {
        let rows = self
            .scoring_engines
            .iter()
            .filter(|e| e.deleted_at.is_none())
            .map(|e| e.clone())
            .collect();
        Ok(sorted_by_creation(rows, |e| (e.created_at, e.uuid)))
    }

    fn soft_delete_scoring_engine(&self, uuid: Uuid) -> Result<()> {
        let mut engine = self
            .scoring_engines
            .get_mut(&uuid)
            .filter(|e| e.deleted_at.is_none())
            .ok_or_else(|| OptimizerError::not_found("scoring engine", uuid))?;
        engine.deleted_at = Some(Utc::now());
        Ok(())
    }

    fn upsert_service(&self, name: &str, host: &str, seen_at: DateTime<Utc>) -> Result<ServiceRecord> {
        let _guard = self.lock()?;
        if let Some(mut row) = self
            .services
            .iter_mut()
            .find(|s| s.deleted_at.is_none() && s.name == name && s.host == host)
        {
            row.last_seen_up = seen_at;
            return Ok(row.clone());
        }

        let record = ServiceRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            host: host.to_string(),
            last_seen_up: seen_at,
            created_at: seen_at,
            deleted_at: None,
        };
        debug!(service = %name, host = %host, "Registering service");
        self.services.insert(record.id, record.clone());
        Ok(record)
    }

    fn list_services(&self, name: Option<&str>) -> Result<Vec<ServiceRecord>> {
        let rows = self
            .services
            .iter()
            .filter(|s| s.deleted_at.is_none() && name.map_or(true, |n| s.name == n))
            .map(|s| s.clone())
            .collect();
        Ok(sorted_by_creation(rows, |s| (s.created_at, s.id)))
    }

    fn create_audit_template(&self, template: AuditTemplate) -> Result<AuditTemplate> {
        let _guard = self.lock()?;
        if self
            .audit_templates
            .iter()
            .any(|t| t.deleted_at.is_none() && (t.name == template.name || t.uuid == template.uuid))
        {
            return Err(OptimizerError::conflict(format!(
                "audit template {} already exists",
                template.name
            )));
        }
        self.audit_templates.insert(template.uuid, template.clone());
        Ok(template)
    }

    fn get_audit_template(&self, uuid: Uuid) -> Result<AuditTemplate> {
        self.audit_templates
            .get(&uuid)
            .filter(|t| t.deleted_at.is_none())
            .map(|t| t.clone())
            .ok_or_else(|| OptimizerError::not_found("audit template", uuid))
    }

    fn list_audit_templates(&self) -> Result<Vec<AuditTemplate>> {
        let rows = self
            .audit_templates
            .iter()
            .filter(|t| t.deleted_at.is_none())
            .map(|t| t.clone())
            .collect();
        Ok(sorted_by_creation(rows, |t| (t.created_at, t.uuid)))
    }

    fn soft_delete_audit_template(&self, uuid: Uuid) -> Result<()> {
        let mut template = self
            .audit_templates
            .get_mut(&uuid)
            .filter(|t| t.deleted_at.is_none())
            .ok_or_else(|| OptimizerError::not_found("audit template", uuid))?;
        template.deleted_at = Some(Utc::now());
        Ok(())
    }

    fn create_audit(&self, audit: Audit) -> Result<Audit> {
        let _guard = self.lock()?;
        if self.audits.contains_key(&audit.uuid) {
            return Err(OptimizerError::conflict(format!(
                "audit {} already exists",
                audit.uuid
            )));
        }
        self.audits.insert(audit.uuid, audit.clone());
        Ok(audit)
    }

    fn get_audit(&self, uuid: Uuid) -> Result<Audit> {
        self.audits
            .get(&uuid)
            .filter(|a| a.deleted_at.is_none())
            .map(|a| a.clone())
            .ok_or_else(|| OptimizerError::not_found("audit", uuid))
    }

    fn update_audit(&self, audit: &Audit) -> Result<()> {
        let mut row = self
            .audits
            .get_mut(&audit.uuid)
            .filter(|a| a.deleted_at.is_none())
            .ok_or_else(|| OptimizerError::not_found("audit", audit.uuid))?;
        *row = audit.clone();
        Ok(())
    }

    fn list_audits(&self, filter: &AuditFilter) -> Result<Vec<Audit>> {
        let rows = self
            .audits
            .iter()
            .filter(|a| filter.matches(a))
            .map(|a| a.clone())
            .collect();
        Ok(sorted_by_creation(rows, |a| (a.created_at, a.uuid)))
    }

    fn soft_delete_audit(&self, uuid: Uuid) -> Result<()> {
        let mut audit = self
            .audits
            .get_mut(&uuid)
            .filter(|a| a.deleted_at.is_none())
            .ok_or_else(|| OptimizerError::not_found("audit", uuid))?;
        audit.deleted_at = Some(Utc::now());
        Ok(())
    }

    fn create_action_plan(&self, plan: ActionPlan) -> Result<ActionPlan> {
        let _guard = self.lock()?;
        if self.action_plans.contains_key(&plan.uuid) {
            return Err(OptimizerError::conflict(format!(
                "action plan {} already exists",
                plan.uuid
            )));
        }
        self.plan_actions.insert(plan.uuid, Vec::new());
        self.action_plans.insert(plan.uuid, plan.clone());
        Ok(plan)
    }

    fn get_action_plan(&self, uuid: Uuid) -> Result<ActionPlan> {
        self.action_plans
            .get(&uuid)
            .filter(|p| p.deleted_at.is_none())
            .map(|p| p.clone())
            .ok_or_else(|| OptimizerError::not_found("action plan", uuid))
    }

    fn update_action_plan(&self, plan: &ActionPlan) -> Result<()> {
        let mut row = self
            .action_plans
            .get_mut(&plan.uuid)
            .filter(|p| p.deleted_at.is_none())
            .ok_or_else(|| OptimizerError::not_found("action plan", plan.uuid))?;
        *row = plan.clone();
        Ok(())
    }

    fn transition_action_plan(&self, plan: &ActionPlan, expected: ActionPlanState) -> Result<()> {
        let mut row = self
            .action_plans
            .get_mut(&plan.uuid)
            .filter(|p| p.deleted_at.is_none())
            .ok_or_else(|| OptimizerError::not_found("action plan", plan.uuid))?;
        if row.state != expected {
            return Err(OptimizerError::conflict(format!(
                "action plan {} is {}, expected {}",
                plan.uuid,
                row.state.as_str(),
                expected.as_str()
            )));
        }
        *row = plan.clone();
        Ok(())
    }

    fn list_action_plans(&self, filter: &ActionPlanFilter) -> Result<Vec<ActionPlan>> {
        let rows = self
            .action_plans
            .iter()
            .filter(|p| filter.matches(p))
            .map(|p| p.clone())
            .collect();
        Ok(sorted_by_creation(rows, |p| (p.created_at, p.uuid)))
    }

    fn soft_delete_action_plan(&self, uuid: Uuid) -> Result<()> {
        let now = Utc::now();
        {
            let mut plan = self
                .action_plans
                .get_mut(&uuid)
                .filter(|p| p.deleted_at.is_none())
                .ok_or_else(|| OptimizerError::not_found("action plan", uuid))?;
            plan.deleted_at = Some(now);
        }

        let action_ids = self
            .plan_actions
            .get(&uuid)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        for id in action_ids {
            if let Some(mut action) = self.actions.get_mut(&id) {
                action.deleted_at = Some(now);
            }
        }
        for mut indicator in self.indicators.iter_mut() {
            if indicator.action_plan_uuid == uuid {
                indicator.deleted_at = Some(now);
            }
        }
        Ok(())
    }

    fn create_action(&self, action: Action) -> Result<Action> {
        let _guard = self.lock()?;
        self.take_action_write()?;
        if self.actions.contains_key(&action.uuid) {
            return Err(OptimizerError::conflict(format!(
                "action {} already exists",
                action.uuid
            )));
        }
        let mut index = self
            .plan_actions
            .get_mut(&action.action_plan_uuid)
            .ok_or_else(|| OptimizerError::not_found("action plan", action.action_plan_uuid))?;
        index.push(action.uuid);
        drop(index);
        self.actions.insert(action.uuid, action.clone());
        Ok(action)
    }

    fn get_action(&self, uuid: Uuid) -> Result<Action> {
        self.actions
            .get(&uuid)
            .filter(|a| a.deleted_at.is_none())
            .map(|a| a.clone())
            .ok_or_else(|| OptimizerError::not_found("action", uuid))
    }

    fn update_action(&self, action: &Action) -> Result<()> {
        let mut row = self
            .actions
            .get_mut(&action.uuid)
            .filter(|a| a.deleted_at.is_none())
            .ok_or_else(|| OptimizerError::not_found("action", action.uuid))?;
        *row = action.clone();
        Ok(())
    }

    fn list_actions(&self, filter: &ActionFilter) -> Result<Vec<Action>> {
        match filter.action_plan_uuid {
            Some(plan) => {
                let ids = self
                    .plan_actions
                    .get(&plan)
                    .map(|ids| ids.clone())
                    .unwrap_or_default();
                Ok(ids
                    .iter()
                    .filter_map(|id| self.actions.get(id).map(|a| a.clone()))
                    .filter(|a| filter.matches(a))
                    .collect())
            }
            None => {
                let rows = self
                    .actions
                    .iter()
                    .filter(|a| filter.matches(a))
                    .map(|a| a.clone())
                    .collect();
                Ok(sorted_by_creation(rows, |a| (a.created_at, a.uuid)))
            }
        }
    }

    fn create_efficacy_indicator(&self, indicator: EfficacyIndicator) -> Result<EfficacyIndicator> {
        if !self.action_plans.contains_key(&indicator.action_plan_uuid) {
            return Err(OptimizerError::not_found(
                "action plan",
                indicator.action_plan_uuid,
            ));
        }
        self.indicators.insert(indicator.uuid, indicator.clone());
        Ok(indicator)
    }

    fn list_efficacy_indicators(&self, action_plan_uuid: Uuid) -> Result<Vec<EfficacyIndicator>> {
        let rows = self
            .indicators
            .iter()
            .filter(|i| i.deleted_at.is_none() && i.action_plan_uuid == action_plan_uuid)
            .map(|i| i.clone())
            .collect();
        Ok(sorted_by_creation(rows, |i| (i.created_at, i.uuid)))
    }
}
