//! Persistence operations required by the optimizer
//!
//! Every entity carries a `deleted_at` column. Soft-deleted rows are hidden
//! from lookups and listings unless a filter asks for them explicitly.

mod memory;

pub use memory::InMemoryStore;

use crate::error::Result;
use crate::models::{
    Action, ActionPlan, ActionPlanState, ActionState, Audit, AuditState, AuditTemplate, AuditType,
    EfficacyIndicator, GoalRecord, ScoringEngineRecord, ServiceRecord, StrategyRecord,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Audit listing filter, backed by the `Audit(state)` index
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub state: Option<AuditState>,
    pub audit_type: Option<AuditType>,
    pub goal: Option<String>,
    pub strategy: Option<String>,
    pub include_deleted: bool,
}

impl AuditFilter {
    pub fn matches(&self, audit: &Audit) -> bool {
        (self.include_deleted || audit.deleted_at.is_none())
            && self.state.map_or(true, |s| audit.state == s)
            && self.audit_type.map_or(true, |t| audit.audit_type == t)
            && self.goal.as_ref().map_or(true, |g| &audit.goal == g)
            && self
                .strategy
                .as_ref()
                .map_or(true, |s| audit.strategy.as_ref() == Some(s))
    }
}

/// Action plan listing filter, backed by the `ActionPlan(audit_id, state)` index
#[derive(Debug, Clone, Default)]
pub struct ActionPlanFilter {
    pub audit_uuid: Option<Uuid>,
    pub state: Option<ActionPlanState>,
    pub include_deleted: bool,
}

impl ActionPlanFilter {
    pub fn matches(&self, plan: &ActionPlan) -> bool {
        (self.include_deleted || plan.deleted_at.is_none())
            && self.audit_uuid.map_or(true, |a| plan.audit_uuid == a)
            && self.state.map_or(true, |s| plan.state == s)
    }
}

/// Action listing filter, backed by the `Action(action_plan_id, state)` index
#[derive(Debug, Clone, Default)]
pub struct ActionFilter {
    pub action_plan_uuid: Option<Uuid>,
    pub state: Option<ActionState>,
    pub include_deleted: bool,
}

impl ActionFilter {
    pub fn for_plan(action_plan_uuid: Uuid) -> Self {
        Self {
            action_plan_uuid: Some(action_plan_uuid),
            ..Default::default()
        }
    }

    pub fn matches(&self, action: &Action) -> bool {
        (self.include_deleted || action.deleted_at.is_none())
            && self
                .action_plan_uuid
                .map_or(true, |p| action.action_plan_uuid == p)
            && self.state.map_or(true, |s| action.state == s)
    }
}

/// Storage backend for optimizer entities
///
/// Unique constraints: `Goal.name`, `(Strategy.name, goal)`, and the uuid of
/// audits, action plans and actions. Violations surface as `conflict`.
pub trait Store: Send + Sync {
    fn create_goal(&self, goal: GoalRecord) -> Result<GoalRecord>;
    fn get_goal(&self, uuid: Uuid) -> Result<GoalRecord>;
    fn get_goal_by_name(&self, name: &str) -> Result<GoalRecord>;
    fn list_goals(&self) -> Result<Vec<GoalRecord>>;
    fn soft_delete_goal(&self, uuid: Uuid) -> Result<()>;

    fn create_strategy(&self, strategy: StrategyRecord) -> Result<StrategyRecord>;
    fn get_strategy_by_name(&self, name: &str) -> Result<StrategyRecord>;
    fn list_strategies(&self, goal_uuid: Option<Uuid>) -> Result<Vec<StrategyRecord>>;
    fn soft_delete_strategy(&self, uuid: Uuid) -> Result<()>;

    fn create_scoring_engine(&self, engine: ScoringEngineRecord) -> Result<ScoringEngineRecord>;
    fn list_scoring_engines(&self) -> Result<Vec<ScoringEngineRecord>>;
    fn soft_delete_scoring_engine(&self, uuid: Uuid) -> Result<()>;

    /// Create or refresh the heartbeat row for `(name, host)`
    fn upsert_service(&self, name: &str, host: &str, seen_at: DateTime<Utc>) -> Result<ServiceRecord>;
    fn list_services(&self, name: Option<&str>) -> Result<Vec<ServiceRecord>>;

    fn create_audit_template(&self, template: AuditTemplate) -> Result<AuditTemplate>;
    fn get_audit_template(&self, uuid: Uuid) -> Result<AuditTemplate>;
    fn list_audit_templates(&self) -> Result<Vec<AuditTemplate>>;
    fn soft_delete_audit_template(&self, uuid: Uuid) -> Result<()>;

    fn create_audit(&self, audit: Audit) -> Result<Audit>;
    fn get_audit(&self, uuid: Uuid) -> Result<Audit>;
    fn update_audit(&self, audit: &Audit) -> Result<()>;
    fn list_audits(&self, filter: &AuditFilter) -> Result<Vec<Audit>>;
    fn soft_delete_audit(&self, uuid: Uuid) -> Result<()>;

    fn create_action_plan(&self, plan: ActionPlan) -> Result<ActionPlan>;
    fn get_action_plan(&self, uuid: Uuid) -> Result<ActionPlan>;
    fn update_action_plan(&self, plan: &ActionPlan) -> Result<()>;
    /// Write `plan` only while the stored row is still in `expected`
    ///
    /// Every plan state change goes through here, so two writers racing on
    /// the same plan cannot overwrite each other; the loser gets `conflict`.
    fn transition_action_plan(&self, plan: &ActionPlan, expected: ActionPlanState) -> Result<()>;
    fn list_action_plans(&self, filter: &ActionPlanFilter) -> Result<Vec<ActionPlan>>;
    /// Soft-delete a plan together with its actions and indicators
    fn soft_delete_action_plan(&self, uuid: Uuid) -> Result<()>;

    fn create_action(&self, action: Action) -> Result<Action>;
    fn get_action(&self, uuid: Uuid) -> Result<Action>;
    fn update_action(&self, action: &Action) -> Result<()>;
    fn list_actions(&self, filter: &ActionFilter) -> Result<Vec<Action>>;

    fn create_efficacy_indicator(&self, indicator: EfficacyIndicator) -> Result<EfficacyIndicator>;
    fn list_efficacy_indicators(&self, action_plan_uuid: Uuid) -> Result<Vec<EfficacyIndicator>>;
}
