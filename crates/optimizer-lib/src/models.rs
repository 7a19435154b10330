//! Persisted entities and their state machines
//!
//! Audits, action plans and actions own their lifecycle rules: every state
//! change goes through a `transition` method which rejects illegal moves and
//! any mutation of a terminal entity with `conflict`.

use crate::error::{OptimizerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// An optimization objective as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalRecord {
    pub uuid: Uuid,
    pub name: String,
    pub display_name: String,
    /// Indicator specifications, serialized
    pub efficacy_specification: Value,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A strategy plugin as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub uuid: Uuid,
    pub name: String,
    pub display_name: String,
    pub goal_uuid: Uuid,
    /// JSON-Schema style description of the accepted parameters
    pub parameters_spec: Value,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringEngineRecord {
    pub uuid: Uuid,
    pub name: String,
    pub description: String,
    pub metainfo: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Heartbeat row of one service process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: Uuid,
    pub name: String,
    pub host: String,
    pub last_seen_up: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Reusable description of what to audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTemplate {
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub goal: String,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default = "empty_scope")]
    pub scope: Value,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

fn empty_scope() -> Value {
    Value::Array(Vec::new())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditType {
    Oneshot,
    Continuous,
    Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditState {
    Pending,
    Ongoing,
    Succeeded,
    Failed,
    Cancelled,
    Suspended,
}

impl AuditState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditState::Pending => "PENDING",
            AuditState::Ongoing => "ONGOING",
            AuditState::Succeeded => "SUCCEEDED",
            AuditState::Failed => "FAILED",
            AuditState::Cancelled => "CANCELLED",
            AuditState::Suspended => "SUSPENDED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuditState::Succeeded | AuditState::Failed | AuditState::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: AuditState) -> bool {
        use AuditState::*;
        match self {
            // A continuous audit can reach its end time before its first run.
            Pending => matches!(next, Ongoing | Succeeded | Failed | Cancelled | Suspended),
            // Continuous audits re-enter ONGOING on every tick.
            Ongoing => matches!(next, Ongoing | Succeeded | Failed | Cancelled | Suspended),
            Suspended => matches!(next, Ongoing | Cancelled),
            Succeeded | Failed | Cancelled => false,
        }
    }
}

/// A triggered run of a strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audit {
    pub uuid: Uuid,
    pub name: String,
    pub audit_type: AuditType,
    pub state: AuditState,
    pub goal: String,
    pub strategy: Option<String>,
    pub scope: Value,
    pub parameters: Map<String, Value>,
    /// Seconds between runs of a CONTINUOUS audit
    pub interval: Option<u64>,
    pub auto_trigger: bool,
    pub next_run_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Human readable reason of the last failure
    pub status_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Audit {
    pub fn new(name: impl Into<String>, audit_type: AuditType, goal: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            audit_type,
            state: AuditState::Pending,
            goal: goal.into(),
            strategy: None,
            scope: empty_scope(),
            parameters: Map::new(),
            interval: None,
            auto_trigger: false,
            next_run_time: None,
            end_time: None,
            status_message: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    pub fn with_scope(mut self, scope: Value) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_interval(mut self, seconds: u64) -> Self {
        self.interval = Some(seconds);
        self
    }

    pub fn with_auto_trigger(mut self, auto_trigger: bool) -> Self {
        self.auto_trigger = auto_trigger;
        self
    }

    /// Move to `next`, returning the previous state
    pub fn transition(&mut self, next: AuditState) -> Result<AuditState> {
        if !self.state.can_transition_to(next) {
            return Err(OptimizerError::conflict(format!(
                "audit {} cannot move from {:?} to {:?}",
                self.uuid, self.state, next
            )));
        }
        let previous = self.state;
        self.state = next;
        self.updated_at = Utc::now();
        Ok(previous)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionPlanState {
    Recommended,
    Pending,
    Ongoing,
    Cancelling,
    Succeeded,
    Failed,
    Cancelled,
    Superseded,
}

impl ActionPlanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionPlanState::Recommended => "RECOMMENDED",
            ActionPlanState::Pending => "PENDING",
            ActionPlanState::Ongoing => "ONGOING",
            ActionPlanState::Cancelling => "CANCELLING",
            ActionPlanState::Succeeded => "SUCCEEDED",
            ActionPlanState::Failed => "FAILED",
            ActionPlanState::Cancelled => "CANCELLED",
            ActionPlanState::Superseded => "SUPERSEDED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionPlanState::Succeeded
                | ActionPlanState::Failed
                | ActionPlanState::Cancelled
                | ActionPlanState::Superseded
        )
    }

    pub fn can_transition_to(&self, next: ActionPlanState) -> bool {
        use ActionPlanState::*;
        match self {
            Recommended => matches!(next, Pending | Cancelled | Superseded),
            Pending => matches!(next, Ongoing | Failed | Cancelled),
            Ongoing => matches!(next, Succeeded | Failed | Cancelling),
            Cancelling => matches!(next, Cancelled | Failed),
            Succeeded | Failed | Cancelled | Superseded => false,
        }
    }
}

/// Aggregated efficacy value computed for a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalEfficacy {
    pub name: String,
    pub description: String,
    pub unit: String,
    pub value: f64,
}

/// Executable DAG of actions derived from one solution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub uuid: Uuid,
    pub audit_uuid: Uuid,
    pub strategy: String,
    pub state: ActionPlanState,
    pub global_efficacy: Vec<GlobalEfficacy>,
    pub status_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ActionPlan {
    pub fn new(audit_uuid: Uuid, strategy: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            audit_uuid,
            strategy: strategy.into(),
            state: ActionPlanState::Recommended,
            global_efficacy: Vec::new(),
            status_message: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn transition(&mut self, next: ActionPlanState) -> Result<ActionPlanState> {
        if !self.state.can_transition_to(next) {
            return Err(OptimizerError::conflict(format!(
                "action plan {} cannot move from {:?} to {:?}",
                self.uuid, self.state, next
            )));
        }
        let previous = self.state;
        self.state = next;
        self.updated_at = Utc::now();
        Ok(previous)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionState {
    Pending,
    Ongoing,
    Succeeded,
    Failed,
    Cancelled,
}

impl ActionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionState::Pending => "PENDING",
            ActionState::Ongoing => "ONGOING",
            ActionState::Succeeded => "SUCCEEDED",
            ActionState::Failed => "FAILED",
            ActionState::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionState::Succeeded | ActionState::Failed | ActionState::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: ActionState) -> bool {
        use ActionState::*;
        match self {
            // PENDING -> FAILED covers actions that cannot even be built.
            Pending => matches!(next, Ongoing | Cancelled | Failed),
            Ongoing => matches!(next, Succeeded | Failed),
            Succeeded | Failed | Cancelled => false,
        }
    }
}

/// One node of an action plan DAG
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub uuid: Uuid,
    pub action_plan_uuid: Uuid,
    pub action_type: String,
    pub resource_id: String,
    pub input_parameters: Map<String, Value>,
    pub parents: Vec<Uuid>,
    pub state: ActionState,
    pub status_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Action {
    pub fn new(
        action_plan_uuid: Uuid,
        action_type: impl Into<String>,
        resource_id: impl Into<String>,
        input_parameters: Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            action_plan_uuid,
            action_type: action_type.into(),
            resource_id: resource_id.into(),
            input_parameters,
            parents: Vec::new(),
            state: ActionState::Pending,
            status_message: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn transition(&mut self, next: ActionState) -> Result<ActionState> {
        if !self.state.can_transition_to(next) {
            return Err(OptimizerError::conflict(format!(
                "action {} cannot move from {:?} to {:?}",
                self.uuid, self.state, next
            )));
        }
        let previous = self.state;
        self.state = next;
        self.updated_at = Utc::now();
        Ok(previous)
    }
}

/// A named numeric measurement bound to one action plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficacyIndicator {
    pub uuid: Uuid,
    pub action_plan_uuid: Uuid,
    pub name: String,
    pub description: String,
    pub unit: String,
    pub value: f64,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}
