//! Audit creation requests

use crate::error::{OptimizerError, Result};
use crate::goal::GoalRegistry;
use crate::models::{Audit, AuditTemplate, AuditType};
use crate::scope;
use crate::strategy::StrategyRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// What a caller asks for when creating an audit
///
/// Fields left out are taken from `audit_template` when one is given.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditRequest {
    pub name: Option<String>,
    /// ONESHOT when omitted
    pub audit_type: Option<AuditType>,
    pub goal: Option<String>,
    pub strategy: Option<String>,
    pub scope: Option<Value>,
    pub parameters: Map<String, Value>,
    /// Seconds between runs, CONTINUOUS only
    pub interval: Option<u64>,
    pub auto_trigger: bool,
    /// Last moment a CONTINUOUS audit may run
    pub end_time: Option<DateTime<Utc>>,
    pub audit_template: Option<Uuid>,
}

impl AuditRequest {
    pub fn oneshot(goal: impl Into<String>) -> Self {
        Self {
            audit_type: Some(AuditType::Oneshot),
            goal: Some(goal.into()),
            ..Default::default()
        }
    }

    pub fn continuous(goal: impl Into<String>, interval: u64) -> Self {
        Self {
            audit_type: Some(AuditType::Continuous),
            goal: Some(goal.into()),
            interval: Some(interval),
            ..Default::default()
        }
    }

    pub fn from_template(template: Uuid) -> Self {
        Self {
            audit_template: Some(template),
            ..Default::default()
        }
    }

    pub fn strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    pub fn scope(mut self, scope: Value) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn parameter(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.to_string(), value.into());
        self
    }

    pub fn auto_trigger(mut self, auto_trigger: bool) -> Self {
        self.auto_trigger = auto_trigger;
        self
    }

    pub fn end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    /// Validate the request and turn it into a PENDING audit
    ///
    /// Goal, strategy, parameters and scope are checked up front so a bad
    /// audit is refused with `invalid_input` instead of failing at run time.
    pub fn resolve(
        self,
        template: Option<&AuditTemplate>,
        goals: &GoalRegistry,
        strategies: &StrategyRegistry,
    ) -> Result<Audit> {
        let goal = self
            .goal
            .or_else(|| template.map(|t| t.goal.clone()))
            .ok_or_else(|| OptimizerError::invalid("goal is required"))?;
        let strategy = self
            .strategy
            .or_else(|| template.and_then(|t| t.strategy.clone()));
        let scope = self
            .scope
            .or_else(|| template.map(|t| t.scope.clone()))
            .unwrap_or_else(|| Value::Array(Vec::new()));
        let audit_type = self.audit_type.unwrap_or(AuditType::Oneshot);

        goals.get(&goal)?;
        let selected = strategies.select(&goal, strategy.as_deref())?;
        let parameters = selected.schema().validate(&self.parameters)?;
        scope::validate(&scope)?;

        match audit_type {
            AuditType::Continuous => match self.interval {
                Some(0) | None => {
                    return Err(OptimizerError::invalid(
                        "CONTINUOUS audits need an interval of at least one second",
                    ))
                }
                Some(_) => {}
            },
            _ if self.interval.is_some() || self.end_time.is_some() => {
                return Err(OptimizerError::invalid(
                    "interval and end_time only apply to CONTINUOUS audits",
                ))
            }
            _ => {}
        }

        let name = self
            .name
            .or_else(|| template.map(|t| t.name.clone()))
            .unwrap_or_else(|| format!("{}-{}", goal, Utc::now().format("%Y%m%dT%H%M%S")));

        let mut audit = Audit::new(name, audit_type, goal)
            .with_scope(scope)
            .with_parameters(parameters)
            .with_auto_trigger(self.auto_trigger);
        audit.strategy = strategy;
        audit.interval = self.interval;
        audit.end_time = self.end_time;
        Ok(audit)
    }
}
