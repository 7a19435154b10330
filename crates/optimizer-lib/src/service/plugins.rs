//! Mirror of the plugin registries in the store
//!
//! Goals, strategies and scoring engines are compiled in, but audits and
//! the API refer to their stored rows. At startup the rows are brought in
//! line with the registries: missing plugins are created, changed ones are
//! replaced and vanished ones are soft-deleted along with whatever still
//! refers to them.

use crate::error::{ErrorKind, Result};
use crate::goal::GoalRegistry;
use crate::models::{AuditState, GoalRecord, ScoringEngineRecord, StrategyRecord};
use crate::scoring::ScoringRegistry;
use crate::store::{AuditFilter, Store};
use crate::strategy::StrategyRegistry;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// What one synchronization changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: Vec<String>,
    pub removed: Vec<String>,
    pub cancelled_audits: Vec<Uuid>,
    pub removed_templates: Vec<Uuid>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.removed.is_empty()
            && self.cancelled_audits.is_empty()
            && self.removed_templates.is_empty()
    }
}

pub struct PluginSyncer {
    store: Arc<dyn Store>,
    goals: GoalRegistry,
    strategies: StrategyRegistry,
    scoring: ScoringRegistry,
}

impl PluginSyncer {
    pub fn new(
        store: Arc<dyn Store>,
        goals: GoalRegistry,
        strategies: StrategyRegistry,
        scoring: ScoringRegistry,
    ) -> Self {
        Self {
            store,
            goals,
            strategies,
            scoring,
        }
    }

    pub fn sync(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let removed_goals = self.sync_goals(&mut report)?;
        let removed_strategies = self.sync_strategies(&mut report)?;
        self.sync_scoring_engines(&mut report)?;
        self.retire_references(&removed_goals, &removed_strategies, &mut report)?;

        if report.is_empty() {
            info!("Plugin registry already in sync");
        } else {
            info!(
                created = report.created.len(),
                removed = report.removed.len(),
                cancelled_audits = report.cancelled_audits.len(),
                removed_templates = report.removed_templates.len(),
                "Plugin registry synchronized"
            );
        }
        Ok(report)
    }

    /// Returns the names of goals no longer provided
    fn sync_goals(&self, report: &mut SyncReport) -> Result<BTreeSet<String>> {
        let mut removed = BTreeSet::new();
        let stored = self.store.list_goals()?;

        for goal in self.goals.iter() {
            let spec = goal.efficacy.to_json();
            let current = stored.iter().find(|g| g.name == goal.name);
            if let Some(row) = current {
                if row.display_name == goal.display_name && row.efficacy_specification == spec {
                    continue;
                }
                self.store.soft_delete_goal(row.uuid)?;
            }
            self.store.create_goal(GoalRecord {
                uuid: Uuid::new_v4(),
                name: goal.name.to_string(),
                display_name: goal.display_name.to_string(),
                efficacy_specification: spec,
                created_at: Utc::now(),
                deleted_at: None,
            })?;
            report.created.push(format!("goal:{}", goal.name));
        }

        for row in stored {
            if self.goals.get(&row.name).is_err() {
                self.store.soft_delete_goal(row.uuid)?;
                report.removed.push(format!("goal:{}", row.name));
                removed.insert(row.name);
            }
        }
        Ok(removed)
    }

    /// Returns the names of strategies no longer provided
    fn sync_strategies(&self, report: &mut SyncReport) -> Result<BTreeSet<String>> {
        let mut removed = BTreeSet::new();
        let stored = self.store.list_strategies(None)?;

        for strategy in self.strategies.iter() {
            let goal = match self.store.get_goal_by_name(strategy.goal()) {
                Ok(goal) => goal,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!(strategy = strategy.name(), goal = strategy.goal(), "Strategy goal is not registered, skipping");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let spec = strategy.schema().to_json();
            if let Some(row) = stored.iter().find(|s| s.name == strategy.name()) {
                if row.goal_uuid == goal.uuid
                    && row.display_name == strategy.display_name()
                    && row.parameters_spec == spec
                {
                    continue;
                }
                self.store.soft_delete_strategy(row.uuid)?;
            }
            self.store.create_strategy(StrategyRecord {
                uuid: Uuid::new_v4(),
                name: strategy.name().to_string(),
                display_name: strategy.display_name().to_string(),
                goal_uuid: goal.uuid,
                parameters_spec: spec,
                created_at: Utc::now(),
                deleted_at: None,
            })?;
            report.created.push(format!("strategy:{}", strategy.name()));
        }

        for row in stored {
            if self.strategies.get(&row.name).is_err() {
                self.store.soft_delete_strategy(row.uuid)?;
                report.removed.push(format!("strategy:{}", row.name));
                removed.insert(row.name);
            }
        }
        Ok(removed)
    }

    fn sync_scoring_engines(&self, report: &mut SyncReport) -> Result<()> {
        let stored = self.store.list_scoring_engines()?;
        for engine in self.scoring.iter() {
            let metainfo = engine.metainfo();
            if let Some(row) = stored.iter().find(|e| e.name == engine.name()) {
                if row.description == engine.description() && row.metainfo == metainfo {
                    continue;
                }
                self.store.soft_delete_scoring_engine(row.uuid)?;
            }
            self.store.create_scoring_engine(ScoringEngineRecord {
                uuid: Uuid::new_v4(),
                name: engine.name().to_string(),
                description: engine.description().to_string(),
                metainfo,
                created_at: Utc::now(),
                deleted_at: None,
            })?;
            report.created.push(format!("scoring_engine:{}", engine.name()));
        }
        for row in stored {
            if self.scoring.get(&row.name).is_err() {
                self.store.soft_delete_scoring_engine(row.uuid)?;
                report.removed.push(format!("scoring_engine:{}", row.name));
            }
        }
        Ok(())
    }

    /// Cancel audits and drop templates that name a removed plugin
    fn retire_references(
        &self,
        goals: &BTreeSet<String>,
        strategies: &BTreeSet<String>,
        report: &mut SyncReport,
    ) -> Result<()> {
        if goals.is_empty() && strategies.is_empty() {
            return Ok(());
        }
        let orphaned = |goal: &str, strategy: Option<&String>| {
            goals.contains(goal) || strategy.map_or(false, |s| strategies.contains(s))
        };

        for mut audit in self.store.list_audits(&AuditFilter::default())? {
            if audit.state.is_terminal() || !orphaned(&audit.goal, audit.strategy.as_ref()) {
                continue;
            }
            audit.transition(AuditState::Cancelled)?;
            audit.status_message = Some("goal or strategy no longer available".to_string());
            self.store.update_audit(&audit)?;
            warn!(audit_uuid = %audit.uuid, "Audit cancelled, its plugin was removed");
            report.cancelled_audits.push(audit.uuid);
        }

        for template in self.store.list_audit_templates()? {
            if orphaned(&template.goal, template.strategy.as_ref()) {
                self.store.soft_delete_audit_template(template.uuid)?;
                warn!(template = %template.uuid, "Audit template removed, its plugin was removed");
                report.removed_templates.push(template.uuid);
            }
        }
        Ok(())
    }
}
