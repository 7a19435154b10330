//! Leader-only background jobs of the decision engine

use super::DecisionEngine;
use crate::bus::StatusEvent;
use crate::error::Result;
use crate::models::{ActionPlanState, Audit, AuditState, AuditType};
use crate::service::Leadership;
use crate::store::{ActionPlanFilter, AuditFilter};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

impl DecisionEngine {
    /// Queue every CONTINUOUS audit that is due at `now`
    ///
    /// Suspended and running audits are skipped; audits past their
    /// `end_time` are completed instead. Returns the number queued.
    pub fn schedule_continuous_audits(&self, now: DateTime<Utc>) -> Result<usize> {
        let filter = AuditFilter {
            audit_type: Some(AuditType::Continuous),
            ..Default::default()
        };
        let mut queued = 0;
        for audit in self.store().list_audits(&filter)? {
            if !matches!(audit.state, AuditState::Pending | AuditState::Ongoing) {
                continue;
            }
            if self.is_running(audit.uuid) {
                continue;
            }
            if audit.end_time.map_or(false, |end| end <= now) {
                let uuid = audit.uuid;
                match self.complete_audit(audit) {
                    Ok(()) => info!(audit_uuid = %uuid, "Continuous audit reached its end time"),
                    Err(e) => warn!(audit_uuid = %uuid, error = %e, "Failed to complete continuous audit"),
                }
                continue;
            }
            if audit.next_run_time.map_or(false, |next| next > now) {
                continue;
            }
            match self.trigger_audit(audit.uuid, Uuid::new_v4()) {
                Ok(_) => queued += 1,
                Err(e) => debug!(audit_uuid = %audit.uuid, error = %e, "Continuous audit not queued"),
            }
        }
        Ok(queued)
    }

    fn complete_audit(&self, mut audit: Audit) -> Result<()> {
        audit.transition(AuditState::Succeeded)?;
        audit.next_run_time = None;
        self.store().update_audit(&audit)
    }

    /// Supersede RECOMMENDED plans created more than the expiry ago
    pub fn expire_action_plans(&self, now: DateTime<Utc>) -> Result<usize> {
        let expiry = chrono::Duration::seconds(self.config().action_plan_expiry_secs as i64);
        let filter = ActionPlanFilter {
            state: Some(ActionPlanState::Recommended),
            ..Default::default()
        };
        let mut expired = 0;
        for mut plan in self.store().list_action_plans(&filter)? {
            if plan.created_at + expiry > now {
                continue;
            }
            let from = plan.transition(ActionPlanState::Superseded)?;
            plan.status_message = Some("expired before being launched".to_string());
            if let Err(e) = self.store().transition_action_plan(&plan, from) {
                debug!(action_plan = %plan.uuid, error = %e, "Action plan not expired");
                continue;
            }
            self.bus().publish(StatusEvent::plan(
                plan.uuid,
                from,
                ActionPlanState::Superseded,
                plan.status_message.clone(),
            ));
            expired += 1;
        }
        if expired > 0 {
            info!(expired, "Expired action plans superseded");
        }
        Ok(expired)
    }
}

/// Continuous audit scheduling and plan expiry on their own intervals
pub struct PeriodicJobs {
    engine: DecisionEngine,
    leadership: Option<Leadership>,
}

impl PeriodicJobs {
    pub fn new(engine: DecisionEngine) -> Self {
        Self {
            engine,
            leadership: None,
        }
    }

    /// Only run while this process holds the leader role
    pub fn with_leadership(mut self, leadership: Leadership) -> Self {
        self.leadership = Some(leadership);
        self
    }

    /// Run until `shutdown` fires
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let config = self.engine.config().clone();
        info!(
            continuous_secs = config.continuous_audit_interval_secs,
            expiry_check_secs = config.check_periodic_interval_secs,
            "Starting decision engine periodic jobs"
        );

        let mut continuous = ticker(config.continuous_audit_interval());
        let mut expiry = ticker(config.check_periodic_interval());

        loop {
            tokio::select! {
                _ = continuous.tick() => {
                    if !self.is_leader() {
                        continue;
                    }
                    match self.engine.schedule_continuous_audits(Utc::now()) {
                        Ok(0) => {}
                        Ok(queued) => debug!(queued, "Continuous audits queued"),
                        Err(e) => warn!(error = %e, "Continuous audit scheduling failed"),
                    }
                }
                _ = expiry.tick() => {
                    if !self.is_leader() {
                        continue;
                    }
                    if let Err(e) = self.engine.expire_action_plans(Utc::now()) {
                        warn!(error = %e, "Action plan expiry failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down decision engine periodic jobs");
                    break;
                }
            }
        }
    }

    fn is_leader(&self) -> bool {
        self.leadership.as_ref().map_or(true, |l| *l.borrow())
    }
}

fn ticker(every: Duration) -> tokio::time::Interval {
    let mut ticker = interval(every.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
