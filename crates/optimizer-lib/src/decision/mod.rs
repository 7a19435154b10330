//! Decision engine
//!
//! Owns the audit lifecycle: audits are created and validated here, queued
//! on a bounded pool, run through their strategy and turned into action
//! plans by the planner. Periodic jobs reschedule continuous audits and
//! expire plans nobody launched.

mod audit;
mod engine;
mod periodic;


pub use audit::AuditRequest;
pub use engine::{DecisionEngine, DecisionEngineBuilder};
pub use periodic::PeriodicJobs;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Decision engine knobs, all intervals in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionEngineConfig {
    /// Strategies running at the same time
    pub max_audit_workers: usize,
    /// Background I/O such as notification handling
    pub max_general_workers: usize,
    /// RECOMMENDED plans older than this are superseded
    pub action_plan_expiry_secs: u64,
    pub check_periodic_interval_secs: u64,
    pub continuous_audit_interval_secs: u64,
    pub strategy_timeout_secs: u64,
}

impl Default for DecisionEngineConfig {
    fn default() -> Self {
        Self {
            max_audit_workers: 2,
            max_general_workers: 4,
            action_plan_expiry_secs: 24 * 3600,
            check_periodic_interval_secs: 1800,
            continuous_audit_interval_secs: 10,
            strategy_timeout_secs: 600,
        }
    }
}

impl DecisionEngineConfig {
    pub fn action_plan_expiry(&self) -> Duration {
        Duration::from_secs(self.action_plan_expiry_secs)
    }

    pub fn check_periodic_interval(&self) -> Duration {
        Duration::from_secs(self.check_periodic_interval_secs)
    }

    pub fn continuous_audit_interval(&self) -> Duration {
        Duration::from_secs(self.continuous_audit_interval_secs)
    }

    pub fn strategy_timeout(&self) -> Duration {
        Duration::from_secs(self.strategy_timeout_secs)
    }
}
