//! Observability infrastructure for the optimizer
//!
//! Provides:
//! - Prometheus metrics (audit outcomes, strategy latency, plan and action results, CDM staleness)
//! - Structured logging of lifecycle milestones with tracing

use crate::cdm::Domain;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Histogram, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Strategies can run for minutes, so buckets reach further than request latencies
const STRATEGY_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
];

static GLOBAL_METRICS: OnceLock<OptimizerMetricsInner> = OnceLock::new();

struct OptimizerMetricsInner {
    audits_total: IntCounterVec,
    strategy_execution_seconds: Histogram,
    action_plans_total: IntCounterVec,
    actions_total: IntCounterVec,
    rollbacks_total: IntCounter,
    cdm_sync_failures_total: IntCounterVec,
    cdm_stale: IntGaugeVec,
    active_audit_workers: IntGauge,
}

impl OptimizerMetricsInner {
    fn new() -> Self {
        Self {
            audits_total: register_int_counter_vec!(
                "optimizer_audits_total",
                "Audit runs by outcome",
                &["outcome"]
            )
            .expect("Failed to register audits_total"),

            strategy_execution_seconds: register_histogram!(
                "optimizer_strategy_execution_seconds",
                "Wall time spent inside strategy execution",
                STRATEGY_BUCKETS.to_vec()
            )
            .expect("Failed to register strategy_execution_seconds"),

            action_plans_total: register_int_counter_vec!(
                "optimizer_action_plans_total",
                "Action plans by final state",
                &["state"]
            )
            .expect("Failed to register action_plans_total"),

            actions_total: register_int_counter_vec!(
                "optimizer_actions_total",
                "Actions by final state",
                &["state"]
            )
            .expect("Failed to register actions_total"),

            rollbacks_total: register_int_counter!(
                "optimizer_rollbacks_total",
                "Number of action plan rollbacks performed"
            )
            .expect("Failed to register rollbacks_total"),

            cdm_sync_failures_total: register_int_counter_vec!(
                "optimizer_cdm_sync_failures_total",
                "Cluster data model synchronization failures",
                &["domain"]
            )
            .expect("Failed to register cdm_sync_failures_total"),

            cdm_stale: register_int_gauge_vec!(
                "optimizer_cdm_stale",
                "1 when the cluster data model of a domain is stale",
                &["domain"]
            )
            .expect("Failed to register cdm_stale"),

            active_audit_workers: register_int_gauge!(
                "optimizer_active_audit_workers",
                "Audits currently running a strategy"
            )
            .expect("Failed to register active_audit_workers"),
        }
    }
}

/// Handle to the process-wide optimizer metrics
///
/// Clones share the same underlying collectors.
#[derive(Clone)]
pub struct OptimizerMetrics {
    _private: (),
}

impl Default for OptimizerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OptimizerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OptimizerMetricsInner {
        GLOBAL_METRICS.get_or_init(OptimizerMetricsInner::new)
    }

    pub fn inc_audit(&self, outcome: &str) {
        self.inner().audits_total.with_label_values(&[outcome]).inc();
    }

    pub fn observe_strategy_latency(&self, duration_secs: f64) {
        self.inner().strategy_execution_seconds.observe(duration_secs);
    }

    pub fn inc_action_plan(&self, state: &str) {
        self.inner()
            .action_plans_total
            .with_label_values(&[state])
            .inc();
    }

    pub fn inc_action(&self, state: &str) {
        self.inner().actions_total.with_label_values(&[state]).inc();
    }

    pub fn inc_rollbacks(&self) {
        self.inner().rollbacks_total.inc();
    }

    pub fn inc_sync_failures(&self, domain: Domain) {
        self.inner()
            .cdm_sync_failures_total
            .with_label_values(&[domain.as_str()])
            .inc();
    }

    pub fn set_cdm_stale(&self, domain: Domain, stale: bool) {
        self.inner()
            .cdm_stale
            .with_label_values(&[domain.as_str()])
            .set(stale as i64);
    }

    pub fn audit_worker_started(&self) {
        self.inner().active_audit_workers.inc();
    }

    pub fn audit_worker_finished(&self) {
        self.inner().active_audit_workers.dec();
    }
}

/// Structured logger for optimizer lifecycle events
///
/// Every line carries a stable `event` field so log pipelines can key on it.
#[derive(Clone)]
pub struct StructuredLogger {
    host: String,
}

impl StructuredLogger {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn log_startup(&self, service: &str, version: &str) {
        info!(
            event = "service_started",
            host = %self.host,
            service = %service,
            version = %version,
            "Optimizer service started"
        );
    }

    pub fn log_shutdown(&self, service: &str, reason: &str) {
        info!(
            event = "service_shutdown",
            host = %self.host,
            service = %service,
            reason = %reason,
            "Optimizer service shutting down"
        );
    }

    pub fn log_audit_started(&self, audit_uuid: Uuid, goal: &str, strategy: &str) {
        info!(
            event = "audit_started",
            host = %self.host,
            audit_uuid = %audit_uuid,
            goal = %goal,
            strategy = %strategy,
            "Audit started"
        );
    }

    pub fn log_audit_succeeded(&self, audit_uuid: Uuid, action_plan: Uuid, actions: usize, elapsed_ms: u64) {
        info!(
            event = "audit_succeeded",
            host = %self.host,
            audit_uuid = %audit_uuid,
            action_plan = %action_plan,
            actions = actions,
            elapsed_ms = elapsed_ms,
            "Audit produced an action plan"
        );
    }

    pub fn log_audit_failed(&self, audit_uuid: Uuid, kind: &str, reason: &str) {
        warn!(
            event = "audit_failed",
            host = %self.host,
            audit_uuid = %audit_uuid,
            error_kind = %kind,
            reason = %reason,
            "Audit failed"
        );
    }

    pub fn log_plan_launched(&self, action_plan: Uuid, actions: usize) {
        info!(
            event = "action_plan_launched",
            host = %self.host,
            action_plan = %action_plan,
            actions = actions,
            "Action plan launched"
        );
    }

    pub fn log_plan_finished(&self, action_plan: Uuid, state: &str, elapsed_ms: u64) {
        info!(
            event = "action_plan_finished",
            host = %self.host,
            action_plan = %action_plan,
            state = %state,
            elapsed_ms = elapsed_ms,
            "Action plan finished"
        );
    }

    pub fn log_action_transition(&self, action_plan: Uuid, action: Uuid, action_type: &str, from: &str, to: &str) {
        info!(
            event = "action_state_changed",
            host = %self.host,
            action_plan = %action_plan,
            action = %action,
            action_type = %action_type,
            from = %from,
            to = %to,
            "Action state changed"
        );
    }

    pub fn log_rollback(&self, action_plan: Uuid, reverted: usize, revert_errors: usize) {
        warn!(
            event = "action_plan_rollback",
            host = %self.host,
            action_plan = %action_plan,
            reverted = reverted,
            revert_errors = revert_errors,
            "Rolled back completed actions"
        );
    }

    pub fn log_cdm_synchronized(&self, domain: Domain, nodes: usize, elapsed_ms: u64) {
        info!(
            event = "cdm_synchronized",
            host = %self.host,
            domain = %domain,
            nodes = nodes,
            elapsed_ms = elapsed_ms,
            "Cluster data model synchronized"
        );
    }

    pub fn log_cdm_stale(&self, domain: Domain, reason: &str) {
        warn!(
            event = "cdm_stale",
            host = %self.host,
            domain = %domain,
            reason = %reason,
            "Cluster data model marked stale"
        );
    }

    pub fn log_leader_change(&self, service: &str, leader: Option<&str>, is_self: bool) {
        info!(
            event = "leader_changed",
            host = %self.host,
            service = %service,
            leader = ?leader,
            is_self = is_self,
            "Leadership changed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handles_share_registry() {
        let a = OptimizerMetrics::new();
        let b = a.clone();
        a.inc_audit("succeeded");
        b.inc_audit("succeeded");
        a.set_cdm_stale(Domain::Compute, true);
        a.set_cdm_stale(Domain::Compute, false);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "optimizer_audits_total"));
    }

    #[test]
    fn test_structured_logger_does_not_panic() {
        let logger = StructuredLogger::new("host-a");
        logger.log_startup("decision-engine", "0.1.0");
        logger.log_audit_failed(Uuid::new_v4(), "cdm_stale", "compute model is stale");
        logger.log_leader_change("decision-engine", Some("host-a"), true);
        logger.log_shutdown("decision-engine", "signal");
    }
}
