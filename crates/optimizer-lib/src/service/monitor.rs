//! Heartbeats and leader election
//!
//! Every process upserts its heartbeat row on each tick and then looks at
//! the rows of its service name. Among the hosts seen within the down time
//! the lexicographically first one leads. Rows are compared by timestamp
//! only, so two processes may briefly both believe they lead.

use super::{Leadership, ServiceConfig};
use crate::error::{OptimizerError, Result};
use crate::models::ServiceRecord;
use crate::observability::StructuredLogger;
use crate::store::Store;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct ServiceMonitor {
    store: Arc<dyn Store>,
    name: String,
    config: ServiceConfig,
    leader_tx: watch::Sender<bool>,
    leader: Mutex<Option<String>>,
    logger: StructuredLogger,
}

impl ServiceMonitor {
    pub fn new(store: Arc<dyn Store>, name: impl Into<String>, config: ServiceConfig) -> Self {
        let (leader_tx, _) = watch::channel(false);
        let logger = StructuredLogger::new(&config.host);
        Self {
            store,
            name: name.into(),
            config,
            leader_tx,
            leader: Mutex::new(None),
            logger,
        }
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn leadership(&self) -> Leadership {
        self.leader_tx.subscribe()
    }

    pub fn is_leader(&self) -> bool {
        *self.leader_tx.borrow()
    }

    /// Host currently elected, as last computed
    pub fn leader(&self) -> Option<String> {
        self.leader.lock().ok().and_then(|l| l.clone())
    }

    pub fn heartbeat(&self, now: DateTime<Utc>) -> Result<ServiceRecord> {
        self.store.upsert_service(&self.name, &self.config.host, now)
    }

    /// Services of this name seen within the down time, by host
    pub fn active_services(&self, now: DateTime<Utc>) -> Result<Vec<ServiceRecord>> {
        let down_time = chrono::Duration::seconds(self.config.service_down_time_secs as i64);
        let mut active: Vec<ServiceRecord> = self
            .store
            .list_services(Some(&self.name))?
            .into_iter()
            .filter(|s| now - s.last_seen_up <= down_time)
            .collect();
        active.sort_by(|a, b| a.host.cmp(&b.host));
        Ok(active)
    }

    /// Recompute the leader and publish the role change, if any
    pub fn elect(&self, now: DateTime<Utc>) -> Result<Option<String>> {
        let leader = self.active_services(now)?.into_iter().next().map(|s| s.host);
        let is_self = leader.as_deref() == Some(self.config.host.as_str());

        let mut current = self
            .leader
            .lock()
            .map_err(|e| OptimizerError::internal(format!("leader lock poisoned: {}", e)))?;
        if *current != leader {
            self.logger
                .log_leader_change(&self.name, leader.as_deref(), is_self);
            *current = leader.clone();
        }
        self.leader_tx.send_if_modified(|role| {
            let changed = *role != is_self;
            *role = is_self;
            changed
        });
        Ok(leader)
    }

    /// Heartbeat then election
    pub fn tick(&self, now: DateTime<Utc>) -> Result<bool> {
        self.heartbeat(now)?;
        self.elect(now)?;
        Ok(self.is_leader())
    }

    /// Run until `shutdown` fires
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            service = %self.name,
            host = %self.config.host,
            interval_secs = self.config.periodic_interval_secs,
            "Starting service monitor"
        );
        let mut ticker = interval(self.config.periodic_interval().max(std::time::Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick(Utc::now()) {
                        Ok(leader) => debug!(leader, "Heartbeat recorded"),
                        Err(e) => warn!(error = %e, "Heartbeat failed"),
                    }
                }
                _ = shutdown.recv() => {
                    info!(service = %self.name, "Shutting down service monitor");
                    break;
                }
            }
        }
        // A stopped monitor never leads.
        self.leader_tx.send_replace(false);
    }
}
