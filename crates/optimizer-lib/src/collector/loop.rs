//! Periodic model synchronization
//!
//! Runs `synchronize` on the collector's period. While the model is stale the
//! loop ticks on the shorter retry interval instead, so a transient provider
//! outage heals without waiting a full period.

use super::Collector;
use crate::service::Leadership;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default delay before retrying a failed synchronization
pub const DEFAULT_STALE_RETRY: Duration = Duration::from_secs(60);

/// Synchronization loop of one collector
pub struct SyncLoop {
    collector: Arc<dyn Collector>,
    period: Duration,
    stale_retry: Duration,
    leadership: Option<Leadership>,
}

impl SyncLoop {
    pub fn new(collector: Arc<dyn Collector>) -> Self {
        let period = collector.period();
        Self {
            collector,
            period,
            stale_retry: DEFAULT_STALE_RETRY,
            leadership: None,
        }
    }

    /// Run until `shutdown` fires
    pub async fn run(self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let domain = self.collector.domain();
        info!(
            domain = %domain,
            period_secs = self.period.as_secs(),
            "Starting model synchronization loop"
        );

        let mut ticker = self.ticker();
        let mut stale = self.collector.is_stale();
        let mut rounds = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.is_leader() {
                        debug!(domain = %domain, "Not the leader, skipping synchronization");
                        continue;
                    }

                    let start = Instant::now();
                    let result = self.collector.synchronize().await;
                    rounds += 1;

                    match result {
                        Ok(()) => debug!(
                            domain = %domain,
                            rounds,
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "Synchronization round complete"
                        ),
                        Err(e) => warn!(domain = %domain, error = %e, "Synchronization failed"),
                    }

                    let now_stale = self.collector.is_stale();
                    if now_stale != stale {
                        stale = now_stale;
                        ticker = self.ticker();
                        // A fresh interval fires immediately; consume that tick.
                        ticker.tick().await;
                    }
                }
                _ = shutdown.recv() => {
                    info!(domain = %domain, "Shutting down model synchronization loop");
                    break;
                }
            }
        }
    }

    fn ticker(&self) -> tokio::time::Interval {
        let every = if self.collector.is_stale() {
            self.stale_retry.min(self.period)
        } else {
            self.period
        };
        let mut ticker = interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    fn is_leader(&self) -> bool {
        self.leadership.as_ref().map_or(true, |l| *l.borrow())
    }
}

/// Builder for a [`SyncLoop`]
#[derive(Default)]
pub struct SyncLoopBuilder {
    collector: Option<Arc<dyn Collector>>,
    period: Option<Duration>,
    stale_retry: Option<Duration>,
    leadership: Option<Leadership>,
}

impl SyncLoopBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collector(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collector = Some(collector);
        self
    }

    /// Override the collector's own period
    pub fn period(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }

    pub fn stale_retry(mut self, retry: Duration) -> Self {
        self.stale_retry = Some(retry);
        self
    }

    /// Only synchronize while this process holds the leader role
    pub fn leadership(mut self, leadership: Leadership) -> Self {
        self.leadership = Some(leadership);
        self
    }

    pub fn build(self) -> Result<SyncLoop> {
        let collector = self
            .collector
            .ok_or_else(|| anyhow::anyhow!("Collector is required"))?;
        let mut sync_loop = SyncLoop::new(collector);
        if let Some(period) = self.period {
            sync_loop.period = period;
        }
        if let Some(retry) = self.stale_retry {
            sync_loop.stale_retry = retry;
        }
        sync_loop.leadership = self.leadership;
        Ok(sync_loop)
    }
}
