//! Service shell
//!
//! Heartbeats, leader election, plugin synchronization and the runtime
//! that starts every background loop of a process.

mod monitor;
mod plugins;
mod runtime;

#[cfg(test)]
mod tests;

pub use monitor::ServiceMonitor;
pub use plugins::{PluginSyncer, SyncReport};
pub use runtime::{Runtime, RuntimeBuilder};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Name under which optimizer processes register their heartbeat
pub const SERVICE_NAME: &str = "infra-optimizer";

/// Whether this process currently holds the leader role
pub type Leadership = tokio::sync::watch::Receiver<bool>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Identity of this process in the heartbeat table
    pub host: String,
    pub periodic_interval_secs: u64,
    /// A service silent for longer than this is considered down
    pub service_down_time_secs: u64,
    pub api_port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            periodic_interval_secs: 60,
            service_down_time_secs: 90,
            api_port: 9322,
        }
    }
}

impl ServiceConfig {
    pub fn periodic_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_interval_secs)
    }

    pub fn service_down_time(&self) -> Duration {
        Duration::from_secs(self.service_down_time_secs)
    }
}
