//! Optimizer configuration
//!
//! Values come from an optional TOML file overlaid by `OPTIMIZER__*`
//! environment variables, e.g. `OPTIMIZER__SERVICE__API_PORT=9400`.

use anyhow::{Context, Result};
use optimizer_lib::{
    applier::ApplierConfig,
    collector::{CollectorConfig, DEFAULT_SYNC_PERIOD},
    decision::DecisionEngineConfig,
    planner::PlannerConfig,
    retry::RetryPolicy,
    service::ServiceConfig,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "OPTIMIZER";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub service: ServiceConfig,
    pub decision_engine: DecisionEngineConfig,
    pub applier: ApplierConfig,
    pub planner: PlannerConfig,
    pub collectors: CollectorsConfig,
    pub api: ApiConfig,
    pub datasource: DataSourceConfig,
    /// JSON inventory of the simulated cloud
    pub inventory: Option<PathBuf>,
}

/// One collector section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorSection {
    pub enabled: bool,
    pub period_secs: u64,
}

impl Default for CollectorSection {
    fn default() -> Self {
        Self {
            enabled: true,
            period_secs: DEFAULT_SYNC_PERIOD.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CollectorsConfig {
    pub compute: CollectorSection,
    pub storage: CollectorSection,
    pub baremetal: CollectorSection,
}

/// Infrastructure API call policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub api_call_retries: u32,
    pub api_query_timeout_secs: u64,
    pub api_call_backoff_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_call_retries: 10,
            api_query_timeout_secs: 60,
            api_call_backoff_secs: 1,
        }
    }
}

impl ApiConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.api_call_retries, Duration::from_secs(self.api_call_backoff_secs))
            .with_timeout(Duration::from_secs(self.api_query_timeout_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataSourceConfig {
    pub query_timeout_secs: u64,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            query_timeout_secs: 30,
        }
    }
}

impl DataSourceConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

impl OptimizerConfig {
    /// Load configuration from the config file, if any, and the environment
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }
        let mut loaded: OptimizerConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        if loaded.service.host == ServiceConfig::default().host {
            if let Ok(hostname) = std::env::var("HOSTNAME") {
                loaded.service.host = hostname;
            }
        }
        Ok(loaded)
    }

    pub fn collector(&self, section: &CollectorSection) -> CollectorConfig {
        CollectorConfig {
            period: Duration::from_secs(section.period_secs),
            retry: self.api.retry_policy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let config = OptimizerConfig::load_from(None).unwrap();
        assert_eq!(config.decision_engine.max_audit_workers, 2);
        assert_eq!(config.applier.workflow_engine, "dag");
        assert_eq!(config.api.retry_policy().attempts, 10);
        assert!(config.collectors.baremetal.enabled);
        assert!(config.inventory.is_none());
    }

    #[test]
    fn test_toml_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
inventory = "/etc/optimizer/inventory.json"

[service]
host = "controller-1"
api_port = 9400

[decision_engine]
strategy_timeout_secs = 30

[collectors.storage]
enabled = false
period_secs = 120

[planner.weights]
migrate = 99
"#
        )
        .unwrap();

        let config = OptimizerConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.service.host, "controller-1");
        assert_eq!(config.service.api_port, 9400);
        assert_eq!(config.decision_engine.strategy_timeout(), Duration::from_secs(30));
        assert!(!config.collectors.storage.enabled);
        assert_eq!(
            config.collector(&config.collectors.storage).period,
            Duration::from_secs(120)
        );
        assert_eq!(config.planner.weights["migrate"], 99);
        assert_eq!(
            config.inventory.as_deref(),
            Some(Path::new("/etc/optimizer/inventory.json"))
        );
    }
}
