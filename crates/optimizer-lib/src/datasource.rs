//! Time-series metrics access for strategies
//!
//! A [`DataSource`] answers one question: the aggregated value of a metric
//! for a resource over a period. Missing data is `Ok(None)`, never an error.
//! Strategies go through [`MetricsClient`], which applies the query timeout
//! and folds timeouts and backend errors into missing data.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout of a single datasource query
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Metric names understood by the bundled strategies
pub mod metrics {
    pub const HOST_CPU_USAGE: &str = "host_cpu_usage";
    pub const HOST_RAM_USAGE: &str = "host_ram_usage";
    pub const HOST_OUTLET_TEMP: &str = "host_outlet_temp";
    pub const HOST_POWER: &str = "host_power";
    pub const INSTANCE_CPU_USAGE: &str = "instance_cpu_usage";
    pub const INSTANCE_RAM_USAGE: &str = "instance_ram_usage";
}

/// Aggregation applied over the requested period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    #[default]
    Mean,
    Max,
    Min,
    Count,
}

impl Aggregate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregate::Mean => "mean",
            Aggregate::Max => "max",
            Aggregate::Min => "min",
            Aggregate::Count => "count",
        }
    }
}

/// Backend of time-series statistics
#[async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    async fn get_statistic(
        &self,
        resource_ref: &str,
        metric: &str,
        aggregate: Aggregate,
        period: Duration,
        granularity: Duration,
    ) -> Result<Option<f64>>;
}

/// Timeout-bounded access to a datasource
#[derive(Clone)]
pub struct MetricsClient {
    source: Arc<dyn DataSource>,
    timeout: Duration,
    granularity: Duration,
}

impl MetricsClient {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self {
            source,
            timeout: DEFAULT_QUERY_TIMEOUT,
            granularity: Duration::from_secs(300),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_granularity(mut self, granularity: Duration) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Query one statistic; timeouts and backend errors come back as `None`
    pub async fn statistic(
        &self,
        resource_ref: &str,
        metric: &str,
        aggregate: Aggregate,
        period: Duration,
    ) -> Option<f64> {
        let query = self.source.get_statistic(
            resource_ref,
            metric,
            aggregate,
            period,
            self.granularity,
        );
        match tokio::time::timeout(self.timeout, query).await {
            Ok(Ok(value)) => {
                if value.is_none() {
                    debug!(resource = %resource_ref, metric = %metric, "No datapoints");
                }
                value
            }
            Ok(Err(e)) => {
                warn!(
                    datasource = %self.source.name(),
                    resource = %resource_ref,
                    metric = %metric,
                    error = %e,
                    "Datasource query failed"
                );
                None
            }
            Err(_) => {
                warn!(
                    datasource = %self.source.name(),
                    resource = %resource_ref,
                    metric = %metric,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Datasource query timed out"
                );
                None
            }
        }
    }

    /// Mean CPU utilisation of a hypervisor, in percent
    pub async fn host_cpu_usage(&self, hostname: &str, period: Duration) -> Option<f64> {
        self.statistic(hostname, metrics::HOST_CPU_USAGE, Aggregate::Mean, period)
            .await
    }

    /// Mean memory used on a hypervisor, in MB
    pub async fn host_ram_usage(&self, hostname: &str, period: Duration) -> Option<f64> {
        self.statistic(hostname, metrics::HOST_RAM_USAGE, Aggregate::Mean, period)
            .await
    }

    pub async fn host_outlet_temp(&self, hostname: &str, period: Duration) -> Option<f64> {
        self.statistic(hostname, metrics::HOST_OUTLET_TEMP, Aggregate::Mean, period)
            .await
    }

    /// Mean CPU utilisation of an instance, in percent of its vcpus
    pub async fn instance_cpu_usage(&self, uuid: &str, period: Duration) -> Option<f64> {
        self.statistic(uuid, metrics::INSTANCE_CPU_USAGE, Aggregate::Mean, period)
            .await
    }

    pub async fn instance_ram_usage(&self, uuid: &str, period: Duration) -> Option<f64> {
        self.statistic(uuid, metrics::INSTANCE_RAM_USAGE, Aggregate::Mean, period)
            .await
    }
}

/// Fixed values keyed by `(resource, metric)`
///
/// Aggregate, period and granularity are ignored.
#[derive(Default)]
pub struct StaticDataSource {
    values: DashMap<(String, String), f64>,
    delay: Option<Duration>,
}

impl StaticDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every answer, to exercise query timeouts
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set(&self, resource_ref: impl Into<String>, metric: impl Into<String>, value: f64) {
        self.values.insert((resource_ref.into(), metric.into()), value);
    }

    pub fn remove(&self, resource_ref: &str, metric: &str) {
        self.values
            .remove(&(resource_ref.to_string(), metric.to_string()));
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
impl DataSource for StaticDataSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn get_statistic(
        &self,
        resource_ref: &str,
        metric: &str,
        _aggregate: Aggregate,
        _period: Duration,
        _granularity: Duration,
    ) -> Result<Option<f64>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .values
            .get(&(resource_ref.to_string(), metric.to_string()))
            .map(|v| *v))
    }
}
