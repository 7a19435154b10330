//! Component health of one optimizer process
//!
//! Backs `/healthz` and `/readyz`. A collector whose cluster data model went
//! stale is `degraded`: audits still run and resynchronize on demand. A
//! component that failed to start is `unhealthy` and keeps the process out
//! of rotation.

use crate::cdm::Domain;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Ordered from best to worst; the service reports its worst component
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            updated_at: Utc::now(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    fn from_components(components: BTreeMap<String, ComponentHealth>) -> Self {
        let status = components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        Self { status, components }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    use super::Domain;

    pub const DECISION_ENGINE: &str = "decision_engine";
    pub const APPLIER: &str = "applier";
    pub const COMPUTE_COLLECTOR: &str = "compute_collector";
    pub const STORAGE_COLLECTOR: &str = "storage_collector";
    pub const BAREMETAL_COLLECTOR: &str = "baremetal_collector";

    /// Component owning the model of `domain`
    pub fn collector(domain: Domain) -> &'static str {
        match domain {
            Domain::Compute => COMPUTE_COLLECTOR,
            Domain::Storage => STORAGE_COLLECTOR,
            Domain::Baremetal => BAREMETAL_COLLECTOR,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    components: BTreeMap<String, ComponentHealth>,
    started: bool,
}

/// Shared view of component health; clones observe the same state
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<State>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `name` as healthy
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Record the outcome of a model synchronization for `domain`
    pub async fn report_model(&self, domain: Domain, stale: bool) {
        let name = components::collector(domain);
        if stale {
            self.set_degraded(name, "model is stale").await;
        } else {
            self.set_healthy(name).await;
        }
    }

    /// Flip once startup has completed, and back during shutdown
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.started = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        HealthResponse::from_components(self.state.read().await.components.clone())
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        if !state.started {
            return ReadinessResponse {
                ready: false,
                reason: Some("optimizer is not started".to_string()),
            };
        }

        let failed: Vec<&str> = state
            .components
            .iter()
            .filter(|(_, c)| !c.status.is_operational())
            .map(|(name, _)| name.as_str())
            .collect();
        if failed.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("unhealthy components: {}", failed.join(", "))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_worst_component_wins() {
        let registry = HealthRegistry::new();
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);

        registry.register(components::DECISION_ENGINE).await;
        registry.register(components::APPLIER).await;
        registry.report_model(Domain::Compute, true).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry
            .set_unhealthy(components::APPLIER, "unknown workflow engine 'taskflow'")
            .await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Unhealthy);
        assert_eq!(
            health.components.keys().collect::<Vec<_>>(),
            vec!["applier", "compute_collector", "decision_engine"]
        );
    }

    #[tokio::test]
    async fn test_model_resync_clears_degradation() {
        let registry = HealthRegistry::new();
        registry.report_model(Domain::Storage, true).await;
        let stale = &registry.health().await.components[components::STORAGE_COLLECTOR];
        assert_eq!(stale.message.as_deref(), Some("model is stale"));

        registry.report_model(Domain::Storage, false).await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components[components::STORAGE_COLLECTOR].message.is_none());
    }

    #[tokio::test]
    async fn test_readiness() {
        let registry = HealthRegistry::new();
        registry.register(components::APPLIER).await;
        registry.register(components::BAREMETAL_COLLECTOR).await;
        assert!(!registry.readiness().await.ready);

        registry.set_ready(true).await;
        registry.report_model(Domain::Baremetal, true).await;
        assert!(registry.readiness().await.ready);

        registry.set_unhealthy(components::APPLIER, "store unavailable").await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("unhealthy components: applier"));
    }
}
