//! Action framework
//!
//! Every action type declares a parameter schema that is checked when the
//! plan is created, and builds a handler that the applier executes. Handlers
//! keep whatever they need to undo their own effect.

mod basic;
mod compute;
mod power;
mod volume;

#[cfg(test)]
mod tests;

pub use basic::{NopAction, SleepAction};
pub use compute::{ChangeNovaServiceStateAction, MigrateAction, ResizeAction};
pub use power::{ChangeNodePowerStateAction, TurnHostToAcpiS3StateAction};
pub use volume::VolumeMigrateAction;

use crate::adapters::{BaremetalApi, ComputeApi, StorageApi};
use crate::error::{OptimizerError, Result};
use crate::retry::{retry, RetryPolicy};
use crate::schema::ParamSchema;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

pub const NOP: &str = "nop";
pub const SLEEP: &str = "sleep";
pub const MIGRATE: &str = "migrate";
pub const RESIZE: &str = "resize";
pub const CHANGE_NOVA_SERVICE_STATE: &str = "change_nova_service_state";
pub const CHANGE_NODE_POWER_STATE: &str = "change_node_power_state";
pub const VOLUME_MIGRATE: &str = "volume_migrate";
pub const TURN_HOST_TO_ACPI_S3_STATE: &str = "turn_host_to_acpi_s3_state";

/// Executable form of one planned action
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn action_type(&self) -> &'static str;

    async fn pre_condition(&mut self) -> Result<()> {
        Ok(())
    }

    /// Apply the change; `Ok(false)` means the action ran but did not succeed
    async fn execute(&mut self) -> Result<bool>;

    /// Undo the change on a best-effort basis
    async fn revert(&mut self) -> Result<()>;

    async fn post_condition(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Infrastructure access handed to action handlers
#[derive(Clone, Default)]
pub struct ActionContext {
    pub compute: Option<Arc<dyn ComputeApi>>,
    pub baremetal: Option<Arc<dyn BaremetalApi>>,
    pub storage: Option<Arc<dyn StorageApi>>,
    /// Policy for individual API calls
    pub retry: RetryPolicy,
    /// Policy for waiting on long-running operations
    pub poll: RetryPolicy,
}

impl ActionContext {
    pub fn new() -> Self {
        Self {
            poll: RetryPolicy::completion_poll(),
            ..Default::default()
        }
    }

    pub fn with_compute(mut self, compute: Arc<dyn ComputeApi>) -> Self {
        self.compute = Some(compute);
        self
    }

    pub fn with_baremetal(mut self, baremetal: Arc<dyn BaremetalApi>) -> Self {
        self.baremetal = Some(baremetal);
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageApi>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll(mut self, poll: RetryPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn compute(&self) -> Result<Arc<dyn ComputeApi>> {
        self.compute
            .clone()
            .ok_or_else(|| OptimizerError::internal("compute adapter is not configured"))
    }

    pub fn baremetal(&self) -> Result<Arc<dyn BaremetalApi>> {
        self.baremetal
            .clone()
            .ok_or_else(|| OptimizerError::internal("baremetal adapter is not configured"))
    }

    pub fn storage(&self) -> Result<Arc<dyn StorageApi>> {
        self.storage
            .clone()
            .ok_or_else(|| OptimizerError::internal("storage adapter is not configured"))
    }
}

/// Run one external call under `policy`, mapping exhaustion to `external_unavailable`
pub(crate) async fn call<T, F, Fut>(policy: &RetryPolicy, operation: &str, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    retry(policy, operation, op).await.map_err(OptimizerError::external)
}

/// A statically known action type
pub trait ActionKind: ActionHandler + Sized + 'static {
    const TYPE: &'static str;

    fn schema() -> ParamSchema;

    /// Build from parameters that already passed [`ActionKind::schema`]
    fn build(resource_id: &str, params: &Map<String, Value>, ctx: &ActionContext) -> Result<Self>;
}

/// Registry entry: schema plus handler construction
pub trait ActionFactory: Send + Sync {
    fn action_type(&self) -> &'static str;

    fn schema(&self) -> ParamSchema;

    fn build(
        &self,
        resource_id: &str,
        params: &Map<String, Value>,
        ctx: &ActionContext,
    ) -> Result<Box<dyn ActionHandler>>;
}

struct Builtin<A>(PhantomData<fn() -> A>);

impl<A: ActionKind> ActionFactory for Builtin<A> {
    fn action_type(&self) -> &'static str {
        A::TYPE
    }

    fn schema(&self) -> ParamSchema {
        A::schema()
    }

    fn build(
        &self,
        resource_id: &str,
        params: &Map<String, Value>,
        ctx: &ActionContext,
    ) -> Result<Box<dyn ActionHandler>> {
        Ok(Box::new(A::build(resource_id, params, ctx)?))
    }
}

/// Name -> action factory lookup
#[derive(Clone, Default)]
pub struct ActionRegistry {
    factories: BTreeMap<&'static str, Arc<dyn ActionFactory>>,
}

impl ActionRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register_kind::<NopAction>();
        registry.register_kind::<SleepAction>();
        registry.register_kind::<MigrateAction>();
        registry.register_kind::<ResizeAction>();
        registry.register_kind::<ChangeNovaServiceStateAction>();
        registry.register_kind::<ChangeNodePowerStateAction>();
        registry.register_kind::<VolumeMigrateAction>();
        registry.register_kind::<TurnHostToAcpiS3StateAction>();
        registry
    }

    pub fn register_kind<A: ActionKind>(&mut self) {
        self.register(Arc::new(Builtin::<A>(PhantomData)));
    }

    /// Add or replace a factory
    pub fn register(&mut self, factory: Arc<dyn ActionFactory>) {
        self.factories.insert(factory.action_type(), factory);
    }

    pub fn get(&self, action_type: &str) -> Result<&Arc<dyn ActionFactory>> {
        self.factories
            .get(action_type)
            .ok_or_else(|| OptimizerError::invalid(format!("unknown action type '{}'", action_type)))
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.factories.contains_key(action_type)
    }

    pub fn types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    /// Check parameters for `action_type`, returning them with defaults applied
    pub fn validate(&self, action_type: &str, params: &Map<String, Value>) -> Result<Map<String, Value>> {
        self.get(action_type)?.schema().validate(params)
    }

    /// Build a handler for a persisted action
    pub fn build(
        &self,
        action_type: &str,
        resource_id: &str,
        params: &Map<String, Value>,
        ctx: &ActionContext,
    ) -> Result<Box<dyn ActionHandler>> {
        let factory = self.get(action_type)?;
        let params = factory.schema().validate(params)?;
        factory.build(resource_id, &params, ctx)
    }
}
