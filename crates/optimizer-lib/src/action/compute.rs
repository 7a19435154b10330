use super::{call, ActionContext, ActionHandler, ActionKind, CHANGE_NOVA_SERVICE_STATE, MIGRATE, RESIZE};
use crate::adapters::{ComputeApi, MigrationType};
use crate::cdm::{ComputeNode, ServiceStatus};
use crate::error::{OptimizerError, Result};
use crate::retry::{poll_until, RetryPolicy};
use crate::schema::{get_str, Field, FieldType, ParamSchema};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

async fn resolve_node(
    compute: &Arc<dyn ComputeApi>,
    policy: &RetryPolicy,
    id_or_hostname: &str,
) -> Result<ComputeNode> {
    let nodes = call(policy, "list_hypervisors", || compute.list_hypervisors()).await?;
    nodes
        .into_iter()
        .find(|n| n.uuid == id_or_hostname || n.hostname == id_or_hostname)
        .ok_or_else(|| OptimizerError::not_found("compute node", id_or_hostname))
}

/// Wait until `instance` runs on a node accepted by `arrived`
async fn wait_for_placement<P>(
    compute: &Arc<dyn ComputeApi>,
    policy: &RetryPolicy,
    instance: &str,
    arrived: P,
) -> bool
where
    P: Fn(&str) -> bool + Clone + Send + Sync + 'static,
{
    poll_until(policy, "migration completion", || {
        let compute = compute.clone();
        let instance = instance.to_string();
        let arrived = arrived.clone();
        async move {
            let hosted = compute.get_instance(&instance).await?;
            Ok(hosted.map_or(false, |h| arrived(&h.node)))
        }
    })
    .await
}

/// Moves an instance off its current hypervisor
pub struct MigrateAction {
    compute: Arc<dyn ComputeApi>,
    retry: RetryPolicy,
    poll: RetryPolicy,
    instance: String,
    migration_type: MigrationType,
    source: String,
    destination: Option<String>,
    migrated_from: Option<String>,
}

impl MigrateAction {
    async fn migrate(&self, destination: Option<&str>) -> Result<()> {
        let compute = &self.compute;
        let instance = self.instance.as_str();
        match self.migration_type {
            MigrationType::Live => {
                call(&self.retry, "live_migrate", || compute.live_migrate(instance, destination)).await
            }
            MigrationType::Cold => {
                call(&self.retry, "cold_migrate", || compute.cold_migrate(instance, destination)).await
            }
        }
    }
}

#[async_trait]
impl ActionHandler for MigrateAction {
    fn action_type(&self) -> &'static str {
        MIGRATE
    }

    async fn pre_condition(&mut self) -> Result<()> {
        let compute = &self.compute;
        let instance = self.instance.as_str();
        let hosted = call(&self.retry, "get_instance", || compute.get_instance(instance))
            .await?
            .ok_or_else(|| OptimizerError::not_found("instance", instance))?;
        let source = resolve_node(compute, &self.retry, &self.source).await?;
        if hosted.node != source.uuid {
            return Err(OptimizerError::conflict(format!(
                "instance {} is not running on {}",
                instance, self.source
            )));
        }
        if let Some(destination) = &self.destination {
            let target = resolve_node(compute, &self.retry, destination).await?;
            if target.uuid == source.uuid {
                return Err(OptimizerError::invalid(format!(
                    "instance {} already runs on {}",
                    instance, destination
                )));
            }
        }
        Ok(())
    }

    async fn execute(&mut self) -> Result<bool> {
        let source = resolve_node(&self.compute, &self.retry, &self.source).await?;
        let destination = match &self.destination {
            Some(d) => Some(resolve_node(&self.compute, &self.retry, d).await?.uuid),
            None => None,
        };
        info!(
            instance = %self.instance,
            source = %source.hostname,
            destination = ?self.destination,
            migration_type = self.migration_type.as_str(),
            "Migrating instance"
        );

        self.migrate(destination.as_deref()).await?;
        self.migrated_from = Some(source.uuid.clone());

        let source_uuid = source.uuid;
        let done = wait_for_placement(&self.compute, &self.poll, &self.instance, move |node| {
            node != source_uuid && destination.as_deref().map_or(true, |d| node == d)
        })
        .await;
        if !done {
            warn!(instance = %self.instance, "Migration did not complete in time");
        }
        Ok(done)
    }

    async fn revert(&mut self) -> Result<()> {
        let Some(source) = self.migrated_from.take() else {
            return Ok(());
        };
        info!(instance = %self.instance, destination = %source, "Migrating instance back");
        self.migrate(Some(&source)).await?;
        let target = source.clone();
        if !wait_for_placement(&self.compute, &self.poll, &self.instance, move |node| node == target).await {
            return Err(OptimizerError::ExternalUnavailable(format!(
                "instance {} did not return to {}",
                self.instance, source
            )));
        }
        Ok(())
    }
}

impl ActionKind for MigrateAction {
    const TYPE: &'static str = MIGRATE;

    fn schema() -> ParamSchema {
        ParamSchema::new()
            .field(
                Field::new("migration_type", FieldType::Enum(&["live", "cold"]))
                    .default_value(json!("live")),
            )
            .field(
                Field::new("source_node", FieldType::NonEmptyString)
                    .required()
                    .describe("Hypervisor currently hosting the instance"),
            )
            .field(
                Field::new("destination_node", FieldType::NonEmptyString)
                    .describe("Target hypervisor; chosen by the scheduler when absent"),
            )
    }

    fn build(resource_id: &str, params: &Map<String, Value>, ctx: &ActionContext) -> Result<Self> {
        if resource_id.is_empty() {
            return Err(OptimizerError::invalid("migrate needs the instance as resource id"));
        }
        let migration_type = get_str(params, "migration_type")
            .and_then(MigrationType::parse)
            .unwrap_or(MigrationType::Live);
        Ok(Self {
            compute: ctx.compute()?,
            retry: ctx.retry,
            poll: ctx.poll,
            instance: resource_id.to_string(),
            migration_type,
            source: get_str(params, "source_node").unwrap_or_default().to_string(),
            destination: get_str(params, "destination_node").map(str::to_string),
            migrated_from: None,
        })
    }
}

/// Changes the flavor of an instance
pub struct ResizeAction {
    compute: Arc<dyn ComputeApi>,
    retry: RetryPolicy,
    poll: RetryPolicy,
    instance: String,
    flavor: String,
    previous_flavor: Option<String>,
}

impl ResizeAction {
    async fn resize_to(&self, flavor: &str) -> Result<bool> {
        let compute = &self.compute;
        let instance = self.instance.as_str();
        call(&self.retry, "resize", || compute.resize(instance, flavor)).await?;

        let flavor = flavor.to_string();
        let done = poll_until(&self.poll, "resize completion", || {
            let compute = compute.clone();
            let instance = instance.to_string();
            let flavor = flavor.clone();
            async move {
                let hosted = compute.get_instance(&instance).await?;
                Ok(hosted.map_or(false, |h| h.instance.flavor == flavor))
            }
        })
        .await;
        Ok(done)
    }
}

#[async_trait]
impl ActionHandler for ResizeAction {
    fn action_type(&self) -> &'static str {
        RESIZE
    }

    async fn pre_condition(&mut self) -> Result<()> {
        let compute = &self.compute;
        let flavor = self.flavor.as_str();
        call(&self.retry, "get_flavor", || compute.get_flavor(flavor))
            .await?
            .ok_or_else(|| OptimizerError::not_found("flavor", flavor))?;
        Ok(())
    }

    async fn execute(&mut self) -> Result<bool> {
        let compute = &self.compute;
        let instance = self.instance.as_str();
        let hosted = call(&self.retry, "get_instance", || compute.get_instance(instance))
            .await?
            .ok_or_else(|| OptimizerError::not_found("instance", instance))?;
        info!(instance = %instance, from = %hosted.instance.flavor, to = %self.flavor, "Resizing instance");

        let done = self.resize_to(&self.flavor).await?;
        self.previous_flavor = Some(hosted.instance.flavor);
        Ok(done)
    }

    async fn revert(&mut self) -> Result<()> {
        match self.previous_flavor.take() {
            Some(previous) if !previous.is_empty() => {
                self.resize_to(&previous).await?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl ActionKind for ResizeAction {
    const TYPE: &'static str = RESIZE;

    fn schema() -> ParamSchema {
        ParamSchema::new().field(
            Field::new("flavor", FieldType::NonEmptyString)
                .required()
                .describe("Name of the target flavor"),
        )
    }

    fn build(resource_id: &str, params: &Map<String, Value>, ctx: &ActionContext) -> Result<Self> {
        if resource_id.is_empty() {
            return Err(OptimizerError::invalid("resize needs the instance as resource id"));
        }
        Ok(Self {
            compute: ctx.compute()?,
            retry: ctx.retry,
            poll: ctx.poll,
            instance: resource_id.to_string(),
            flavor: get_str(params, "flavor").unwrap_or_default().to_string(),
            previous_flavor: None,
        })
    }
}

/// Enables or disables the compute service of a hypervisor
pub struct ChangeNovaServiceStateAction {
    compute: Arc<dyn ComputeApi>,
    retry: RetryPolicy,
    hostname: String,
    state: ServiceStatus,
    reason: Option<String>,
    previous: Option<(ServiceStatus, Option<String>)>,
}

impl ChangeNovaServiceStateAction {
    async fn apply(&self, state: ServiceStatus, reason: Option<&str>) -> Result<()> {
        let compute = &self.compute;
        let hostname = self.hostname.as_str();
        call(&self.retry, "set_service_state", || {
            compute.set_service_state(hostname, state, reason)
        })
        .await
    }
}

#[async_trait]
impl ActionHandler for ChangeNovaServiceStateAction {
    fn action_type(&self) -> &'static str {
        CHANGE_NOVA_SERVICE_STATE
    }

    async fn execute(&mut self) -> Result<bool> {
        let node = resolve_node(&self.compute, &self.retry, &self.hostname).await?;
        info!(
            host = %self.hostname,
            from = node.status.as_str(),
            to = self.state.as_str(),
            "Changing compute service state"
        );
        self.apply(self.state, self.reason.as_deref()).await?;
        self.previous = Some((node.status, node.disabled_reason));
        Ok(true)
    }

    async fn revert(&mut self) -> Result<()> {
        let Some((status, reason)) = self.previous.take() else {
            return Ok(());
        };
        self.apply(status, reason.as_deref()).await
    }
}

impl ActionKind for ChangeNovaServiceStateAction {
    const TYPE: &'static str = CHANGE_NOVA_SERVICE_STATE;

    fn schema() -> ParamSchema {
        ParamSchema::new()
            .field(Field::new("state", FieldType::Enum(&["enabled", "disabled"])).required())
            .field(Field::new("disabled_reason", FieldType::String))
    }

    fn build(resource_id: &str, params: &Map<String, Value>, ctx: &ActionContext) -> Result<Self> {
        if resource_id.is_empty() {
            return Err(OptimizerError::invalid(
                "change_nova_service_state needs the hostname as resource id",
            ));
        }
        let state = get_str(params, "state")
            .and_then(ServiceStatus::parse)
            .ok_or_else(|| OptimizerError::invalid("parameter 'state' must be enabled or disabled"))?;
        Ok(Self {
            compute: ctx.compute()?,
            retry: ctx.retry,
            hostname: resource_id.to_string(),
            state,
            reason: get_str(params, "disabled_reason").map(str::to_string),
            previous: None,
        })
    }
}
