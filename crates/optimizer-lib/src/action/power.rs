use super::{call, ActionContext, ActionHandler, ActionKind, CHANGE_NODE_POWER_STATE, TURN_HOST_TO_ACPI_S3_STATE};
use crate::adapters::BaremetalApi;
use crate::cdm::{IronicNode, PowerState};
use crate::error::{OptimizerError, Result};
use crate::retry::{poll_until, RetryPolicy};
use crate::schema::{get_str, Field, FieldType, ParamSchema};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Power control of one baremetal node
struct PowerSwitch {
    baremetal: Arc<dyn BaremetalApi>,
    retry: RetryPolicy,
    poll: RetryPolicy,
}

impl PowerSwitch {
    fn new(ctx: &ActionContext) -> Result<Self> {
        Ok(Self {
            baremetal: ctx.baremetal()?,
            retry: ctx.retry,
            poll: ctx.poll,
        })
    }

    /// Find a node by uuid or by the hostname of the hypervisor it runs
    async fn resolve(&self, id_or_hostname: &str) -> Result<IronicNode> {
        let baremetal = &self.baremetal;
        let nodes = call(&self.retry, "list_nodes", || baremetal.list_nodes()).await?;
        nodes
            .into_iter()
            .find(|n| n.uuid == id_or_hostname || n.hostname.as_deref() == Some(id_or_hostname))
            .ok_or_else(|| OptimizerError::not_found("baremetal node", id_or_hostname))
    }

    /// Request `state` and wait for the node to report it
    async fn switch(&self, uuid: &str, state: PowerState) -> Result<bool> {
        let baremetal = &self.baremetal;
        call(&self.retry, "set_power_state", || baremetal.set_power_state(uuid, state)).await?;

        let done = poll_until(&self.poll, "power state change", || {
            let baremetal = baremetal.clone();
            let uuid = uuid.to_string();
            async move { Ok(baremetal.get_power_state(&uuid).await? == state) }
        })
        .await;
        if !done {
            warn!(node = %uuid, state = state.as_str(), "Power state change did not complete in time");
        }
        Ok(done)
    }
}

/// Powers a baremetal node on or off
pub struct ChangeNodePowerStateAction {
    switch: PowerSwitch,
    resource: String,
    state: PowerState,
    previous: Option<(String, PowerState)>,
}

#[async_trait]
impl ActionHandler for ChangeNodePowerStateAction {
    fn action_type(&self) -> &'static str {
        CHANGE_NODE_POWER_STATE
    }

    async fn pre_condition(&mut self) -> Result<()> {
        let node = self.switch.resolve(&self.resource).await?;
        if node.maintenance {
            return Err(OptimizerError::conflict(format!(
                "baremetal node {} is in maintenance",
                node.uuid
            )));
        }
        Ok(())
    }

    async fn execute(&mut self) -> Result<bool> {
        let node = self.switch.resolve(&self.resource).await?;
        info!(
            node = %node.uuid,
            from = node.power_state.as_str(),
            to = self.state.as_str(),
            "Changing node power state"
        );
        if node.power_state == self.state {
            return Ok(true);
        }
        let done = self.switch.switch(&node.uuid, self.state).await?;
        self.previous = Some((node.uuid, node.power_state));
        Ok(done)
    }

    async fn revert(&mut self) -> Result<()> {
        let Some((uuid, state)) = self.previous.take() else {
            return Ok(());
        };
        self.switch.switch(&uuid, state).await.map(|_| ())
    }
}

impl ActionKind for ChangeNodePowerStateAction {
    const TYPE: &'static str = CHANGE_NODE_POWER_STATE;

    fn schema() -> ParamSchema {
        ParamSchema::new().field(Field::new("state", FieldType::Enum(&["on", "off"])).required())
    }

    fn build(resource_id: &str, params: &Map<String, Value>, ctx: &ActionContext) -> Result<Self> {
        if resource_id.is_empty() {
            return Err(OptimizerError::invalid(
                "change_node_power_state needs the node as resource id",
            ));
        }
        let state = get_str(params, "state")
            .and_then(PowerState::parse)
            .ok_or_else(|| OptimizerError::invalid("parameter 'state' must be on or off"))?;
        Ok(Self {
            switch: PowerSwitch::new(ctx)?,
            resource: resource_id.to_string(),
            state,
            previous: None,
        })
    }
}

/// Suspends the machine behind a hypervisor to RAM
pub struct TurnHostToAcpiS3StateAction {
    switch: PowerSwitch,
    hostname: String,
    suspended: Option<String>,
}

#[async_trait]
impl ActionHandler for TurnHostToAcpiS3StateAction {
    fn action_type(&self) -> &'static str {
        TURN_HOST_TO_ACPI_S3_STATE
    }

    async fn execute(&mut self) -> Result<bool> {
        let node = self.switch.resolve(&self.hostname).await?;
        info!(host = %self.hostname, node = %node.uuid, "Turning host to ACPI S3 state");
        let done = self.switch.switch(&node.uuid, PowerState::Suspended).await?;
        self.suspended = Some(node.uuid);
        Ok(done)
    }

    async fn revert(&mut self) -> Result<()> {
        let Some(uuid) = self.suspended.take() else {
            return Ok(());
        };
        self.switch.switch(&uuid, PowerState::On).await.map(|_| ())
    }
}

impl ActionKind for TurnHostToAcpiS3StateAction {
    const TYPE: &'static str = TURN_HOST_TO_ACPI_S3_STATE;

    fn schema() -> ParamSchema {
        ParamSchema::new()
    }

    fn build(resource_id: &str, _params: &Map<String, Value>, ctx: &ActionContext) -> Result<Self> {
        if resource_id.is_empty() {
            return Err(OptimizerError::invalid(
                "turn_host_to_acpi_s3_state needs the hostname as resource id",
            ));
        }
        Ok(Self {
            switch: PowerSwitch::new(ctx)?,
            hostname: resource_id.to_string(),
            suspended: None,
        })
    }
}
