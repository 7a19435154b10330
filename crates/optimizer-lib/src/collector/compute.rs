use super::notification::{ComputeServiceEndpoint, InstanceEndpoint};
use super::{ModelBuilder, NotificationEndpoint};
use crate::adapters::ComputeApi;
use crate::cdm::ComputeModel;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds the compute model from the compute service
pub struct ComputeModelBuilder {
    api: Arc<dyn ComputeApi>,
}

impl ComputeModelBuilder {
    pub fn new(api: Arc<dyn ComputeApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ModelBuilder for ComputeModelBuilder {
    type Model = ComputeModel;

    async fn build(&self) -> Result<ComputeModel> {
        let hypervisors = self
            .api
            .list_hypervisors()
            .await
            .context("Failed to list hypervisors")?;
        let instances = self
            .api
            .list_instances()
            .await
            .context("Failed to list instances")?;
        let aggregates = self
            .api
            .list_aggregates()
            .await
            .context("Failed to list host aggregates")?;

        let mut model = ComputeModel::new();
        for node in hypervisors {
            model.add_node(node)?;
        }
        let mut skipped = 0usize;
        for hosted in instances {
            // Instances still being scheduled have no valid host yet.
            if model.get_node(&hosted.node).is_none() {
                skipped += 1;
                debug!(instance = %hosted.instance.uuid, node = %hosted.node, "Instance on unknown node");
                continue;
            }
            model.add_instance(hosted.instance, &hosted.node)?;
        }
        for aggregate in aggregates {
            model.add_aggregate(aggregate);
        }
        if skipped > 0 {
            warn!(skipped, "Skipped instances without a known hypervisor");
        }
        Ok(model)
    }

    fn notification_endpoints(&self) -> Vec<Box<dyn NotificationEndpoint<ComputeModel>>> {
        vec![Box::new(InstanceEndpoint), Box::new(ComputeServiceEndpoint)]
    }
}
