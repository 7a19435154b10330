use super::notification::IronicNodeEndpoint;
use super::{ModelBuilder, NotificationEndpoint};
use crate::adapters::BaremetalApi;
use crate::cdm::BaremetalModel;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Builds the baremetal model from the provisioning service
pub struct BaremetalModelBuilder {
    api: Arc<dyn BaremetalApi>,
}

impl BaremetalModelBuilder {
    pub fn new(api: Arc<dyn BaremetalApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ModelBuilder for BaremetalModelBuilder {
    type Model = BaremetalModel;

    async fn build(&self) -> Result<BaremetalModel> {
        let nodes = self
            .api
            .list_nodes()
            .await
            .context("Failed to list baremetal nodes")?;
        let mut model = BaremetalModel::new();
        for node in nodes {
            model.add_node(node)?;
        }
        Ok(model)
    }

    fn notification_endpoints(&self) -> Vec<Box<dyn NotificationEndpoint<BaremetalModel>>> {
        vec![Box::new(IronicNodeEndpoint)]
    }
}
