use super::notification::VolumeEndpoint;
use super::{ModelBuilder, NotificationEndpoint};
use crate::adapters::StorageApi;
use crate::cdm::StorageModel;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Builds the storage model from the block storage service
pub struct StorageModelBuilder {
    api: Arc<dyn StorageApi>,
}

impl StorageModelBuilder {
    pub fn new(api: Arc<dyn StorageApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ModelBuilder for StorageModelBuilder {
    type Model = StorageModel;

    async fn build(&self) -> Result<StorageModel> {
        let nodes = self
            .api
            .list_storage_nodes()
            .await
            .context("Failed to list storage services")?;
        let pools = self.api.list_pools().await.context("Failed to list pools")?;
        let volumes = self
            .api
            .list_volumes()
            .await
            .context("Failed to list volumes")?;

        let mut model = StorageModel::new();
        for node in nodes {
            model.add_node(node)?;
        }
        for hosted in pools {
            if model.get_node(&hosted.host).is_none() {
                debug!(pool = %hosted.pool.name, host = %hosted.host, "Pool on unknown backend");
                continue;
            }
            model.add_pool(hosted.pool, &hosted.host)?;
        }
        for pooled in volumes {
            if model.get_pool(&pooled.pool).is_none() {
                debug!(volume = %pooled.volume.uuid, pool = %pooled.pool, "Volume in unknown pool");
                continue;
            }
            model.add_volume(pooled.volume, &pooled.pool)?;
        }
        Ok(model)
    }

    fn notification_endpoints(&self) -> Vec<Box<dyn NotificationEndpoint<StorageModel>>> {
        vec![Box::new(VolumeEndpoint)]
    }
}
