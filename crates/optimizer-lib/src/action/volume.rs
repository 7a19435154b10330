use super::{call, ActionContext, ActionHandler, ActionKind, VOLUME_MIGRATE};
use crate::adapters::{PooledVolume, StorageApi};
use crate::error::{OptimizerError, Result};
use crate::retry::{poll_until, RetryPolicy};
use crate::schema::{get_str, Field, FieldType, ParamSchema};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
enum VolumeChange {
    /// Move to another pool
    Migrate(String),
    /// Change the volume type in place
    Retype(String),
}

/// Moves a volume to another pool or changes its type
pub struct VolumeMigrateAction {
    storage: Arc<dyn StorageApi>,
    retry: RetryPolicy,
    poll: RetryPolicy,
    volume: String,
    change: VolumeChange,
    undo: Option<VolumeChange>,
}

impl VolumeMigrateAction {
    async fn current(&self) -> Result<PooledVolume> {
        let storage = &self.storage;
        let volume = self.volume.as_str();
        call(&self.retry, "get_volume", || storage.get_volume(volume))
            .await?
            .ok_or_else(|| OptimizerError::not_found("volume", volume))
    }

    async fn apply(&self, change: &VolumeChange) -> Result<bool> {
        let storage = &self.storage;
        let volume = self.volume.as_str();
        match change {
            VolumeChange::Migrate(pool) => {
                call(&self.retry, "migrate_volume", || storage.migrate_volume(volume, pool)).await?;
                let pool = pool.clone();
                Ok(poll_until(&self.poll, "volume migration completion", || {
                    let storage = storage.clone();
                    let volume = volume.to_string();
                    let pool = pool.clone();
                    async move {
                        let current = storage.get_volume(&volume).await?;
                        Ok(current.map_or(false, |v| v.pool == pool))
                    }
                })
                .await)
            }
            VolumeChange::Retype(volume_type) => {
                call(&self.retry, "retype_volume", || storage.retype_volume(volume, volume_type))
                    .await?;
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl ActionHandler for VolumeMigrateAction {
    fn action_type(&self) -> &'static str {
        VOLUME_MIGRATE
    }

    async fn pre_condition(&mut self) -> Result<()> {
        let current = self.current().await?;
        if let VolumeChange::Migrate(pool) = &self.change {
            if &current.pool == pool {
                return Err(OptimizerError::invalid(format!(
                    "volume {} is already in pool {}",
                    self.volume, pool
                )));
            }
        }
        Ok(())
    }

    async fn execute(&mut self) -> Result<bool> {
        let current = self.current().await?;
        info!(volume = %self.volume, change = ?self.change, "Changing volume placement");
        let undo = match &self.change {
            VolumeChange::Migrate(_) => VolumeChange::Migrate(current.pool),
            VolumeChange::Retype(_) => VolumeChange::Retype(current.volume.volume_type),
        };
        let done = self.apply(&self.change).await?;
        self.undo = Some(undo);
        Ok(done)
    }

    async fn revert(&mut self) -> Result<()> {
        let Some(undo) = self.undo.take() else {
            return Ok(());
        };
        self.apply(&undo).await.map(|_| ())
    }
}

impl ActionKind for VolumeMigrateAction {
    const TYPE: &'static str = VOLUME_MIGRATE;

    fn schema() -> ParamSchema {
        ParamSchema::new()
            .field(
                Field::new("migration_type", FieldType::Enum(&["migrate", "retype"]))
                    .default_value(json!("migrate")),
            )
            .field(
                Field::new("destination_node", FieldType::NonEmptyString)
                    .describe("Destination pool for a migration"),
            )
            .field(
                Field::new("destination_type", FieldType::NonEmptyString)
                    .describe("Target volume type for a retype"),
            )
    }

    fn build(resource_id: &str, params: &Map<String, Value>, ctx: &ActionContext) -> Result<Self> {
        if resource_id.is_empty() {
            return Err(OptimizerError::invalid("volume_migrate needs the volume as resource id"));
        }
        let change = match get_str(params, "migration_type").unwrap_or("migrate") {
            "retype" => VolumeChange::Retype(
                get_str(params, "destination_type")
                    .ok_or_else(|| OptimizerError::invalid("retype requires 'destination_type'"))?
                    .to_string(),
            ),
            _ => VolumeChange::Migrate(
                get_str(params, "destination_node")
                    .ok_or_else(|| OptimizerError::invalid("migrate requires 'destination_node'"))?
                    .to_string(),
            ),
        };
        Ok(Self {
            storage: ctx.storage()?,
            retry: ctx.retry,
            poll: ctx.poll,
            volume: resource_id.to_string(),
            change,
            undo: None,
        })
    }
}
