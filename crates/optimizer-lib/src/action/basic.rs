use super::{ActionContext, ActionHandler, ActionKind, NOP, SLEEP};
use crate::error::Result;
use crate::schema::{get_f64, get_str, Field, FieldType, ParamSchema};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::info;

/// Logs a message and does nothing else
pub struct NopAction {
    message: String,
}

#[async_trait]
impl ActionHandler for NopAction {
    fn action_type(&self) -> &'static str {
        NOP
    }

    async fn execute(&mut self) -> Result<bool> {
        info!(message = %self.message, "Executing nop action");
        Ok(true)
    }

    async fn revert(&mut self) -> Result<()> {
        info!(message = %self.message, "Reverting nop action");
        Ok(())
    }
}

impl ActionKind for NopAction {
    const TYPE: &'static str = NOP;

    fn schema() -> ParamSchema {
        ParamSchema::new().field(
            Field::new("message", FieldType::String)
                .default_value(json!(""))
                .describe("Message to log"),
        )
    }

    fn build(_resource_id: &str, params: &Map<String, Value>, _ctx: &ActionContext) -> Result<Self> {
        Ok(Self {
            message: get_str(params, "message").unwrap_or_default().to_string(),
        })
    }
}

/// Waits for a fixed duration
pub struct SleepAction {
    duration: Duration,
}

#[async_trait]
impl ActionHandler for SleepAction {
    fn action_type(&self) -> &'static str {
        SLEEP
    }

    async fn execute(&mut self) -> Result<bool> {
        info!(duration_ms = self.duration.as_millis() as u64, "Sleeping");
        tokio::time::sleep(self.duration).await;
        Ok(true)
    }

    async fn revert(&mut self) -> Result<()> {
        Ok(())
    }
}

impl ActionKind for SleepAction {
    const TYPE: &'static str = SLEEP;

    fn schema() -> ParamSchema {
        ParamSchema::new().field(
            Field::new(
                "duration",
                FieldType::Number {
                    min: Some(0.0),
                    max: None,
                },
            )
            .default_value(json!(1.0))
            .describe("Time to sleep, in seconds"),
        )
    }

    fn build(_resource_id: &str, params: &Map<String, Value>, _ctx: &ActionContext) -> Result<Self> {
        let seconds = get_f64(params, "duration").unwrap_or(1.0);
        Ok(Self {
            duration: Duration::from_secs_f64(seconds),
        })
    }
}
