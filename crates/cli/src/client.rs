//! API client for the optimizer RPC endpoint

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

pub const DECISION_ENGINE_TOPIC: &str = "decision_engine.conductor";
pub const APPLIER_TOPIC: &str = "applier.conductor";
const RPC_VERSION: &str = "1.0";

/// A failure reported by the optimizer itself
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct RpcError {
    pub kind: String,
    pub message: String,
}

/// API client for the optimizer
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Make a GET request; error statuses still carry a JSON body
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        response.json().await.context("Failed to parse response")
    }

    /// Call `method` on `topic` and decode its result
    pub async fn call<T: DeserializeOwned>(&self, topic: &str, method: &str, params: Value) -> Result<T> {
        let url = self
            .base_url
            .join(&format!("rpc/{}", topic))
            .context("Invalid path")?;
        let request = RpcRequest::new(method, params);

        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response.text().await.context("Failed to read response")?;
        let reply: RpcResponse = serde_json::from_str(&body)
            .with_context(|| format!("API error ({}): {}", status, body))?;
        reply.into_result(request.request_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub request_id: Uuid,
    pub version: String,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(method: &str, params: Value) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            version: RPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub request_id: Uuid,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorBody>,
}

impl RpcResponse {
    pub fn into_result<T: DeserializeOwned>(self, request_id: Uuid) -> Result<T> {
        if self.request_id != request_id {
            anyhow::bail!(
                "Response {} does not answer request {}",
                self.request_id,
                request_id
            );
        }
        if let Some(error) = self.error {
            return Err(RpcError {
                kind: error.kind,
                message: error.message,
            }
            .into());
        }
        serde_json::from_value(self.result.unwrap_or(Value::Null)).context("Failed to parse result")
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Audit {
    pub uuid: Uuid,
    pub name: String,
    pub audit_type: String,
    pub state: String,
    pub goal: String,
    pub strategy: Option<String>,
    #[serde(default)]
    pub scope: Value,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub interval: Option<u64>,
    #[serde(default)]
    pub auto_trigger: bool,
    pub next_run_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of `create_audit`; unset fields are left to the server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateAuditRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_type: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub goal: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    pub auto_trigger: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_template: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalEfficacy {
    pub name: String,
    pub description: String,
    pub unit: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPlan {
    pub uuid: Uuid,
    pub audit_uuid: Uuid,
    pub strategy: String,
    pub state: String,
    #[serde(default)]
    pub global_efficacy: Vec<GlobalEfficacy>,
    pub status_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EfficacyIndicator {
    pub name: String,
    pub description: String,
    pub unit: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPlanDetail {
    pub action_plan: ActionPlan,
    #[serde(default)]
    pub efficacy_indicators: Vec<EfficacyIndicator>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub uuid: Uuid,
    pub action_plan_uuid: Uuid,
    pub action_type: String,
    pub resource_id: String,
    #[serde(default)]
    pub input_parameters: Map<String, Value>,
    #[serde(default)]
    pub parents: Vec<Uuid>,
    pub state: String,
    pub status_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_response_becomes_rpc_error() {
        let id = Uuid::new_v4();
        let response: RpcResponse = serde_json::from_value(json!({
            "request_id": id,
            "version": "1.0",
            "error": {"kind": "conflict", "message": "audit x is already running"}
        }))
        .unwrap();

        let err = response.into_result::<Audit>(id).unwrap_err();
        let rpc = err.downcast_ref::<RpcError>().unwrap();
        assert_eq!(rpc.kind, "conflict");
        assert_eq!(err.to_string(), "conflict: audit x is already running");
    }

    #[test]
    fn test_mismatched_request_id_is_rejected() {
        let response = RpcResponse {
            request_id: Uuid::new_v4(),
            result: Some(json!([])),
            error: None,
        };
        assert!(response.into_result::<Vec<Action>>(Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_create_request_skips_unset_fields() {
        let body = serde_json::to_value(CreateAuditRequest {
            goal: "dummy".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(body, json!({"goal": "dummy", "auto_trigger": false}));
    }
}
