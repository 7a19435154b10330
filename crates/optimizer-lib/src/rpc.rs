//! Request/response RPC
//!
//! Each manager listens on a conductor topic. Requests and responses are
//! JSON documents correlated by `request_id`; failures carry the error kind
//! so callers can tell a bad request from an unavailable dependency.

use crate::applier::Applier;
use crate::collector::Notification;
use crate::decision::{AuditRequest, DecisionEngine};
use crate::error::{ErrorKind, OptimizerError, Result};
use crate::models::{ActionPlanState, AuditState, AuditType};
use crate::store::{ActionFilter, ActionPlanFilter, AuditFilter};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

pub const DECISION_ENGINE_TOPIC: &str = "decision_engine.conductor";
pub const APPLIER_TOPIC: &str = "applier.conductor";

/// Wire protocol version; requests must share the major number
pub const RPC_VERSION: &str = "1.0";

fn default_version() -> String {
    RPC_VERSION.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default = "Uuid::new_v4")]
    pub request_id: Uuid,
    #[serde(default = "default_version")]
    pub version: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            version: default_version(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub request_id: Uuid,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    fn from_result(request_id: Uuid, result: Result<Value>) -> Self {
        let (result, error) = match result {
            Ok(value) => (Some(value), None),
            Err(e) => (
                None,
                Some(RpcError {
                    kind: e.kind(),
                    message: e.to_string(),
                }),
            ),
        };
        Self {
            request_id,
            version: default_version(),
            result,
            error,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Deserialize)]
struct AuditRef {
    audit_uuid: Uuid,
}

#[derive(Deserialize)]
struct PlanRef {
    action_plan_uuid: Uuid,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct AuditQuery {
    state: Option<AuditState>,
    audit_type: Option<AuditType>,
    goal: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PlanQuery {
    audit_uuid: Option<Uuid>,
    state: Option<ActionPlanState>,
}

fn params<T: DeserializeOwned>(value: Value) -> Result<T> {
    let value = if value.is_null() { json!({}) } else { value };
    serde_json::from_value(value).map_err(|e| OptimizerError::invalid(format!("invalid params: {}", e)))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| OptimizerError::internal(format!("cannot encode result: {}", e)))
}

/// Routes RPC requests to the decision engine and the applier
#[derive(Clone)]
pub struct Dispatcher {
    engine: DecisionEngine,
    applier: Applier,
}

impl Dispatcher {
    pub fn new(engine: DecisionEngine, applier: Applier) -> Self {
        Self { engine, applier }
    }

    pub fn topics() -> [&'static str; 2] {
        [DECISION_ENGINE_TOPIC, APPLIER_TOPIC]
    }

    pub async fn dispatch(&self, topic: &str, request: RpcRequest) -> RpcResponse {
        let request_id = request.request_id;
        debug!(topic, method = %request.method, request_id = %request_id, "RPC request");
        let result = self.route(topic, request).await;
        if let Err(e) = &result {
            warn!(topic, request_id = %request_id, kind = %e.kind(), error = %e, "RPC request failed");
        }
        RpcResponse::from_result(request_id, result)
    }

    async fn route(&self, topic: &str, request: RpcRequest) -> Result<Value> {
        let major = request.version.split('.').next().unwrap_or_default();
        if major != "1" {
            return Err(OptimizerError::invalid(format!(
                "unsupported RPC version '{}'",
                request.version
            )));
        }
        match topic {
            DECISION_ENGINE_TOPIC => self.decision_engine(request).await,
            APPLIER_TOPIC => self.applier(request),
            other => Err(OptimizerError::not_found("topic", other)),
        }
    }

    async fn decision_engine(&self, request: RpcRequest) -> Result<Value> {
        let engine = &self.engine;
        match request.method.as_str() {
            "create_audit" => to_value(&engine.create_audit(params::<AuditRequest>(request.params)?)?),
            "get_audit" => {
                let p: AuditRef = params(request.params)?;
                to_value(&engine.get_audit(p.audit_uuid)?)
            }
            "list_audits" => {
                let q: AuditQuery = params(request.params)?;
                let filter = AuditFilter {
                    state: q.state,
                    audit_type: q.audit_type,
                    goal: q.goal,
                    ..Default::default()
                };
                to_value(&engine.store().list_audits(&filter)?)
            }
            "trigger_audit" => {
                let p: AuditRef = params(request.params)?;
                to_value(&engine.trigger_audit(p.audit_uuid, request.request_id)?)
            }
            "cancel_audit" => {
                let p: AuditRef = params(request.params)?;
                to_value(&engine.cancel_audit(p.audit_uuid)?)
            }
            "suspend_audit" => {
                let p: AuditRef = params(request.params)?;
                to_value(&engine.suspend_audit(p.audit_uuid)?)
            }
            "resume_audit" => {
                let p: AuditRef = params(request.params)?;
                to_value(&engine.resume_audit(p.audit_uuid)?)
            }
            "notify" => {
                let notification: Notification = params(request.params)?;
                let handled = engine
                    .notify(notification)
                    .await
                    .map_err(|e| OptimizerError::internal(format!("notification task failed: {}", e)))??;
                Ok(json!({ "handled": handled }))
            }
            other => Err(OptimizerError::invalid(format!(
                "unknown method '{}' on {}",
                other, DECISION_ENGINE_TOPIC
            ))),
        }
    }

    fn applier(&self, request: RpcRequest) -> Result<Value> {
        let store = self.engine.store();
        match request.method.as_str() {
            "launch_action_plan" => {
                let p: PlanRef = params(request.params)?;
                to_value(&self.applier.launch_action_plan(p.action_plan_uuid)?)
            }
            "cancel_action_plan" => {
                let p: PlanRef = params(request.params)?;
                to_value(&self.applier.cancel_action_plan(p.action_plan_uuid)?)
            }
            "get_action_plan" => {
                let p: PlanRef = params(request.params)?;
                let plan = store.get_action_plan(p.action_plan_uuid)?;
                let indicators = store.list_efficacy_indicators(plan.uuid)?;
                Ok(json!({
                    "action_plan": to_value(&plan)?,
                    "efficacy_indicators": to_value(&indicators)?,
                }))
            }
            "list_action_plans" => {
                let q: PlanQuery = params(request.params)?;
                let filter = ActionPlanFilter {
                    audit_uuid: q.audit_uuid,
                    state: q.state,
                    ..Default::default()
                };
                to_value(&store.list_action_plans(&filter)?)
            }
            "list_actions" => {
                let p: PlanRef = params(request.params)?;
                store.get_action_plan(p.action_plan_uuid)?;
                to_value(&store.list_actions(&ActionFilter::for_plan(p.action_plan_uuid))?)
            }
            other => Err(OptimizerError::invalid(format!(
                "unknown method '{}' on {}",
                other, APPLIER_TOPIC
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionContext;
    use crate::collector::{CollectorConfig, CollectorManager};
    use crate::retry::RetryPolicy;
    use crate::simulator::{fixtures::small_inventory, SimulatedCloud};
    use crate::store::InMemoryStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn dispatcher() -> Dispatcher {
        let store = Arc::new(InMemoryStore::new());
        let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
        let collectors = CollectorManager::for_provider(
            cloud.clone(),
            CollectorConfig {
                period: Duration::from_secs(3600),
                retry: RetryPolicy::new(1, Duration::from_millis(1)),
            },
        );
        let applier = Applier::builder()
            .store(store.clone())
            .context(ActionContext::new().with_compute(cloud))
            .build()
            .unwrap();
        let engine = DecisionEngine::builder()
            .store(store)
            .collectors(Arc::new(collectors))
            .applier(applier.clone())
            .build()
            .unwrap();
        Dispatcher::new(engine, applier)
    }

    async fn call(d: &Dispatcher, topic: &str, method: &str, params: Value) -> RpcResponse {
        d.dispatch(topic, RpcRequest::new(method, params)).await
    }

    #[tokio::test]
    async fn test_audit_to_plan_over_rpc() {
        let d = dispatcher();
        let created = call(
            &d,
            DECISION_ENGINE_TOPIC,
            "create_audit",
            json!({"goal": "dummy", "parameters": {"para1": 0.01}}),
        )
        .await;
        assert!(created.is_ok(), "{:?}", created.error);
        let audit_uuid = created.result.unwrap()["uuid"].clone();

        let request = RpcRequest::new("trigger_audit", json!({ "audit_uuid": audit_uuid }));
        let request_id = request.request_id;
        let triggered = d.dispatch(DECISION_ENGINE_TOPIC, request).await;
        assert_eq!(triggered.request_id, request_id);
        assert_eq!(triggered.version, RPC_VERSION);

        let mut plans = Vec::new();
        for _ in 0..400 {
            let listed = call(&d, APPLIER_TOPIC, "list_action_plans", json!({ "audit_uuid": audit_uuid })).await;
            plans = listed.result.unwrap().as_array().cloned().unwrap_or_default();
            if !plans.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0]["state"], "RECOMMENDED");

        let plan_uuid = plans[0]["uuid"].clone();
        let actions = call(&d, APPLIER_TOPIC, "list_actions", json!({ "action_plan_uuid": plan_uuid })).await;
        assert!(!actions.result.unwrap().as_array().unwrap().is_empty());

        let detail = call(&d, APPLIER_TOPIC, "get_action_plan", json!({ "action_plan_uuid": plan_uuid })).await;
        assert!(detail.result.unwrap()["efficacy_indicators"].is_array());

        let cancelled = call(&d, APPLIER_TOPIC, "cancel_action_plan", json!({ "action_plan_uuid": plan_uuid })).await;
        assert_eq!(cancelled.result.unwrap()["state"], "CANCELLED");
    }

    #[tokio::test]
    async fn test_errors_carry_kind() {
        let d = dispatcher();
        let cases = [
            (DECISION_ENGINE_TOPIC, "create_audit", json!({"goal": "nope"}), ErrorKind::InvalidInput),
            (DECISION_ENGINE_TOPIC, "get_audit", json!({"audit_uuid": Uuid::new_v4()}), ErrorKind::NotFound),
            (DECISION_ENGINE_TOPIC, "get_audit", json!({"audit_uuid": "not-a-uuid"}), ErrorKind::InvalidInput),
            (DECISION_ENGINE_TOPIC, "explode", Value::Null, ErrorKind::InvalidInput),
            (APPLIER_TOPIC, "launch_action_plan", json!({"action_plan_uuid": Uuid::new_v4()}), ErrorKind::NotFound),
            ("watcher.unknown", "trigger_audit", Value::Null, ErrorKind::NotFound),
        ];
        for (topic, method, params, kind) in cases {
            let response = call(&d, topic, method, params).await;
            assert_eq!(response.error.map(|e| e.kind), Some(kind), "{} {}", topic, method);
        }

        let mut request = RpcRequest::new("get_audit", json!({"audit_uuid": Uuid::new_v4()}));
        request.version = "2.0".to_string();
        let response = d.dispatch(DECISION_ENGINE_TOPIC, request).await;
        assert_eq!(response.error.unwrap().kind, ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_notify_updates_model() {
        let d = dispatcher();
        d.engine
            .collectors()
            .compute()
            .unwrap()
            .synchronize()
            .await
            .unwrap();

        let response = call(
            &d,
            DECISION_ENGINE_TOPIC,
            "notify",
            json!({"domain": "compute", "payload": {"event": "instance_deleted", "uuid": "vm-3"}}),
        )
        .await;
        assert_eq!(response.result, Some(json!({"handled": true})));

        let model = d
            .engine
            .collectors()
            .compute()
            .unwrap()
            .get_latest_cluster_data_model()
            .await
            .unwrap();
        assert!(model.node_of_instance("vm-3").is_none());
    }

    #[test]
    fn test_request_defaults() {
        let request: RpcRequest = serde_json::from_value(json!({"method": "get_audit"})).unwrap();
        assert_eq!(request.version, RPC_VERSION);
        assert!(request.params.is_null());
    }
}
