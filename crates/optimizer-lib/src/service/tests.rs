use super::*;
use crate::action::ActionContext;
use crate::applier::Applier;
use crate::collector::{CollectorConfig, CollectorManager};
use crate::decision::{AuditRequest, DecisionEngine};
use crate::goal::GoalRegistry;
use crate::health::ComponentStatus;
use crate::models::{AuditState, AuditTemplate};
use crate::retry::RetryPolicy;
use crate::scoring::ScoringRegistry;
use crate::simulator::{fixtures::small_inventory, SimulatedCloud};
use crate::store::{InMemoryStore, Store};
use crate::strategy::StrategyRegistry;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn monitor(store: &Arc<InMemoryStore>, host: &str) -> ServiceMonitor {
    let config = ServiceConfig {
        host: host.to_string(),
        ..Default::default()
    };
    ServiceMonitor::new(store.clone(), SERVICE_NAME, config)
}

#[test]
fn test_first_active_host_leads() {
    let store = Arc::new(InMemoryStore::new());
    let alpha = monitor(&store, "alpha");
    let beta = monitor(&store, "beta");
    let now = Utc::now();

    assert!(beta.tick(now).unwrap());
    assert!(!alpha.is_leader());

    alpha.heartbeat(now).unwrap();
    assert!(!beta.tick(now).unwrap());
    assert!(alpha.tick(now).unwrap());
    assert_eq!(beta.leader().as_deref(), Some("alpha"));
}

#[test]
fn test_silent_leader_is_replaced() {
    let store = Arc::new(InMemoryStore::new());
    let alpha = monitor(&store, "alpha");
    let beta = monitor(&store, "beta");
    let start = Utc::now();

    alpha.tick(start).unwrap();
    beta.tick(start).unwrap();
    assert!(alpha.is_leader());

    // alpha stops beating; beta takes over once the down time has passed.
    let later = start + ChronoDuration::seconds(91);
    assert!(beta.tick(later).unwrap());
    assert_eq!(beta.active_services(later).unwrap().len(), 1);

    // Other service names never compete.
    let other = ServiceMonitor::new(store.clone(), "other-service", ServiceConfig::default());
    assert!(other.tick(later).unwrap());
    assert!(beta.is_leader());
}

#[tokio::test]
async fn test_leadership_watch_follows_election() {
    let store = Arc::new(InMemoryStore::new());
    let alpha = monitor(&store, "alpha");
    let mut role = alpha.leadership();
    assert!(!*role.borrow());

    alpha.tick(Utc::now()).unwrap();
    role.changed().await.unwrap();
    assert!(*role.borrow_and_update());
}

fn syncer(store: &Arc<InMemoryStore>) -> PluginSyncer {
    PluginSyncer::new(
        store.clone(),
        GoalRegistry::builtin(),
        StrategyRegistry::builtin(),
        ScoringRegistry::builtin(),
    )
}

#[test]
fn test_plugin_sync_is_idempotent() {
    let store = Arc::new(InMemoryStore::new());
    let report = syncer(&store).sync().unwrap();
    assert_eq!(report.created.len(), 7 + 8 + 1);
    assert!(report.removed.is_empty());

    assert_eq!(store.list_goals().unwrap().len(), 7);
    let consolidation = store.get_goal_by_name("server_consolidation").unwrap();
    let strategies = store.list_strategies(Some(consolidation.uuid)).unwrap();
    assert_eq!(strategies.len(), 1);
    assert_eq!(strategies[0].name, "basic");
    assert_eq!(store.list_scoring_engines().unwrap()[0].name, "dummy_scorer");

    assert!(syncer(&store).sync().unwrap().is_empty());
}

#[test]
fn test_removed_plugins_retire_their_audits() {
    let store = Arc::new(InMemoryStore::new());
    syncer(&store).sync().unwrap();

    let doomed = store
        .create_audit(crate::models::Audit::new(
            "thermal",
            crate::models::AuditType::Oneshot,
            "thermal_optimization",
        ))
        .unwrap();
    let kept = store
        .create_audit(crate::models::Audit::new(
            "dummy",
            crate::models::AuditType::Oneshot,
            "dummy",
        ))
        .unwrap();
    let template = store
        .create_audit_template(AuditTemplate {
            uuid: Uuid::new_v4(),
            name: "cool".to_string(),
            description: String::new(),
            goal: "thermal_optimization".to_string(),
            strategy: Some("outlet_temperature".to_string()),
            scope: json!([]),
            created_at: Utc::now(),
            deleted_at: None,
        })
        .unwrap();

    let mut goals = GoalRegistry::empty();
    for goal in GoalRegistry::builtin().iter() {
        if goal.name != "thermal_optimization" {
            goals.register((**goal).clone());
        }
    }
    let mut strategies = StrategyRegistry::empty();
    for strategy in StrategyRegistry::builtin().iter() {
        if strategy.name() != "outlet_temperature" {
            strategies.register(strategy.clone());
        }
    }
    let report = PluginSyncer::new(store.clone(), goals, strategies, ScoringRegistry::builtin())
        .sync()
        .unwrap();

    assert!(report.removed.contains(&"goal:thermal_optimization".to_string()));
    assert!(report.removed.contains(&"strategy:outlet_temperature".to_string()));
    assert_eq!(report.cancelled_audits, vec![doomed.uuid]);
    assert_eq!(report.removed_templates, vec![template.uuid]);

    assert_eq!(store.get_audit(doomed.uuid).unwrap().state, AuditState::Cancelled);
    assert_eq!(store.get_audit(kept.uuid).unwrap().state, AuditState::Pending);
    assert!(store.get_goal_by_name("thermal_optimization").is_err());
    assert!(store.get_audit_template(template.uuid).is_err());
}

fn runtime(store: &Arc<InMemoryStore>, cloud: &Arc<SimulatedCloud>) -> Runtime {
    let collectors = Arc::new(CollectorManager::for_provider(
        cloud.clone(),
        CollectorConfig {
            period: Duration::from_secs(3600),
            retry: RetryPolicy::new(1, Duration::from_millis(1)),
        },
    ));
    let applier = Applier::builder()
        .store(store.clone())
        .context(ActionContext::new().with_compute(cloud.clone()))
        .build()
        .unwrap();
    let engine = DecisionEngine::builder()
        .store(store.clone())
        .collectors(collectors)
        .applier(applier.clone())
        .build()
        .unwrap();
    Runtime::builder()
        .store(store.clone())
        .engine(engine)
        .applier(applier)
        .service(ServiceConfig {
            host: "alpha".to_string(),
            ..Default::default()
        })
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_runtime_starts_and_stops() {
    let store = Arc::new(InMemoryStore::new());
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let mut runtime = runtime(&store, &cloud);

    runtime.start().await.unwrap();
    assert!(runtime.monitor().is_leader());
    assert!(runtime.health().readiness().await.ready);
    assert_eq!(store.list_goals().unwrap().len(), 7);
    assert_eq!(store.list_services(Some(SERVICE_NAME)).unwrap().len(), 1);

    let audit = runtime
        .engine()
        .create_audit(AuditRequest::oneshot("dummy").parameter("para1", 0.01))
        .unwrap();
    let plan = runtime.engine().run_audit(audit.uuid, Uuid::new_v4()).await.unwrap();
    assert_eq!(store.get_action_plan(plan.uuid).unwrap().audit_uuid, audit.uuid);

    let health = runtime.health().clone();
    runtime.shutdown().await;
    assert!(!health.readiness().await.ready);
}

#[tokio::test]
async fn test_stale_model_degrades_collector() {
    let store = Arc::new(InMemoryStore::new());
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    cloud.fail("list_hypervisors");
    let mut runtime = runtime(&store, &cloud);

    runtime.start().await.unwrap();
    let health = runtime.health().health().await;
    assert_eq!(
        health.components["compute_collector"].status,
        ComponentStatus::Degraded
    );
    runtime.shutdown().await;
}
