use super::*;
use crate::action::{ActionFactory, ActionHandler, ActionKind, NopAction, MIGRATE, NOP, SLEEP};
use crate::error::ErrorKind;
use crate::goal::{GoalRegistry, DUMMY};
use crate::models::{Action, Audit, AuditType};
use crate::planner::{Planner, PlannerConfig, WeightPlanner};
use crate::retry::RetryPolicy;
use crate::schema::{get_str, ParamSchema};
use crate::simulator::{fixtures::small_inventory, SimulatedCloud};
use crate::solution::{ActionDescriptor, Solution};
use crate::store::InMemoryStore;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

type Journal = Arc<Mutex<Vec<String>>>;

/// `nop` replacement that journals executions and reverts
struct Recording {
    name: String,
    fail: bool,
    journal: Journal,
}

#[async_trait]
impl ActionHandler for Recording {
    fn action_type(&self) -> &'static str {
        NOP
    }

    async fn execute(&mut self) -> crate::error::Result<bool> {
        self.journal.lock().unwrap().push(format!("execute:{}", self.name));
        if self.fail {
            return Err(OptimizerError::ExternalUnavailable(format!("{} exploded", self.name)));
        }
        Ok(true)
    }

    async fn revert(&mut self) -> crate::error::Result<()> {
        self.journal.lock().unwrap().push(format!("revert:{}", self.name));
        Ok(())
    }
}

struct RecordingFactory {
    journal: Journal,
}

impl ActionFactory for RecordingFactory {
    fn action_type(&self) -> &'static str {
        NOP
    }

    fn schema(&self) -> ParamSchema {
        NopAction::schema()
    }

    fn build(
        &self,
        _resource_id: &str,
        params: &Map<String, Value>,
        _ctx: &ActionContext,
    ) -> crate::error::Result<Box<dyn ActionHandler>> {
        let name = get_str(params, "message").unwrap_or_default().to_string();
        Ok(Box::new(Recording {
            fail: name.starts_with("fail"),
            name,
            journal: self.journal.clone(),
        }))
    }
}

struct Harness {
    store: Arc<InMemoryStore>,
    cloud: Arc<SimulatedCloud>,
    bus: StatusBus,
    applier: Applier,
    journal: Journal,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let bus = StatusBus::default();
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));

    let mut registry = ActionRegistry::builtin();
    registry.register(Arc::new(RecordingFactory {
        journal: journal.clone(),
    }));
    let context = ActionContext::new()
        .with_compute(cloud.clone())
        .with_baremetal(cloud.clone())
        .with_storage(cloud.clone())
        .with_retry(RetryPolicy::new(2, Duration::from_millis(1)))
        .with_poll(RetryPolicy::new(5, Duration::from_millis(1)));

    let applier = Applier::builder()
        .store(store.clone())
        .registry(registry)
        .context(context)
        .bus(bus.clone())
        .build()
        .unwrap();
    Harness {
        store,
        cloud,
        bus,
        applier,
        journal,
    }
}

/// Persist a plan; each entry is (type, resource, params, parent indexes)
fn persist_plan(store: &InMemoryStore, entries: Vec<(&str, &str, Value, Vec<usize>)>) -> (ActionPlan, Vec<Action>) {
    let plan = store
        .create_action_plan(ActionPlan::new(Uuid::new_v4(), "test"))
        .unwrap();
    let mut actions: Vec<Action> = Vec::new();
    for (action_type, resource, params, parents) in entries {
        let mut action = Action::new(
            plan.uuid,
            action_type,
            resource,
            params.as_object().cloned().unwrap_or_default(),
        );
        action.parents = parents.iter().map(|i| actions[*i].uuid).collect();
        actions.push(store.create_action(action).unwrap());
    }
    (plan, actions)
}

fn state_of(store: &InMemoryStore, action: &Action) -> ActionState {
    store.get_action(action.uuid).unwrap().state
}

async fn wait_for_plan(store: &InMemoryStore, uuid: Uuid, state: ActionPlanState) -> ActionPlan {
    for _ in 0..400 {
        let plan = store.get_action_plan(uuid).unwrap();
        if plan.state == state {
            return plan;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("plan {} never reached {:?}", uuid, state);
}

#[tokio::test]
async fn test_dummy_plan_runs_to_success() {
    let h = harness();
    let mut events = h.bus.subscribe();

    let mut solution = Solution::new();
    solution.add_action(ActionDescriptor::new(NOP, "").param("message", "hello"));
    solution.add_action(ActionDescriptor::new(NOP, "").param("message", "Welcome"));
    solution.add_action(ActionDescriptor::new(SLEEP, "").param("duration", 1.0));
    let planner = WeightPlanner::new(h.store.clone(), ActionRegistry::builtin(), PlannerConfig::default());
    let audit = Audit::new("dummy", AuditType::Oneshot, DUMMY);
    let goal = GoalRegistry::builtin().get(DUMMY).unwrap();
    let plan = planner.schedule(&audit, "dummy", &goal, &solution).unwrap();

    let done = h.applier.apply_action_plan(plan.uuid).await.unwrap();
    assert_eq!(done.state, ActionPlanState::Succeeded);

    let actions = h.store.list_actions(&ActionFilter::for_plan(plan.uuid)).unwrap();
    assert_eq!(actions.len(), 3);
    assert!(actions.iter().all(|a| a.state == ActionState::Succeeded));

    let mut per_action: HashMap<Uuid, Vec<ActionState>> = HashMap::new();
    let mut plan_states = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            StatusEvent::ActionStateChanged { action_uuid, to, .. } => {
                per_action.entry(action_uuid).or_default().push(to)
            }
            StatusEvent::ActionPlanStateChanged { to, .. } => plan_states.push(to),
            _ => {}
        }
    }
    assert_eq!(per_action.len(), 3);
    for states in per_action.values() {
        assert_eq!(states, &vec![ActionState::Ongoing, ActionState::Succeeded]);
    }
    assert_eq!(
        plan_states,
        vec![
            ActionPlanState::Pending,
            ActionPlanState::Ongoing,
            ActionPlanState::Succeeded
        ]
    );
}

#[tokio::test]
async fn test_failure_rolls_back_succeeded_actions() {
    let h = harness();
    h.cloud.fail("live_migrate");
    let (plan, actions) = persist_plan(
        &h.store,
        vec![
            (NOP, "", json!({"message": "ok"}), vec![]),
            (
                MIGRATE,
                "vm-1",
                json!({"migration_type": "live", "source_node": "host-1", "destination_node": "host-2"}),
                vec![0],
            ),
        ],
    );

    let done = h.applier.apply_action_plan(plan.uuid).await.unwrap();
    assert_eq!(done.state, ActionPlanState::Failed);
    assert!(done.status_message.unwrap().contains("live_migrate"));
    assert_eq!(state_of(&h.store, &actions[0]), ActionState::Succeeded);
    assert_eq!(state_of(&h.store, &actions[1]), ActionState::Failed);

    let journal = h.journal.lock().unwrap().clone();
    assert_eq!(journal, vec!["execute:ok", "revert:ok"]);
    // Two attempts by the action, no migration back.
    assert_eq!(h.cloud.calls("live_migrate"), 2);
}

#[tokio::test]
async fn test_rollback_runs_in_reverse_completion_order() {
    let h = harness();
    let (plan, actions) = persist_plan(
        &h.store,
        vec![
            (NOP, "", json!({"message": "a"}), vec![]),
            (NOP, "", json!({"message": "b"}), vec![0]),
            (NOP, "", json!({"message": "fail-c"}), vec![1]),
            (NOP, "", json!({"message": "d"}), vec![2]),
        ],
    );

    let done = h.applier.apply_action_plan(plan.uuid).await.unwrap();
    assert_eq!(done.state, ActionPlanState::Failed);
    assert_eq!(state_of(&h.store, &actions[2]), ActionState::Failed);
    assert_eq!(state_of(&h.store, &actions[3]), ActionState::Cancelled);

    let journal = h.journal.lock().unwrap().clone();
    assert_eq!(
        journal,
        vec!["execute:a", "execute:b", "execute:fail-c", "revert:b", "revert:a"]
    );
}

#[tokio::test]
async fn test_failure_cancels_pending_before_in_flight_finish() {
    let h = harness();
    let mut events = h.bus.subscribe();
    let (plan, actions) = persist_plan(
        &h.store,
        vec![
            (SLEEP, "", json!({"duration": 0.2}), vec![]),
            (NOP, "", json!({"message": "fail-fast"}), vec![]),
            (NOP, "", json!({"message": "after"}), vec![0]),
        ],
    );

    let done = h.applier.apply_action_plan(plan.uuid).await.unwrap();
    assert_eq!(done.state, ActionPlanState::Failed);
    assert_eq!(state_of(&h.store, &actions[0]), ActionState::Succeeded);
    assert_eq!(state_of(&h.store, &actions[2]), ActionState::Cancelled);

    let mut order = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let StatusEvent::ActionStateChanged { action_uuid, to, .. } = event {
            if matches!(to, ActionState::Cancelled | ActionState::Succeeded) {
                order.push((action_uuid, to));
            }
        }
    }
    assert_eq!(
        order,
        vec![
            (actions[2].uuid, ActionState::Cancelled),
            (actions[0].uuid, ActionState::Succeeded),
        ]
    );
}

#[tokio::test]
async fn test_succeeded_actions_have_succeeded_parents() {
    let h = harness();
    let (plan, actions) = persist_plan(
        &h.store,
        vec![
            (NOP, "", json!({"message": "root"}), vec![]),
            (NOP, "", json!({"message": "fail-left"}), vec![0]),
            (NOP, "", json!({"message": "right"}), vec![0]),
            (NOP, "", json!({"message": "join"}), vec![1, 2]),
        ],
    );

    h.applier.apply_action_plan(plan.uuid).await.unwrap();
    let by_id: HashMap<Uuid, Action> = h
        .store
        .list_actions(&ActionFilter::for_plan(plan.uuid))
        .unwrap()
        .into_iter()
        .map(|a| (a.uuid, a))
        .collect();
    for action in by_id.values() {
        if action.state == ActionState::Succeeded {
            assert!(action
                .parents
                .iter()
                .all(|p| by_id[p].state == ActionState::Succeeded));
        }
    }
    assert_eq!(by_id[&actions[3].uuid].state, ActionState::Cancelled);
}

#[tokio::test]
async fn test_only_recommended_plans_start() {
    let h = harness();
    let (plan, _) = persist_plan(&h.store, vec![(NOP, "", json!({}), vec![])]);
    h.applier.apply_action_plan(plan.uuid).await.unwrap();

    let err = h.applier.launch_action_plan(plan.uuid).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let mut superseded = h.store.get_action_plan(plan.uuid).unwrap();
    superseded.state = ActionPlanState::Superseded;
    h.store.update_action_plan(&superseded).unwrap();
    let err = h.applier.launch_action_plan(plan.uuid).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = h.applier.launch_action_plan(Uuid::new_v4()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_cancel_before_start() {
    let h = harness();
    let (plan, actions) = persist_plan(&h.store, vec![(NOP, "", json!({"message": "x"}), vec![])]);

    let cancelled = h.applier.cancel_action_plan(plan.uuid).unwrap();
    assert_eq!(cancelled.state, ActionPlanState::Cancelled);
    assert_eq!(state_of(&h.store, &actions[0]), ActionState::Cancelled);
    assert!(h.journal.lock().unwrap().is_empty());

    let err = h.applier.cancel_action_plan(plan.uuid).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn test_cancel_running_plan_lets_in_flight_finish() {
    let h = harness();
    let (plan, actions) = persist_plan(
        &h.store,
        vec![
            (SLEEP, "", json!({"duration": 0.2}), vec![]),
            (NOP, "", json!({"message": "after"}), vec![0]),
        ],
    );

    let launched = h.applier.launch_action_plan(plan.uuid).unwrap();
    assert_eq!(launched.state, ActionPlanState::Pending);
    wait_for_plan(&h.store, plan.uuid, ActionPlanState::Ongoing).await;

    let cancelling = h.applier.cancel_action_plan(plan.uuid).unwrap();
    assert_eq!(cancelling.state, ActionPlanState::Cancelling);

    let done = wait_for_plan(&h.store, plan.uuid, ActionPlanState::Cancelled).await;
    assert_eq!(done.state, ActionPlanState::Cancelled);
    assert_eq!(state_of(&h.store, &actions[0]), ActionState::Succeeded);
    assert_eq!(state_of(&h.store, &actions[1]), ActionState::Cancelled);
    // Cancellation is not a failure: nothing is reverted.
    assert!(h.journal.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_action_type_fails_plan() {
    let h = harness();
    let (plan, actions) = persist_plan(&h.store, vec![("teleport", "vm-1", json!({}), vec![])]);
    let done = h.applier.apply_action_plan(plan.uuid).await.unwrap();
    assert_eq!(done.state, ActionPlanState::Failed);
    assert_eq!(state_of(&h.store, &actions[0]), ActionState::Failed);
}

#[test]
fn test_topological_order_rejects_cycles() {
    let plan = Uuid::new_v4();
    let mut a = Action::new(plan, NOP, "", Map::new());
    let mut b = Action::new(plan, NOP, "", Map::new());
    a.parents = vec![b.uuid];
    b.parents = vec![a.uuid];
    let err = topological_order(&[a.clone(), b]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);

    a.parents = vec![Uuid::new_v4()];
    assert!(topological_order(&[a]).is_err());
}

#[test]
fn test_unknown_workflow_engine_is_rejected() {
    let result = Applier::builder()
        .store(Arc::new(InMemoryStore::new()))
        .context(ActionContext::new())
        .config(ApplierConfig {
            workflow_engine: "taskflow".to_string(),
            pool_margin: 0,
        })
        .build();
    assert!(result.is_err());
}
