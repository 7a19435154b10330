use super::*;
use crate::action::{ActionRegistry, CHANGE_NODE_POWER_STATE, NOP, SLEEP};
use crate::cdm::PowerState;
use crate::collector::CollectorConfig;
use crate::datasource::{metrics, StaticDataSource};
use crate::error::ErrorKind;
use crate::goal::{indicators, GoalRegistry};
use crate::retry::RetryPolicy;
use crate::simulator::{fixtures::small_inventory, Inventory, SimulatedCloud};
use serde_json::json;

fn collectors(cloud: &Arc<SimulatedCloud>) -> CollectorManager {
    CollectorManager::for_provider(
        cloud.clone(),
        CollectorConfig {
            period: Duration::from_secs(3600),
            retry: RetryPolicy::new(1, Duration::from_millis(1)),
        },
    )
}

async fn context(
    cloud: &Arc<SimulatedCloud>,
    strategy: &dyn Strategy,
    parameters: Value,
) -> Result<StrategyContext> {
    let parameters = strategy.schema().validate(parameters.as_object().unwrap())?;
    let snapshot = ClusterSnapshot::load(&collectors(cloud), strategy.domains(), &json!([])).await?;
    Ok(StrategyContext::new(Uuid::new_v4(), parameters, snapshot)
        .with_metrics(MetricsClient::new(cloud.datasource())))
}

/// Every proposed action must pass its type's schema
fn assert_valid_actions(solution: &Solution) {
    let registry = ActionRegistry::builtin();
    for action in &solution.actions {
        registry
            .validate(&action.action_type, &action.input_parameters)
            .unwrap();
    }
}

fn assert_meets_goal(strategy: &dyn Strategy, solution: &Solution) {
    let goal = GoalRegistry::builtin().get(strategy.goal()).unwrap();
    goal.efficacy.validate(&solution.indicators).unwrap();
}

#[test]
fn test_registry_selection() {
    let registry = StrategyRegistry::builtin();
    assert_eq!(registry.iter().count(), 8);
    assert_eq!(registry.select("server_consolidation", None).unwrap().name(), "basic");
    assert_eq!(registry.select("dummy", Some("dummy")).unwrap().name(), "dummy");

    let err = registry.select("dummy", Some("basic")).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(registry.select("dummy", Some("missing")).is_err());

    let goals = GoalRegistry::builtin();
    for strategy in registry.iter() {
        assert!(goals.get(strategy.goal()).is_ok(), "{} has no goal", strategy.name());
    }
}

#[tokio::test]
async fn test_dummy_strategy() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let ctx = context(&cloud, &DummyStrategy, json!({"para1": 0.5})).await.unwrap();
    let solution = DummyStrategy.execute(&ctx).await.unwrap();

    assert_eq!(solution.count(NOP), 2);
    assert_eq!(solution.count(SLEEP), 1);
    assert_eq!(solution.actions[0].input_parameters["message"], "hello");
    assert_eq!(solution.actions[2].input_parameters["duration"], json!(0.5));
    assert_valid_actions(&solution);
    assert_meets_goal(&DummyStrategy, &solution);
}

#[tokio::test]
async fn test_dummy_rejects_unknown_parameter() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let err = context(&cloud, &DummyStrategy, json!({"para3": 1})).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn test_dummy_with_scorer() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let ctx = context(&cloud, &DummyWithScorer, json!({})).await.unwrap();
    let solution = DummyWithScorer.execute(&ctx).await.unwrap();
    assert_eq!(solution.len(), 1);
    let message = solution.actions[0].input_parameters["message"].as_str().unwrap();
    assert!(message.starts_with("dummy_scorer load class"));
}

#[tokio::test]
async fn test_actuator_passes_actions_through() {
    let cloud = Arc::new(SimulatedCloud::new(Inventory::default()));
    let params = json!({"actions": [
        {"action_type": "nop", "input_parameters": {"message": "a"}},
        {"action_type": "change_nova_service_state", "resource_id": "host-1",
         "input_parameters": {"state": "disabled"}}
    ]});
    let ctx = context(&cloud, &Actuator, params).await.unwrap();
    let solution = Actuator.execute(&ctx).await.unwrap();
    assert_eq!(solution.len(), 2);
    assert_eq!(solution.actions[1].resource_id, "host-1");
    assert_valid_actions(&solution);

    let bad = context(&cloud, &Actuator, json!({"actions": [{"resource_id": "x"}]}))
        .await
        .unwrap();
    assert_eq!(Actuator.execute(&bad).await.unwrap_err().kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn test_basic_consolidation_releases_lightest_host() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let ctx = context(&cloud, &BasicConsolidation, json!({})).await.unwrap();
    let solution = BasicConsolidation.execute(&ctx).await.unwrap();

    assert_eq!(solution.count(MIGRATE), 1);
    assert_eq!(solution.count(CHANGE_NOVA_SERVICE_STATE), 1);
    let migrate = &solution.actions[0];
    assert_eq!(migrate.resource_id, "vm-3");
    assert_eq!(migrate.input_parameters["source_node"], "host-2");
    assert_eq!(migrate.input_parameters["destination_node"], "host-1");
    assert_eq!(solution.actions[1].resource_id, "host-2");

    assert_eq!(solution.indicators[indicators::COMPUTE_NODES_COUNT], 2.0);
    assert_eq!(solution.indicators[indicators::RELEASED_COMPUTE_NODES_COUNT], 1.0);
    assert_eq!(solution.indicators[indicators::INSTANCE_MIGRATIONS_COUNT], 1.0);
    assert_valid_actions(&solution);
    assert_meets_goal(&BasicConsolidation, &solution);

    // The snapshot handed to the strategy is untouched.
    let model = ctx.snapshot.compute().unwrap();
    assert_eq!(model.node_of_instance("vm-3").unwrap().uuid, "node-2");
}

#[tokio::test]
async fn test_basic_consolidation_respects_exclusions() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let scope = json!([{"compute": [{"exclude": [{"instances": [{"uuid": "vm-3"}]}]}]}]);
    let snapshot = ClusterSnapshot::load(&collectors(&cloud), &[Domain::Compute], &scope)
        .await
        .unwrap();
    let parameters = BasicConsolidation.schema().validate(&Map::new()).unwrap();
    let ctx = StrategyContext::new(Uuid::new_v4(), parameters, snapshot);
    let solution = BasicConsolidation.execute(&ctx).await.unwrap();

    // vm-3 is pinned, whatever else gets consolidated
    assert!(solution.actions.iter().all(|a| a.resource_id != "vm-3"));
    assert_meets_goal(&BasicConsolidation, &solution);
}

#[tokio::test]
async fn test_empty_model_is_refused() {
    let cloud = Arc::new(SimulatedCloud::new(Inventory::default()));
    let err = context(&cloud, &BasicConsolidation, json!({})).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::CdmEmpty);
}

#[tokio::test]
async fn test_stale_model_is_refused() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    cloud.fail("list_hypervisors");
    let err = context(&cloud, &BasicConsolidation, json!({})).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::CdmStale);
}

#[tokio::test]
async fn test_outlet_temperature() {
    let mut inventory = small_inventory();
    inventory.metrics.clear();
    let cloud = Arc::new(SimulatedCloud::new(inventory));
    let source: Arc<StaticDataSource> = cloud.datasource();
    source.set("host-1", metrics::HOST_OUTLET_TEMP, 42.0);
    source.set("host-2", metrics::HOST_OUTLET_TEMP, 21.0);

    let ctx = context(&cloud, &OutletTemperature, json!({"threshold": 35.0})).await.unwrap();
    let solution = OutletTemperature.execute(&ctx).await.unwrap();
    assert_eq!(solution.count(MIGRATE), 1);
    assert_eq!(solution.actions[0].input_parameters["source_node"], "host-1");
    assert_eq!(solution.actions[0].input_parameters["destination_node"], "host-2");
    assert_meets_goal(&OutletTemperature, &solution);

    let calm = context(&cloud, &OutletTemperature, json!({"threshold": 50.0})).await.unwrap();
    assert!(OutletTemperature.execute(&calm).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_workload_balance() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let source = cloud.datasource();
    source.set("vm-1", metrics::INSTANCE_CPU_USAGE, 100.0);
    source.set("vm-2", metrics::INSTANCE_CPU_USAGE, 100.0);
    source.set("vm-3", metrics::INSTANCE_CPU_USAGE, 10.0);

    // node-1: 4 of 16 vcpus busy (25%), node-2: 0.1 of 16 (< 1%)
    let ctx = context(&cloud, &WorkloadBalance, json!({"threshold": 20.0})).await.unwrap();
    let solution = WorkloadBalance.execute(&ctx).await.unwrap();
    assert_eq!(solution.count(MIGRATE), 1);
    assert_eq!(solution.actions[0].input_parameters["source_node"], "host-1");
    let before = solution.indicators[indicators::STANDARD_DEVIATION_BEFORE];
    let after = solution.indicators[indicators::STANDARD_DEVIATION_AFTER];
    assert!(after < before);
    assert_meets_goal(&WorkloadBalance, &solution);
}

#[tokio::test]
async fn test_host_maintenance() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let ctx = context(
        &cloud,
        &HostMaintenance,
        json!({"maintenance_node": "host-1", "backup_node": "host-2"}),
    )
    .await
    .unwrap();
    let solution = HostMaintenance.execute(&ctx).await.unwrap();
    assert_eq!(solution.count(CHANGE_NOVA_SERVICE_STATE), 1);
    assert_eq!(solution.count(MIGRATE), 2);
    assert!(solution
        .actions
        .iter()
        .filter(|a| a.action_type == MIGRATE)
        .all(|a| a.input_parameters["destination_node"] == "host-2"));
    assert_valid_actions(&solution);
    assert_meets_goal(&HostMaintenance, &solution);

    let missing = context(&cloud, &HostMaintenance, json!({})).await.err().unwrap();
    assert_eq!(missing.kind(), ErrorKind::InvalidInput);

    let unknown = context(&cloud, &HostMaintenance, json!({"maintenance_node": "host-9"}))
        .await
        .unwrap();
    assert!(HostMaintenance.execute(&unknown).await.is_err());
}

#[tokio::test]
async fn test_saving_energy_powers_off_spare_hosts() {
    let mut inventory = small_inventory();
    // Empty host-2 and give host-1 a machine as well.
    for hosted in &mut inventory.instances {
        hosted.node = "node-1".to_string();
    }
    inventory
        .baremetal_nodes
        .push(crate::cdm::IronicNode::new("bm-0").with_hostname("host-1"));
    let cloud = Arc::new(SimulatedCloud::new(inventory));

    let ctx = context(&cloud, &SavingEnergy, json!({"min_free_hosts_num": 0})).await.unwrap();
    let solution = SavingEnergy.execute(&ctx).await.unwrap();
    // One busy host at 10% rounds up to one spare: host-2 stays on.
    assert!(solution.is_empty());

    cloud
        .mutate(|inv| {
            inv.baremetal_nodes.push(
                crate::cdm::IronicNode::new("bm-2").with_hostname("host-3"),
            );
            inv.hypervisors.push(
                crate::cdm::ComputeNode::new("node-3", "host-3").with_capacity(8, 16384, 100),
            );
        })
        .unwrap();
    let ctx = context(&cloud, &SavingEnergy, json!({})).await.unwrap();
    let solution = SavingEnergy.execute(&ctx).await.unwrap();
    assert_eq!(solution.count(CHANGE_NODE_POWER_STATE), 1);
    assert_eq!(solution.actions[0].resource_id, "bm-2");
    assert_eq!(solution.actions[0].input_parameters["state"], PowerState::Off.as_str());
    assert_eq!(solution.indicators[indicators::POWERED_OFF_NODES_COUNT], 1.0);
    assert_valid_actions(&solution);
    assert_meets_goal(&SavingEnergy, &solution);
}
