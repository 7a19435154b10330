use super::*;
use crate::cdm::{PowerState, ServiceStatus};
use crate::error::ErrorKind;
use crate::simulator::{fixtures::small_inventory, SimulatedCloud};
use serde_json::json;
use std::time::Duration;

fn context(cloud: &Arc<SimulatedCloud>) -> ActionContext {
    ActionContext::new()
        .with_compute(cloud.clone())
        .with_baremetal(cloud.clone())
        .with_storage(cloud.clone())
        .with_retry(RetryPolicy::new(2, Duration::from_millis(1)))
        .with_poll(RetryPolicy::new(5, Duration::from_millis(1)))
}

fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn node_of(cloud: &SimulatedCloud, instance: &str) -> String {
    cloud
        .snapshot()
        .unwrap()
        .instances
        .into_iter()
        .find(|i| i.instance.uuid == instance)
        .unwrap()
        .node
}

#[test]
fn test_builtin_registry() {
    let registry = ActionRegistry::builtin();
    assert_eq!(registry.types().count(), 8);
    assert!(registry.contains(MIGRATE));
    assert_eq!(
        registry.get("teleport").err().unwrap().kind(),
        ErrorKind::InvalidInput
    );
}

#[test]
fn test_parameter_validation() {
    let registry = ActionRegistry::builtin();

    let sleep = registry.validate(SLEEP, &Map::new()).unwrap();
    assert_eq!(sleep["duration"], json!(1.0));

    let err = registry
        .validate(MIGRATE, &params(json!({"destination_node": "host-2"})))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = registry
        .validate(NOP, &params(json!({"message": "hi", "color": "red"})))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = registry
        .validate(MIGRATE, &params(json!({"source_node": "host-1", "migration_type": "warp"})))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let valid = params(json!({"source_node": "host-1", "migration_type": "cold"}));
    assert_eq!(registry.validate(MIGRATE, &valid).unwrap(), valid);
}

#[tokio::test]
async fn test_nop_and_sleep() {
    let registry = ActionRegistry::builtin();
    let ctx = ActionContext::new();

    let mut nop = registry
        .build(NOP, "", &params(json!({"message": "hello"})), &ctx)
        .unwrap();
    assert!(nop.execute().await.unwrap());
    nop.revert().await.unwrap();

    let mut sleep = registry
        .build(SLEEP, "", &params(json!({"duration": 0.01})), &ctx)
        .unwrap();
    let start = std::time::Instant::now();
    assert!(sleep.execute().await.unwrap());
    assert!(start.elapsed() >= Duration::from_millis(10));
}

#[tokio::test]
async fn test_migrate_and_revert() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let registry = ActionRegistry::builtin();
    let mut action = registry
        .build(
            MIGRATE,
            "vm-1",
            &params(json!({"source_node": "host-1", "destination_node": "host-2"})),
            &context(&cloud),
        )
        .unwrap();

    action.pre_condition().await.unwrap();
    assert!(action.execute().await.unwrap());
    assert_eq!(node_of(&cloud, "vm-1"), "node-2");
    assert_eq!(cloud.calls("live_migrate"), 1);

    action.revert().await.unwrap();
    assert_eq!(node_of(&cloud, "vm-1"), "node-1");
}

#[tokio::test]
async fn test_migrate_wrong_source_rejected() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let mut action = ActionRegistry::builtin()
        .build(
            MIGRATE,
            "vm-3",
            &params(json!({"source_node": "host-1", "migration_type": "cold"})),
            &context(&cloud),
        )
        .unwrap();
    assert_eq!(
        action.pre_condition().await.unwrap_err().kind(),
        ErrorKind::Conflict
    );
}

#[tokio::test]
async fn test_migrate_failure_is_external() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    cloud.fail("live_migrate");
    let mut action = ActionRegistry::builtin()
        .build(
            MIGRATE,
            "vm-1",
            &params(json!({"source_node": "host-1"})),
            &context(&cloud),
        )
        .unwrap();
    let err = action.execute().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalUnavailable);
    assert_eq!(cloud.calls("live_migrate"), 2);

    // Nothing moved, so nothing to undo.
    action.revert().await.unwrap();
    assert_eq!(cloud.calls("live_migrate"), 2);
    assert_eq!(node_of(&cloud, "vm-1"), "node-1");
}

#[tokio::test]
async fn test_resize() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let registry = ActionRegistry::builtin();
    let mut action = registry
        .build(RESIZE, "vm-2", &params(json!({"flavor": "m1.large"})), &context(&cloud))
        .unwrap();
    action.pre_condition().await.unwrap();
    assert!(action.execute().await.unwrap());

    let inventory = cloud.snapshot().unwrap();
    let vm = inventory.instances.iter().find(|i| i.instance.uuid == "vm-2").unwrap();
    assert_eq!(vm.instance.vcpus, 4);

    let mut missing = registry
        .build(RESIZE, "vm-2", &params(json!({"flavor": "m1.huge"})), &context(&cloud))
        .unwrap();
    assert_eq!(
        missing.pre_condition().await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[tokio::test]
async fn test_service_state_and_revert() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let mut action = ActionRegistry::builtin()
        .build(
            CHANGE_NOVA_SERVICE_STATE,
            "host-1",
            &params(json!({"state": "disabled", "disabled_reason": "optimizer"})),
            &context(&cloud),
        )
        .unwrap();
    assert!(action.execute().await.unwrap());
    let node = cloud.snapshot().unwrap().hypervisors.remove(0);
    assert_eq!(node.status, ServiceStatus::Disabled);
    assert_eq!(node.disabled_reason.as_deref(), Some("optimizer"));

    action.revert().await.unwrap();
    let node = cloud.snapshot().unwrap().hypervisors.remove(0);
    assert_eq!(node.status, ServiceStatus::Enabled);
}

#[tokio::test]
async fn test_power_actions() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let registry = ActionRegistry::builtin();

    let mut off = registry
        .build(CHANGE_NODE_POWER_STATE, "bm-1", &params(json!({"state": "off"})), &context(&cloud))
        .unwrap();
    off.pre_condition().await.unwrap();
    assert!(off.execute().await.unwrap());
    assert_eq!(cloud.snapshot().unwrap().baremetal_nodes[0].power_state, PowerState::Off);
    off.revert().await.unwrap();
    assert_eq!(cloud.snapshot().unwrap().baremetal_nodes[0].power_state, PowerState::On);

    let mut s3 = registry
        .build(TURN_HOST_TO_ACPI_S3_STATE, "host-2", &Map::new(), &context(&cloud))
        .unwrap();
    assert!(s3.execute().await.unwrap());
    assert_eq!(
        cloud.snapshot().unwrap().baremetal_nodes[0].power_state,
        PowerState::Suspended
    );
    s3.revert().await.unwrap();
    assert_eq!(cloud.snapshot().unwrap().baremetal_nodes[0].power_state, PowerState::On);
}

#[tokio::test]
async fn test_power_change_refused_in_maintenance() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    cloud
        .mutate(|inventory| inventory.baremetal_nodes[0].maintenance = true)
        .unwrap();
    let mut action = ActionRegistry::builtin()
        .build(CHANGE_NODE_POWER_STATE, "host-2", &params(json!({"state": "off"})), &context(&cloud))
        .unwrap();
    assert_eq!(
        action.pre_condition().await.unwrap_err().kind(),
        ErrorKind::Conflict
    );
}

#[tokio::test]
async fn test_volume_migrate_and_retype() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let registry = ActionRegistry::builtin();

    let mut migrate = registry
        .build(
            VOLUME_MIGRATE,
            "vol-1",
            &params(json!({"destination_node": "host@lvm#b"})),
            &context(&cloud),
        )
        .unwrap();
    migrate.pre_condition().await.unwrap();
    assert!(migrate.execute().await.unwrap());
    assert_eq!(cloud.snapshot().unwrap().volumes[0].pool, "host@lvm#b");
    migrate.revert().await.unwrap();
    assert_eq!(cloud.snapshot().unwrap().volumes[0].pool, "host@lvm#a");

    let original_type = cloud.snapshot().unwrap().volumes[0].volume.volume_type.clone();
    let mut retype = registry
        .build(
            VOLUME_MIGRATE,
            "vol-1",
            &params(json!({"migration_type": "retype", "destination_type": "ssd"})),
            &context(&cloud),
        )
        .unwrap();
    assert!(retype.execute().await.unwrap());
    assert_eq!(cloud.snapshot().unwrap().volumes[0].volume.volume_type, "ssd");
    retype.revert().await.unwrap();
    assert_eq!(cloud.snapshot().unwrap().volumes[0].volume.volume_type, original_type);

    let err = registry
        .build(VOLUME_MIGRATE, "vol-1", &params(json!({"migration_type": "retype"})), &context(&cloud))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn test_missing_adapter_is_internal() {
    let err = ActionRegistry::builtin()
        .build(MIGRATE, "vm-1", &params(json!({"source_node": "host-1"})), &ActionContext::new())
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Internal);
}
