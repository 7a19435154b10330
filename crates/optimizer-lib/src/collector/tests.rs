//! Collector tests against the simulated cloud

use super::*;
use crate::cdm::{ComputeModel, Instance, NodeState, PowerState, ServiceStatus};
use crate::error::ErrorKind;
use crate::simulator::{fixtures::small_inventory, Inventory, SimulatedCloud};
use serde_json::json;

fn fast_config() -> CollectorConfig {
    CollectorConfig {
        period: Duration::from_millis(50),
        retry: RetryPolicy::new(2, Duration::from_millis(1)),
    }
}

fn compute_collector(cloud: &Arc<SimulatedCloud>) -> ComputeCollector {
    DataModelCollector::new(ComputeModelBuilder::new(cloud.clone()), fast_config())
}

#[tokio::test]
async fn test_first_read_builds_model() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let collector = compute_collector(&cloud);
    assert!(collector.is_stale());

    let model = collector.get_latest_cluster_data_model().await.unwrap();
    assert_eq!(model.node_count(), 2);
    assert_eq!(model.instance_count(), 3);
    assert_eq!(model.aggregates().count(), 1);
    assert!(!collector.is_stale());
    assert_eq!(collector.generation(), 1);
}

#[tokio::test]
async fn test_snapshot_is_isolated_from_live_model() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let collector = compute_collector(&cloud);

    let mut snapshot = collector.get_latest_cluster_data_model().await.unwrap();
    snapshot.migrate_instance("vm-1", "node-2").unwrap();
    snapshot.remove_node("node-2").unwrap();

    let live = collector.get_latest_cluster_data_model().await.unwrap();
    assert_eq!(live.node_of_instance("vm-1").unwrap().uuid, "node-1");
    assert_eq!(live.node_count(), 2);
}

#[tokio::test]
async fn test_failed_sync_marks_stale_and_keeps_model() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let collector = compute_collector(&cloud);
    collector.synchronize().await.unwrap();

    cloud.fail("list_hypervisors");
    let err = collector.synchronize().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalUnavailable);
    assert!(collector.is_stale());
    assert_eq!(cloud.calls("list_hypervisors"), 3);
    assert_eq!(collector.node_count().await, 2);

    let err = collector.get_latest_cluster_data_model().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CdmStale);

    cloud.clear_faults();
    assert!(collector.get_latest_cluster_data_model().await.is_ok());
    assert!(!collector.is_stale());
}

#[tokio::test]
async fn test_transient_failure_recovered_by_retry() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let collector = compute_collector(&cloud);
    cloud.fail_times("list_instances", 1);
    collector.synchronize().await.unwrap();
    assert!(!collector.is_stale());
}

#[tokio::test]
async fn test_empty_model_refused() {
    let cloud = Arc::new(SimulatedCloud::new(Inventory::default()));
    let collector = compute_collector(&cloud);
    let err = collector.get_scoped_model(&json!([])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CdmEmpty);
}

#[tokio::test]
async fn test_scoped_model() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let collector = compute_collector(&cloud);
    let scope = json!([{"compute": [{"availability_zones": [{"name": "az2"}]}]}]);
    let model = collector.get_scoped_model(&scope).await.unwrap();
    assert_eq!(model.node_count(), 1);
    assert!(model.get_instance("vm-3").is_some());

    let bad = json!([{"compute": [{"availability_zones": ["*", "az1"]}]}]);
    assert_eq!(
        collector.get_scoped_model(&bad).await.unwrap_err().kind(),
        ErrorKind::InvalidInput
    );
}

#[tokio::test]
async fn test_compute_notifications() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let collector = compute_collector(&cloud);
    collector.synchronize().await.unwrap();
    assert_eq!(collector.notification_endpoints().len(), 2);

    let created = Notification::Compute(ComputeEvent::InstanceCreated {
        instance: Instance::new("vm-9").with_resources(1, 512, 1),
        node: "node-2".to_string(),
    });
    assert!(collector.handle_notification(&created).await.unwrap());

    let migrated = Notification::Compute(ComputeEvent::InstanceMigrated {
        uuid: "vm-1".to_string(),
        destination: "host-2".to_string(),
    });
    collector.handle_notification(&migrated).await.unwrap();

    let disabled = Notification::Compute(ComputeEvent::ServiceUpdated {
        hostname: "host-1".to_string(),
        status: ServiceStatus::Disabled,
        state: NodeState::Up,
        disabled_reason: Some("maintenance".to_string()),
    });
    collector.handle_notification(&disabled).await.unwrap();

    let model = collector.get_latest_cluster_data_model().await.unwrap();
    assert_eq!(model.instances_on("node-2").len(), 3);
    assert_eq!(model.get_node("node-1").unwrap().status, ServiceStatus::Disabled);
}

/// Enumerates the cloud, then holds the result before handing it back
struct SlowComputeBuilder {
    inner: ComputeModelBuilder,
    hold: Duration,
}

#[async_trait::async_trait]
impl ModelBuilder for SlowComputeBuilder {
    type Model = ComputeModel;

    async fn build(&self) -> anyhow::Result<ComputeModel> {
        let model = self.inner.build().await?;
        tokio::time::sleep(self.hold).await;
        Ok(model)
    }

    fn notification_endpoints(&self) -> Vec<Box<dyn NotificationEndpoint<ComputeModel>>> {
        self.inner.notification_endpoints()
    }
}

#[tokio::test]
async fn test_notification_during_rebuild_survives_swap() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let builder = SlowComputeBuilder {
        inner: ComputeModelBuilder::new(cloud.clone()),
        hold: Duration::from_millis(200),
    };
    let collector = Arc::new(DataModelCollector::new(builder, fast_config()));
    collector.synchronize().await.unwrap();

    let rebuild = {
        let collector = collector.clone();
        tokio::spawn(async move { collector.synchronize().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let created = Notification::Compute(ComputeEvent::InstanceCreated {
        instance: Instance::new("vm-new").with_resources(1, 512, 1),
        node: "node-2".to_string(),
    });
    assert!(collector.handle_notification(&created).await.unwrap());
    rebuild.await.unwrap().unwrap();

    let model = collector.get_latest_cluster_data_model().await.unwrap();
    assert_eq!(collector.generation(), 2);
    assert!(model.get_instance("vm-new").is_some());
}

#[tokio::test]
async fn test_bad_notification_marks_stale() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let collector = compute_collector(&cloud);
    collector.synchronize().await.unwrap();

    let orphan = Notification::Compute(ComputeEvent::InstanceCreated {
        instance: Instance::new("vm-9"),
        node: "node-404".to_string(),
    });
    assert!(collector.handle_notification(&orphan).await.is_err());
    assert!(collector.is_stale());
}

#[tokio::test]
async fn test_notification_json_shape() {
    let raw = json!({
        "domain": "baremetal",
        "payload": {"event": "power_state_changed", "uuid": "bm-1", "power_state": "off"}
    });
    let notification: Notification = serde_json::from_value(raw).unwrap();
    assert_eq!(notification.domain(), Domain::Baremetal);

    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let manager = CollectorManager::new().with_baremetal(DataModelCollector::new(
        BaremetalModelBuilder::new(cloud.clone()),
        fast_config(),
    ));
    assert_eq!(manager.synchronize_all().await, 0);
    assert!(manager.dispatch(&notification).await.unwrap());

    let model = manager
        .baremetal()
        .unwrap()
        .get_latest_cluster_data_model()
        .await
        .unwrap();
    assert_eq!(model.get_node("bm-1").unwrap().power_state, PowerState::Off);

    assert!(manager.compute().is_err());
    assert!(!manager.is_enabled(Domain::Storage));
}

#[tokio::test]
async fn test_storage_collector() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let collector = DataModelCollector::new(StorageModelBuilder::new(cloud.clone()), fast_config());
    let model = collector.get_latest_cluster_data_model().await.unwrap();
    assert_eq!(model.pools().count(), 2);
    assert_eq!(model.pool_of_volume("vol-1").unwrap().name, "host@lvm#a");

    let moved = Notification::Storage(StorageEvent::VolumeMigrated {
        uuid: "vol-1".to_string(),
        pool: "host@lvm#b".to_string(),
    });
    collector.handle_notification(&moved).await.unwrap();
    let model = collector.get_latest_cluster_data_model().await.unwrap();
    assert_eq!(model.pool_of_volume("vol-1").unwrap().name, "host@lvm#b");
}

#[tokio::test]
async fn test_sync_loop_recovers_from_stale() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let collector = Arc::new(compute_collector(&cloud));
    cloud.fail_times("list_hypervisors", 2);

    let sync_loop = SyncLoopBuilder::new()
        .collector(collector.clone())
        .period(Duration::from_secs(3600))
        .stale_retry(Duration::from_millis(10))
        .build()
        .unwrap();
    let (tx, rx) = tokio::sync::broadcast::channel(1);
    let handle = tokio::spawn(sync_loop.run(rx));

    for _ in 0..100 {
        if !collector.is_stale() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!collector.is_stale());

    tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_sync_loop_skips_when_not_leader() {
    let cloud = Arc::new(SimulatedCloud::new(small_inventory()));
    let collector = Arc::new(compute_collector(&cloud));
    let (_leader_tx, leader_rx) = tokio::sync::watch::channel(false);

    let sync_loop = SyncLoopBuilder::new()
        .collector(collector.clone())
        .stale_retry(Duration::from_millis(5))
        .leadership(leader_rx)
        .build()
        .unwrap();
    let (tx, rx) = tokio::sync::broadcast::channel(1);
    let handle = tokio::spawn(sync_loop.run(rx));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cloud.calls("list_hypervisors"), 0);

    tx.send(()).unwrap();
    handle.await.unwrap();
}

#[test]
fn test_sync_loop_builder_requires_collector() {
    assert!(SyncLoopBuilder::new().build().is_err());
}
