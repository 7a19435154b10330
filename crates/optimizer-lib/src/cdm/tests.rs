//! Cluster data model tests

use super::*;

fn sample_compute_model() -> ComputeModel {
    let mut model = ComputeModel::new();
    model
        .add_node(ComputeNode::new("node-1", "host-1").with_capacity(16, 32768, 500).with_zone("az1"))
        .unwrap();
    model
        .add_node(ComputeNode::new("node-2", "host-2").with_capacity(16, 32768, 500).with_zone("az2"))
        .unwrap();
    model
        .add_instance(Instance::new("vm-1").with_resources(2, 4096, 20), "node-1")
        .unwrap();
    model
        .add_instance(Instance::new("vm-2").with_resources(4, 8192, 40), "node-1")
        .unwrap();
    model
        .add_instance(Instance::new("vm-3").with_resources(1, 2048, 10), "node-2")
        .unwrap();
    model.add_aggregate(HostAggregate {
        id: 1,
        name: "agg-1".to_string(),
        hosts: ["host-1".to_string()].into_iter().collect(),
    });
    model
}

#[test]
fn test_add_duplicate_node_rejected() {
    let mut model = sample_compute_model();
    let err = model.add_node(ComputeNode::new("node-1", "other")).unwrap_err();
    assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);
    let err = model.add_node(ComputeNode::new("node-9", "host-1")).unwrap_err();
    assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);
}

#[test]
fn test_update_node_keeps_hostnames_unique() {
    let mut model = sample_compute_model();
    let err = model
        .update_node(ComputeNode::new("node-2", "host-1"))
        .unwrap_err();
    assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);
    assert_eq!(model.get_node("node-2").unwrap().hostname, "host-2");

    // Keeping its own hostname is fine.
    model
        .update_node(ComputeNode::new("node-2", "host-2").with_zone("az3"))
        .unwrap();
    assert_eq!(model.get_node_by_hostname("host-2").unwrap().uuid, "node-2");
}

#[test]
fn test_instance_requires_existing_node() {
    let mut model = ComputeModel::new();
    let err = model.add_instance(Instance::new("vm"), "missing").unwrap_err();
    assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
}

#[test]
fn test_migrate_instance_remaps_placement() {
    let mut model = sample_compute_model();
    let source = model.migrate_instance("vm-1", "node-2").unwrap();
    assert_eq!(source, "node-1");
    assert_eq!(model.node_of_instance("vm-1").unwrap().uuid, "node-2");
    assert_eq!(model.instances_on("node-1").len(), 1);
    assert_eq!(model.instances_on("node-2").len(), 2);
}

#[test]
fn test_remove_node_drops_hosted_instances() {
    let mut model = sample_compute_model();
    model.remove_node("node-1").unwrap();
    assert_eq!(model.node_count(), 1);
    assert!(model.get_instance("vm-1").is_none());
    assert!(model.get_instance("vm-3").is_some());
    assert_eq!(model.placement_edges().count(), 1);
}

#[test]
fn test_node_resource_accounting() {
    let model = sample_compute_model();
    let used = model.node_used("node-1");
    assert_eq!(used.vcpus, 6.0);
    assert_eq!(used.memory_mb, 12288.0);
    let free = model.node_free("node-1").unwrap();
    assert_eq!(free.vcpus, 10.0);
    assert_eq!(free.disk_gb, 440.0);
}

#[test]
fn test_compute_model_serialization_roundtrip() {
    let model = sample_compute_model();
    let json = serde_json::to_string(&model).unwrap();
    let restored: ComputeModel = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, model);

    let original_edges: Vec<_> = model.placement_edges().collect();
    let restored_edges: Vec<_> = restored.placement_edges().collect();
    assert_eq!(original_edges, restored_edges);
}

#[test]
fn test_compute_model_rejects_orphan_instance() {
    let doc = serde_json::json!({
        "nodes": [{"uuid": "n1", "hostname": "h1", "vcpus": 1, "memory_mb": 1, "disk_gb": 1}],
        "instances": [{"uuid": "i1", "vcpus": 1, "memory_mb": 1, "disk_gb": 1}],
        "edges": []
    });
    assert!(serde_json::from_value::<ComputeModel>(doc).is_err());
}

#[test]
fn test_compute_model_rejects_duplicate_edges() {
    let doc = serde_json::json!({
        "nodes": [
            {"uuid": "n1", "hostname": "h1", "vcpus": 1, "memory_mb": 1, "disk_gb": 1},
            {"uuid": "n2", "hostname": "h2", "vcpus": 1, "memory_mb": 1, "disk_gb": 1}
        ],
        "instances": [{"uuid": "i1", "vcpus": 1, "memory_mb": 1, "disk_gb": 1}],
        "edges": [{"instance": "i1", "node": "n1"}, {"instance": "i1", "node": "n2"}]
    });
    assert!(serde_json::from_value::<ComputeModel>(doc).is_err());
}

#[test]
fn test_snapshot_does_not_share_state() {
    let live = sample_compute_model();
    let mut snapshot = live.clone();
    snapshot.migrate_instance("vm-1", "node-2").unwrap();
    snapshot.mark_instance_excluded("vm-3").unwrap();
    assert_eq!(live.node_of_instance("vm-1").unwrap().uuid, "node-1");
    assert!(!live.get_instance("vm-3").unwrap().watcher_exclude);
}

fn sample_storage_model() -> StorageModel {
    let mut model = StorageModel::new();
    model.add_node(StorageNode::new("host@lvm")).unwrap();
    model.add_node(StorageNode::new("host@ceph")).unwrap();
    model.add_pool(Pool::new("host@lvm#pool1", 100.0), "host@lvm").unwrap();
    model.add_pool(Pool::new("host@ceph#pool2", 500.0), "host@ceph").unwrap();
    model.add_volume(Volume::new("vol-1", 10), "host@lvm#pool1").unwrap();
    model.add_volume(Volume::new("vol-2", 20), "host@ceph#pool2").unwrap();
    model
}

#[test]
fn test_storage_containment() {
    let mut model = sample_storage_model();
    assert_eq!(model.pool_of_volume("vol-1").unwrap().name, "host@lvm#pool1");
    assert_eq!(model.node_of_pool("host@lvm#pool1").unwrap().host, "host@lvm");

    model.migrate_volume("vol-1", "host@ceph#pool2").unwrap();
    assert_eq!(model.volumes_in("host@ceph#pool2").len(), 2);

    model.remove_node("host@ceph").unwrap();
    assert!(model.get_volume("vol-1").is_none());
    assert!(model.get_pool("host@ceph#pool2").is_none());
}

#[test]
fn test_storage_model_serialization_roundtrip() {
    let model = sample_storage_model();
    let json = serde_json::to_value(&model).unwrap();
    let restored: StorageModel = serde_json::from_value(json).unwrap();
    assert_eq!(restored, model);
}

#[test]
fn test_baremetal_model() {
    let mut model = BaremetalModel::new();
    model
        .add_node(IronicNode::new("bm-1").with_hostname("host-1"))
        .unwrap();
    assert!(model.add_node(IronicNode::new("bm-1")).is_err());
    model.set_power_state("bm-1", PowerState::Off).unwrap();
    assert_eq!(
        model.node_for_hostname("host-1").unwrap().power_state,
        PowerState::Off
    );

    let json = serde_json::to_string(&model).unwrap();
    let restored: BaremetalModel = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, model);
}

#[test]
fn test_empty_models() {
    assert!(ComputeModel::new().is_empty());
    assert!(StorageModel::new().is_empty());
    assert!(!sample_compute_model().is_empty());
    assert_eq!(Domain::parse("storage"), Some(Domain::Storage));
    assert_eq!(Domain::Baremetal.to_string(), "baremetal");
}
