#![allow(dead_code)]

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use driftless_common::{
    AccessType, AffinityRule, ComputeDisk, ComputeSnapshot, ComputeSpec, NetType,
    NetworkAttachment, PortForward, Proto, RuleMode, RulePolicy, Topology, UserAccess,
};
use driftless_provider::testing::FakeApi;
use driftless_provider::Engine;

pub const COMPUTE_GET: &str = "/cloudapi/compute/get";

pub fn engine(fake: &Arc<FakeApi>) -> Engine {
    Engine::with_api_lookup(fake.api())
}

/// Resource group 10, image 20 and vins 5 exist.
pub fn script_references(fake: &FakeApi) {
    fake.json("/cloudapi/rg/get", json!({"id": 10}));
    fake.json("/cloudapi/image/get", json!({"id": 20}));
    fake.json("/cloudapi/vins/get", json!({"id": 5}));
}

pub fn compute_record(id: u64, status: &str, tech_status: &str) -> Value {
    json!({
        "id": id, "name": "web-1", "rgId": 10, "imageId": 20, "driver": "KVM_X86",
        "cpus": 2, "ram": 4096, "desc": "frontend",
        "status": status, "techStatus": tech_status,
        "createdTime": 1_700_000_000, "updatedTime": 1_700_000_100,
        "disks": [
            {"id": 100, "name": "boot", "sizeMax": 20, "type": "B"},
            {"id": 101, "name": "data", "sizeMax": 10, "type": "D", "sepId": 1, "pool": "ssd"}
        ],
        "interfaces": [
            {"netType": "VINS", "netId": 5, "ipAddress": "10.0.0.4", "mac": "52:54:00:00:00:01"}
        ],
        "tags": {"env": "prod"},
        "affinityLabel": "web",
        "affinityRules": [
            {"topology": "compute", "policy": "RECOMMENDED", "mode": "EQ", "key": "role", "value": "web"}
        ],
        "antiAffinityRules": []
    })
}

/// Collection endpoints answering with the same items as [`compute_spec`].
pub fn script_compute_lists(fake: &FakeApi) {
    fake.json(
        "/cloudapi/compute/pfwList",
        json!([{"id": 7, "publicPortStart": 8080, "publicPortEnd": 8080, "localPort": 80, "protocol": "tcp"}]),
    );
    fake.json(
        "/cloudapi/compute/userList",
        json!({"computeAcl": [{"userGroupId": "alice", "right": "RCX"}]}),
    );
    fake.json(
        "/cloudapi/compute/snapshotList",
        json!([{"label": "base", "guid": "g-1", "timestamp": 1_700_000_000}]),
    );
}

pub fn script_compute(fake: &FakeApi, record: Value) {
    fake.json(COMPUTE_GET, record);
    script_compute_lists(fake);
}

/// Desired spec matching [`compute_record`] and [`script_compute_lists`].
pub fn compute_spec() -> ComputeSpec {
    ComputeSpec {
        name: "web-1".to_string(),
        rg_id: 10,
        image_id: 20,
        driver: "KVM_X86".to_string(),
        cpu: 2,
        ram: 4096,
        boot_disk_size: 20,
        description: "frontend".to_string(),
        affinity_label: "web".to_string(),
        enabled: true,
        started: true,
        disks: vec![ComputeDisk {
            name: "data".to_string(),
            size: 10,
            sep_id: 0,
            pool: String::new(),
            id: None,
        }],
        networks: vec![NetworkAttachment {
            net_type: NetType::Vins,
            net_id: 5,
            ip_address: None,
            mac: None,
        }],
        tags: BTreeMap::from([("env".to_string(), "prod".to_string())]),
        affinity_rules: vec![AffinityRule {
            topology: Topology::Compute,
            policy: RulePolicy::Recommended,
            mode: RuleMode::Eq,
            key: "role".to_string(),
            value: "web".to_string(),
        }],
        anti_affinity_rules: vec![],
        port_forwards: vec![PortForward {
            public_port_start: 8080,
            public_port_end: None,
            local_port: 80,
            proto: Proto::Tcp,
            rule_id: None,
        }],
        users: vec![UserAccess {
            username: "alice".to_string(),
            access_type: AccessType::ReadWrite,
        }],
        snapshots: vec![ComputeSnapshot {
            label: "base".to_string(),
            rollback: false,
        }],
    }
}
