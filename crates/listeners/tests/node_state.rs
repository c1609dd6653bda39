#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeSpec, NodeStatus, Taint};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use osmo_listeners::node::{build_node_body, bodies_equal, NodeUpdateBody};
use osmo_listeners::{NodeConditionRules, NodeStateTracker};

fn default_rules() -> NodeConditionRules {
    NodeConditionRules::new(&Default::default())
}

fn gpu_node(name: &str) -> Node {
    let mut labels = BTreeMap::new();
    labels.insert("osmo.nvidia.com/pool".to_string(), "a100".to_string());
    labels.insert("kubernetes.io/arch".to_string(), "amd64".to_string());

    let mut allocatable = BTreeMap::new();
    allocatable.insert("cpu".to_string(), Quantity("3900m".to_string()));
    allocatable.insert("memory".to_string(), Quantity("16Gi".to_string()));
    allocatable.insert("ephemeral-storage".to_string(), Quantity("100G".to_string()));

    Node {
        metadata: kube::core::ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            taints: Some(vec![Taint {
                key: "nvidia.com/gpu".to_string(),
                value: Some("present".to_string()),
                effect: "NoSchedule".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: Some(NodeStatus {
            conditions: Some(vec![
                NodeCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                },
                NodeCondition {
                    type_: "MemoryPressure".to_string(),
                    status: "False".to_string(),
                    ..Default::default()
                },
            ]),
            allocatable: Some(allocatable),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[test]
fn body_shapes_allocatable_conditions_labels_and_taints() {
    let rules = default_rules();
    let body = build_node_body(&gpu_node("node-a"), &rules, "osmo.nvidia.com/", true);

    assert_eq!(body.hostname, "node-a");
    assert!(body.available);
    assert!(!body.deleted);
    // Only True conditions are carried.
    assert_eq!(body.conditions, vec!["Ready".to_string()]);
    // cpu floors to whole cores; byte sizes become Ki.
    assert_eq!(body.allocatable["cpu"], "3");
    assert_eq!(body.allocatable["memory"], "16777216Ki");
    assert_eq!(body.allocatable["ephemeral-storage"], "97656250Ki");
    // Only prefixed labels survive.
    assert_eq!(body.labels.len(), 1);
    assert_eq!(body.labels["osmo.nvidia.com/pool"], "a100");
    assert_eq!(body.taints.len(), 1);
    assert_eq!(body.taints[0].effect, "NoSchedule");
}

#[test]
fn labels_are_dropped_when_label_updates_are_disabled() {
    let rules = default_rules();
    let body = build_node_body(&gpu_node("node-a"), &rules, "osmo.nvidia.com/", false);
    assert!(body.labels.is_empty());
}

#[test]
fn availability_follows_the_default_ready_rule() {
    let rules = default_rules();
    let mut node = gpu_node("node-a");
    assert!(build_node_body(&node, &rules, "", false).available);

    if let Some(status) = node.status.as_mut() {
        if let Some(conds) = status.conditions.as_mut() {
            conds[0].status = "False".to_string();
        }
    }
    assert!(!build_node_body(&node, &rules, "", false).available);

    // Unschedulable beats healthy conditions.
    let mut cordoned = gpu_node("node-b");
    cordoned.spec.as_mut().unwrap().unschedulable = Some(true);
    assert!(!build_node_body(&cordoned, &rules, "", false).available);
}

fn body(hostname: &str, available: bool) -> NodeUpdateBody {
    NodeUpdateBody {
        hostname: hostname.to_string(),
        available,
        deleted: false,
        conditions: vec!["Ready".to_string()],
        allocatable: BTreeMap::new(),
        labels: BTreeMap::new(),
        taints: Vec::new(),
    }
}

#[test]
fn equality_is_sensitive_to_every_tracked_field() {
    let a = body("n1", true);
    assert!(bodies_equal(&a, &a.clone()));

    let mut b = a.clone();
    b.hostname = "n2".to_string();
    assert!(!bodies_equal(&a, &b));

    let mut b = a.clone();
    b.available = false;
    assert!(!bodies_equal(&a, &b));

    let mut b = a.clone();
    b.deleted = true;
    assert!(!bodies_equal(&a, &b));

    let mut b = a.clone();
    b.conditions.push("DiskPressure".to_string());
    assert!(!bodies_equal(&a, &b));

    let mut b = a.clone();
    b.allocatable.insert("cpu".to_string(), "4".to_string());
    assert!(!bodies_equal(&a, &b));

    let mut b = a.clone();
    b.labels.insert("osmo.nvidia.com/pool".to_string(), "a100".to_string());
    assert!(!bodies_equal(&a, &b));

    let mut b = a.clone();
    b.taints.push(osmo_wire::pb::NodeTaint::default());
    assert!(!bodies_equal(&a, &b));
}

#[test]
fn tracker_suppresses_unchanged_bodies_within_ttl() {
    let tracker = NodeStateTracker::new(Duration::from_secs(3600));
    let first = body("n1", true);

    assert!(tracker.should_send(&first));
    tracker.record(first.clone());
    // Identical and fresh: suppressed even with maximal jitter.
    assert!(!tracker.should_send(&first));

    // Any change goes through immediately.
    assert!(tracker.should_send(&body("n1", false)));

    // Other nodes are independent.
    assert!(tracker.should_send(&body("n2", true)));
}

#[test]
fn tracker_resends_once_the_entry_expires() {
    let tracker = NodeStateTracker::new(Duration::ZERO);
    let b = body("n1", true);
    tracker.record(b.clone());
    assert!(tracker.should_send(&b));
}

#[test]
fn tracker_forgets_deleted_nodes() {
    let tracker = NodeStateTracker::new(Duration::from_secs(3600));
    tracker.record(body("n1", true));
    tracker.record(body("n2", true));
    let mut hosts = tracker.hostnames();
    hosts.sort();
    assert_eq!(hosts, vec!["n1".to_string(), "n2".to_string()]);

    tracker.remove("n1");
    assert!(!tracker.contains("n1"));
    assert!(tracker.should_send(&body("n1", true)));
    assert_eq!(tracker.hostnames(), vec!["n2".to_string()]);
}
