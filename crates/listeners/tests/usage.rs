#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use osmo_listeners::usage::calculate_pod_contribution;
use osmo_listeners::NodeUsageAggregator;

fn requests(pairs: &[(&str, &str)]) -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
                .collect::<BTreeMap<_, _>>(),
        ),
        ..Default::default()
    }
}

fn pod(uid: &str, namespace: &str, node: Option<&str>, containers: Vec<Container>) -> Pod {
    Pod {
        metadata: kube::core::ObjectMeta {
            uid: Some(uid.to_string()),
            namespace: Some(namespace.to_string()),
            name: Some(format!("pod-{uid}")),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: node.map(|n| n.to_string()),
            containers,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn worker(uid: &str, node: &str) -> Pod {
    pod(
        uid,
        "osmo-workflows",
        Some(node),
        vec![Container {
            name: "trainer".to_string(),
            resources: Some(requests(&[
                ("cpu", "1500m"),
                ("memory", "2Gi"),
                ("ephemeral-storage", "1Gi"),
                ("nvidia.com/gpu", "2"),
            ])),
            ..Default::default()
        }],
    )
}

#[test]
fn contribution_sums_container_requests() {
    let p = pod(
        "u1",
        "osmo-workflows",
        Some("n1"),
        vec![
            Container {
                name: "a".to_string(),
                resources: Some(requests(&[("cpu", "500m"), ("memory", "1025")])),
                ..Default::default()
            },
            Container {
                name: "b".to_string(),
                resources: Some(requests(&[("cpu", "1"), ("nvidia.com/gpu", "4")])),
                ..Default::default()
            },
            Container { name: "bare".to_string(), ..Default::default() },
        ],
    );
    let c = calculate_pod_contribution(&p);
    assert_eq!(c.cpu_millis, 1500);
    // 1025 bytes round up to 2Ki.
    assert_eq!(c.memory_ki, 2);
    assert_eq!(c.storage_ki, 0);
    assert_eq!(c.gpu, 4);
}

#[test]
fn add_is_idempotent_and_delete_returns_to_zero() {
    let agg = NodeUsageAggregator::new("osmo-workflows");
    let p = worker("u1", "n1");

    agg.add_pod(&p);
    agg.add_pod(&p);
    assert_eq!(agg.tracked_pods(), 1);
    let (total, _) = agg.node_usage("n1");
    assert_eq!(total.cpu_millis, 1500);
    assert_eq!(total.memory_ki, 2 * 1024 * 1024);
    assert_eq!(total.gpu, 2);

    agg.delete_pod(&p);
    assert_eq!(agg.tracked_pods(), 0);
    let (total, non_workflow) = agg.node_usage("n1");
    assert!(total.is_zero());
    assert!(non_workflow.is_zero());

    // Deleting again is harmless.
    agg.delete_pod(&p);
    assert!(agg.node_usage("n1").0.is_zero());
}

#[test]
fn non_workflow_namespaces_are_tracked_separately() {
    let agg = NodeUsageAggregator::new("osmo-workflows");
    agg.add_pod(&worker("u1", "n1"));

    let system = pod(
        "u2",
        "kube-system",
        Some("n1"),
        vec![Container {
            name: "dns".to_string(),
            resources: Some(requests(&[("cpu", "250m")])),
            ..Default::default()
        }],
    );
    agg.add_pod(&system);

    let (total, non_workflow) = agg.node_usage("n1");
    assert_eq!(total.cpu_millis, 1750);
    assert_eq!(non_workflow.cpu_millis, 250);

    agg.delete_pod(&system);
    let (total, non_workflow) = agg.node_usage("n1");
    assert_eq!(total.cpu_millis, 1500);
    assert!(non_workflow.is_zero());
}

#[test]
fn unscheduled_pods_contribute_nothing() {
    let agg = NodeUsageAggregator::new("osmo-workflows");
    agg.add_pod(&pod("u1", "osmo-workflows", None, vec![]));
    assert_eq!(agg.tracked_pods(), 0);
    assert!(agg.get_and_clear_dirty().is_empty());
}

#[test]
fn dirty_tracking_drains_atomically() {
    let agg = NodeUsageAggregator::new("osmo-workflows");
    agg.add_pod(&worker("u1", "n1"));
    agg.add_pod(&worker("u2", "n2"));
    agg.mark_dirty("n3");

    let mut dirty = agg.get_and_clear_dirty();
    dirty.sort();
    assert_eq!(dirty, vec!["n1".to_string(), "n2".to_string(), "n3".to_string()]);
    assert!(agg.get_and_clear_dirty().is_empty());

    agg.delete_pod(&worker("u1", "n1"));
    assert_eq!(agg.get_and_clear_dirty(), vec!["n1".to_string()]);
}

#[test]
fn reset_clears_totals_and_flags_known_nodes() {
    let agg = NodeUsageAggregator::new("osmo-workflows");
    agg.add_pod(&worker("u1", "n1"));
    agg.get_and_clear_dirty();

    agg.reset();
    assert_eq!(agg.tracked_pods(), 0);
    assert!(agg.node_usage("n1").0.is_zero());
    assert_eq!(agg.get_and_clear_dirty(), vec!["n1".to_string()]);
}

#[test]
fn wire_formatting_rounds_cpu_up_to_whole_cores() {
    let agg = NodeUsageAggregator::new("osmo-workflows");
    agg.add_pod(&worker("u1", "n1"));
    let (total, _) = agg.node_usage("n1");
    let wire = total.to_wire();
    assert_eq!(wire.cpu, "2"); // 1500m rounds up
    assert_eq!(wire.memory, "2097152Ki");
    assert_eq!(wire.storage, "1048576Ki");
    assert_eq!(wire.gpu, 2);
}
