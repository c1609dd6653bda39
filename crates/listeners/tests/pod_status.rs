#![forbid(unsafe_code)]

use chrono::{Duration, Utc};
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateRunning, ContainerStateTerminated, ContainerStateWaiting,
    ContainerStatus, Pod, PodCondition, PodStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use osmo_core::TaskStatus;
use osmo_listeners::pod_status::derive_status;

fn pod(status: PodStatus) -> Pod {
    Pod { status: Some(status), ..Default::default() }
}

fn terminated(name: &str, exit: i32, reason: &str, message: Option<&str>) -> ContainerStatus {
    ContainerStatus {
        name: name.to_string(),
        state: Some(ContainerState {
            terminated: Some(ContainerStateTerminated {
                exit_code: exit,
                reason: Some(reason.to_string()),
                message: message.map(|m| m.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn waiting(name: &str, reason: &str) -> ContainerStatus {
    ContainerStatus {
        name: name.to_string(),
        state: Some(ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some(reason.to_string()),
                message: Some(format!("{reason} details")),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn running(name: &str) -> ContainerStatus {
    ContainerStatus {
        name: name.to_string(),
        state: Some(ContainerState {
            running: Some(ContainerStateRunning::default()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn not_ready_since(minutes_ago: i64) -> PodCondition {
    PodCondition {
        type_: "Ready".to_string(),
        status: "False".to_string(),
        last_transition_time: Some(Time(Utc::now() - Duration::minutes(minutes_ago))),
        ..Default::default()
    }
}

#[test]
fn evicted_pod_reason_wins() {
    let p = pod(PodStatus {
        reason: Some("Evicted".to_string()),
        message: Some("Node pressure".to_string()),
        phase: Some("Failed".to_string()),
        ..Default::default()
    });
    let r = derive_status(&p, Utc::now());
    assert_eq!(r.status, TaskStatus::FailedEvicted);
    assert_eq!(r.exit_code, 3004);
    assert_eq!(r.message, "Pod was evicted: Node pressure. ");
}

#[test]
fn start_error_and_admission_error_reasons() {
    let p = pod(PodStatus { reason: Some("StartError".to_string()), ..Default::default() });
    let r = derive_status(&p, Utc::now());
    assert_eq!(r.status, TaskStatus::FailedStartError);
    assert_eq!(r.exit_code, 3003);

    let p = pod(PodStatus {
        reason: Some("UnexpectedAdmissionError".to_string()),
        ..Default::default()
    });
    let r = derive_status(&p, Utc::now());
    assert_eq!(r.status, TaskStatus::FailedBackendError);
    assert_eq!(r.exit_code, 3001);
}

#[test]
fn preemption_and_disruption_conditions() {
    let p = pod(PodStatus {
        conditions: Some(vec![PodCondition {
            type_: "PreemptionByScheduler".to_string(),
            status: "True".to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    });
    let r = derive_status(&p, Utc::now());
    assert_eq!(r.status, TaskStatus::FailedPreempted);
    assert_eq!(r.exit_code, 3006);

    // Condition present but False: no verdict from it.
    let p = pod(PodStatus {
        conditions: Some(vec![PodCondition {
            type_: "DisruptionTarget".to_string(),
            status: "False".to_string(),
            ..Default::default()
        }]),
        phase: Some("Running".to_string()),
        ..Default::default()
    });
    assert_eq!(derive_status(&p, Utc::now()).status, TaskStatus::Running);
}

#[test]
fn init_failure_surfaces_while_ctrl_is_still_waiting() {
    let p = pod(PodStatus {
        phase: Some("Pending".to_string()),
        init_container_statuses: Some(vec![terminated("osmo-init", 5, "Error", Some("no input"))]),
        container_statuses: Some(vec![waiting("osmo-ctrl", "PodInitializing")]),
        ..Default::default()
    });
    let r = derive_status(&p, Utc::now());
    assert_eq!(r.status, TaskStatus::Failed);
    assert_eq!(r.exit_code, 255 + 5);
    assert!(r.message.contains("OSMO Init failed with Error"), "message: {}", r.message);
}

#[test]
fn ctrl_termination_message_code_overrides_the_exit_code() {
    let p = pod(PodStatus {
        phase: Some("Failed".to_string()),
        container_statuses: Some(vec![terminated(
            "osmo-ctrl",
            1,
            "Error",
            Some(r#"{"code":42}"#),
        )]),
        ..Default::default()
    });
    let r = derive_status(&p, Utc::now());
    assert_eq!(r.status, TaskStatus::Failed);
    assert_eq!(r.exit_code, 2000 + 42);
}

#[test]
fn unparseable_ctrl_message_keeps_the_raw_code() {
    let p = pod(PodStatus {
        phase: Some("Failed".to_string()),
        container_statuses: Some(vec![terminated("osmo-ctrl", 7, "Error", Some("plain text"))]),
        ..Default::default()
    });
    assert_eq!(derive_status(&p, Utc::now()).exit_code, 2000 + 7);
}

#[test]
fn image_pull_backoff_maps_to_image_pull_failure() {
    let p = pod(PodStatus {
        phase: Some("Pending".to_string()),
        container_statuses: Some(vec![waiting("trainer", "ImagePullBackOff")]),
        ..Default::default()
    });
    let r = derive_status(&p, Utc::now());
    assert_eq!(r.status, TaskStatus::FailedImagePull);
    assert_eq!(r.exit_code, 301);

    // Offsets apply to waiting-error codes too.
    let p = pod(PodStatus {
        phase: Some("Pending".to_string()),
        container_statuses: Some(vec![waiting("preflight-test", "ErrImagePull")]),
        ..Default::default()
    });
    assert_eq!(derive_status(&p, Utc::now()).exit_code, 1000 + 301);
}

#[test]
fn config_error_is_unknown_until_the_grace_window_passes() {
    let fresh = pod(PodStatus {
        phase: Some("Pending".to_string()),
        container_statuses: Some(vec![waiting("trainer", "CreateContainerConfigError")]),
        conditions: Some(vec![not_ready_since(5)]),
        ..Default::default()
    });
    let r = derive_status(&fresh, Utc::now());
    assert_eq!(r.status, TaskStatus::Unknown);
    assert_eq!(r.exit_code, -1);

    let stale = pod(PodStatus {
        phase: Some("Pending".to_string()),
        container_statuses: Some(vec![waiting("trainer", "CreateContainerConfigError")]),
        conditions: Some(vec![not_ready_since(11)]),
        ..Default::default()
    });
    let r = derive_status(&stale, Utc::now());
    assert_eq!(r.status, TaskStatus::FailedBackendError);
    assert_eq!(r.exit_code, 3001);
}

#[test]
fn container_status_unknown_uses_the_longer_window() {
    let base = |minutes| {
        pod(PodStatus {
            phase: Some("Running".to_string()),
            container_statuses: Some(vec![waiting("trainer", "ContainerStatusUnknown")]),
            conditions: Some(vec![not_ready_since(minutes)]),
            ..Default::default()
        })
    };
    assert_eq!(derive_status(&base(20), Utc::now()).status, TaskStatus::Unknown);
    assert_eq!(
        derive_status(&base(31), Utc::now()).status,
        TaskStatus::FailedBackendError
    );
}

#[test]
fn oom_kill_reports_eviction_with_the_container_code() {
    let p = pod(PodStatus {
        phase: Some("Running".to_string()),
        container_statuses: Some(vec![
            terminated("trainer", 137, "OOMKilled", None),
            running("osmo-ctrl"),
        ]),
        ..Default::default()
    });
    let r = derive_status(&p, Utc::now());
    assert_eq!(r.status, TaskStatus::FailedEvicted);
    assert_eq!(r.exit_code, 137);
}

#[test]
fn generic_failure_waits_for_the_ctrl_container() {
    // A sidecar died but osmo-ctrl is still running: no failure yet.
    let p = pod(PodStatus {
        phase: Some("Running".to_string()),
        container_statuses: Some(vec![
            terminated("sidecar", 1, "Error", None),
            running("osmo-ctrl"),
        ]),
        ..Default::default()
    });
    assert_eq!(derive_status(&p, Utc::now()).status, TaskStatus::Running);

    // Once osmo-ctrl terminates, the aggregate verdict lands.
    let p = pod(PodStatus {
        phase: Some("Failed".to_string()),
        container_statuses: Some(vec![
            terminated("sidecar", 1, "Error", None),
            terminated("osmo-ctrl", 3, "Error", None),
        ]),
        ..Default::default()
    });
    let r = derive_status(&p, Utc::now());
    assert_eq!(r.status, TaskStatus::Failed);
    // Max across offset-adjusted codes: ctrl 3+2000 beats sidecar 1.
    assert_eq!(r.exit_code, 2003);
}

#[test]
fn pods_without_a_ctrl_container_fail_immediately() {
    let p = pod(PodStatus {
        phase: Some("Running".to_string()),
        container_statuses: Some(vec![terminated("batch-job", 9, "Error", None)]),
        ..Default::default()
    });
    let r = derive_status(&p, Utc::now());
    assert_eq!(r.status, TaskStatus::Failed);
    assert_eq!(r.exit_code, 9);
}

#[test]
fn completed_ctrl_containers_are_not_failures() {
    let p = pod(PodStatus {
        phase: Some("Succeeded".to_string()),
        container_statuses: Some(vec![terminated("osmo-ctrl", 0, "Completed", None)]),
        ..Default::default()
    });
    let r = derive_status(&p, Utc::now());
    assert_eq!(r.status, TaskStatus::Completed);
    assert_eq!(r.exit_code, 0);
}

#[test]
fn failed_phase_without_container_evidence_is_unknown_failure() {
    let p = pod(PodStatus { phase: Some("Failed".to_string()), ..Default::default() });
    let r = derive_status(&p, Utc::now());
    assert_eq!(r.status, TaskStatus::Failed);
    assert_eq!(r.exit_code, 4000);
}

#[test]
fn phase_mapping_and_init_override() {
    let phase = |p: &str| pod(PodStatus { phase: Some(p.to_string()), ..Default::default() });
    assert_eq!(derive_status(&phase("Pending"), Utc::now()).status, TaskStatus::Scheduling);
    assert_eq!(derive_status(&phase("Running"), Utc::now()).status, TaskStatus::Running);
    assert_eq!(derive_status(&phase("Unknown"), Utc::now()).status, TaskStatus::Unknown);

    let p = pod(PodStatus {
        phase: Some("Pending".to_string()),
        init_container_statuses: Some(vec![waiting("osmo-init", "PodInitializing")]),
        ..Default::default()
    });
    assert_eq!(derive_status(&p, Utc::now()).status, TaskStatus::Initializing);
}

#[test]
fn unlisted_waiting_failures_get_the_default_code() {
    let p = pod(PodStatus {
        phase: Some("Failed".to_string()),
        container_statuses: Some(vec![waiting("trainer", "SomethingWentFailed")]),
        ..Default::default()
    });
    let r = derive_status(&p, Utc::now());
    assert_eq!(r.status, TaskStatus::Failed);
    assert_eq!(r.exit_code, 999);
}

#[test]
fn derivation_is_idempotent() {
    let p = pod(PodStatus {
        phase: Some("Failed".to_string()),
        container_statuses: Some(vec![terminated("osmo-ctrl", 2, "Error", None)]),
        ..Default::default()
    });
    let now = Utc::now();
    assert_eq!(derive_status(&p, now), derive_status(&p, now));
}
