//! Derivation of a workflow pod into the task-status taxonomy.
//!
//! Pure and order-sensitive: checks run pod-reason → fatal conditions →
//! container failures → phase, and the first verdict wins. Raw container exit
//! codes never leave this module un-offset.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::core::v1::{ContainerStatus, Pod, PodStatus};
use osmo_core::status::{container_display_name, container_offset, exit_code};
use osmo_core::{TaskStatus, TaskStatusResult, CTRL_CONTAINER};

/// Waiting reasons that mark a container as failing rather than progressing.
const WAITING_FAILURE_MARKERS: &[&str] = &["Failed", "BackOff", "Err", "ContainerStatusUnknown"];

/// How long a pod may sit NotReady on a config error before the error is
/// promoted from indeterminate to a backend failure.
const CONFIG_ERROR_GRACE_MIN: i64 = 10;
/// Same promotion window for a kubelet that stopped reporting the container.
const STATUS_UNKNOWN_GRACE_MIN: i64 = 30;

fn waiting_error_code(reason: &str) -> i32 {
    match reason {
        "ErrImagePull" | "ImagePullBackOff" => exit_code::IMAGE_PULL,
        "CreateContainerConfigError" => exit_code::CONTAINER_CONFIG,
        "CreateContainerError" | "RunContainerError" => exit_code::CONTAINER_CREATE,
        "CrashLoopBackOff" => exit_code::CRASH_LOOP,
        "ContainerStatusUnknown" => exit_code::STATUS_UNKNOWN,
        _ => exit_code::WAITING_DEFAULT,
    }
}

/// Per-container failure facts gathered for one evaluation.
#[derive(Default)]
struct ContainerFailures {
    names: Vec<String>,
    reasons: HashMap<String, String>,
    messages: HashMap<String, String>,
    exit_codes: HashMap<String, i32>,
    any_init: bool,
}

impl ContainerFailures {
    fn record(&mut self, name: &str, reason: &str, message: Option<&str>, code: i32, init: bool) {
        if !self.names.iter().any(|n| n == name) {
            self.names.push(name.to_string());
        }
        self.reasons.insert(name.to_string(), reason.to_string());
        self.messages.insert(name.to_string(), message.unwrap_or_default().to_string());
        self.exit_codes.insert(name.to_string(), code);
        self.any_init |= init;
    }

    fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn has_reason(&self, reason: &str) -> bool {
        self.reasons.values().any(|r| r == reason)
    }

    fn max_exit_code(&self) -> i32 {
        self.exit_codes.values().copied().max().unwrap_or(exit_code::NOT_SET)
    }

    fn message(&self) -> String {
        let mut out = String::from("Failure reason:");
        for name in &self.names {
            out.push_str(&format!(
                "\n- Exit code {} due to {} failed with {}: {}. ",
                self.exit_codes[name],
                container_display_name(name),
                self.reasons[name],
                self.messages[name],
            ));
        }
        out
    }
}

/// Map one pod observation to its task status. `now` is injected so the
/// time-gated promotions stay testable; derivation is otherwise pure.
pub fn derive_status(pod: &Pod, now: DateTime<Utc>) -> TaskStatusResult {
    let status = match &pod.status {
        Some(status) => status,
        None => return TaskStatusResult::transient(TaskStatus::Unknown),
    };

    // Pod-level reasons set by the kubelet/scheduler trump everything.
    if let Some(reason) = status.reason.as_deref() {
        let message = status.message.clone().unwrap_or_default();
        match reason {
            "Evicted" => {
                return TaskStatusResult::new(
                    TaskStatus::FailedEvicted,
                    format!("Pod was evicted: {message}. "),
                    exit_code::EVICTED,
                )
            }
            "StartError" => {
                return TaskStatusResult::new(
                    TaskStatus::FailedStartError,
                    format!("Pod failed to start: {message}. "),
                    exit_code::START_ERROR,
                )
            }
            "UnexpectedAdmissionError" => {
                return TaskStatusResult::new(
                    TaskStatus::FailedBackendError,
                    format!("Pod admission failed: {message}. "),
                    exit_code::BACKEND_ERROR,
                )
            }
            _ => {}
        }
    }

    for cond in status.conditions.iter().flatten() {
        if cond.status != "True" {
            continue;
        }
        let message = cond.message.clone().unwrap_or_default();
        match cond.type_.as_str() {
            "PreemptionByScheduler" => {
                return TaskStatusResult::new(
                    TaskStatus::FailedPreempted,
                    format!("Pod was preempted: {message}. "),
                    exit_code::PREEMPTED,
                )
            }
            "DisruptionTarget" => {
                return TaskStatusResult::new(
                    TaskStatus::FailedBackendError,
                    format!("Pod was disrupted: {message}. "),
                    exit_code::BACKEND_ERROR,
                )
            }
            _ => {}
        }
    }

    let mut failures = ContainerFailures::default();
    collect_failures(&mut failures, status.init_container_statuses.as_deref(), true);
    collect_failures(&mut failures, status.container_statuses.as_deref(), false);

    if !failures.is_empty() {
        if let Some(result) = classify_failures(&failures, status, now) {
            return result;
        }
        // Otherwise: a generic failure while osmo-ctrl may still run and no
        // init container is blocking it. Hold the verdict; the control
        // container gets to report first.
    }

    let phase = status.phase.as_deref().unwrap_or("");
    if phase == "Failed" {
        let message = status.message.clone().unwrap_or_else(|| "Pod failed".to_string());
        return TaskStatusResult::new(TaskStatus::Failed, message, exit_code::UNKNOWN_FAILURE);
    }

    if matches!(phase, "Pending" | "Running") && init_containers_initializing(status) {
        return TaskStatusResult::transient(TaskStatus::Initializing);
    }
    match phase {
        "Pending" => TaskStatusResult::transient(TaskStatus::Scheduling),
        "Running" => TaskStatusResult::transient(TaskStatus::Running),
        "Succeeded" => {
            TaskStatusResult::new(TaskStatus::Completed, String::new(), exit_code::SUCCESS)
        }
        _ => TaskStatusResult::transient(TaskStatus::Unknown),
    }
}

/// Turn the gathered failures into a verdict. `None` means the generic
/// failure is suppressed for now (osmo-ctrl has not terminated and no init
/// container failed).
fn classify_failures(
    failures: &ContainerFailures,
    status: &PodStatus,
    now: DateTime<Utc>,
) -> Option<TaskStatusResult> {
    let message = failures.message();
    let max_code = failures.max_exit_code();

    if failures.has_reason("OOMKilled") {
        return Some(TaskStatusResult::new(TaskStatus::FailedEvicted, message, max_code));
    }
    if failures.has_reason("StartError") {
        return Some(TaskStatusResult::new(TaskStatus::FailedStartError, message, max_code));
    }
    if failures.has_reason("ErrImagePull") || failures.has_reason("ImagePullBackOff") {
        return Some(TaskStatusResult::new(TaskStatus::FailedImagePull, message, max_code));
    }
    if failures.has_reason("CreateContainerConfigError") {
        return Some(if not_ready_for(status, now, Duration::minutes(CONFIG_ERROR_GRACE_MIN)) {
            TaskStatusResult::new(TaskStatus::FailedBackendError, message, exit_code::BACKEND_ERROR)
        } else {
            TaskStatusResult::transient(TaskStatus::Unknown)
        });
    }
    if failures.has_reason("ContainerStatusUnknown") {
        return Some(if not_ready_for(status, now, Duration::minutes(STATUS_UNKNOWN_GRACE_MIN)) {
            TaskStatusResult::new(TaskStatus::FailedBackendError, message, exit_code::BACKEND_ERROR)
        } else {
            TaskStatusResult::transient(TaskStatus::Unknown)
        });
    }

    if ctrl_pending(status) && !failures.any_init {
        return None;
    }
    Some(TaskStatusResult::new(TaskStatus::Failed, message, max_code))
}

fn collect_failures(
    failures: &mut ContainerFailures,
    statuses: Option<&[ContainerStatus]>,
    init: bool,
) {
    for cs in statuses.into_iter().flatten() {
        let Some(state) = &cs.state else { continue };
        if let Some(term) = &state.terminated {
            let reason = term.reason.as_deref().unwrap_or("Terminated");
            if reason == "Completed" {
                continue;
            }
            let mut code = term.exit_code;
            if cs.name == CTRL_CONTAINER {
                // The control container reports its real code as JSON in the
                // termination message; prefer it over the process exit code.
                if let Some(ctrl_code) = parse_ctrl_code(term.message.as_deref()) {
                    code = ctrl_code;
                }
            }
            failures.record(
                &cs.name,
                reason,
                term.message.as_deref(),
                code + container_offset(&cs.name),
                init,
            );
        } else if let Some(wait) = &state.waiting {
            let reason = wait.reason.as_deref().unwrap_or_default();
            if WAITING_FAILURE_MARKERS.iter().any(|m| reason.contains(m)) {
                failures.record(
                    &cs.name,
                    reason,
                    wait.message.as_deref(),
                    waiting_error_code(reason) + container_offset(&cs.name),
                    init,
                );
            }
        }
    }
}

fn parse_ctrl_code(message: Option<&str>) -> Option<i32> {
    let value: serde_json::Value = serde_json::from_str(message?).ok()?;
    value.get("code")?.as_i64().map(|c| c as i32)
}

/// The control container exists and has not terminated yet: it may still
/// report the task outcome itself, so generic container failures wait.
fn ctrl_pending(status: &PodStatus) -> bool {
    status.container_statuses.iter().flatten().any(|cs| {
        cs.name == CTRL_CONTAINER
            && !cs.state.as_ref().is_some_and(|s| s.terminated.is_some())
    })
}

/// Whether the pod has been NotReady for at least `window`, judged by the
/// Ready condition's transition time.
fn not_ready_for(status: &PodStatus, now: DateTime<Utc>, window: Duration) -> bool {
    status
        .conditions
        .iter()
        .flatten()
        .find(|c| c.type_ == "Ready" && c.status == "False")
        .and_then(|c| c.last_transition_time.as_ref())
        .map(|t| now.signed_duration_since(t.0) >= window)
        .unwrap_or(false)
}

fn init_containers_initializing(status: &PodStatus) -> bool {
    status.init_container_statuses.iter().flatten().any(|cs| {
        cs.state
            .as_ref()
            .and_then(|s| s.waiting.as_ref())
            .and_then(|w| w.reason.as_deref())
            .map(|r| r == "ContainerCreating" || r == "PodInitializing")
            .unwrap_or(false)
    })
}
