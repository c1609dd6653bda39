//! Task-status taxonomy and the exit-code space reported to the control plane.

use serde::Serialize;

use crate::{CTRL_CONTAINER, INIT_CONTAINER, PREFLIGHT_CONTAINER};

/// Status of a workflow task as derived from its pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i32)]
pub enum TaskStatus {
    Unknown = 0,
    Scheduling = 1,
    Initializing = 2,
    Running = 3,
    Completed = 4,
    Failed = 5,
    FailedEvicted = 6,
    FailedPreempted = 7,
    FailedStartError = 8,
    FailedBackendError = 9,
    FailedImagePull = 10,
}

impl TaskStatus {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            TaskStatus::Unknown => "UNKNOWN",
            TaskStatus::Scheduling => "SCHEDULING",
            TaskStatus::Initializing => "INITIALIZING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::FailedEvicted => "FAILED_EVICTED",
            TaskStatus::FailedPreempted => "FAILED_PREEMPTED",
            TaskStatus::FailedStartError => "FAILED_START_ERROR",
            TaskStatus::FailedBackendError => "FAILED_BACKEND_ERROR",
            TaskStatus::FailedImagePull => "FAILED_IMAGE_PULL",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            TaskStatus::Unknown
                | TaskStatus::Scheduling
                | TaskStatus::Initializing
                | TaskStatus::Running
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str_name())
    }
}

/// Exit codes carried in server payloads. Raw container codes are always
/// offset-adjusted before they reach this space.
pub mod exit_code {
    /// No exit code applies (non-terminal or indeterminate states).
    pub const NOT_SET: i32 = -1;
    pub const SUCCESS: i32 = 0;

    pub const BACKEND_ERROR: i32 = 3001;
    pub const START_ERROR: i32 = 3003;
    pub const EVICTED: i32 = 3004;
    pub const PREEMPTED: i32 = 3006;
    pub const UNKNOWN_FAILURE: i32 = 4000;

    // Waiting-state errors observed on containers that never ran.
    pub const IMAGE_PULL: i32 = 301;
    pub const CONTAINER_CONFIG: i32 = 302;
    pub const CONTAINER_CREATE: i32 = 303;
    pub const CRASH_LOOP: i32 = 304;
    pub const STATUS_UNKNOWN: i32 = 305;
    pub const WAITING_DEFAULT: i32 = 999;

    // Offsets keyed by the failing container, so overlapping raw codes from
    // different containers stay distinguishable server-side.
    pub const INIT_OFFSET: i32 = 255;
    pub const PREFLIGHT_OFFSET: i32 = 1000;
    pub const CTRL_OFFSET: i32 = 2000;
}

/// Offset added to a raw container exit code before reporting.
pub fn container_offset(container: &str) -> i32 {
    match container {
        INIT_CONTAINER => exit_code::INIT_OFFSET,
        PREFLIGHT_CONTAINER => exit_code::PREFLIGHT_OFFSET,
        CTRL_CONTAINER => exit_code::CTRL_OFFSET,
        _ => 0,
    }
}

/// Human-readable name for a container in failure messages.
pub fn container_display_name(container: &str) -> String {
    match container {
        CTRL_CONTAINER => "OSMO Control".to_string(),
        PREFLIGHT_CONTAINER => "OSMO Preflight Test".to_string(),
        INIT_CONTAINER => "OSMO Init".to_string(),
        other => format!("Task {other}"),
    }
}

/// Outcome of deriving a pod into the task taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatusResult {
    pub status: TaskStatus,
    pub message: String,
    pub exit_code: i32,
}

impl TaskStatusResult {
    pub fn new(status: TaskStatus, message: impl Into<String>, exit_code: i32) -> Self {
        Self { status, message: message.into(), exit_code }
    }

    /// Non-terminal (or indeterminate) state with no exit code.
    pub fn transient(status: TaskStatus) -> Self {
        Self::new(status, String::new(), exit_code::NOT_SET)
    }
}
