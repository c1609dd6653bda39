//! OSMO operator core types: task-status taxonomy, exit codes, configuration.

#![forbid(unsafe_code)]

pub mod config;
pub mod status;

pub use config::ListenerArgs;
pub use status::{TaskStatus, TaskStatusResult};

/// Control container injected into every workflow pod.
pub const CTRL_CONTAINER: &str = "osmo-ctrl";
/// Init container that stages workflow inputs.
pub const INIT_CONTAINER: &str = "osmo-init";
/// Optional preflight validation container.
pub const PREFLIGHT_CONTAINER: &str = "preflight-test";

/// Resource name under which GPUs are requested.
pub const GPU_RESOURCE: &str = "nvidia.com/gpu";
