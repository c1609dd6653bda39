//! Operator configuration: flags with environment overrides.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;

/// Runtime configuration for every listener in the operator process.
#[derive(Parser, Debug, Clone)]
#[command(name = "osmo-operator", version, about = "OSMO cluster operator")]
pub struct ListenerArgs {
    /// Control-plane service URL, either "scheme://host:port" or bare "host:port".
    #[arg(long, env = "OSMO_SERVICE_URL")]
    pub service_url: String,

    /// Backend name this operator reports for.
    #[arg(long, env = "OSMO_BACKEND")]
    pub backend: String,

    /// Namespace containing orchestrated workflow pods.
    #[arg(long, env = "OSMO_NAMESPACE", default_value = "osmo-workflows")]
    pub namespace: String,

    // Producer-channel capacities.
    #[arg(long, default_value_t = 500)]
    pub pod_update_chan_size: usize,
    #[arg(long, default_value_t = 500)]
    pub node_update_chan_size: usize,
    #[arg(long, default_value_t = 500)]
    pub usage_chan_size: usize,
    #[arg(long, default_value_t = 500)]
    pub event_chan_size: usize,
    #[arg(long, default_value_t = 200)]
    pub label_update_chan_size: usize,

    /// Watch re-list period, also the node-inventory emission period.
    #[arg(long, default_value_t = 300)]
    pub resync_period_sec: u64,
    #[arg(long, default_value_t = 15)]
    pub state_cache_ttl_min: u64,
    #[arg(long, default_value_t = 15)]
    pub event_cache_ttl_min: u64,
    /// Upper bound on in-flight unacknowledged messages per stream; 0 disables the bound.
    #[arg(long, default_value_t = 100)]
    pub max_unacked_messages: usize,
    #[arg(long, default_value_t = 15)]
    pub progress_frequency_sec: u64,
    #[arg(long, default_value_t = 60)]
    pub usage_flush_interval_sec: u64,

    /// Label prefix selecting node labels reported to the control plane.
    #[arg(long, default_value = "osmo.nvidia.com/")]
    pub node_condition_prefix: String,
    #[arg(long, default_value_t = false)]
    pub enable_node_label_update: bool,

    /// Directory for per-listener liveness heartbeat files.
    #[arg(long, default_value = "/tmp/osmo/operator/")]
    pub progress_dir: PathBuf,

    /// Node availability rule "TYPE=STATUS" (both regexes); repeatable.
    #[arg(
        long = "node-condition-rule",
        env = "OSMO_NODE_CONDITION_RULES",
        value_delimiter = ','
    )]
    pub node_condition_rules: Vec<String>,

    /// Base token exchanged for short-lived access tokens.
    #[arg(long, env = "OSMO_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    // Telemetry export.
    #[arg(long, default_value = "127.0.0.1")]
    pub otel_collector_host: String,
    #[arg(long, default_value_t = 4317)]
    pub otel_collector_port: u16,
    #[arg(long, default_value_t = 6000)]
    pub otel_export_interval_ms: u64,
    #[arg(long, default_value = "osmo-operator")]
    pub otel_service_name: String,
    #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
    pub otel_service_version: String,
    #[arg(long, default_value_t = false)]
    pub otel_enabled: bool,
}

impl ListenerArgs {
    /// Parse the repeatable "TYPE=STATUS" rule flags into a pattern map.
    /// Malformed entries (no '=') are dropped; rule compilation itself is
    /// lenient further down, so this stays non-fatal too.
    pub fn condition_rules(&self) -> HashMap<String, String> {
        self.node_condition_rules
            .iter()
            .filter_map(|raw| {
                raw.split_once('=')
                    .map(|(t, s)| (t.trim().to_string(), s.trim().to_string()))
            })
            .filter(|(t, _)| !t.is_empty())
            .collect()
    }
}

impl Default for ListenerArgs {
    fn default() -> Self {
        Self {
            service_url: String::new(),
            backend: String::new(),
            namespace: "osmo-workflows".to_string(),
            pod_update_chan_size: 500,
            node_update_chan_size: 500,
            usage_chan_size: 500,
            event_chan_size: 500,
            label_update_chan_size: 200,
            resync_period_sec: 300,
            state_cache_ttl_min: 15,
            event_cache_ttl_min: 15,
            max_unacked_messages: 100,
            progress_frequency_sec: 15,
            usage_flush_interval_sec: 60,
            node_condition_prefix: "osmo.nvidia.com/".to_string(),
            enable_node_label_update: false,
            progress_dir: PathBuf::from("/tmp/osmo/operator/"),
            node_condition_rules: Vec::new(),
            auth_token: None,
            otel_collector_host: "127.0.0.1".to_string(),
            otel_collector_port: 4317,
            otel_export_interval_ms: 6000,
            otel_service_name: "osmo-operator".to_string(),
            otel_service_version: env!("CARGO_PKG_VERSION").to_string(),
            otel_enabled: false,
        }
    }
}
