//! Per-node resource-usage accounting from pod requests.
//!
//! Each pod contributes once, at first observation; a pod's spec is immutable
//! after scheduling, so the contribution is stored and later subtracted
//! verbatim rather than recomputed from a live object.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use anyhow::Context;
use futures::{pin_mut, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::runtime::watcher::{self, Event};
use kube::Client;
use osmo_core::{ListenerArgs, GPU_RESOURCE};
use osmo_telemetry::{listener_attrs, Instruments};
use osmo_wire::pb;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::quantity::{parse_count, parse_kibibytes, parse_millicores};
use crate::send_message;

/// Accumulated requests, in internal units (millicores / kibibytes / count).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceTotals {
    pub cpu_millis: i64,
    pub memory_ki: i64,
    pub storage_ki: i64,
    pub gpu: i64,
}

impl ResourceTotals {
    fn add(&mut self, other: &ResourceTotals) {
        self.cpu_millis += other.cpu_millis;
        self.memory_ki += other.memory_ki;
        self.storage_ki += other.storage_ki;
        self.gpu += other.gpu;
    }

    fn subtract(&mut self, other: &ResourceTotals) {
        self.cpu_millis -= other.cpu_millis;
        self.memory_ki -= other.memory_ki;
        self.storage_ki -= other.storage_ki;
        self.gpu -= other.gpu;
    }

    pub fn is_zero(&self) -> bool {
        *self == ResourceTotals::default()
    }

    /// Wire shape: whole cores rounded up, byte sizes as "<n>Ki".
    pub fn to_wire(&self) -> pb::ResourceTotals {
        pb::ResourceTotals {
            cpu: ((self.cpu_millis + 999) / 1000).to_string(),
            memory: format!("{}Ki", self.memory_ki),
            storage: format!("{}Ki", self.storage_ki),
            gpu: self.gpu,
        }
    }
}

#[derive(Debug, Clone)]
struct PodContribution {
    totals: ResourceTotals,
    node: String,
    namespace: String,
}

#[derive(Default)]
struct UsageState {
    // Pod uid → its one-and-only contribution.
    contributions: HashMap<String, PodContribution>,
    totals: HashMap<String, ResourceTotals>,
    non_workflow: HashMap<String, ResourceTotals>,
    dirty: HashSet<String>,
}

/// Thread-safe usage accounting with dirty tracking for the flush loop.
pub struct NodeUsageAggregator {
    workflow_namespace: String,
    inner: RwLock<UsageState>,
}

impl NodeUsageAggregator {
    pub fn new(workflow_namespace: impl Into<String>) -> Self {
        Self { workflow_namespace: workflow_namespace.into(), inner: RwLock::new(UsageState::default()) }
    }

    /// Account a pod's requests against its node. Idempotent per pod uid;
    /// pods not yet scheduled contribute nothing.
    pub fn add_pod(&self, pod: &Pod) {
        let Some(uid) = pod.metadata.uid.as_deref() else { return };
        let Some(node) = pod.spec.as_ref().and_then(|s| s.node_name.clone()) else { return };
        {
            let state = self.inner.read().expect("usage state poisoned");
            if state.contributions.contains_key(uid) {
                return;
            }
        }
        let totals = calculate_pod_contribution(pod);
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();

        let mut state = self.inner.write().expect("usage state poisoned");
        if state.contributions.contains_key(uid) {
            return;
        }
        state.totals.entry(node.clone()).or_default().add(&totals);
        if namespace != self.workflow_namespace {
            state.non_workflow.entry(node.clone()).or_default().add(&totals);
        }
        state.dirty.insert(node.clone());
        state
            .contributions
            .insert(uid.to_string(), PodContribution { totals, node, namespace });
    }

    /// Undo exactly what `add_pod` recorded. Unknown pods are a no-op.
    pub fn delete_pod(&self, pod: &Pod) {
        let Some(uid) = pod.metadata.uid.as_deref() else { return };
        let mut state = self.inner.write().expect("usage state poisoned");
        let Some(contribution) = state.contributions.remove(uid) else { return };
        if let Some(totals) = state.totals.get_mut(&contribution.node) {
            totals.subtract(&contribution.totals);
        }
        if contribution.namespace != self.workflow_namespace {
            if let Some(totals) = state.non_workflow.get_mut(&contribution.node) {
                totals.subtract(&contribution.totals);
            }
        }
        state.dirty.insert(contribution.node);
    }

    pub fn mark_dirty(&self, hostname: &str) {
        self.inner
            .write()
            .expect("usage state poisoned")
            .dirty
            .insert(hostname.to_string());
    }

    /// Atomically take the dirty set.
    pub fn get_and_clear_dirty(&self) -> Vec<String> {
        let mut state = self.inner.write().expect("usage state poisoned");
        state.dirty.drain().collect()
    }

    /// `(total, non-workflow)` requests currently placed on a node.
    pub fn node_usage(&self, hostname: &str) -> (ResourceTotals, ResourceTotals) {
        let state = self.inner.read().expect("usage state poisoned");
        (
            state.totals.get(hostname).copied().unwrap_or_default(),
            state.non_workflow.get(hostname).copied().unwrap_or_default(),
        )
    }

    pub fn tracked_pods(&self) -> usize {
        self.inner.read().expect("usage state poisoned").contributions.len()
    }

    /// Drop everything and mark every known node dirty, so the next flush
    /// republishes a consistent picture. Used when the watch restarts.
    pub fn reset(&self) {
        let mut state = self.inner.write().expect("usage state poisoned");
        let known: Vec<String> = state.totals.keys().cloned().collect();
        state.contributions.clear();
        state.totals.clear();
        state.non_workflow.clear();
        state.dirty.extend(known);
    }
}

/// Sum the requests of a pod's containers. Computed once per pod uid.
pub fn calculate_pod_contribution(pod: &Pod) -> ResourceTotals {
    let mut totals = ResourceTotals::default();
    let containers = pod.spec.as_ref().map(|s| s.containers.as_slice()).unwrap_or_default();
    for container in containers {
        let Some(requests) = container.resources.as_ref().and_then(|r| r.requests.as_ref())
        else {
            continue;
        };
        if let Some(v) = requests.get("cpu").and_then(|q| parse_millicores(&q.0)) {
            totals.cpu_millis += v;
        }
        if let Some(v) = requests.get("memory").and_then(|q| parse_kibibytes(&q.0)) {
            totals.memory_ki += v;
        }
        if let Some(v) = requests.get("ephemeral-storage").and_then(|q| parse_kibibytes(&q.0)) {
            totals.storage_ki += v;
        }
        if let Some(v) = requests.get(GPU_RESOURCE).and_then(|q| parse_count(&q.0)) {
            totals.gpu += v;
        }
    }
    totals
}

fn pod_is_terminal(pod: &Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Succeeded") | Some("Failed")
    )
}

/// Watches pods cluster-wide, feeds the aggregator, and flushes dirty nodes
/// on a fixed interval.
pub struct NodeUsageListener {
    client: Client,
    flush_interval: Duration,
    aggregator: Arc<NodeUsageAggregator>,
    tx: mpsc::Sender<pb::ListenerMessage>,
    instruments: Arc<Instruments>,
}

impl NodeUsageListener {
    pub fn new(
        client: Client,
        args: &ListenerArgs,
        aggregator: Arc<NodeUsageAggregator>,
        tx: mpsc::Sender<pb::ListenerMessage>,
        instruments: Arc<Instruments>,
    ) -> Self {
        Self {
            client,
            flush_interval: Duration::from_secs(args.usage_flush_interval_sec),
            aggregator,
            tx,
            instruments,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let stream = watcher::watcher(api, watcher::Config::default());
        pin_mut!(stream);
        let mut flush = tokio::time::interval_at(
            tokio::time::Instant::now() + self.flush_interval,
            self.flush_interval,
        );
        info!("node usage listener started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = flush.tick() => self.flush().await?,
                ev = stream.try_next() => match ev.context("pod watch failed")? {
                    Some(Event::Applied(pod)) => {
                        // Terminal pods release their requests on the node.
                        if pod_is_terminal(&pod) {
                            self.aggregator.delete_pod(&pod);
                        } else {
                            self.aggregator.add_pod(&pod);
                        }
                    }
                    Some(Event::Deleted(pod)) => self.aggregator.delete_pod(&pod),
                    Some(Event::Restarted(pods)) => {
                        debug!(count = pods.len(), "pod watch restarted; rebuilding usage");
                        self.aggregator.reset();
                        for pod in &pods {
                            if !pod_is_terminal(pod) {
                                self.aggregator.add_pod(pod);
                            }
                        }
                    }
                    None => anyhow::bail!("pod watch stream ended"),
                },
            }
        }
    }

    async fn flush(&self) -> anyhow::Result<()> {
        let started = Instant::now();
        let mut dirty = self.aggregator.get_and_clear_dirty();
        dirty.sort();
        for hostname in dirty {
            let (total, non_workflow) = self.aggregator.node_usage(&hostname);
            debug!(node = %hostname, ?total, "flushing node usage");
            send_message(
                &self.tx,
                pb::listener_message::Payload::NodeUsage(pb::NodeUsage {
                    hostname,
                    total: Some(total.to_wire()),
                    non_workflow: Some(non_workflow.to_wire()),
                }),
            )
            .await?;
        }
        self.instruments
            .node_usage_flush_duration_seconds
            .record(started.elapsed().as_secs_f64(), &listener_attrs("usage"));
        Ok(())
    }
}
