//! Node watcher: availability, conditions, allocatable resources, labels and
//! taints, with change suppression and a periodic full inventory.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use anyhow::Context;
use futures::{pin_mut, TryStreamExt};
use k8s_openapi::api::core::v1::Node;
use kube::api::Api;
use kube::runtime::watcher::{self, Event};
use kube::Client;
use osmo_core::ListenerArgs;
use osmo_telemetry::{listener_attrs, Instruments};
use osmo_wire::pb;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::quantity::{parse_kibibytes, parse_millicores};
use crate::rules::NodeConditionRules;
use crate::send_message;
use crate::usage::NodeUsageAggregator;

/// What the control plane is told about one node. Comparison of consecutive
/// bodies drives change suppression.
#[derive(Debug, Clone)]
pub struct NodeUpdateBody {
    pub hostname: String,
    pub available: bool,
    pub deleted: bool,
    pub conditions: Vec<String>,
    pub allocatable: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub taints: Vec<pb::NodeTaint>,
}

impl NodeUpdateBody {
    pub fn to_update(&self) -> pb::NodeUpdate {
        pb::NodeUpdate {
            hostname: self.hostname.clone(),
            available: self.available,
            deleted: self.deleted,
            conditions: self.conditions.clone(),
            allocatable: self.allocatable.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            labels: self.labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            taints: self.taints.clone(),
        }
    }
}

/// Structural equality for suppression. Taints compare by count only; a
/// changed taint body without a count change is not worth an update.
pub fn bodies_equal(a: &NodeUpdateBody, b: &NodeUpdateBody) -> bool {
    a.hostname == b.hostname
        && a.available == b.available
        && a.deleted == b.deleted
        && a.conditions == b.conditions
        && a.allocatable == b.allocatable
        && a.labels == b.labels
        && a.taints.len() == b.taints.len()
}

/// Shape a node into its update body.
pub fn build_node_body(
    node: &Node,
    rules: &NodeConditionRules,
    label_prefix: &str,
    include_labels: bool,
) -> NodeUpdateBody {
    let hostname = node.metadata.name.clone().unwrap_or_default();
    let available = rules.is_node_available(node);
    let status = node.status.as_ref();

    let conditions = status
        .and_then(|s| s.conditions.as_ref())
        .map(|cs| {
            cs.iter()
                .filter(|c| c.status == "True")
                .map(|c| c.type_.clone())
                .collect()
        })
        .unwrap_or_default();

    let mut allocatable = BTreeMap::new();
    if let Some(alloc) = status.and_then(|s| s.allocatable.as_ref()) {
        if let Some(millis) = alloc.get("cpu").and_then(|q| parse_millicores(&q.0)) {
            allocatable.insert("cpu".to_string(), (millis / 1000).to_string());
        }
        if let Some(ki) = alloc.get("memory").and_then(|q| parse_kibibytes(&q.0)) {
            allocatable.insert("memory".to_string(), format!("{ki}Ki"));
        }
        if let Some(ki) = alloc.get("ephemeral-storage").and_then(|q| parse_kibibytes(&q.0)) {
            allocatable.insert("ephemeral-storage".to_string(), format!("{ki}Ki"));
        }
    }

    let labels = if include_labels {
        node.metadata
            .labels
            .iter()
            .flatten()
            .filter(|(k, _)| k.starts_with(label_prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    } else {
        BTreeMap::new()
    };

    let taints = node
        .spec
        .as_ref()
        .and_then(|s| s.taints.as_ref())
        .map(|ts| {
            ts.iter()
                .map(|t| pb::NodeTaint {
                    key: t.key.clone(),
                    value: t.value.clone().unwrap_or_default(),
                    effect: t.effect.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    NodeUpdateBody { hostname, available, deleted: false, conditions, allocatable, labels, taints }
}

struct NodeStateEntry {
    body: NodeUpdateBody,
    at: Instant,
}

/// Last-sent bodies per node. Unchanged bodies are suppressed until their
/// entry ages out; the TTL is jittered per call so a fleet of reconnecting
/// operators does not re-emit every node at the same instant.
pub struct NodeStateTracker {
    ttl: Duration,
    entries: RwLock<HashMap<String, NodeStateEntry>>,
}

impl NodeStateTracker {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: RwLock::new(HashMap::new()) }
    }

    pub fn contains(&self, hostname: &str) -> bool {
        self.entries.read().expect("node state poisoned").contains_key(hostname)
    }

    /// True when the body differs from the last sent one, or the entry has
    /// outlived `ttl - jitter` with jitter uniform in `[0, ttl/5)`.
    pub fn should_send(&self, body: &NodeUpdateBody) -> bool {
        let entries = self.entries.read().expect("node state poisoned");
        match entries.get(&body.hostname) {
            Some(entry) if bodies_equal(&entry.body, body) => {
                entry.at.elapsed() >= self.ttl.saturating_sub(jitter(self.ttl))
            }
            _ => true,
        }
    }

    pub fn record(&self, body: NodeUpdateBody) {
        let mut entries = self.entries.write().expect("node state poisoned");
        entries.insert(body.hostname.clone(), NodeStateEntry { body, at: Instant::now() });
    }

    pub fn remove(&self, hostname: &str) {
        self.entries.write().expect("node state poisoned").remove(hostname);
    }

    pub fn hostnames(&self) -> Vec<String> {
        self.entries.read().expect("node state poisoned").keys().cloned().collect()
    }
}

fn jitter(ttl: Duration) -> Duration {
    let cap = ttl / 5;
    if cap.is_zero() {
        Duration::ZERO
    } else {
        rand::thread_rng().gen_range(Duration::ZERO..cap)
    }
}

/// Watches Nodes cluster-wide and emits availability updates plus the
/// periodic inventory.
pub struct NodeListener {
    client: Client,
    backend: String,
    label_prefix: String,
    include_labels: bool,
    inventory_period: Duration,
    rules: Arc<NodeConditionRules>,
    tracker: Arc<NodeStateTracker>,
    usage: Arc<NodeUsageAggregator>,
    tx: mpsc::Sender<pb::ListenerMessage>,
    instruments: Arc<Instruments>,
}

impl NodeListener {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Client,
        args: &ListenerArgs,
        rules: Arc<NodeConditionRules>,
        tracker: Arc<NodeStateTracker>,
        usage: Arc<NodeUsageAggregator>,
        tx: mpsc::Sender<pb::ListenerMessage>,
        instruments: Arc<Instruments>,
    ) -> Self {
        Self {
            client,
            backend: args.backend.clone(),
            label_prefix: args.node_condition_prefix.clone(),
            include_labels: args.enable_node_label_update,
            inventory_period: Duration::from_secs(args.resync_period_sec),
            rules,
            tracker,
            usage,
            tx,
            instruments,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let api: Api<Node> = Api::all(self.client.clone());
        let stream = watcher::watcher(api, watcher::Config::default());
        pin_mut!(stream);
        let mut inventory = tokio::time::interval_at(
            tokio::time::Instant::now() + self.inventory_period,
            self.inventory_period,
        );
        info!("node listener started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = inventory.tick() => self.emit_inventory().await?,
                ev = stream.try_next() => match ev.context("node watch failed")? {
                    Some(Event::Applied(node)) => self.handle_applied(&node).await?,
                    Some(Event::Deleted(node)) => self.handle_deleted(&node).await?,
                    Some(Event::Restarted(nodes)) => {
                        debug!(count = nodes.len(), "node watch restarted");
                        for node in &nodes {
                            self.handle_applied(node).await?;
                        }
                    }
                    None => anyhow::bail!("node watch stream ended"),
                },
            }
        }
    }

    async fn handle_applied(&self, node: &Node) -> anyhow::Result<()> {
        let body = build_node_body(node, &self.rules, &self.label_prefix, self.include_labels);
        if body.hostname.is_empty() {
            return Ok(());
        }
        if !self.tracker.contains(&body.hostname) {
            // A fresh usage row should flush for nodes joining the cluster.
            self.usage.mark_dirty(&body.hostname);
        }
        if !self.tracker.should_send(&body) {
            self.instruments
                .node_updates_suppressed_total
                .add(1, &listener_attrs("node"));
            return Ok(());
        }
        debug!(node = %body.hostname, available = body.available, "node update");
        send_message(&self.tx, pb::listener_message::Payload::NodeUpdate(body.to_update()))
            .await?;
        self.tracker.record(body);
        Ok(())
    }

    async fn handle_deleted(&self, node: &Node) -> anyhow::Result<()> {
        let mut body = build_node_body(node, &self.rules, &self.label_prefix, self.include_labels);
        if body.hostname.is_empty() {
            return Ok(());
        }
        body.deleted = true;
        body.available = false;
        info!(node = %body.hostname, "node deleted");
        send_message(&self.tx, pb::listener_message::Payload::NodeUpdate(body.to_update()))
            .await?;
        self.tracker.remove(&body.hostname);
        self.usage.mark_dirty(&body.hostname);
        Ok(())
    }

    async fn emit_inventory(&self) -> anyhow::Result<()> {
        let mut hostnames = self.tracker.hostnames();
        hostnames.sort();
        debug!(count = hostnames.len(), "emitting node inventory");
        send_message(
            &self.tx,
            pb::listener_message::Payload::NodeInventory(pb::NodeInventory {
                backend: self.backend.clone(),
                hostnames,
            }),
        )
        .await
    }
}
