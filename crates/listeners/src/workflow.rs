//! Workflow pod watcher: derive task status and emit deduplicated updates.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use futures::{pin_mut, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::runtime::watcher::{self, Event};
use kube::Client;
use osmo_core::ListenerArgs;
use osmo_telemetry::{listener_attrs, Instruments};
use osmo_wire::pb;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::{pod_update_key, TtlCache};
use crate::pod_status::derive_status;
use crate::send_message;

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Watches Pods in the workflow namespace; every observation is derived into
/// the task taxonomy and emitted once per distinct state within the TTL.
pub struct WorkflowListener {
    client: Client,
    namespace: String,
    cache: TtlCache,
    tx: mpsc::Sender<pb::ListenerMessage>,
    instruments: Arc<Instruments>,
}

impl WorkflowListener {
    pub fn new(
        client: Client,
        args: &ListenerArgs,
        tx: mpsc::Sender<pb::ListenerMessage>,
        instruments: Arc<Instruments>,
    ) -> Self {
        Self {
            client,
            namespace: args.namespace.clone(),
            cache: TtlCache::new(Duration::from_secs(args.state_cache_ttl_min * 60)),
            tx,
            instruments,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let stream = watcher::watcher(api, watcher::Config::default());
        pin_mut!(stream);
        let mut prune = tokio::time::interval_at(
            tokio::time::Instant::now() + PRUNE_INTERVAL,
            PRUNE_INTERVAL,
        );
        info!(namespace = %self.namespace, "workflow listener started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = prune.tick() => {
                    let pruned = self.cache.prune();
                    if pruned > 0 {
                        debug!(pruned, remaining = self.cache.len(), "state cache pruned");
                        self.instruments
                            .cache_pruned_total
                            .add(pruned as u64, &listener_attrs("workflow"));
                    }
                }
                ev = stream.try_next() => match ev.context("workflow pod watch failed")? {
                    Some(Event::Applied(pod)) => self.handle(&pod).await?,
                    // Deletion still derives: the last observed state is the
                    // final word on the task.
                    Some(Event::Deleted(pod)) => self.handle(&pod).await?,
                    Some(Event::Restarted(pods)) => {
                        debug!(count = pods.len(), "workflow pod watch restarted");
                        for pod in &pods {
                            self.handle(pod).await?;
                        }
                    }
                    None => anyhow::bail!("workflow pod watch stream ended"),
                },
            }
        }
    }

    async fn handle(&self, pod: &Pod) -> anyhow::Result<()> {
        let Some(uid) = pod.metadata.uid.as_deref() else { return Ok(()) };
        let result = derive_status(pod, Utc::now());

        let key = pod_update_key(uid, result.status, result.exit_code, &result.message);
        if !self.cache.insert_if_new(&key) {
            return Ok(());
        }

        let name = pod.metadata.name.clone().unwrap_or_default();
        debug!(pod = %name, status = %result.status, exit_code = result.exit_code, "task status change");
        send_message(
            &self.tx,
            pb::listener_message::Payload::PodUpdate(pb::PodUpdate {
                name,
                namespace: self.namespace.clone(),
                uid: uid.to_string(),
                status: result.status as i32,
                message: result.message,
                exit_code: result.exit_code,
                node: pod
                    .spec
                    .as_ref()
                    .and_then(|s| s.node_name.clone())
                    .unwrap_or_default(),
            }),
        )
        .await
    }
}
