//! Cluster event watcher with dedup.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::{pin_mut, TryStreamExt};
use k8s_openapi::api::core::v1::Event as KubeEvent;
use kube::api::Api;
use kube::runtime::watcher::{self, Event};
use kube::Client;
use osmo_core::ListenerArgs;
use osmo_telemetry::{listener_attrs, Instruments};
use osmo_wire::pb;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::{event_key, TtlCache};
use crate::send_message;

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Watches Kubernetes events and emits each distinct
/// `(involved object, reason, message, firstTimestamp)` once per TTL window.
pub struct EventListener {
    client: Client,
    cache: TtlCache,
    tx: mpsc::Sender<pb::ListenerMessage>,
    instruments: Arc<Instruments>,
}

impl EventListener {
    pub fn new(
        client: Client,
        args: &ListenerArgs,
        tx: mpsc::Sender<pb::ListenerMessage>,
        instruments: Arc<Instruments>,
    ) -> Self {
        Self {
            client,
            cache: TtlCache::new(Duration::from_secs(args.event_cache_ttl_min * 60)),
            tx,
            instruments,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let api: Api<KubeEvent> = Api::all(self.client.clone());
        let stream = watcher::watcher(api, watcher::Config::default());
        pin_mut!(stream);
        let mut prune = tokio::time::interval_at(
            tokio::time::Instant::now() + PRUNE_INTERVAL,
            PRUNE_INTERVAL,
        );
        info!("event listener started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = prune.tick() => {
                    let pruned = self.cache.prune();
                    if pruned > 0 {
                        debug!(pruned, remaining = self.cache.len(), "event cache pruned");
                        self.instruments
                            .cache_pruned_total
                            .add(pruned as u64, &listener_attrs("event"));
                    }
                }
                ev = stream.try_next() => match ev.context("event watch failed")? {
                    Some(Event::Applied(event)) => self.handle(&event).await?,
                    Some(Event::Deleted(_)) => {}
                    Some(Event::Restarted(events)) => {
                        for event in &events {
                            self.handle(event).await?;
                        }
                    }
                    None => anyhow::bail!("event watch stream ended"),
                },
            }
        }
    }

    async fn handle(&self, event: &KubeEvent) -> anyhow::Result<()> {
        let uid = event.involved_object.uid.clone().unwrap_or_default();
        let reason = event.reason.clone().unwrap_or_default();
        let message = event.message.clone().unwrap_or_default();
        let first_timestamp = event
            .first_timestamp
            .as_ref()
            .map(|t| t.0.to_rfc3339())
            .unwrap_or_default();

        if !self.cache.insert_if_new(&event_key(&uid, &reason, &message, &first_timestamp)) {
            return Ok(());
        }

        send_message(
            &self.tx,
            pb::listener_message::Payload::KubeEvent(pb::KubeEvent {
                involved_kind: event.involved_object.kind.clone().unwrap_or_default(),
                involved_name: event.involved_object.name.clone().unwrap_or_default(),
                involved_uid: uid,
                namespace: event.metadata.namespace.clone().unwrap_or_default(),
                reason,
                message,
                event_type: event.type_.clone().unwrap_or_default(),
                count: event.count.unwrap_or(0),
                first_timestamp,
                last_timestamp: event
                    .last_timestamp
                    .as_ref()
                    .map(|t| t.0.to_rfc3339())
                    .unwrap_or_default(),
            }),
        )
        .await
    }
}
