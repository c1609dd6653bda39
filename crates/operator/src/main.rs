//! OSMO operator entry point: flag parsing, telemetry bootstrap, and the
//! wiring of four listener pipelines onto one supervisor.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use opentelemetry::metrics::MeterProvider;
use osmo_core::ListenerArgs;
use osmo_listeners::{
    supervise, EventListener, NodeConditionRules, NodeListener, NodeStateTracker,
    NodeUsageAggregator, NodeUsageListener, WorkflowListener,
};
use osmo_stream::{BaseListener, GrpcConnector, ProgressWriter, UnackQueue};
use osmo_telemetry::{init_meter_provider, Instruments, TelemetryConfig};
use osmo_wire::{ServiceEndpoint, TokenSource};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

fn init_tracing() {
    let env = std::env::var("OSMO_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// The kubelet and cluster DNS can lag the operator at pod start; retry the
/// client bootstrap with the same capped ladder the supervisor uses.
async fn connect_kube_client(shutdown: &CancellationToken) -> Result<kube::Client> {
    const ATTEMPTS: u32 = 5;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match kube::Client::try_default().await {
            Ok(client) => return Ok(client),
            Err(error) if attempt < ATTEMPTS => {
                let backoff =
                    Duration::from_secs((1u64 << (attempt - 1).min(5)).min(30));
                warn!(attempt, backoff_secs = backoff.as_secs(), %error, "kubernetes client init failed");
                tokio::select! {
                    _ = shutdown.cancelled() => anyhow::bail!("startup canceled"),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
            Err(error) => {
                return Err(anyhow::Error::new(error).context("creating kubernetes client"))
            }
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let args = ListenerArgs::parse();
    let service = ServiceEndpoint::parse(&args.service_url).context("parsing --service-url")?;

    let (provider, instruments) = if args.otel_enabled {
        let provider = init_meter_provider(&TelemetryConfig {
            collector_host: args.otel_collector_host.clone(),
            collector_port: args.otel_collector_port,
            export_interval_ms: args.otel_export_interval_ms,
            service_name: args.otel_service_name.clone(),
            service_version: args.otel_service_version.clone(),
        })
        .context("starting metrics exporter")?;
        let instruments = Arc::new(Instruments::new(&provider.meter("osmo-operator")));
        (Some(provider), instruments)
    } else {
        (None, Arc::new(Instruments::noop()))
    };

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    osmo_listeners::init_backend(&service, &shutdown).await?;
    let client = connect_kube_client(&shutdown).await?;

    let auth = match &args.auth_token {
        Some(token) => Some(Arc::new(TokenSource::new(&service, token.clone())?)),
        None => None,
    };

    let rules = Arc::new(NodeConditionRules::new(&args.condition_rules()));
    let tracker = Arc::new(NodeStateTracker::new(Duration::from_secs(
        args.state_cache_ttl_min * 60,
    )));
    let aggregator = Arc::new(NodeUsageAggregator::new(args.namespace.clone()));

    let mut tasks = tokio::task::JoinSet::new();
    let stream_for = |name: &'static str, chan: usize| {
        let (tx, rx) = mpsc::channel(chan);
        let listener = BaseListener::new(
            name,
            Arc::new(GrpcConnector::new(service.clone(), auth.clone())),
            Arc::new(UnackQueue::new(args.max_unacked_messages)),
            rx,
            ProgressWriter::new(
                &args.progress_dir,
                name,
                Duration::from_secs(args.progress_frequency_sec),
            ),
            Arc::clone(&instruments),
        );
        (tx, listener)
    };

    // Workflow pods.
    let (pod_tx, workflow_stream) = stream_for("workflow", args.pod_update_chan_size);
    let workflow =
        Arc::new(WorkflowListener::new(client.clone(), &args, pod_tx, Arc::clone(&instruments)));
    spawn_stream(&mut tasks, "workflow-stream", &shutdown, &instruments, workflow_stream);
    {
        let shutdown_op = shutdown.clone();
        tasks.spawn(supervise(
            "workflow-watch",
            shutdown.clone(),
            Arc::clone(&instruments),
            move || {
                let listener = Arc::clone(&workflow);
                let shutdown = shutdown_op.clone();
                async move { listener.run(shutdown).await }
            },
        ));
    }

    // Nodes.
    let (node_tx, node_stream) = stream_for("node", args.node_update_chan_size);
    let node = Arc::new(NodeListener::new(
        client.clone(),
        &args,
        Arc::clone(&rules),
        Arc::clone(&tracker),
        Arc::clone(&aggregator),
        node_tx,
        Arc::clone(&instruments),
    ));
    spawn_stream(&mut tasks, "node-stream", &shutdown, &instruments, node_stream);
    {
        let shutdown_op = shutdown.clone();
        tasks.spawn(supervise(
            "node-watch",
            shutdown.clone(),
            Arc::clone(&instruments),
            move || {
                let listener = Arc::clone(&node);
                let shutdown = shutdown_op.clone();
                async move { listener.run(shutdown).await }
            },
        ));
    }

    // Per-node usage.
    let (usage_tx, usage_stream) = stream_for("usage", args.usage_chan_size);
    let usage = Arc::new(NodeUsageListener::new(
        client.clone(),
        &args,
        Arc::clone(&aggregator),
        usage_tx,
        Arc::clone(&instruments),
    ));
    spawn_stream(&mut tasks, "usage-stream", &shutdown, &instruments, usage_stream);
    {
        let shutdown_op = shutdown.clone();
        tasks.spawn(supervise(
            "usage-watch",
            shutdown.clone(),
            Arc::clone(&instruments),
            move || {
                let listener = Arc::clone(&usage);
                let shutdown = shutdown_op.clone();
                async move { listener.run(shutdown).await }
            },
        ));
    }

    // Cluster events.
    let (event_tx, event_stream) = stream_for("event", args.event_chan_size);
    let events =
        Arc::new(EventListener::new(client.clone(), &args, event_tx, Arc::clone(&instruments)));
    spawn_stream(&mut tasks, "event-stream", &shutdown, &instruments, event_stream);
    {
        let shutdown_op = shutdown.clone();
        tasks.spawn(supervise(
            "event-watch",
            shutdown.clone(),
            Arc::clone(&instruments),
            move || {
                let listener = Arc::clone(&events);
                let shutdown = shutdown_op.clone();
                async move { listener.run(shutdown).await }
            },
        ));
    }

    info!(backend = %args.backend, service = %service.uri(), "operator started");
    while tasks.join_next().await.is_some() {}

    if let Some(provider) = provider {
        if let Err(error) = provider.shutdown() {
            warn!(%error, "metrics exporter shutdown failed");
        }
    }
    info!("operator stopped");
    Ok(())
}

fn spawn_stream(
    tasks: &mut tokio::task::JoinSet<()>,
    name: &'static str,
    shutdown: &CancellationToken,
    instruments: &Arc<Instruments>,
    listener: Arc<BaseListener>,
) {
    let shutdown_op = shutdown.clone();
    tasks.spawn(supervise(
        name,
        shutdown.clone(),
        Arc::clone(instruments),
        move || {
            let listener = Arc::clone(&listener);
            let shutdown = shutdown_op.clone();
            async move { Ok(listener.run(&shutdown).await?) }
        },
    ));
}
