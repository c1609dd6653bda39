//! Stream lifecycle shared by every listener: one attempt = dial, resend the
//! in-flight set, then pump sends and acks until the stream dies or the
//! process shuts down.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use osmo_telemetry::{listener_attrs, Instruments};
use osmo_wire::pb;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{AckSource, MessageSink, ProgressWriter, StreamConnector, StreamError, UnackQueue};

const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// First-cause stream cancellation: whoever aborts first decides why the
/// attempt ended; later aborts only reinforce the cancellation.
#[derive(Clone)]
struct StreamAbort {
    token: CancellationToken,
    cause: Arc<Mutex<Option<StreamError>>>,
}

impl StreamAbort {
    fn new() -> Self {
        Self { token: CancellationToken::new(), cause: Arc::new(Mutex::new(None)) }
    }

    fn abort(&self, cause: StreamError) {
        {
            let mut slot = self.cause.lock().expect("abort cause poisoned");
            if slot.is_none() {
                *slot = Some(cause);
            }
        }
        self.token.cancel();
    }

    fn token(&self) -> &CancellationToken {
        &self.token
    }

    async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    fn take_cause(&self) -> Option<StreamError> {
        self.cause.lock().expect("abort cause poisoned").take()
    }
}

/// Owns one listener's stream side: the producer-channel receiver, the unack
/// queue, and the reconnect-scoped workers. The supervisor calls [`run`] once
/// per attempt; state in the queue survives across attempts.
///
/// [`run`]: BaseListener::run
pub struct BaseListener {
    name: &'static str,
    connector: Arc<dyn StreamConnector>,
    queue: Arc<UnackQueue>,
    rx: tokio::sync::Mutex<mpsc::Receiver<pb::ListenerMessage>>,
    progress: ProgressWriter,
    instruments: Arc<Instruments>,
}

impl BaseListener {
    pub fn new(
        name: &'static str,
        connector: Arc<dyn StreamConnector>,
        queue: Arc<UnackQueue>,
        rx: mpsc::Receiver<pb::ListenerMessage>,
        progress: ProgressWriter,
        instruments: Arc<Instruments>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            connector,
            queue,
            rx: tokio::sync::Mutex::new(rx),
            progress,
            instruments,
        })
    }

    pub fn queue(&self) -> Arc<UnackQueue> {
        Arc::clone(&self.queue)
    }

    /// One full stream attempt. Returns `Ok(())` only for caller-initiated
    /// cancellation; every other outcome is the error that ended the attempt,
    /// for the supervisor to back off on.
    pub async fn run(self: &Arc<Self>, shutdown: &CancellationToken) -> Result<(), StreamError> {
        let (sink, acks) = self.connector.connect().await?;
        info!(listener = self.name, "stream connected");
        self.progress.report();

        let resent = self.queue.resend_all(sink.as_ref()).await?;
        if resent > 0 {
            info!(listener = self.name, resent, "unacked messages replayed");
        }

        let abort = StreamAbort::new();
        let mut workers = JoinSet::new();
        {
            let this = Arc::clone(self);
            let abort = abort.clone();
            workers.spawn(async move { this.recv_acks(acks, abort).await });
        }
        {
            let this = Arc::clone(self);
            let abort = abort.clone();
            let sink = Arc::clone(&sink);
            workers.spawn(async move { this.pump_messages(sink, abort).await });
        }

        loop {
            tokio::select! {
                _ = abort.cancelled() => break,
                _ = shutdown.cancelled() => {
                    abort.abort(StreamError::Canceled);
                    break;
                }
                joined = workers.join_next() => match joined {
                    Some(Err(err)) if err.is_panic() => {
                        self.instruments.worker_panic_total.add(1, &listener_attrs(self.name));
                        abort.abort(StreamError::WorkerPanic(err.to_string()));
                        break;
                    }
                    // A worker that returns has already set an abort cause.
                    Some(_) => continue,
                    None => break,
                },
            }
        }

        let join_all = async {
            while let Some(joined) = workers.join_next().await {
                if let Err(err) = joined {
                    if err.is_panic() {
                        self.instruments.worker_panic_total.add(1, &listener_attrs(self.name));
                    }
                }
            }
        };
        if tokio::time::timeout(WORKER_JOIN_TIMEOUT, join_all).await.is_err() {
            warn!(listener = self.name, "stream workers did not stop in time");
            workers.abort_all();
        }

        self.drain_producer_channel().await;
        self.instruments.grpc_disconnect_count.add(1, &listener_attrs(self.name));

        // Dropping sink and acks here closes the send side and the
        // connection; both are idempotent by ownership.
        match abort.take_cause() {
            Some(StreamError::Canceled) | None => Ok(()),
            Some(cause) => Err(cause),
        }
    }

    /// Receive worker: every inbound message is an ack. Also the liveness
    /// signal: progress is reported (rate-limited) while acks flow.
    async fn recv_acks(&self, mut acks: Box<dyn AckSource>, abort: StreamAbort) {
        loop {
            let next = tokio::select! {
                _ = abort.cancelled() => return,
                next = acks.recv() => next,
            };
            match next {
                Ok(Some(ack)) => {
                    if !self.queue.remove(&ack.ack_uuid) {
                        trace!(listener = self.name, uuid = %ack.ack_uuid, "ack for unknown uuid");
                    }
                    self.instruments.acks_received_total.add(1, &listener_attrs(self.name));
                    self.instruments
                        .unacked_message_queue_depth
                        .record(self.queue.len() as u64, &listener_attrs(self.name));
                    self.progress.report_rate_limited();
                }
                Ok(None) => {
                    debug!(listener = self.name, "server closed the stream");
                    abort.abort(StreamError::Eof);
                    return;
                }
                Err(error) => {
                    abort.abort(error);
                    return;
                }
            }
        }
    }

    /// Send worker: producer channel → unack queue (backpressure) → wire.
    async fn pump_messages(&self, sink: Arc<dyn MessageSink>, abort: StreamAbort) {
        let mut rx = self.rx.lock().await;
        loop {
            let msg = tokio::select! {
                _ = abort.cancelled() => return,
                received = rx.recv() => match received {
                    Some(msg) => msg,
                    None => {
                        // Producer side gone: the listener is shutting down.
                        abort.abort(StreamError::Canceled);
                        return;
                    }
                },
            };
            if let Err(error) = self.queue.add(abort.token(), msg.clone()).await {
                abort.abort(error);
                return;
            }
            let sent = tokio::select! {
                _ = abort.cancelled() => return,
                sent = sink.send(msg) => sent,
            };
            match sent {
                Ok(()) => {
                    self.instruments.messages_sent_total.add(1, &listener_attrs(self.name));
                }
                Err(error) => {
                    abort.abort(error);
                    return;
                }
            }
        }
    }

    /// Preserve whatever producers buffered while the stream was dying: it
    /// goes into the unack map past the bound and replays on reconnect.
    async fn drain_producer_channel(&self) {
        let mut rx = self.rx.lock().await;
        let mut drained = 0usize;
        while let Ok(msg) = rx.try_recv() {
            self.queue.add_forced(msg);
            drained += 1;
        }
        if drained > 0 {
            debug!(listener = self.name, drained, "buffered messages moved to unack queue");
        }
    }
}
