//! In-flight message tracking with bounded backpressure.

use std::collections::HashMap;
use std::sync::Mutex;

use osmo_wire::pb;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::{MessageSink, StreamError};

/// Map of unacknowledged messages keyed by uuid, bounded by a single-slot
/// ready signal: producers take the slot before inserting, and the slot is
/// only put back while the map is under its bound. Acks replenish it.
///
/// No ordering is kept; resend after a reconnect is reset-like, and the
/// server deduplicates by uuid.
pub struct UnackQueue {
    entries: Mutex<HashMap<String, pb::ListenerMessage>>,
    max: usize,
    ready_tx: mpsc::Sender<()>,
    ready_rx: tokio::sync::Mutex<mpsc::Receiver<()>>,
}

impl UnackQueue {
    /// `max == 0` disables the bound; `add` then never waits.
    pub fn new(max: usize) -> Self {
        let (ready_tx, ready_rx) = mpsc::channel(1);
        let _ = ready_tx.try_send(());
        Self {
            entries: Mutex::new(HashMap::new()),
            max,
            ready_tx,
            ready_rx: tokio::sync::Mutex::new(ready_rx),
        }
    }

    /// Insert a message, waiting for capacity first. Returns
    /// [`StreamError::Canceled`] if `cancel` fires while waiting.
    pub async fn add(
        &self,
        cancel: &CancellationToken,
        msg: pb::ListenerMessage,
    ) -> Result<(), StreamError> {
        if self.max > 0 {
            let mut slot = self.ready_rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => return Err(StreamError::Canceled),
                _ = slot.recv() => {}
            }
        }
        let mut entries = self.entries.lock().expect("unack map poisoned");
        entries.insert(msg.uuid.clone(), msg);
        if self.max > 0 && entries.len() < self.max {
            let _ = self.ready_tx.try_send(());
        }
        Ok(())
    }

    /// Unconditional insert that bypasses the bound. Reserved for the owning
    /// stream draining its producer channel after the stream went down, so
    /// buffered messages survive into the next attempt; the bound re-applies
    /// as acks come back.
    pub fn add_forced(&self, msg: pb::ListenerMessage) {
        let mut entries = self.entries.lock().expect("unack map poisoned");
        entries.insert(msg.uuid.clone(), msg);
    }

    /// Drop an acked message. Unknown uuids are a no-op. Returns whether an
    /// entry was removed.
    pub fn remove(&self, uuid: &str) -> bool {
        let mut entries = self.entries.lock().expect("unack map poisoned");
        let removed = entries.remove(uuid).is_some();
        if self.max == 0 || entries.len() < self.max {
            let _ = self.ready_tx.try_send(());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("unack map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the current in-flight set, in no particular order.
    pub fn pending(&self) -> Vec<pb::ListenerMessage> {
        self.entries
            .lock()
            .expect("unack map poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Replay every in-flight message onto a fresh stream. Aborts on the
    /// first send error so the caller can tear the attempt down; nothing is
    /// removed here, acks do that.
    pub async fn resend_all(&self, sink: &dyn MessageSink) -> Result<usize, StreamError> {
        let pending = self.pending();
        let count = pending.len();
        for msg in pending {
            trace!(uuid = %msg.uuid, "resending unacked message");
            sink.send(msg).await?;
        }
        Ok(count)
    }
}
