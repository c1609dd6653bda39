//! Kubernetes-facing listeners: watch pods, nodes and events, derive domain
//! state, and hand ordered messages to the delivery pipeline.

#![forbid(unsafe_code)]

pub mod cache;
pub mod event;
pub mod node;
pub mod pod_status;
pub mod quantity;
pub mod rules;
pub mod supervisor;
pub mod usage;
pub mod workflow;

use osmo_wire::pb;
use tokio::sync::mpsc;

pub use event::EventListener;
pub use node::{NodeListener, NodeStateTracker};
pub use rules::NodeConditionRules;
pub use supervisor::{init_backend, supervise};
pub use usage::{NodeUsageAggregator, NodeUsageListener};
pub use workflow::WorkflowListener;

/// Mint a uuid'd message around `payload` and push it into a producer
/// channel, waiting when the channel is full. A closed channel means the
/// process is tearing down, which surfaces as an error to the supervisor.
pub(crate) async fn send_message(
    tx: &mpsc::Sender<pb::ListenerMessage>,
    payload: pb::listener_message::Payload,
) -> anyhow::Result<()> {
    tx.send(osmo_wire::new_message(payload))
        .await
        .map_err(|_| anyhow::anyhow!("producer channel closed"))
}
