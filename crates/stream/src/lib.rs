//! Delivery pipeline shared by every listener: bounded unacked-message
//! tracking, the bidirectional stream lifecycle, and the liveness heartbeat.
//!
//! The stream itself is abstracted behind two one-method capabilities
//! ([`MessageSink`], [`AckSource`]) plus a [`StreamConnector`] that dials and
//! opens one attempt, so the lifecycle logic is testable against in-memory
//! streams and nothing above this crate touches the RPC library.

#![forbid(unsafe_code)]

pub mod grpc;
pub mod listener;
pub mod progress;
pub mod queue;

use std::sync::Arc;

use async_trait::async_trait;
use osmo_wire::pb;

pub use grpc::GrpcConnector;
pub use listener::BaseListener;
pub use progress::ProgressWriter;
pub use queue::UnackQueue;

/// Why one stream attempt ended.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("canceled")]
    Canceled,
    #[error("stream closed by server")]
    Eof,
    #[error(transparent)]
    Wire(#[from] osmo_wire::WireError),
    #[error("rpc: {0}")]
    Rpc(#[from] tonic::Status),
    #[error("send: {0}")]
    Send(String),
    #[error("worker panic: {0}")]
    WorkerPanic(String),
}

impl StreamError {
    /// True when the attempt ended because the caller asked it to.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, StreamError::Canceled)
    }
}

/// Client half of one stream attempt. Messages are framed in call order.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, msg: pb::ListenerMessage) -> Result<(), StreamError>;
}

/// Server half of one stream attempt. `Ok(None)` is a clean end of stream.
#[async_trait]
pub trait AckSource: Send {
    async fn recv(&mut self) -> Result<Option<pb::AckMessage>, StreamError>;
}

/// Dials the control plane and opens one bidirectional stream attempt.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self) -> Result<(Arc<dyn MessageSink>, Box<dyn AckSource>), StreamError>;
}
