//! gRPC-backed implementation of the stream capabilities.

use std::sync::Arc;

use async_trait::async_trait;
use osmo_wire::pb;
use osmo_wire::{ServiceEndpoint, TokenSource};
use tokio::sync::mpsc;

use crate::{AckSource, MessageSink, StreamConnector, StreamError};

// Wire-side buffer between the send worker and the HTTP/2 stream. Small on
// purpose: real backpressure comes from the unack queue.
const WIRE_BUFFER: usize = 64;

/// Opens one `ListenerStream` per [`connect`](StreamConnector::connect) call.
pub struct GrpcConnector {
    service: ServiceEndpoint,
    auth: Option<Arc<TokenSource>>,
}

impl GrpcConnector {
    pub fn new(service: ServiceEndpoint, auth: Option<Arc<TokenSource>>) -> Self {
        Self { service, auth }
    }
}

#[async_trait]
impl StreamConnector for GrpcConnector {
    async fn connect(&self) -> Result<(Arc<dyn MessageSink>, Box<dyn AckSource>), StreamError> {
        let (tx, acks) =
            osmo_wire::open_stream(&self.service, self.auth.as_deref(), WIRE_BUFFER).await?;
        Ok((Arc::new(GrpcSink { tx }), Box::new(GrpcAcks { inner: acks })))
    }
}

struct GrpcSink {
    tx: mpsc::Sender<pb::ListenerMessage>,
}

#[async_trait]
impl MessageSink for GrpcSink {
    async fn send(&self, msg: pb::ListenerMessage) -> Result<(), StreamError> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| StreamError::Send("stream request body closed".to_string()))
    }
}

struct GrpcAcks {
    inner: tonic::codec::Streaming<pb::AckMessage>,
}

#[async_trait]
impl AckSource for GrpcAcks {
    async fn recv(&mut self) -> Result<Option<pb::AckMessage>, StreamError> {
        self.inner.message().await.map_err(StreamError::Rpc)
    }
}
