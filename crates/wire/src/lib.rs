//! Wire layer for the control-plane link: protobuf message types, the
//! bidirectional streaming client, service-URL handling and token auth.

#![forbid(unsafe_code)]

pub mod auth;
pub mod endpoint;
pub mod pb;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::codec::Streaming;
use tonic::metadata::MetadataValue;
use tracing::debug;

pub use auth::TokenSource;
pub use endpoint::ServiceEndpoint;

/// Metadata key carrying the access token.
pub const AUTH_HEADER: &str = "x-osmo-auth";

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("invalid service url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("auth token is not valid header data")]
    InvalidToken,
    #[error("transport: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("rpc: {0}")]
    Rpc(#[from] tonic::Status),
    #[error("auth refresh: {0}")]
    AuthRefresh(#[from] reqwest::Error),
}

/// Dial the control plane and open the listener stream.
///
/// Returns the client half of the stream as a plain channel sender (messages
/// pushed into it are framed onto the wire in order) plus the server's ack
/// stream. Dropping the sender half-closes the stream; dropping both ends
/// tears the connection down.
pub async fn open_stream(
    service: &ServiceEndpoint,
    auth: Option<&TokenSource>,
    buffer: usize,
) -> Result<(mpsc::Sender<pb::ListenerMessage>, Streaming<pb::AckMessage>), WireError> {
    let header = match auth {
        Some(source) => {
            let token = source.access_token().await?;
            let value: MetadataValue<_> = token.parse().map_err(|_| WireError::InvalidToken)?;
            Some(value)
        }
        None => None,
    };

    let channel = service.endpoint()?.connect().await?;
    let mut client = pb::listener_service_client::ListenerServiceClient::with_interceptor(
        channel,
        move |mut req: tonic::Request<()>| {
            if let Some(value) = &header {
                req.metadata_mut().insert(AUTH_HEADER, value.clone());
            }
            Ok(req)
        },
    );

    let (tx, rx) = mpsc::channel(buffer);
    let response = client.listener_stream(ReceiverStream::new(rx)).await?;
    debug!(uri = %service.uri(), "listener stream established");
    Ok((tx, response.into_inner()))
}

/// Probe the control plane: resolve, dial and tear the connection back down.
/// Used as the backend-init gate before any listener starts.
pub async fn probe(service: &ServiceEndpoint) -> Result<(), WireError> {
    let _ = service.endpoint()?.connect().await?;
    Ok(())
}

/// Mint a listener message around a payload with a fresh uuid.
pub fn new_message(payload: pb::listener_message::Payload) -> pb::ListenerMessage {
    pb::ListenerMessage {
        uuid: uuid::Uuid::new_v4().to_string(),
        payload: Some(payload),
    }
}
