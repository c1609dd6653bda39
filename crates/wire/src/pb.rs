//! Message types for the listener stream, maintained by hand in the shape
//! tonic codegen emits so no protoc toolchain is needed at build time.
//! The schema is owned by the control plane; field numbers are frozen.

/// Client → server envelope. The server deduplicates by `uuid`, so resends
/// after a reconnect are harmless.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListenerMessage {
    #[prost(string, tag = "1")]
    pub uuid: ::prost::alloc::string::String,
    #[prost(oneof = "listener_message::Payload", tags = "2, 3, 4, 5, 6")]
    pub payload: ::core::option::Option<listener_message::Payload>,
}
/// Nested message and enum types in `ListenerMessage`.
pub mod listener_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "2")]
        PodUpdate(super::PodUpdate),
        #[prost(message, tag = "3")]
        NodeUpdate(super::NodeUpdate),
        #[prost(message, tag = "4")]
        NodeInventory(super::NodeInventory),
        #[prost(message, tag = "5")]
        NodeUsage(super::NodeUsage),
        #[prost(message, tag = "6")]
        KubeEvent(super::KubeEvent),
    }
}
/// Server → client acknowledgement of one message uuid.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AckMessage {
    #[prost(string, tag = "1")]
    pub ack_uuid: ::prost::alloc::string::String,
}
/// Task-status change for one workflow pod.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PodUpdate {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub namespace: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub uid: ::prost::alloc::string::String,
    /// Numeric value of the task-status taxonomy.
    #[prost(int32, tag = "4")]
    pub status: i32,
    #[prost(string, tag = "5")]
    pub message: ::prost::alloc::string::String,
    /// Offset-adjusted exit code; -1 when not set.
    #[prost(int32, tag = "6")]
    pub exit_code: i32,
    #[prost(string, tag = "7")]
    pub node: ::prost::alloc::string::String,
}
/// Availability, conditions, allocatable resources, labels and taints of a node.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeUpdate {
    #[prost(string, tag = "1")]
    pub hostname: ::prost::alloc::string::String,
    #[prost(bool, tag = "2")]
    pub available: bool,
    #[prost(bool, tag = "3")]
    pub deleted: bool,
    /// Condition types currently True.
    #[prost(string, repeated, tag = "4")]
    pub conditions: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(map = "string, string", tag = "5")]
    pub allocatable: ::std::collections::HashMap<
        ::prost::alloc::string::String,
        ::prost::alloc::string::String,
    >,
    #[prost(map = "string, string", tag = "6")]
    pub labels: ::std::collections::HashMap<
        ::prost::alloc::string::String,
        ::prost::alloc::string::String,
    >,
    #[prost(message, repeated, tag = "7")]
    pub taints: ::prost::alloc::vec::Vec<NodeTaint>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeTaint {
    #[prost(string, tag = "1")]
    pub key: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub value: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub effect: ::prost::alloc::string::String,
}
/// Full list of known hostnames, emitted periodically for reconciliation.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeInventory {
    #[prost(string, tag = "1")]
    pub backend: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "2")]
    pub hostnames: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}
/// Aggregated resource requests currently placed on one node.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeUsage {
    #[prost(string, tag = "1")]
    pub hostname: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub total: ::core::option::Option<ResourceTotals>,
    /// Share contributed by pods outside the workflow namespace.
    #[prost(message, optional, tag = "3")]
    pub non_workflow: ::core::option::Option<ResourceTotals>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResourceTotals {
    /// Whole cores, rounded up.
    #[prost(string, tag = "1")]
    pub cpu: ::prost::alloc::string::String,
    /// Kibibytes with "Ki" suffix.
    #[prost(string, tag = "2")]
    pub memory: ::prost::alloc::string::String,
    /// Kibibytes with "Ki" suffix.
    #[prost(string, tag = "3")]
    pub storage: ::prost::alloc::string::String,
    #[prost(int64, tag = "4")]
    pub gpu: i64,
}
/// A deduplicated Kubernetes event.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KubeEvent {
    #[prost(string, tag = "1")]
    pub involved_kind: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub involved_name: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub involved_uid: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub namespace: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub reason: ::prost::alloc::string::String,
    #[prost(string, tag = "6")]
    pub message: ::prost::alloc::string::String,
    #[prost(string, tag = "7")]
    pub event_type: ::prost::alloc::string::String,
    #[prost(int32, tag = "8")]
    pub count: i32,
    /// RFC 3339; empty when the cluster did not record one.
    #[prost(string, tag = "9")]
    pub first_timestamp: ::prost::alloc::string::String,
    #[prost(string, tag = "10")]
    pub last_timestamp: ::prost::alloc::string::String,
}
/// Generated client implementations.
pub mod listener_service_client {
    #![allow(unused_variables, dead_code, missing_docs, clippy::let_unit_value)]
    use tonic::codegen::http::Uri;
    use tonic::codegen::*;
    #[derive(Debug, Clone)]
    pub struct ListenerServiceClient<T> {
        inner: tonic::client::Grpc<T>,
    }
    impl ListenerServiceClient<tonic::transport::Channel> {
        /// Attempt to create a new client by connecting to a given endpoint.
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }
    impl<T> ListenerServiceClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }
        pub fn with_origin(inner: T, origin: Uri) -> Self {
            let inner = tonic::client::Grpc::with_origin(inner, origin);
            Self { inner }
        }
        pub fn with_interceptor<F>(
            inner: T,
            interceptor: F,
        ) -> ListenerServiceClient<InterceptedService<T, F>>
        where
            F: tonic::service::Interceptor,
            T::ResponseBody: Default,
            T: tonic::codegen::Service<
                http::Request<tonic::body::BoxBody>,
                Response = http::Response<
                    <T as tonic::client::GrpcService<tonic::body::BoxBody>>::ResponseBody,
                >,
            >,
            <T as tonic::codegen::Service<
                http::Request<tonic::body::BoxBody>,
            >>::Error: Into<StdError> + Send + Sync,
        {
            ListenerServiceClient::new(InterceptedService::new(inner, interceptor))
        }
        /// Compress requests with the given encoding.
        ///
        /// This requires the server to support it otherwise it might respond with an
        /// error.
        #[must_use]
        pub fn send_compressed(mut self, encoding: CompressionEncoding) -> Self {
            self.inner = self.inner.send_compressed(encoding);
            self
        }
        /// Enable decompressing responses.
        #[must_use]
        pub fn accept_compressed(mut self, encoding: CompressionEncoding) -> Self {
            self.inner = self.inner.accept_compressed(encoding);
            self
        }
        /// Limits the maximum size of a decoded message.
        ///
        /// Default: `4MB`
        #[must_use]
        pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
            self.inner = self.inner.max_decoding_message_size(limit);
            self
        }
        /// Limits the maximum size of an encoded message.
        ///
        /// Default: `usize::MAX`
        #[must_use]
        pub fn max_encoding_message_size(mut self, limit: usize) -> Self {
            self.inner = self.inner.max_encoding_message_size(limit);
            self
        }
        /// Ordered message stream from one listener; the server replies with
        /// per-uuid acknowledgements.
        pub async fn listener_stream(
            &mut self,
            request: impl tonic::IntoStreamingRequest<Message = super::ListenerMessage>,
        ) -> std::result::Result<
            tonic::Response<tonic::codec::Streaming<super::AckMessage>>,
            tonic::Status,
        > {
            self.inner
                .ready()
                .await
                .map_err(|e| {
                    tonic::Status::new(
                        tonic::Code::Unknown,
                        format!("Service was not ready: {}", e.into()),
                    )
                })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/osmo.v1.ListenerService/ListenerStream",
            );
            let mut req = request.into_streaming_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("osmo.v1.ListenerService", "ListenerStream"));
            self.inner.streaming(req, path, codec).await
        }
    }
}
