//! Metrics instruments for the operator.
//!
//! Components receive an [`Instruments`] handle explicitly; there is no
//! process-global metrics state. When export is disabled the same handles are
//! backed by a noop meter, so call sites never branch.

#![forbid(unsafe_code)]

use std::time::Duration;

use opentelemetry::metrics::noop::NoopMeterProvider;
use opentelemetry::metrics::{Counter, Histogram, Meter, MeterProvider, MetricsError};
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::Resource;

/// Collector endpoint and identity for OTLP export.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub collector_host: String,
    pub collector_port: u16,
    pub export_interval_ms: u64,
    pub service_name: String,
    pub service_version: String,
}

/// Build a meter provider pushing to the OTLP collector.
pub fn init_meter_provider(cfg: &TelemetryConfig) -> Result<SdkMeterProvider, MetricsError> {
    let endpoint = format!("http://{}:{}", cfg.collector_host, cfg.collector_port);
    opentelemetry_otlp::new_pipeline()
        .metrics(opentelemetry_sdk::runtime::Tokio)
        .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint))
        .with_period(Duration::from_millis(cfg.export_interval_ms))
        .with_resource(Resource::new([
            KeyValue::new("service.name", cfg.service_name.clone()),
            KeyValue::new("service.version", cfg.service_version.clone()),
        ]))
        .build()
}

/// Counter and histogram handles shared across listeners. All handles are
/// cheaply cloneable and safe to use from any task.
#[derive(Clone)]
pub struct Instruments {
    pub grpc_disconnect_count: Counter<u64>,
    pub messages_sent_total: Counter<u64>,
    pub acks_received_total: Counter<u64>,
    pub unacked_message_queue_depth: Histogram<u64>,
    pub worker_panic_total: Counter<u64>,
    pub listener_retry_total: Counter<u64>,
    pub listener_backoff_seconds: Histogram<f64>,
    pub node_usage_flush_duration_seconds: Histogram<f64>,
    pub node_updates_suppressed_total: Counter<u64>,
    pub cache_pruned_total: Counter<u64>,
}

impl Instruments {
    pub fn new(meter: &Meter) -> Self {
        Self {
            grpc_disconnect_count: meter
                .u64_counter("grpc_disconnect_count")
                .with_description("Stream terminations, by listener and cause")
                .init(),
            messages_sent_total: meter
                .u64_counter("messages_sent_total")
                .with_description("Messages handed to the stream, including resends")
                .init(),
            acks_received_total: meter
                .u64_counter("acks_received_total")
                .with_description("Server acknowledgements received")
                .init(),
            unacked_message_queue_depth: meter
                .u64_histogram("unacked_message_queue_depth")
                .with_description("In-flight message count sampled at each ack")
                .init(),
            worker_panic_total: meter
                .u64_counter("worker_panic_total")
                .with_description("Stream worker panics converted into reconnects")
                .init(),
            listener_retry_total: meter
                .u64_counter("listener_retry_total")
                .with_description("Listener restarts performed by the supervisor")
                .init(),
            listener_backoff_seconds: meter
                .f64_histogram("listener_backoff_seconds")
                .with_description("Backoff applied before listener restarts")
                .init(),
            node_usage_flush_duration_seconds: meter
                .f64_histogram("node_usage_flush_duration_seconds")
                .with_description("Wall time of one dirty-node usage flush")
                .init(),
            node_updates_suppressed_total: meter
                .u64_counter("node_updates_suppressed_total")
                .with_description("Node bodies skipped as unchanged within TTL")
                .init(),
            cache_pruned_total: meter
                .u64_counter("cache_pruned_total")
                .with_description("Entries expired out of dedup caches, by cache")
                .init(),
        }
    }

    /// Handles backed by a noop meter; used when export is disabled and in tests.
    pub fn noop() -> Self {
        Self::new(&NoopMeterProvider::new().meter("osmo-operator"))
    }
}

/// Attribute set tagging a measurement with its listener.
pub fn listener_attrs(listener: &'static str) -> [KeyValue; 1] {
    [KeyValue::new("listener", listener)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_instruments_accept_measurements() {
        let inst = Instruments::noop();
        inst.grpc_disconnect_count.add(1, &listener_attrs("workflow"));
        inst.unacked_message_queue_depth.record(3, &[]);
        inst.node_usage_flush_duration_seconds.record(0.25, &[]);
    }
}
