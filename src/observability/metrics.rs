//! OpenTelemetry metrics.
//!
//! Key metrics:
//! - multistore_operations_total: Counter for facade operations by store, kind and outcome
//! - multistore_operation_latency_seconds: Histogram for driver call latency
//! - multistore_transactions_total: Counter for committed and rolled back transactions
//! - multistore_failures_recorded_total: Counter for persisted failure log sightings

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::sync::OnceLock;

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Multistore metrics registry.
#[derive(Debug)]
pub struct Metrics {
    pub operations_total: Counter<u64>,
    pub operation_latency: Histogram<f64>,
    pub transactions_total: Counter<u64>,
    pub failures_recorded: Counter<u64>,
}

impl Metrics {
    fn new(meter: &Meter) -> Self {
        Self {
            operations_total: meter
                .u64_counter("multistore_operations_total")
                .with_description("Store operations by kind and outcome")
                .with_unit("1")
                .init(),
            operation_latency: meter
                .f64_histogram("multistore_operation_latency_seconds")
                .with_description("Driver call latency on the blocking pool")
                .with_unit("s")
                .init(),
            transactions_total: meter
                .u64_counter("multistore_transactions_total")
                .with_description("Transactions by outcome")
                .with_unit("1")
                .init(),
            failures_recorded: meter
                .u64_counter("multistore_failures_recorded_total")
                .with_description("Failure sightings persisted to the failure log")
                .with_unit("1")
                .init(),
        }
    }
}

fn manual_provider() -> SdkMeterProvider {
    let reader = ManualReader::builder().build();
    SdkMeterProvider::builder().with_reader(reader).build()
}

/// Initialize the metrics system.
///
/// This should be called once at startup. Subsequent calls are ignored.
///
/// # Arguments
///
/// * `otel_endpoint` - Optional OTLP endpoint for metrics export
pub fn init_metrics_with_endpoint(otel_endpoint: Option<&str>) {
    METRICS.get_or_init(|| {
        if let Some(endpoint) = otel_endpoint {
            use opentelemetry_otlp::{Protocol, WithExportConfig};

            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_protocol(Protocol::Grpc);

            match opentelemetry_otlp::new_pipeline()
                .metrics(opentelemetry_sdk::runtime::Tokio)
                .with_exporter(exporter)
                .with_period(std::time::Duration::from_secs(10))
                .build()
            {
                Ok(provider) => {
                    global::set_meter_provider(provider);
                    tracing::info!(endpoint, "OTLP metrics exporter configured");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to create OTLP exporter, using no-op metrics");
                    global::set_meter_provider(manual_provider());
                }
            }
        } else {
            // Recorded but not exported
            global::set_meter_provider(manual_provider());
        }

        let meter = global::meter("multistore");
        Metrics::new(&meter)
    });
}

/// Initialize the metrics system without OTLP export.
pub fn init_metrics() {
    init_metrics_with_endpoint(None);
}

/// Record one facade driver call.
pub fn record_operation(store: &str, kind: &'static str, ok: bool, latency_seconds: f64) {
    if let Some(m) = METRICS.get() {
        let attrs = [
            KeyValue::new("store", store.to_string()),
            KeyValue::new("kind", kind),
            KeyValue::new("outcome", if ok { "ok" } else { "error" }),
        ];
        m.operations_total.add(1, &attrs);
        m.operation_latency.record(latency_seconds, &attrs[..2]);
    }
}

/// Record a finished transaction.
pub fn record_transaction(store: &str, outcome: &'static str) {
    if let Some(m) = METRICS.get() {
        let attrs = [
            KeyValue::new("store", store.to_string()),
            KeyValue::new("outcome", outcome),
        ];
        m.transactions_total.add(1, &attrs);
    }
}

/// Record a persisted failure sighting.
pub fn record_failure_logged(store: &str) {
    if let Some(m) = METRICS.get() {
        m.failures_recorded
            .add(1, &[KeyValue::new("store", store.to_string())]);
    }
}
