use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;

use crate::error::{Result, SluiceError};

pub mod labels {
    pub const OPERATION: &str = "operation";
    pub const SOURCE: &str = "source";
    pub const REASON: &str = "reason";
    pub const VERSION: &str = "version";
    pub const RUST_VERSION: &str = "rust_version";
}

#[derive(Clone)]
pub struct Metrics {
    // Rate limiting metrics
    pub rate_limit_requests_total: Counter<u64>,
    pub rate_limit_allowed_total: Counter<u64>,
    pub rate_limit_rejected_total: Counter<u64>,
    pub rate_limit_fail_open_total: Counter<u64>,

    // Counter cache metrics
    pub cache_evictions_total: Counter<u64>,

    // Build info
    pub build_info: Gauge<u64>,
}

impl Metrics {
    pub fn from_meter(meter: Meter) -> Self {
        Self {
            rate_limit_requests_total: meter
                .u64_counter("sluice_rate_limit_requests_total")
                .with_description("Total number of calls checked against a rate limit")
                .build(),
            rate_limit_allowed_total: meter
                .u64_counter("sluice_rate_limit_allowed_total")
                .with_description("Total number of calls admitted")
                .build(),
            rate_limit_rejected_total: meter
                .u64_counter("sluice_rate_limit_rejected_total")
                .with_description("Total number of calls rejected by a rate limit")
                .build(),
            rate_limit_fail_open_total: meter
                .u64_counter("sluice_rate_limit_fail_open_total")
                .with_description("Total number of calls admitted because the counter could not be loaded")
                .build(),

            cache_evictions_total: meter
                .u64_counter("sluice_cache_evictions_total")
                .with_description("Total number of counters removed from the cache. reason=evicted|invalidated|replaced")
                .build(),

            build_info: meter
                .u64_gauge("sluice_build_info")
                .with_description("Build information")
                .build(),
        }
    }

    pub fn set_build_info(&self) {
        let version = env!("CARGO_PKG_VERSION");
        let rust_version = env!("CARGO_PKG_RUST_VERSION");

        self.build_info.record(
            1,
            &[
                KeyValue::new(labels::VERSION, version),
                KeyValue::new(labels::RUST_VERSION, rust_version),
            ],
        );
    }

    pub fn record_rate_limit_request(&self, operation: &str, source: &str) {
        self.rate_limit_requests_total.add(1, &Self::call_labels(operation, source));
    }

    pub fn record_rate_limit_allowed(&self, operation: &str, source: &str) {
        self.rate_limit_allowed_total.add(1, &Self::call_labels(operation, source));
    }

    pub fn record_rate_limit_rejection(&self, operation: &str, source: &str) {
        self.rate_limit_rejected_total.add(1, &Self::call_labels(operation, source));
    }

    pub fn record_rate_limit_fail_open(&self, operation: &str, source: &str) {
        self.rate_limit_fail_open_total.add(1, &Self::call_labels(operation, source));
    }

    pub fn record_cache_eviction(&self, reason: &str) {
        self.cache_evictions_total.add(1, &[KeyValue::new(labels::REASON, reason.to_string())]);
    }

    fn call_labels(operation: &str, source: &str) -> [KeyValue; 2] {
        [
            KeyValue::new(labels::OPERATION, operation.to_string()),
            KeyValue::new(labels::SOURCE, source.to_string()),
        ]
    }
}

pub fn init_metrics() -> std::result::Result<(Arc<Metrics>, Registry), Box<dyn std::error::Error + Send + Sync>>
{
    let registry = Registry::default();

    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()?;

    let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();

    global::set_meter_provider(meter_provider);

    let meter = global::meter("sluice");
    let metrics = Arc::new(Metrics::from_meter(meter));

    metrics.set_build_info();

    Ok((metrics, registry))
}

/// Renders every metric family in the registry in the Prometheus text format.
pub fn encode_metrics(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| SluiceError::Metrics(format!("Failed to encode metrics: {e}")))?;

    String::from_utf8(buffer).map_err(|e| SluiceError::Metrics(format!("Metrics are not UTF-8: {e}")))
}
