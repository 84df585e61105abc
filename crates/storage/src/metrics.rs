//! Store latency metrics.

use prometheus::{register_histogram, register_histogram_vec, Histogram, HistogramVec};
use std::sync::OnceLock;

static METRICS: OnceLock<Metrics> = OnceLock::new();

struct Metrics {
    read_latency: Histogram,
    write_latency: Histogram,
    operation_latency: HistogramVec,
}

impl Metrics {
    fn new() -> Self {
        // 10us to 1s
        let storage_buckets = vec![
            0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
        ];

        Self {
            read_latency: register_histogram!(
                "meridian_store_read_latency_seconds",
                "Latency of key-value reads issued by the state store",
                storage_buckets.clone()
            )
            .unwrap(),
            write_latency: register_histogram!(
                "meridian_store_write_latency_seconds",
                "Latency of key-value writes issued by the state store",
                storage_buckets.clone()
            )
            .unwrap(),
            operation_latency: register_histogram_vec!(
                "meridian_store_operation_duration_seconds",
                "Duration of state store operations",
                &["operation"],
                storage_buckets
            )
            .unwrap(),
        }
    }
}

fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

pub fn record_read(latency_secs: f64) {
    metrics().read_latency.observe(latency_secs);
}

pub fn record_write(latency_secs: f64) {
    metrics().write_latency.observe(latency_secs);
}

pub fn record_operation(operation: &str, latency_secs: f64) {
    metrics()
        .operation_latency
        .with_label_values(&[operation])
        .observe(latency_secs);
}
