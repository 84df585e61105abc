//! Prometheus metrics for block execution.
//!
//! Counts applied and rejected blocks, delivered and failed transactions, and
//! end-block validator updates. Registered with the default registry on first
//! use.

use prometheus::{
    register_counter, register_gauge, register_histogram, Counter, Gauge, Histogram,
};
use std::sync::OnceLock;

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub struct Metrics {
    // === Blocks ===
    pub blocks_applied: Counter,
    pub block_processing_latency: Histogram,
    pub last_height: Gauge,
    pub invalid_blocks: Counter,

    // === Transactions ===
    pub txs_executed: Counter,
    pub failed_txs: Counter,

    // === Validators ===
    pub validator_set_updates: Counter,
    pub validator_set_size: Gauge,
}

impl Metrics {
    fn new() -> Self {
        // Latency buckets: 1ms to 60s
        let latency_buckets = vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
        ];

        Self {
            blocks_applied: register_counter!(
                "meridian_blocks_applied_total",
                "Total number of blocks applied"
            )
            .unwrap(),
            block_processing_latency: register_histogram!(
                "meridian_block_processing_seconds",
                "Time from validation to persisted state for one block",
                latency_buckets
            )
            .unwrap(),
            last_height: register_gauge!(
                "meridian_last_block_height",
                "Height of the last applied block"
            )
            .unwrap(),
            invalid_blocks: register_counter!(
                "meridian_invalid_blocks_total",
                "Blocks rejected by validation"
            )
            .unwrap(),

            txs_executed: register_counter!(
                "meridian_txs_executed_total",
                "Transactions delivered to the application"
            )
            .unwrap(),
            failed_txs: register_counter!(
                "meridian_failed_txs_total",
                "Transactions the application answered with a non-OK code"
            )
            .unwrap(),

            validator_set_updates: register_counter!(
                "meridian_validator_set_updates_total",
                "Validator updates applied from end_block responses"
            )
            .unwrap(),
            validator_set_size: register_gauge!(
                "meridian_validator_set_size",
                "Number of validators for the next block"
            )
            .unwrap(),
        }
    }
}

pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

pub fn record_block_applied(height: u64, processing_secs: f64) {
    let m = metrics();
    m.blocks_applied.inc();
    m.block_processing_latency.observe(processing_secs);
    m.last_height.set(height as f64);
}

pub fn record_invalid_block() {
    metrics().invalid_blocks.inc();
}

pub fn record_txs_executed(total: usize, failed: usize) {
    let m = metrics();
    m.txs_executed.inc_by(total as f64);
    m.failed_txs.inc_by(failed as f64);
}

pub fn record_validator_updates(count: usize, set_size: usize) {
    let m = metrics();
    m.validator_set_updates.inc_by(count as f64);
    m.validator_set_size.set(set_size as f64);
}
