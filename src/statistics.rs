//! Prometheus metrics, registered via `once_cell::sync::Lazy` +
//! `register_*!` macros into the default global registry.

use once_cell::sync::Lazy;
use prometheus::{
    linear_buckets, register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};

pub static BLOCKS_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("blocks_processed", "Count of blocks dispatched per pipeline.", &["pipeline"]).unwrap()
});

pub static CONNECTION_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "connection_attempts",
        "Number of attempts to (re)connect the live new-head subscription.",
        &["pipeline"]
    )
    .unwrap()
});

pub static REORGS_DETECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("reorgs_detected", "Number of reorgs handled per pipeline.", &["pipeline"]).unwrap()
});

pub static REORG_DEPTH: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!("reorg_depth", "Depth of detected reorgs, in blocks.", linear_buckets(1.0, 1.0, 16).unwrap())
        .unwrap()
});

pub static LOGS_DISPATCHED: Lazy<IntCounter> =
    Lazy::new(|| register_int_counter!("logs_dispatched", "Count of logs handed to a subscription callback.").unwrap());

pub static LOGS_DEDUPLICATED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("logs_deduplicated", "Count of logs suppressed by the dedup filter.").unwrap()
});

pub static BLOCK_HEADER_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!("block_header_latency", "Latency of header-by-number/hash RPC calls.").unwrap()
});
