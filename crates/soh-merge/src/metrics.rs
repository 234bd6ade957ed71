//! Observability metrics for the merge pipeline.
//!
//! This module provides Prometheus-compatible metrics for monitoring the
//! merge engine. Metrics are designed to support:
//!
//! - **Alerting**: Failure-rate alerts on store synchronization and record
//!   decoding
//! - **Dashboards**: Real-time visibility into per-partition throughput and
//!   cache growth
//! - **Debugging**: Correlating batch latency with store latency
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `soh_merge_batches_total` | Counter | `partition` | Batches flushed |
//! | `soh_merge_records_total` | Counter | `partition` | Records consumed |
//! | `soh_merge_records_dropped_total` | Counter | `partition` | Records dropped at decode |
//! | `soh_merge_store_sync_failures_total` | Counter | `partition` | Failed store writes |
//! | `soh_merge_batch_duration_seconds` | Histogram | - | Flush-to-commit latency |
//! | `soh_merge_store_sync_duration_seconds` | Histogram | - | Store write latency |
//! | `soh_merge_active_partitions` | Gauge | - | Currently assigned partitions |
//! | `soh_merge_cache_entries` | Gauge | `partition` | Cached issues |
//! | `soh_merge_cache_pruned_total` | Counter | `partition` | Issues removed by pruning |
//!
//! ## Integration
//!
//! Metrics are exposed via the `metrics` crate facade; the host process
//! installs whatever exporter fits its deployment.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Batches flushed.
    pub const BATCHES_TOTAL: &str = "soh_merge_batches_total";
    /// Counter: Records consumed.
    pub const RECORDS_TOTAL: &str = "soh_merge_records_total";
    /// Counter: Records dropped at decode.
    pub const RECORDS_DROPPED_TOTAL: &str = "soh_merge_records_dropped_total";
    /// Counter: Failed store writes.
    pub const STORE_SYNC_FAILURES_TOTAL: &str = "soh_merge_store_sync_failures_total";
    /// Histogram: Flush-to-commit latency in seconds.
    pub const BATCH_DURATION_SECONDS: &str = "soh_merge_batch_duration_seconds";
    /// Histogram: Store write latency in seconds.
    pub const STORE_SYNC_DURATION_SECONDS: &str = "soh_merge_store_sync_duration_seconds";
    /// Gauge: Currently assigned partitions.
    pub const ACTIVE_PARTITIONS: &str = "soh_merge_active_partitions";
    /// Gauge: Cached issues per partition.
    pub const CACHE_ENTRIES: &str = "soh_merge_cache_entries";
    /// Counter: Issues removed by cache pruning.
    pub const CACHE_PRUNED_TOTAL: &str = "soh_merge_cache_pruned_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Stream partition identifier.
    pub const PARTITION: &str = "partition";
}

/// High-level interface for recording merge pipeline metrics.
///
/// Cheap to clone and share across partition tasks.
#[derive(Debug, Clone, Default)]
pub struct MergeMetrics;

impl MergeMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records a flushed batch and its record count.
    pub fn record_batch(&self, partition: i32, records: usize, duration: Duration) {
        counter!(
            names::BATCHES_TOTAL,
            labels::PARTITION => partition.to_string(),
        )
        .increment(1);
        counter!(
            names::RECORDS_TOTAL,
            labels::PARTITION => partition.to_string(),
        )
        .increment(records as u64);
        histogram!(names::BATCH_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Records a record dropped at decode.
    pub fn record_dropped(&self, partition: i32) {
        counter!(
            names::RECORDS_DROPPED_TOTAL,
            labels::PARTITION => partition.to_string(),
        )
        .increment(1);
    }

    /// Records a failed store write.
    pub fn record_sync_failure(&self, partition: i32) {
        counter!(
            names::STORE_SYNC_FAILURES_TOTAL,
            labels::PARTITION => partition.to_string(),
        )
        .increment(1);
    }

    /// Records store write latency.
    pub fn observe_sync_duration(&self, duration: Duration) {
        histogram!(names::STORE_SYNC_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Sets the number of currently assigned partitions.
    #[allow(clippy::cast_precision_loss)] // Gauge values are typically small
    pub fn set_active_partitions(&self, count: usize) {
        gauge!(names::ACTIVE_PARTITIONS).set(count as f64);
    }

    /// Sets a partition's cached issue count.
    #[allow(clippy::cast_precision_loss)] // Gauge values are typically small
    pub fn set_cache_entries(&self, partition: i32, count: usize) {
        gauge!(
            names::CACHE_ENTRIES,
            labels::PARTITION => partition.to_string(),
        )
        .set(count as f64);
    }

    /// Records issues removed by a prune pass.
    pub fn record_pruned(&self, partition: i32, removed: usize) {
        counter!(
            names::CACHE_PRUNED_TOTAL,
            labels::PARTITION => partition.to_string(),
        )
        .increment(removed as u64);
    }
}
