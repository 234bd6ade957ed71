//! Per-partition stream pipeline.
//!
//! One [`PartitionPipeline`] runs per assigned partition, on its own task.
//! The loop buffers raw records by count and time, decodes them (dropping
//! malformed payloads), merges the batch internally, reconciles it against
//! history through the partition's [`NeighborResolver`], writes the
//! resulting update set to the store, and only then commits the highest
//! buffered offset.
//!
//! Storage failures do not crash the partition: the pipeline drops its
//! subscription, waits out a backoff, and resubscribes. Uncommitted
//! records redeliver, and because merging and cache updates are idempotent
//! for identical inputs, redelivery converges to the same history
//! (at-least-once semantics).
//!
//! Processing within a partition is strictly sequential: batch N+1 is not
//! read until batch N's store write and commit complete. This is what the
//! cache's consistency and the transport's `(channel, time)` ordering
//! assumption rely on.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::{sleep, sleep_until, Instant as TokioInstant};
use tracing::{error, info, warn, Instrument};

use soh_core::observability::{pipeline_span, resolver_span};
use soh_core::IssueUpdates;

use crate::config::MergeConfig;
use crate::error::Result;
use crate::merge::UpdatesMerger;
use crate::metrics::MergeMetrics;
use crate::resolver::NeighborResolver;
use crate::store::IssueRepository;
use crate::stream::{decode_issue, PartitionId, RawRecord, RecordStream, StreamConsumer};

/// Lifecycle of one partition's processing unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    /// Not yet assigned to this process.
    Unassigned,
    /// Consuming and processing records.
    Active,
    /// Revoked by a rebalance; teardown pending.
    Revoked,
    /// The pipeline task ended abnormally.
    Failed,
    /// All resources released.
    Disposed,
}

/// The per-partition processing unit.
///
/// Owns the partition's resolver (and through it the cache); shares the
/// consumer and repository with the rest of the process.
pub struct PartitionPipeline {
    partition: PartitionId,
    consumer: Arc<dyn StreamConsumer>,
    repository: Arc<dyn IssueRepository>,
    resolver: Arc<NeighborResolver>,
    merger: UpdatesMerger,
    config: MergeConfig,
    metrics: MergeMetrics,
}

impl PartitionPipeline {
    /// Creates a pipeline for `partition`.
    #[must_use]
    pub fn new(
        partition: PartitionId,
        consumer: Arc<dyn StreamConsumer>,
        repository: Arc<dyn IssueRepository>,
        resolver: Arc<NeighborResolver>,
        config: MergeConfig,
        metrics: MergeMetrics,
    ) -> Self {
        let merger = UpdatesMerger::new(config.tolerance.clone());
        Self {
            partition,
            consumer,
            repository,
            resolver,
            merger,
            config,
            metrics,
        }
    }

    /// Runs the pipeline until its stream closes or the task is aborted.
    ///
    /// Seeds the partition cache first, then consumes. Every failure path
    /// (seeding, subscription, storage, commit) logs, backs off, and
    /// retries by resubscribing; nothing short of task abortion ends the
    /// loop while records keep flowing.
    pub async fn run(self) {
        let mut seeded = false;
        loop {
            if !seeded {
                match self.resolver.seed().await {
                    Ok(_) => seeded = true,
                    Err(err) => {
                        error!(
                            partition = self.partition.value(),
                            error = %err,
                            "cache seeding failed, retrying"
                        );
                        sleep(self.config.resubscribe_backoff).await;
                        continue;
                    }
                }
            }

            match self.run_subscription().await {
                Ok(()) => {
                    info!(
                        partition = self.partition.value(),
                        "record stream closed, pipeline ending"
                    );
                    return;
                }
                Err(err) => {
                    error!(
                        partition = self.partition.value(),
                        error = %err,
                        "pipeline error, resubscribing"
                    );
                    // A failed batch leaves the cache ahead of the store;
                    // drop it so the redelivered records resolve against
                    // persisted history instead of the unwritten image.
                    self.resolver.cache().clear();
                    seeded = false;
                    sleep(self.config.resubscribe_backoff).await;
                }
            }
        }
    }

    /// Consumes one subscription until the stream closes or an error
    /// forces a resubscribe.
    async fn run_subscription(&self) -> Result<()> {
        let mut stream = self.consumer.subscribe(self.partition).await?;
        info!(partition = self.partition.value(), "subscribed");

        loop {
            let Some(batch) = self.fill_buffer(stream.as_mut()).await else {
                return Ok(());
            };
            self.process_batch(stream.as_mut(), batch)
                .instrument(pipeline_span("flush_batch", self.partition.value()))
                .await?;
        }
    }

    /// Buffers records until `buffer_size` is reached or `buffer_timeout`
    /// elapses after the first record.
    ///
    /// Returns `None` when the stream closes with nothing buffered; a
    /// partial buffer at close is still returned for processing.
    async fn fill_buffer(&self, stream: &mut dyn RecordStream) -> Option<Vec<RawRecord>> {
        let first = stream.recv().await?;
        let deadline = TokioInstant::now() + self.config.buffer_timeout;
        let mut buffer = vec![first];

        while buffer.len() < self.config.buffer_size {
            tokio::select! {
                record = stream.recv() => match record {
                    Some(record) => buffer.push(record),
                    None => break,
                },
                () = sleep_until(deadline) => break,
            }
        }

        Some(buffer)
    }

    /// Processes one buffered batch through merge, resolution, storage,
    /// and offset commit.
    async fn process_batch(
        &self,
        stream: &mut dyn RecordStream,
        batch: Vec<RawRecord>,
    ) -> Result<()> {
        let started = Instant::now();
        let record_count = batch.len();
        let highest_offset = batch.iter().map(|record| record.offset).max();

        // Malformed records are dropped here so nothing downstream has to
        // reason about absent values.
        let mut decoded = Vec::with_capacity(record_count);
        for record in &batch {
            match decode_issue(record) {
                Ok(issue) => decoded.push(issue),
                Err(err) => {
                    warn!(
                        partition = self.partition.value(),
                        offset = record.offset,
                        error = %err,
                        "dropping malformed record"
                    );
                    self.metrics.record_dropped(self.partition.value());
                }
            }
        }

        let batched = self
            .merger
            .merge_many(decoded.into_iter().map(IssueUpdates::from_issue));
        let resolved = self
            .resolver
            .try_merge_with_neighbors(batched)
            .instrument(resolver_span(
                "try_merge_with_neighbors",
                self.partition.value(),
            ))
            .await?;
        let updates = self.merger.filter_collisions(resolved);

        info!(
            partition = self.partition.value(),
            records = record_count,
            analog_inserts = updates.analog_inserts.len(),
            analog_deletes = updates.analog_deletes.len(),
            boolean_inserts = updates.boolean_inserts.len(),
            boolean_deletes = updates.boolean_deletes.len(),
            "applying update set"
        );

        let sync_started = Instant::now();
        if let Err(err) = self.repository.sync_updates(&updates).await {
            self.metrics.record_sync_failure(self.partition.value());
            return Err(err);
        }
        self.metrics.observe_sync_duration(sync_started.elapsed());

        if let Some(offset) = highest_offset {
            stream.commit(offset).await?;
        }

        self.metrics
            .record_batch(self.partition.value(), record_count, started.elapsed());
        self.metrics.set_cache_entries(
            self.partition.value(),
            self.resolver.cache().entry_count(),
        );

        Ok(())
    }
}

impl std::fmt::Debug for PartitionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionPipeline")
            .field("partition", &self.partition)
            .finish_non_exhaustive()
    }
}
