//! Partition supervision for the merge processor.
//!
//! The [`MergeProcessor`] owns the stream consumer and reacts to its
//! rebalance events: an assignment spawns a fresh [`PartitionPipeline`]
//! with its own seeded resolver plus a cache-pruning task, and a
//! revocation disposes exactly that partition's tasks before the partition
//! is relinquished. All per-partition state lives in the supervisor's
//! handle map; there are no process-global registries.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MergeConfig;
use crate::merge::UpdatesMerger;
use crate::metrics::MergeMetrics;
use crate::pipeline::{PartitionPipeline, PartitionState};
use crate::resolver::NeighborResolver;
use crate::store::IssueRepository;
use crate::stream::{PartitionId, RebalanceEvent, StreamConsumer};

/// Running tasks and state for one assigned partition.
struct PartitionHandle {
    state: PartitionState,
    pipeline: JoinHandle<()>,
    pruner: JoinHandle<()>,
}

impl PartitionHandle {
    /// Aborts both tasks and awaits the pipeline's teardown.
    async fn dispose(self) -> PartitionState {
        self.pruner.abort();
        self.pipeline.abort();

        let _ = self.pruner.await;
        match self.pipeline.await {
            Ok(()) => PartitionState::Disposed,
            Err(err) if err.is_cancelled() => PartitionState::Disposed,
            Err(_) => PartitionState::Failed,
        }
    }
}

/// Supervises one pipeline per assigned stream partition.
///
/// ## Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use soh_merge::config::MergeConfig;
/// use soh_merge::processor::MergeProcessor;
/// use soh_merge::store::memory::InMemoryIssueStore;
/// use soh_merge::stream::memory::InMemoryStreamConsumer;
///
/// # async fn run() {
/// let consumer = Arc::new(InMemoryStreamConsumer::new());
/// let store = Arc::new(InMemoryIssueStore::new());
/// let mut processor =
///     MergeProcessor::new(consumer, store, MergeConfig::default());
/// processor.run().await;
/// # }
/// ```
pub struct MergeProcessor {
    consumer: Arc<dyn StreamConsumer>,
    repository: Arc<dyn IssueRepository>,
    config: MergeConfig,
    metrics: MergeMetrics,
    partitions: HashMap<PartitionId, PartitionHandle>,
}

impl MergeProcessor {
    /// Creates a processor over the given consumer and repository.
    pub fn new(
        consumer: Arc<impl StreamConsumer + 'static>,
        repository: Arc<impl IssueRepository + 'static>,
        config: MergeConfig,
    ) -> Self {
        Self {
            consumer,
            repository,
            config,
            metrics: MergeMetrics::new(),
            partitions: HashMap::new(),
        }
    }

    /// Runs the supervision loop until the consumer's event feed ends,
    /// then disposes every remaining partition.
    pub async fn run(&mut self) {
        info!("merge processor starting");
        while let Some(event) = self.consumer.next_event().await {
            match event {
                RebalanceEvent::Assigned(partition) => self.assign(partition),
                RebalanceEvent::Revoked(partition) => self.revoke(partition).await,
            }
        }
        info!("event feed ended, shutting down");
        self.shutdown().await;
    }

    /// Returns the currently assigned partitions.
    #[must_use]
    pub fn active_partitions(&self) -> Vec<PartitionId> {
        let mut partitions: Vec<PartitionId> = self.partitions.keys().copied().collect();
        partitions.sort_unstable();
        partitions
    }

    /// Returns a partition's lifecycle state.
    #[must_use]
    pub fn partition_state(&self, partition: PartitionId) -> PartitionState {
        self.partitions
            .get(&partition)
            .map_or(PartitionState::Unassigned, |handle| handle.state)
    }

    /// Builds and spawns the pipeline and pruner for a fresh assignment.
    fn assign(&mut self, partition: PartitionId) {
        if self.partitions.contains_key(&partition) {
            warn!(
                partition = partition.value(),
                "assignment for an already-active partition, keeping existing pipeline"
            );
            return;
        }
        info!(partition = partition.value(), "partition assigned");

        let resolver = Arc::new(NeighborResolver::new(
            UpdatesMerger::new(self.config.tolerance.clone()),
            Arc::clone(&self.repository),
            partition.value(),
        ));

        let pruner = spawn_cache_pruner(
            Arc::clone(&resolver),
            partition,
            &self.config,
            self.metrics.clone(),
        );

        let pipeline = PartitionPipeline::new(
            partition,
            Arc::clone(&self.consumer),
            Arc::clone(&self.repository),
            resolver,
            self.config.clone(),
            self.metrics.clone(),
        );
        let pipeline = tokio::spawn(pipeline.run());

        self.partitions.insert(
            partition,
            PartitionHandle {
                state: PartitionState::Active,
                pipeline,
                pruner,
            },
        );
        self.metrics.set_active_partitions(self.partitions.len());
    }

    /// Disposes a revoked partition's tasks.
    async fn revoke(&mut self, partition: PartitionId) {
        let Some(handle) = self.partitions.remove(&partition) else {
            warn!(
                partition = partition.value(),
                "revocation for an unassigned partition, ignoring"
            );
            return;
        };

        info!(partition = partition.value(), "disposing revoked partition");
        let state = handle.dispose().await;
        if state == PartitionState::Failed {
            warn!(
                partition = partition.value(),
                "pipeline task ended abnormally during disposal"
            );
        }
        self.metrics.set_active_partitions(self.partitions.len());
    }

    /// Disposes every partition's tasks.
    pub async fn shutdown(&mut self) {
        let partitions: Vec<PartitionId> = self.partitions.keys().copied().collect();
        for partition in partitions {
            self.revoke(partition).await;
        }
    }
}

impl std::fmt::Debug for MergeProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeProcessor")
            .field("active_partitions", &self.partitions.len())
            .finish_non_exhaustive()
    }
}

/// Spawns the periodic cache-pruning task for one partition.
///
/// Runs independently of message flow; the shard-locked cache makes the
/// sweep safe against concurrent pipeline reads and writes. The task is
/// aborted on partition disposal.
fn spawn_cache_pruner(
    resolver: Arc<NeighborResolver>,
    partition: PartitionId,
    config: &MergeConfig,
    metrics: MergeMetrics,
) -> JoinHandle<()> {
    let period = config.cache_prune_interval;
    let max_age = config.cache_max_age;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so pruning starts
        // one full period after assignment.
        interval.tick().await;

        loop {
            interval.tick().await;
            let removed = resolver.cache().prune(Utc::now(), max_age);
            debug!(
                partition = partition.value(),
                removed,
                remaining = resolver.cache().entry_count(),
                "pruned neighbor cache"
            );
            metrics.record_pruned(partition.value(), removed);
            metrics.set_cache_entries(partition.value(), resolver.cache().entry_count());
        }
    })
}
