//! In-memory stream consumer implementation for testing.
//!
//! This module provides [`InMemoryStreamConsumer`], a simple in-memory
//! implementation of the [`StreamConsumer`] trait suitable for testing and
//! development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No transport, no consumer group
//! - **Single-process only**: Records are not visible across process
//!   boundaries
//! - **Unbounded retention**: The per-partition log is kept in full so a
//!   resubscription can replay everything after the committed offset

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Notify};

use soh_core::Issue;

use super::{PartitionId, RawRecord, RebalanceEvent, RecordStream, StreamConsumer};
use crate::error::{Error, Result};

/// Sentinel for "nothing committed yet".
const NO_COMMIT: i64 = i64::MIN;

/// Converts a lock poison error to a stream error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::stream("partition log lock poisoned")
}

/// One partition's retained record log.
#[derive(Debug)]
struct PartitionLog {
    records: RwLock<Vec<RawRecord>>,
    committed: AtomicI64,
    closed: AtomicBool,
    appended: Notify,
}

impl PartitionLog {
    fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            committed: AtomicI64::new(NO_COMMIT),
            closed: AtomicBool::new(false),
            appended: Notify::new(),
        }
    }
}

/// In-memory stream consumer for testing.
///
/// Test code drives the consumer by scripting rebalance events
/// ([`InMemoryStreamConsumer::assign`] / [`InMemoryStreamConsumer::revoke`])
/// and producing records; the processor under test consumes them through
/// the [`StreamConsumer`] trait. Subscriptions resume after the committed
/// offset, so a pipeline that drops its stream without committing sees the
/// same records again.
#[derive(Debug)]
pub struct InMemoryStreamConsumer {
    events: Mutex<mpsc::UnboundedReceiver<RebalanceEvent>>,
    event_tx: RwLock<Option<mpsc::UnboundedSender<RebalanceEvent>>>,
    partitions: RwLock<HashMap<PartitionId, Arc<PartitionLog>>>,
}

impl Default for InMemoryStreamConsumer {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStreamConsumer {
    /// Creates a consumer with no partitions and no pending events.
    #[must_use]
    pub fn new() -> Self {
        let (event_tx, events) = mpsc::unbounded_channel();
        Self {
            events: Mutex::new(events),
            event_tx: RwLock::new(Some(event_tx)),
            partitions: RwLock::new(HashMap::new()),
        }
    }

    fn log(&self, partition: PartitionId) -> Arc<PartitionLog> {
        let mut partitions = self
            .partitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            partitions
                .entry(partition)
                .or_insert_with(|| Arc::new(PartitionLog::new())),
        )
    }

    fn send_event(&self, event: RebalanceEvent) {
        let tx = self.event_tx.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = tx.as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Scripts an assignment of `partition` to the consumer.
    pub fn assign(&self, partition: PartitionId) {
        self.log(partition);
        self.send_event(RebalanceEvent::Assigned(partition));
    }

    /// Scripts a revocation of `partition` from the consumer.
    pub fn revoke(&self, partition: PartitionId) {
        self.send_event(RebalanceEvent::Revoked(partition));
    }

    /// Ends the event feed; `next_event` returns `None` once drained.
    pub fn close(&self) {
        let mut tx = self
            .event_tx
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        tx.take();
    }

    /// Closes a partition's record feed; open streams see end-of-stream
    /// after draining.
    pub fn close_partition(&self, partition: PartitionId) {
        let log = self.log(partition);
        log.closed.store(true, Ordering::SeqCst);
        log.appended.notify_waiters();
    }

    /// Appends a raw payload to `partition`, returning its offset.
    pub fn produce(&self, partition: PartitionId, payload: Vec<u8>) -> i64 {
        let log = self.log(partition);
        let mut records = log.records.write().unwrap_or_else(PoisonError::into_inner);
        let offset = i64::try_from(records.len()).unwrap_or(i64::MAX);
        records.push(RawRecord {
            partition,
            offset,
            payload,
        });
        drop(records);
        log.appended.notify_waiters();
        offset
    }

    /// Serializes and appends an issue record, returning its offset.
    ///
    /// # Panics
    ///
    /// Panics when the issue cannot be serialized; test-only convenience.
    pub fn produce_issue(&self, partition: PartitionId, issue: &Issue) -> i64 {
        let payload = serde_json::to_vec(issue).expect("issue serializes");
        self.produce(partition, payload)
    }

    /// Returns the committed offset for `partition`, if any.
    #[must_use]
    pub fn committed(&self, partition: PartitionId) -> Option<i64> {
        let partitions = self
            .partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        partitions.get(&partition).and_then(|log| {
            let committed = log.committed.load(Ordering::SeqCst);
            (committed != NO_COMMIT).then_some(committed)
        })
    }
}

#[async_trait]
impl StreamConsumer for InMemoryStreamConsumer {
    async fn next_event(&self) -> Option<RebalanceEvent> {
        self.events.lock().await.recv().await
    }

    async fn subscribe(&self, partition: PartitionId) -> Result<Box<dyn RecordStream>> {
        let log = self.log(partition);
        let committed = log.committed.load(Ordering::SeqCst);
        let position = {
            let records = log.records.read().map_err(poison_err)?;
            records
                .iter()
                .position(|record| record.offset > committed)
                .unwrap_or(records.len())
        };
        Ok(Box::new(InMemoryRecordStream { log, position }))
    }
}

/// A live view over one partition's retained log.
#[derive(Debug)]
struct InMemoryRecordStream {
    log: Arc<PartitionLog>,
    position: usize,
}

#[async_trait]
impl RecordStream for InMemoryRecordStream {
    async fn recv(&mut self) -> Option<RawRecord> {
        loop {
            // Register for wakeup before checking, so an append between the
            // check and the await is not missed. The position advances only
            // when a record is returned, which keeps recv cancel safe.
            let appended = self.log.appended.notified();

            {
                let records = self
                    .log
                    .records
                    .read()
                    .unwrap_or_else(PoisonError::into_inner);
                if let Some(record) = records.get(self.position) {
                    self.position += 1;
                    return Some(record.clone());
                }
            }

            if self.log.closed.load(Ordering::SeqCst) {
                return None;
            }

            appended.await;
        }
    }

    async fn commit(&mut self, offset: i64) -> Result<()> {
        self.log.committed.fetch_max(offset, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARTITION: PartitionId = PartitionId(0);

    #[tokio::test]
    async fn subscribe_replays_uncommitted_records() {
        let consumer = InMemoryStreamConsumer::new();
        consumer.produce(PARTITION, b"a".to_vec());
        consumer.produce(PARTITION, b"b".to_vec());

        let mut stream = consumer.subscribe(PARTITION).await.unwrap();
        let first = stream.recv().await.unwrap();
        assert_eq!(first.offset, 0);
        stream.commit(first.offset).await.unwrap();
        drop(stream);

        // Resubscription resumes after the committed offset.
        let mut stream = consumer.subscribe(PARTITION).await.unwrap();
        let next = stream.recv().await.unwrap();
        assert_eq!(next.offset, 1);
        assert_eq!(next.payload, b"b".to_vec());
    }

    #[tokio::test]
    async fn recv_waits_for_new_records() {
        let consumer = Arc::new(InMemoryStreamConsumer::new());
        let mut stream = consumer.subscribe(PARTITION).await.unwrap();

        let producer = Arc::clone(&consumer);
        let handle = tokio::spawn(async move {
            tokio::task::yield_now().await;
            producer.produce(PARTITION, b"late".to_vec());
        });

        let record = stream.recv().await.unwrap();
        assert_eq!(record.payload, b"late".to_vec());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn closed_partition_drains_then_ends() {
        let consumer = InMemoryStreamConsumer::new();
        consumer.produce(PARTITION, b"a".to_vec());
        consumer.close_partition(PARTITION);

        let mut stream = consumer.subscribe(PARTITION).await.unwrap();
        assert!(stream.recv().await.is_some());
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn events_deliver_in_order_and_end_on_close() {
        let consumer = InMemoryStreamConsumer::new();
        consumer.assign(PARTITION);
        consumer.revoke(PARTITION);
        consumer.close();

        assert_eq!(
            consumer.next_event().await,
            Some(RebalanceEvent::Assigned(PARTITION))
        );
        assert_eq!(
            consumer.next_event().await,
            Some(RebalanceEvent::Revoked(PARTITION))
        );
        assert_eq!(consumer.next_event().await, None);
    }

    #[tokio::test]
    async fn commit_keeps_the_highest_offset() {
        let consumer = InMemoryStreamConsumer::new();
        consumer.produce(PARTITION, b"a".to_vec());
        consumer.produce(PARTITION, b"b".to_vec());

        let mut stream = consumer.subscribe(PARTITION).await.unwrap();
        stream.commit(1).await.unwrap();
        stream.commit(0).await.unwrap();

        assert_eq!(consumer.committed(PARTITION), Some(1));
    }
}
