//! End-to-end pipeline tests over the in-memory store and stream.
//!
//! Focus: the full record path — buffering, decoding, intra-batch merge,
//! neighbor resolution against persisted history, store synchronization,
//! and offset commits — including redelivery convergence and
//! rebalance-safe teardown.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use soh_core::{BooleanIssue, Issue, IssueKey, IssueType};
use soh_merge::config::MergeConfig;
use soh_merge::processor::MergeProcessor;
use soh_merge::store::memory::InMemoryIssueStore;
use soh_merge::stream::memory::InMemoryStreamConsumer;
use soh_merge::stream::PartitionId;
use soh_merge::tolerance::ToleranceResolver;

const CHANNEL: &str = "ASAR.AS01.SHZ";
const PARTITION: PartitionId = PartitionId(0);

fn at_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
}

/// Seconds-scale interval ending 25 ms short of the next boundary, so the
/// 500 ms test tolerance bridges adjacent spans.
fn locked(start_s: i64, end_s: i64) -> BooleanIssue {
    BooleanIssue::new(
        CHANNEL,
        IssueType::ClockLocked,
        at_ms(start_s * 1000),
        at_ms(end_s * 1000 - 25),
        true,
    )
    .unwrap()
}

fn key() -> IssueKey {
    IssueKey::new(CHANNEL, IssueType::ClockLocked)
}

fn test_config() -> MergeConfig {
    MergeConfig {
        buffer_size: 10,
        buffer_timeout: Duration::from_millis(20),
        resubscribe_backoff: Duration::from_millis(10),
        tolerance: ToleranceResolver::with_default(Duration::from_millis(500)),
        ..MergeConfig::default()
    }
}

async fn wait_for_commit(consumer: &InMemoryStreamConsumer, partition: PartitionId, offset: i64) {
    for _ in 0..400 {
        if consumer.committed(partition) == Some(offset) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("partition {partition} never committed offset {offset}");
}

/// Runs a processor over pre-scripted records until the partition's feed
/// is exhausted, then tears everything down.
async fn run_to_completion(
    consumer: &Arc<InMemoryStreamConsumer>,
    store: &Arc<InMemoryIssueStore>,
    last_offset: i64,
) {
    let mut processor =
        MergeProcessor::new(Arc::clone(consumer), Arc::clone(store), test_config());
    consumer.assign(PARTITION);
    let consumer_for_wait = Arc::clone(consumer);
    let runner = tokio::spawn(async move {
        processor.run().await;
    });

    wait_for_commit(&consumer_for_wait, PARTITION, last_offset).await;
    consumer_for_wait.revoke(PARTITION);
    consumer_for_wait.close();
    runner.await.expect("processor run");
}

#[tokio::test]
async fn backfill_resolves_against_cache_and_store_neighbors() {
    let consumer = Arc::new(InMemoryStreamConsumer::new());
    let store = Arc::new(InMemoryIssueStore::new());

    // History: [0,2) is old, [4,6) is each key's latest and therefore the
    // only issue the cache is seeded with. The arriving [2,4) must find
    // [4,6) in the cache and fetch [0,2) from the store.
    store.put_booleans([locked(0, 2), locked(4, 6)]).unwrap();
    consumer.produce_issue(PARTITION, &Issue::Boolean(locked(2, 4)));

    run_to_completion(&consumer, &store, 0).await;

    assert_eq!(store.boolean_issues(&key()).unwrap(), vec![locked(0, 6)]);
}

#[tokio::test]
async fn recent_arrival_extends_the_persisted_frontier() {
    let consumer = Arc::new(InMemoryStreamConsumer::new());
    let store = Arc::new(InMemoryIssueStore::new());

    store.put_booleans([locked(0, 2)]).unwrap();
    consumer.produce_issue(PARTITION, &Issue::Boolean(locked(2, 4)));

    run_to_completion(&consumer, &store, 0).await;

    assert_eq!(store.boolean_issues(&key()).unwrap(), vec![locked(0, 4)]);
}

#[tokio::test]
async fn enclosed_arrival_changes_nothing() {
    let consumer = Arc::new(InMemoryStreamConsumer::new());
    let store = Arc::new(InMemoryIssueStore::new());

    store.put_booleans([locked(0, 6)]).unwrap();
    consumer.produce_issue(PARTITION, &Issue::Boolean(locked(2, 4)));

    run_to_completion(&consumer, &store, 0).await;

    // The candidate was discarded, but its offset still committed.
    assert_eq!(store.boolean_issues(&key()).unwrap(), vec![locked(0, 6)]);
}

#[tokio::test]
async fn duplicate_delivery_converges_to_a_single_interval() {
    let consumer = Arc::new(InMemoryStreamConsumer::new());
    let store = Arc::new(InMemoryIssueStore::new());

    // The same issue twice in the stream, simulating redelivery.
    consumer.produce_issue(PARTITION, &Issue::Boolean(locked(2, 4)));
    consumer.produce_issue(PARTITION, &Issue::Boolean(locked(2, 4)));

    run_to_completion(&consumer, &store, 1).await;

    assert_eq!(store.boolean_issues(&key()).unwrap(), vec![locked(2, 4)]);
}

#[tokio::test]
async fn same_interval_different_types_stay_separate() {
    let consumer = Arc::new(InMemoryStreamConsumer::new());
    let store = Arc::new(InMemoryIssueStore::new());

    let clipped =
        BooleanIssue::new(CHANNEL, IssueType::Clipped, at_ms(2000), at_ms(3975), true).unwrap();
    consumer.produce_issue(PARTITION, &Issue::Boolean(locked(2, 4)));
    consumer.produce_issue(PARTITION, &Issue::Boolean(clipped.clone()));

    run_to_completion(&consumer, &store, 1).await;

    assert_eq!(store.boolean_count().unwrap(), 2);
    assert_eq!(store.boolean_issues(&key()).unwrap(), vec![locked(2, 4)]);
    assert_eq!(store.boolean_issues(&clipped.key()).unwrap(), vec![clipped]);
}

#[tokio::test]
async fn reassignment_after_revocation_resumes_from_the_store() {
    let consumer = Arc::new(InMemoryStreamConsumer::new());
    let store = Arc::new(InMemoryIssueStore::new());

    consumer.produce_issue(PARTITION, &Issue::Boolean(locked(0, 2)));

    let mut processor =
        MergeProcessor::new(Arc::clone(&consumer), Arc::clone(&store), test_config());
    consumer.assign(PARTITION);
    let wait_consumer = Arc::clone(&consumer);
    let runner = tokio::spawn(async move {
        processor.run().await;
    });

    wait_for_commit(&wait_consumer, PARTITION, 0).await;
    wait_consumer.revoke(PARTITION);

    // The next owner re-reads history from the store, not from the old
    // in-memory state, and keeps extending the same interval chain.
    wait_consumer.produce_issue(PARTITION, &Issue::Boolean(locked(2, 4)));
    wait_consumer.assign(PARTITION);
    wait_for_commit(&wait_consumer, PARTITION, 1).await;
    wait_consumer.revoke(PARTITION);
    wait_consumer.close();
    runner.await.expect("processor run");

    assert_eq!(store.boolean_issues(&key()).unwrap(), vec![locked(0, 4)]);
}

#[tokio::test]
async fn storage_outage_is_bridged_without_data_loss() {
    let consumer = Arc::new(InMemoryStreamConsumer::new());
    let store = Arc::new(InMemoryIssueStore::new());
    store.fail_next_syncs(2);

    consumer.produce_issue(PARTITION, &Issue::Boolean(locked(0, 2)));
    consumer.produce_issue(PARTITION, &Issue::Boolean(locked(2, 4)));

    run_to_completion(&consumer, &store, 1).await;

    // Two failed writes, two resubscriptions, one converged interval.
    assert_eq!(store.boolean_issues(&key()).unwrap(), vec![locked(0, 4)]);
}

#[tokio::test]
async fn mixed_batch_fans_boolean_and_analog_records() {
    let consumer = Arc::new(InMemoryStreamConsumer::new());
    let store = Arc::new(InMemoryIssueStore::new());

    let analog = soh_core::AnalogIssue::new(
        CHANNEL,
        IssueType::ClockDifferentialInMicroseconds,
        at_ms(0),
        at_ms(2000),
        12.5,
    )
    .unwrap();
    consumer.produce_issue(PARTITION, &Issue::Boolean(locked(0, 2)));
    consumer.produce_issue(PARTITION, &Issue::Analog(analog.clone()));
    consumer.produce(PARTITION, b"{\"kind\":\"unknown\"}".to_vec());

    run_to_completion(&consumer, &store, 2).await;

    assert_eq!(store.boolean_issues(&key()).unwrap(), vec![locked(0, 2)]);
    assert_eq!(
        store.analog_issues().unwrap(),
        std::collections::HashSet::from([analog])
    );
}
