//! In-memory repository implementation for testing.
//!
//! This module provides [`InMemoryIssueStore`], a simple in-memory
//! implementation of the [`IssueRepository`] trait suitable for testing and
//! development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No durability, no cross-process
//!   coordination
//! - **Single-process only**: State is not shared across process boundaries
//! - **No persistence**: All state is lost when the process exits

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use soh_core::{AnalogIssue, BooleanIssue, IssueKey, IssueUpdates};

use super::{ChannelTimeRequest, IssueRepository, NeighborsByChannel};
use crate::error::{Error, Result};

/// Internal store state protected by a single lock.
#[derive(Debug, Default)]
struct StoreState {
    /// Boolean issues per key, ordered by end time.
    booleans: HashMap<IssueKey, BTreeMap<DateTime<Utc>, BooleanIssue>>,
    /// Analog issues, pass-through set.
    analogs: HashSet<AnalogIssue>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("issue store lock poisoned")
}

/// In-memory issue store for testing.
///
/// Provides a thread-safe implementation of the [`IssueRepository`] trait
/// using `RwLock` for synchronization, plus a failure-injection knob for
/// exercising the pipeline's retry path.
///
/// ## Example
///
/// ```rust
/// use soh_merge::store::memory::InMemoryIssueStore;
///
/// let store = InMemoryIssueStore::new();
/// // Use store in tests...
/// ```
#[derive(Debug, Default)]
pub struct InMemoryIssueStore {
    state: RwLock<StoreState>,
    /// Number of upcoming `sync_updates` calls that fail.
    sync_failures: AtomicU32,
}

impl InMemoryIssueStore {
    /// Creates a new, empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls to `sync_updates` fail with a storage
    /// error.
    pub fn fail_next_syncs(&self, count: u32) {
        self.sync_failures.store(count, Ordering::SeqCst);
    }

    /// Returns all boolean issues stored for `key`, ascending by end time.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn boolean_issues(&self, key: &IssueKey) -> Result<Vec<BooleanIssue>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state
            .booleans
            .get(key)
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Returns the total number of stored boolean issues.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn boolean_count(&self) -> Result<usize> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.booleans.values().map(BTreeMap::len).sum())
    }

    /// Returns all stored analog issues.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn analog_issues(&self) -> Result<HashSet<AnalogIssue>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.analogs.clone())
    }

    /// Stores boolean issues directly, bypassing the update-set path.
    ///
    /// Test convenience for pre-populating history.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn put_booleans(&self, issues: impl IntoIterator<Item = BooleanIssue>) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        for issue in issues {
            state
                .booleans
                .entry(issue.key())
                .or_default()
                .insert(issue.end_time, issue);
        }
        drop(state);
        Ok(())
    }
}

#[async_trait]
impl IssueRepository for InMemoryIssueStore {
    async fn sync_updates(&self, updates: &IssueUpdates) -> Result<()> {
        if self
            .sync_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
        {
            return Err(Error::storage("injected sync failure"));
        }

        let mut state = self.state.write().map_err(poison_err)?;

        // Deletes first, by (channel, type, start time) identity.
        for delete in &updates.boolean_deletes {
            if let Some(map) = state.booleans.get_mut(&delete.key()) {
                map.retain(|_, stored| stored.start_time != delete.start_time);
            }
        }
        for delete in &updates.analog_deletes {
            state.analogs.remove(delete);
        }

        for insert in &updates.boolean_inserts {
            state
                .booleans
                .entry(insert.key())
                .or_default()
                .insert(insert.end_time, insert.clone());
        }
        state.analogs.extend(updates.analog_inserts.iter().cloned());

        drop(state);
        Ok(())
    }

    async fn find_latest_before(&self, request: &ChannelTimeRequest) -> Result<NeighborsByChannel> {
        let state = self.state.read().map_err(poison_err)?;

        let mut results: NeighborsByChannel = HashMap::new();
        for (channel, times) in &request.times_by_channel {
            let key = IssueKey::new(channel.clone(), request.issue_type);
            let Some(map) = state.booleans.get(&key) else {
                continue;
            };
            for time in times {
                if let Some((end, issue)) = map.range(..=*time).next_back() {
                    results
                        .entry(channel.clone())
                        .or_default()
                        .insert(*end, issue.clone());
                }
            }
        }

        drop(state);
        Ok(results)
    }

    async fn find_earliest_after(
        &self,
        request: &ChannelTimeRequest,
    ) -> Result<NeighborsByChannel> {
        let state = self.state.read().map_err(poison_err)?;

        let mut results: NeighborsByChannel = HashMap::new();
        for (channel, times) in &request.times_by_channel {
            let key = IssueKey::new(channel.clone(), request.issue_type);
            let Some(map) = state.booleans.get(&key) else {
                continue;
            };
            for time in times {
                if let Some(issue) = map
                    .values()
                    .filter(|issue| issue.start_time >= *time)
                    .min_by_key(|issue| issue.start_time)
                {
                    results
                        .entry(channel.clone())
                        .or_default()
                        .insert(issue.end_time, issue.clone());
                }
            }
        }

        drop(state);
        Ok(results)
    }

    async fn find_latest_by_channel(&self) -> Result<Vec<BooleanIssue>> {
        let state = self.state.read().map_err(poison_err)?;
        let latest = state
            .booleans
            .values()
            .filter_map(|map| map.last_key_value().map(|(_, issue)| issue.clone()))
            .collect();
        drop(state);
        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use soh_core::IssueType;

    const CHANNEL: &str = "ASAR.AS01.SHZ";

    fn at_ms(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn locked(start_ms: i64, end_ms: i64) -> BooleanIssue {
        BooleanIssue::new(
            CHANNEL,
            IssueType::ClockLocked,
            at_ms(start_ms),
            at_ms(end_ms),
            true,
        )
        .unwrap()
    }

    fn key() -> IssueKey {
        IssueKey::new(CHANNEL, IssueType::ClockLocked)
    }

    #[tokio::test]
    async fn sync_applies_deletes_then_inserts() {
        let store = InMemoryIssueStore::new();
        store.put_booleans([locked(0, 2000), locked(4000, 6000)]).unwrap();

        let updates = IssueUpdates::builder()
            .boolean_inserts([locked(0, 6000)])
            .boolean_deletes([locked(0, 2000), locked(4000, 6000)])
            .build();
        store.sync_updates(&updates).await.unwrap();

        assert_eq!(store.boolean_issues(&key()).unwrap(), vec![locked(0, 6000)]);
    }

    #[tokio::test]
    async fn deletes_match_by_start_time_identity() {
        let store = InMemoryIssueStore::new();
        store.put_booleans([locked(0, 2000)]).unwrap();

        // Same key and start, different end: still deletes the stored row.
        let updates = IssueUpdates::builder()
            .boolean_deletes([locked(0, 3000)])
            .build();
        store.sync_updates(&updates).await.unwrap();

        assert_eq!(store.boolean_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn latest_before_picks_greatest_end_at_or_before() {
        let store = InMemoryIssueStore::new();
        store
            .put_booleans([locked(0, 2000), locked(4000, 6000)])
            .unwrap();

        let mut request = ChannelTimeRequest::new(IssueType::ClockLocked);
        request.add_time(CHANNEL, at_ms(3975));

        let results = store.find_latest_before(&request).await.unwrap();
        let by_end = &results[CHANNEL];
        assert_eq!(by_end.len(), 1);
        assert_eq!(by_end[&at_ms(2000)], locked(0, 2000));
    }

    #[tokio::test]
    async fn earliest_after_picks_least_start_at_or_after() {
        let store = InMemoryIssueStore::new();
        store
            .put_booleans([locked(0, 2000), locked(4000, 6000), locked(8000, 10_000)])
            .unwrap();

        let mut request = ChannelTimeRequest::new(IssueType::ClockLocked);
        request.add_time(CHANNEL, at_ms(3975));

        let results = store.find_earliest_after(&request).await.unwrap();
        let by_end = &results[CHANNEL];
        assert_eq!(by_end.len(), 1);
        assert_eq!(by_end[&at_ms(6000)], locked(4000, 6000));
    }

    #[tokio::test]
    async fn missing_channels_are_absent_from_results() {
        let store = InMemoryIssueStore::new();
        let mut request = ChannelTimeRequest::new(IssueType::ClockLocked);
        request.add_time(CHANNEL, at_ms(0));

        let results = store.find_latest_before(&request).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn latest_by_channel_returns_one_per_key() {
        let store = InMemoryIssueStore::new();
        let clipped =
            BooleanIssue::new(CHANNEL, IssueType::Clipped, at_ms(0), at_ms(1000), true).unwrap();
        store
            .put_booleans([locked(0, 2000), locked(4000, 6000), clipped.clone()])
            .unwrap();

        let latest = store.find_latest_by_channel().await.unwrap();
        let as_set: HashSet<BooleanIssue> = latest.into_iter().collect();
        assert_eq!(as_set, HashSet::from([locked(4000, 6000), clipped]));
    }

    #[tokio::test]
    async fn injected_failures_exhaust() {
        let store = InMemoryIssueStore::new();
        store.fail_next_syncs(2);

        let updates = IssueUpdates::builder().boolean_inserts([locked(0, 2000)]).build();
        assert!(store.sync_updates(&updates).await.is_err());
        assert!(store.sync_updates(&updates).await.is_err());
        assert!(store.sync_updates(&updates).await.is_ok());
        assert_eq!(store.boolean_count().unwrap(), 1);
    }
}
