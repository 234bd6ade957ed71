//! Per-partition neighbor cache.
//!
//! The cache holds, per `(channel, type)` key, an ordered map of the most
//! recently known boolean issues keyed by end time, supporting
//! floor/ceiling/latest lookups for neighbor resolution. Each partition
//! pipeline owns exactly one cache; nothing is shared across partitions.
//!
//! Concurrency: the pipeline reads and writes the cache from its worker
//! task while the pruner task sweeps it periodically. The shard-locked map
//! scopes every mutation to a single key, so pruning never blocks the
//! pipeline behind a global lock and the per-key ordering invariant is
//! preserved under interleaving.
//!
//! Invariant: after every [`NeighborCache::update`], the issues stored for
//! a key are mutually non-overlapping — inserting an issue first clears any
//! entries whose end time falls within `[start, end)`.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use soh_core::{BooleanIssue, IssueKey};

/// End-time-ordered cache of the latest known issues per key.
#[derive(Debug, Default)]
pub struct NeighborCache {
    entries: DashMap<IssueKey, BTreeMap<DateTime<Utc>, BooleanIssue>>,
}

impl NeighborCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached issue with the greatest end time for `key`.
    #[must_use]
    pub fn latest(&self, key: &IssueKey) -> Option<BooleanIssue> {
        self.entries
            .get(key)
            .and_then(|map| map.last_key_value().map(|(_, issue)| issue.clone()))
    }

    /// Returns the cached issue with the greatest end time `<= at` for
    /// `key`.
    #[must_use]
    pub fn floor(&self, key: &IssueKey, at: DateTime<Utc>) -> Option<BooleanIssue> {
        self.entries
            .get(key)
            .and_then(|map| map.range(..=at).next_back().map(|(_, issue)| issue.clone()))
    }

    /// Returns the cached issue with the least end time `>= at` for `key`.
    #[must_use]
    pub fn ceiling(&self, key: &IssueKey, at: DateTime<Utc>) -> Option<BooleanIssue> {
        self.entries
            .get(key)
            .and_then(|map| map.range(at..).next().map(|(_, issue)| issue.clone()))
    }

    /// Inserts issues, overwriting anything they supersede.
    ///
    /// For each issue, entries whose end time lies in
    /// `[issue.start_time, issue.end_time)` are cleared before the issue is
    /// inserted under its end time.
    pub fn update(&self, issues: impl IntoIterator<Item = BooleanIssue>) {
        for issue in issues {
            let mut map = self.entries.entry(issue.key()).or_default();
            let superseded: Vec<DateTime<Utc>> = map
                .range(issue.start_time..issue.end_time)
                .map(|(end, _)| *end)
                .collect();
            for end in superseded {
                map.remove(&end);
            }
            map.insert(issue.end_time, issue);
        }
    }

    /// Removes entries older than `now - max_age`, always retaining the
    /// most recent entry per key.
    ///
    /// The per-key cutoff is `min(now - max_age, last end time)`, and
    /// removal is strict (`end < cutoff`), so a key that has gone quiet
    /// keeps its latest issue indefinitely and the recency check never
    /// loses its reference point.
    ///
    /// Returns the number of entries removed.
    pub fn prune(&self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let age_limit = chrono::Duration::from_std(max_age)
            .map_or_else(|_| DateTime::<Utc>::MIN_UTC, |age| now - age);

        let mut removed = 0;
        for mut entry in self.entries.iter_mut() {
            let map = entry.value_mut();
            let Some(last_end) = map.last_key_value().map(|(end, _)| *end) else {
                continue;
            };
            let cutoff = age_limit.min(last_end);
            let before = map.len();
            *map = map.split_off(&cutoff);
            removed += before - map.len();
        }
        removed
    }

    /// Drops every cached issue.
    ///
    /// Used when the cache can no longer be trusted to mirror the store,
    /// e.g. after a failed store write left it ahead of persisted history.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Returns the total number of cached issues across all keys.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.iter().map(|entry| entry.value().len()).sum()
    }

    /// Returns true when no issues are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entry_count() == 0
    }
}
