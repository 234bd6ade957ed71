//! Cache-first, store-fallback neighbor resolution.
//!
//! For every freshly merged candidate interval, the resolver finds the
//! nearest persisted issue on each side (previous and next, for the same
//! channel and type), decides whether the candidate merges with, is
//! enclosed by, or stands apart from its neighbors, and accumulates the
//! insert/delete sets the store write must apply.
//!
//! Lookup protocol: the per-partition cache is consulted first; only a
//! candidate that is not "recent" (i.e. the cache has seen something newer
//! for its key) falls through to a batched store query, grouped per issue
//! type across channels to minimize round-trips.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use soh_core::{BooleanIssue, IssueKey, IssueType, IssueUpdates};

use crate::cache::NeighborCache;
use crate::error::Result;
use crate::merge::UpdatesMerger;
use crate::store::{ChannelTimeRequest, IssueRepository};

/// Accumulated outcome of one resolution pass.
///
/// Created fresh per resolver call, consumed immediately by the pipeline,
/// never persisted.
#[derive(Debug, Default)]
pub struct ResolutionResult {
    /// Candidates plus every neighbor they supersede; re-merged before
    /// insertion.
    pub updated_inserts: HashSet<BooleanIssue>,
    /// Previously persisted issues superseded by a merge.
    pub to_delete: HashSet<BooleanIssue>,
    /// Pending previous-neighbor store lookups, grouped by type.
    pub prev_requests: HashMap<IssueType, ChannelTimeRequest>,
    /// Pending next-neighbor store lookups, grouped by type.
    pub next_requests: HashMap<IssueType, ChannelTimeRequest>,
}

impl ResolutionResult {
    /// Creates an empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a previous-neighbor store lookup at the candidate's end time.
    pub fn queue_previous(&mut self, candidate: &BooleanIssue) {
        self.prev_requests
            .entry(candidate.issue_type)
            .or_insert_with(|| ChannelTimeRequest::new(candidate.issue_type))
            .add_time(candidate.channel.clone(), candidate.end_time);
    }

    /// Queues a next-neighbor store lookup at the candidate's end time.
    pub fn queue_next(&mut self, candidate: &BooleanIssue) {
        self.next_requests
            .entry(candidate.issue_type)
            .or_insert_with(|| ChannelTimeRequest::new(candidate.issue_type))
            .add_time(candidate.channel.clone(), candidate.end_time);
    }

    /// Returns true when no store lookups are pending.
    #[must_use]
    pub fn has_no_pending_requests(&self) -> bool {
        self.prev_requests.is_empty() && self.next_requests.is_empty()
    }
}

/// Resolves nearest-neighbor merges against the cache and the store.
///
/// One resolver per partition pipeline; it owns the partition's
/// [`NeighborCache`] and shares the repository with every other partition.
pub struct NeighborResolver {
    merger: UpdatesMerger,
    repository: Arc<dyn IssueRepository>,
    cache: NeighborCache,
    partition: i32,
}

impl NeighborResolver {
    /// Creates a resolver with an empty cache.
    ///
    /// Call [`NeighborResolver::seed`] before processing so the recency
    /// check has the store's latest known issues to work from.
    #[must_use]
    pub fn new(merger: UpdatesMerger, repository: Arc<dyn IssueRepository>, partition: i32) -> Self {
        Self {
            merger,
            repository,
            cache: NeighborCache::new(),
            partition,
        }
    }

    /// Returns the partition's cache.
    #[must_use]
    pub fn cache(&self) -> &NeighborCache {
        &self.cache
    }

    /// Loads each channel's most recent known issue into the cache.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the seeding query fails; the cache is
    /// left unchanged and the call may be retried.
    pub async fn seed(&self) -> Result<usize> {
        let latest = self.repository.find_latest_by_channel().await?;
        let count = latest.len();
        self.cache.update(latest);
        info!(
            partition = self.partition,
            seeded = count,
            "seeded neighbor cache from store"
        );
        Ok(count)
    }

    /// Attempts to merge incoming updates with issues already persisted.
    ///
    /// Orchestrates the full pass: cache lookup, store fallback for the
    /// misses, a final transitive re-merge of everything gathered (cache
    /// and store neighbors discovered on opposite sides of a candidate
    /// must collapse with it and with each other), then a cache refresh.
    /// Returns the updates with boolean inserts replaced by the final
    /// merged set and boolean deletes replaced by the superseded issues.
    ///
    /// # Errors
    ///
    /// Returns a storage error when a neighbor query fails; the update set
    /// is not partially applied anywhere and the call may be retried.
    pub async fn try_merge_with_neighbors(&self, updates: IssueUpdates) -> Result<IssueUpdates> {
        let started = Instant::now();

        let cached = self.find_cached_neighbors(&updates.boolean_inserts);
        let resolved = self.find_repository_neighbors(cached).await?;

        let merged = self.merger.merge_all(resolved.updated_inserts);
        self.cache.update(merged.iter().cloned());

        debug!(
            partition = self.partition,
            inserts = merged.len(),
            deletes = resolved.to_delete.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "neighbor resolution complete"
        );

        Ok(IssueUpdates {
            boolean_inserts: merged,
            boolean_deletes: resolved.to_delete,
            ..updates
        })
    }

    /// Resolves candidates against the partition cache.
    ///
    /// Per candidate: an in-tolerance neighbor on either side joins both
    /// the delete set (it will be superseded) and the insert set (its span
    /// folds into the merge); a missing side queues a store lookup, but
    /// only when the cache has seen something newer for the key — a
    /// "recent" candidate extends the known frontier and cannot have an
    /// unseen next neighbor. A candidate fully enclosed by a neighbor is
    /// discarded outright.
    #[must_use]
    pub fn find_cached_neighbors(&self, candidates: &HashSet<BooleanIssue>) -> ResolutionResult {
        let mut result = ResolutionResult::new();

        for candidate in candidates {
            let key = candidate.key();

            let is_recent = self
                .cache
                .latest(&key)
                .is_none_or(|latest| latest.end_time <= candidate.end_time);

            let previous = self
                .cache
                .floor(&key, candidate.end_time)
                .filter(|floor| self.merger.can_merge(candidate, floor));
            let next = self
                .cache
                .ceiling(&key, candidate.end_time)
                .filter(|ceiling| self.merger.can_merge(candidate, ceiling));

            let enclosed = previous
                .as_ref()
                .is_some_and(|prev| prev.encloses(candidate))
                || next.as_ref().is_some_and(|nxt| nxt.encloses(candidate));
            if enclosed {
                info!(
                    partition = self.partition,
                    channel = %candidate.channel,
                    issue_type = %candidate.issue_type,
                    start = %candidate.start_time,
                    end = %candidate.end_time,
                    "cached issue fully encloses candidate, skipping"
                );
                continue;
            }

            match previous {
                Some(prev) => {
                    result.to_delete.insert(prev.clone());
                    result.updated_inserts.insert(prev);
                }
                None if !is_recent => result.queue_previous(candidate),
                None => {}
            }

            match next {
                Some(nxt) => {
                    result.to_delete.insert(nxt.clone());
                    result.updated_inserts.insert(nxt);
                }
                None if !is_recent => result.queue_next(candidate),
                None => {}
            }

            result.updated_inserts.insert(candidate.clone());
        }

        result
    }

    /// Resolves the queued cache misses against the store.
    ///
    /// Runs one batched query per (type, side), indexes the returned
    /// neighbors by key, and folds every in-tolerance hit into the delete
    /// and insert sets exactly as a cache hit would have been.
    ///
    /// # Errors
    ///
    /// Returns a storage error when a neighbor query fails.
    pub async fn find_repository_neighbors(
        &self,
        mut result: ResolutionResult,
    ) -> Result<ResolutionResult> {
        let mut previous_by_key: HashMap<IssueKey, NeighborMap> = HashMap::new();
        for (issue_type, request) in &result.prev_requests {
            let by_channel = self.repository.find_latest_before(request).await?;
            for (channel, issues) in by_channel {
                previous_by_key.insert(IssueKey::new(channel, *issue_type), issues);
            }
        }

        let mut next_by_key: HashMap<IssueKey, NeighborMap> = HashMap::new();
        for (issue_type, request) in &result.next_requests {
            let by_channel = self.repository.find_earliest_after(request).await?;
            for (channel, issues) in by_channel {
                next_by_key.insert(IssueKey::new(channel, *issue_type), issues);
            }
        }

        let mut discovered = HashSet::new();
        for candidate in &result.updated_inserts {
            let key = candidate.key();

            let previous = previous_by_key
                .get(&key)
                .and_then(|map| map.range(..=candidate.end_time).next_back())
                .map(|(_, issue)| issue)
                .filter(|floor| self.merger.can_merge(candidate, floor));
            if let Some(prev) = previous {
                debug!(
                    partition = self.partition,
                    channel = %prev.channel,
                    start = %prev.start_time,
                    end = %prev.end_time,
                    "adding previous store neighbor to delete set"
                );
                result.to_delete.insert(prev.clone());
                discovered.insert(prev.clone());
            }

            let next = next_by_key
                .get(&key)
                .and_then(|map| map.range(candidate.end_time..).next())
                .map(|(_, issue)| issue)
                .filter(|ceiling| self.merger.can_merge(candidate, ceiling));
            if let Some(nxt) = next {
                debug!(
                    partition = self.partition,
                    channel = %nxt.channel,
                    start = %nxt.start_time,
                    end = %nxt.end_time,
                    "adding next store neighbor to delete set"
                );
                result.to_delete.insert(nxt.clone());
                discovered.insert(nxt.clone());
            }
        }

        result.updated_inserts.extend(discovered);
        Ok(result)
    }
}

type NeighborMap = std::collections::BTreeMap<DateTime<Utc>, BooleanIssue>;

impl std::fmt::Debug for NeighborResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeighborResolver")
            .field("partition", &self.partition)
            .field("cached_entries", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryIssueStore;
    use crate::tolerance::ToleranceResolver;
    use chrono::TimeZone;
    use soh_core::IssueType;
    use std::time::Duration;

    const CHANNEL: &str = "ASAR.AS01.SHZ";

    fn at_ms(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    /// Interval helper: seconds-scale spans ending 25 ms short of the next
    /// start, so a 500 ms tolerance merges them and a 5 ms one does not.
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

    fn resolver_with_tolerance(store: Arc<InMemoryIssueStore>, tolerance_ms: u64) -> NeighborResolver {
        NeighborResolver::new(
            UpdatesMerger::new(ToleranceResolver::with_default(Duration::from_millis(
                tolerance_ms,
            ))),
            store,
            0,
        )
    }

    fn singleton(issue: &BooleanIssue) -> HashSet<BooleanIssue> {
        HashSet::from([issue.clone()])
    }

    #[test]
    fn recent_candidate_merges_with_cached_previous() {
        let resolver = resolver_with_tolerance(Arc::new(InMemoryIssueStore::new()), 500);
        resolver.cache().update([locked(2, 4)]);

        let result = resolver.find_cached_neighbors(&singleton(&locked(4, 6)));

        assert_eq!(
            result.updated_inserts,
            HashSet::from([locked(2, 4), locked(4, 6)])
        );
        assert_eq!(result.to_delete, singleton(&locked(2, 4)));
        assert!(result.has_no_pending_requests());
    }

    #[test]
    fn backfill_without_cached_neighbors_requests_both_sides() {
        let resolver = resolver_with_tolerance(Arc::new(InMemoryIssueStore::new()), 500);
        resolver.cache().update([locked(4, 6)]);

        let result = resolver.find_cached_neighbors(&singleton(&locked(0, 2)));

        assert_eq!(result.updated_inserts, singleton(&locked(0, 2)));
        assert!(result.to_delete.is_empty());
        assert!(result.prev_requests.contains_key(&IssueType::ClockLocked));
        assert!(result.next_requests.contains_key(&IssueType::ClockLocked));
    }

    #[test]
    fn backfill_merging_with_latest_still_requests_previous() {
        let resolver = resolver_with_tolerance(Arc::new(InMemoryIssueStore::new()), 500);
        resolver.cache().update([locked(4, 6)]);

        let result = resolver.find_cached_neighbors(&singleton(&locked(2, 4)));

        assert_eq!(
            result.updated_inserts,
            HashSet::from([locked(2, 4), locked(4, 6)])
        );
        assert_eq!(result.to_delete, singleton(&locked(4, 6)));
        assert!(result.prev_requests.contains_key(&IssueType::ClockLocked));
        assert!(result.next_requests.is_empty());
    }

    #[test]
    fn unseen_key_makes_no_store_requests() {
        let resolver = resolver_with_tolerance(Arc::new(InMemoryIssueStore::new()), 500);

        let result = resolver.find_cached_neighbors(&singleton(&locked(2, 4)));

        assert_eq!(result.updated_inserts, singleton(&locked(2, 4)));
        assert!(result.to_delete.is_empty());
        assert!(result.has_no_pending_requests());
    }

    #[test]
    fn out_of_tolerance_neighbors_are_ignored() {
        let resolver = resolver_with_tolerance(Arc::new(InMemoryIssueStore::new()), 5);
        resolver.cache().update([locked(2, 4)]);

        let result = resolver.find_cached_neighbors(&singleton(&locked(4, 6)));

        assert_eq!(result.updated_inserts, singleton(&locked(4, 6)));
        assert!(result.to_delete.is_empty());
        assert!(result.has_no_pending_requests());
    }

    #[test]
    fn enclosed_candidate_is_discarded_entirely() {
        let resolver = resolver_with_tolerance(Arc::new(InMemoryIssueStore::new()), 500);
        resolver.cache().update([locked(0, 6)]);

        let result = resolver.find_cached_neighbors(&singleton(&locked(2, 4)));

        assert!(result.updated_inserts.is_empty());
        assert!(result.to_delete.is_empty());
        assert!(result.has_no_pending_requests());
    }

    #[test]
    fn enclosure_skips_only_the_enclosed_candidate() {
        let resolver = resolver_with_tolerance(Arc::new(InMemoryIssueStore::new()), 5);
        resolver.cache().update([locked(4, 6)]);

        let candidates = HashSet::from([locked(0, 2), locked(5, 6)]);
        let result = resolver.find_cached_neighbors(&candidates);

        assert_eq!(result.updated_inserts, singleton(&locked(0, 2)));
        assert!(result.prev_requests.contains_key(&IssueType::ClockLocked));
        assert!(result.next_requests.contains_key(&IssueType::ClockLocked));
    }

    #[test]
    fn overlapping_cached_interval_is_superseded() {
        let resolver = resolver_with_tolerance(Arc::new(InMemoryIssueStore::new()), 500);
        resolver.cache().update([locked(0, 4)]);

        let result = resolver.find_cached_neighbors(&singleton(&locked(2, 6)));

        assert_eq!(
            result.updated_inserts,
            HashSet::from([locked(0, 4), locked(2, 6)])
        );
        assert_eq!(result.to_delete, singleton(&locked(0, 4)));
        assert!(result.has_no_pending_requests());
    }

    #[tokio::test]
    async fn repository_neighbors_fill_both_sides() {
        let store = Arc::new(InMemoryIssueStore::new());
        store
            .put_booleans([locked(0, 2), locked(4, 6)])
            .unwrap();
        let resolver = resolver_with_tolerance(store, 500);

        let mut pending = ResolutionResult::new();
        pending.updated_inserts.insert(locked(2, 4));
        pending.queue_previous(&locked(2, 4));
        pending.queue_next(&locked(2, 4));

        let result = resolver.find_repository_neighbors(pending).await.unwrap();

        assert_eq!(
            result.updated_inserts,
            HashSet::from([locked(0, 2), locked(2, 4), locked(4, 6)])
        );
        assert_eq!(
            result.to_delete,
            HashSet::from([locked(0, 2), locked(4, 6)])
        );
    }

    #[tokio::test]
    async fn repository_neighbors_outside_tolerance_are_ignored() {
        let store = Arc::new(InMemoryIssueStore::new());
        store.put_booleans([locked(0, 2), locked(4, 6)]).unwrap();
        let resolver = resolver_with_tolerance(store, 5);

        let mut pending = ResolutionResult::new();
        pending.updated_inserts.insert(locked(2, 4));
        pending.queue_previous(&locked(2, 4));
        pending.queue_next(&locked(2, 4));

        let result = resolver.find_repository_neighbors(pending).await.unwrap();

        assert_eq!(result.updated_inserts, singleton(&locked(2, 4)));
        assert!(result.to_delete.is_empty());
    }

    #[tokio::test]
    async fn full_pass_merges_cache_and_store_neighbors_transitively() {
        let store = Arc::new(InMemoryIssueStore::new());
        store.put_booleans([locked(0, 2)]).unwrap();
        let resolver = resolver_with_tolerance(store, 500);
        resolver.cache().update([locked(4, 6)]);

        let updates = IssueUpdates::from_boolean(locked(2, 4));
        let resolved = resolver.try_merge_with_neighbors(updates).await.unwrap();

        assert_eq!(resolved.boolean_inserts, singleton(&locked(0, 6)));
        assert_eq!(
            resolved.boolean_deletes,
            HashSet::from([locked(0, 2), locked(4, 6)])
        );

        // The cache converges to the single merged interval.
        let key = IssueKey::new(CHANNEL, IssueType::ClockLocked);
        assert_eq!(resolver.cache().latest(&key), Some(locked(0, 6)));
        assert_eq!(resolver.cache().entry_count(), 1);
    }

    #[tokio::test]
    async fn recent_candidate_never_touches_the_store() {
        let store = Arc::new(InMemoryIssueStore::new());
        let resolver = resolver_with_tolerance(Arc::clone(&store), 500);
        resolver.cache().update([locked(2, 4)]);

        let updates = IssueUpdates::from_boolean(locked(4, 6));
        let resolved = resolver.try_merge_with_neighbors(updates).await.unwrap();

        assert_eq!(resolved.boolean_inserts, singleton(&locked(2, 6)));
        assert_eq!(resolved.boolean_deletes, singleton(&locked(2, 4)));
        // The candidate extended the known frontier, so no store lookup
        // was queued on either side.
        let cached = resolver.find_cached_neighbors(&singleton(&locked(6, 8)));
        assert!(cached.has_no_pending_requests());
    }

    #[tokio::test]
    async fn seed_populates_latest_per_key() {
        let store = Arc::new(InMemoryIssueStore::new());
        store.put_booleans([locked(0, 2), locked(4, 6)]).unwrap();
        let resolver = resolver_with_tolerance(store, 500);

        let seeded = resolver.seed().await.unwrap();
        assert_eq!(seeded, 1);

        let key = IssueKey::new(CHANNEL, IssueType::ClockLocked);
        assert_eq!(resolver.cache().latest(&key), Some(locked(4, 6)));
    }

    #[test]
    fn requests_batch_across_channels_per_type() {
        let resolver = resolver_with_tolerance(Arc::new(InMemoryIssueStore::new()), 500);
        resolver.cache().update([locked(8, 10)]);
        let other = BooleanIssue::new(
            "WRA.W01.BHZ",
            IssueType::ClockLocked,
            at_ms(8000),
            at_ms(10_000),
            true,
        )
        .unwrap();
        resolver.cache().update([other]);

        let backfill_a = locked(0, 2);
        let backfill_b = BooleanIssue::new(
            "WRA.W01.BHZ",
            IssueType::ClockLocked,
            at_ms(0),
            at_ms(1975),
            true,
        )
        .unwrap();

        let result = resolver
            .find_cached_neighbors(&HashSet::from([backfill_a.clone(), backfill_b.clone()]));

        let request = &result.prev_requests[&IssueType::ClockLocked];
        assert_eq!(request.times_by_channel.len(), 2);
        assert!(request.times_by_channel[CHANNEL].contains(&backfill_a.end_time));
        assert!(request.times_by_channel["WRA.W01.BHZ"].contains(&backfill_b.end_time));
    }
}
