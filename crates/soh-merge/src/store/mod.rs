//! Pluggable persistence for issue history.
//!
//! The [`IssueRepository`] trait defines the store contract the pipeline
//! writes through and the neighbor resolver falls back to on cache misses.
//! The physical schema and query execution belong to implementations; the
//! engine only depends on the operations below.
//!
//! ## Design Principles
//!
//! - **Batched lookups**: Neighbor queries group reference times per type
//!   across channels to minimize store round-trips
//! - **Concurrent writers**: All partitions share one repository; the write
//!   path must be safe under concurrent updates for different channels
//! - **Testability**: In-memory implementation for tests, a relational
//!   store in production

pub mod memory;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use soh_core::{BooleanIssue, IssueType, IssueUpdates};

use crate::error::Result;

/// Neighbor query results: per channel, issues keyed ascending by end time.
pub type NeighborsByChannel = HashMap<String, BTreeMap<DateTime<Utc>, BooleanIssue>>;

/// A batched neighbor query for one issue type.
///
/// Collects reference times per channel so the store can answer a whole
/// batch's lookups on one side (previous or next) in a single round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTimeRequest {
    /// The issue type being queried.
    pub issue_type: IssueType,
    /// Reference times grouped by channel name.
    pub times_by_channel: HashMap<String, BTreeSet<DateTime<Utc>>>,
}

impl ChannelTimeRequest {
    /// Creates an empty request for `issue_type`.
    #[must_use]
    pub fn new(issue_type: IssueType) -> Self {
        Self {
            issue_type,
            times_by_channel: HashMap::new(),
        }
    }

    /// Adds a reference time for `channel`.
    pub fn add_time(&mut self, channel: impl Into<String>, time: DateTime<Utc>) {
        self.times_by_channel
            .entry(channel.into())
            .or_default()
            .insert(time);
    }

    /// Returns true when no reference times have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.times_by_channel.is_empty()
    }
}

/// Storage contract for channel environment issue history.
///
/// Implementations must tolerate concurrent calls from multiple partition
/// pipelines; the store is the only resource shared across partitions.
#[async_trait]
pub trait IssueRepository: Send + Sync {
    /// Applies an update set: deletes by `(channel, type, start time)`
    /// identity, then inserts, ideally within one transaction.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the write fails; the caller must not
    /// commit the originating batch.
    async fn sync_updates(&self, updates: &IssueUpdates) -> Result<()>;

    /// For each channel/reference-time pair, finds the issue of the
    /// requested type with the latest end time at or before the reference.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    async fn find_latest_before(&self, request: &ChannelTimeRequest) -> Result<NeighborsByChannel>;

    /// For each channel/reference-time pair, finds the issue of the
    /// requested type with the earliest start time at or after the
    /// reference.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    async fn find_earliest_after(&self, request: &ChannelTimeRequest)
        -> Result<NeighborsByChannel>;

    /// Returns the most recent boolean issue per channel and type, used to
    /// seed a fresh partition cache.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    async fn find_latest_by_channel(&self) -> Result<Vec<BooleanIssue>>;
}
