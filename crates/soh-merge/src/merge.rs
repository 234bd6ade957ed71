//! Tolerance-based interval merging for boolean issues.
//!
//! This module provides [`UpdatesMerger`], the pure merge engine. Merging
//! is a greedy interval union per `(channel, type)` key: each group is
//! sorted by start time and swept left to right, folding every issue that
//! is within tolerance of the running accumulator into it. Adjacency is
//! only checked against the immediately preceding accumulated interval, so
//! a full re-merge is required after augmenting a set with neighbors found
//! in the cache or the store.
//!
//! Analog issues are never merged; update-set combination unions them.

use std::collections::{HashMap, HashSet};

use chrono::Duration;

use soh_core::{BooleanIssue, IssueKey, IssueUpdates};

use crate::tolerance::ToleranceResolver;

/// Pure merge engine for issue update sets.
///
/// Holds the tolerance table and nothing else; every method is free of
/// I/O and side effects.
#[derive(Debug, Clone, Default)]
pub struct UpdatesMerger {
    tolerance: ToleranceResolver,
}

impl UpdatesMerger {
    /// Creates a merger over the given tolerance resolver.
    #[must_use]
    pub fn new(tolerance: ToleranceResolver) -> Self {
        Self { tolerance }
    }

    /// Returns true when `a` and `b` may merge into one interval.
    ///
    /// Requires the same `(channel, type)` key and a temporal gap between
    /// the earlier issue's end and the later issue's start no greater than
    /// the channel's tolerance. Overlapping intervals always qualify.
    /// Symmetric in its arguments.
    #[must_use]
    pub fn can_merge(&self, a: &BooleanIssue, b: &BooleanIssue) -> bool {
        if a.channel != b.channel || a.issue_type != b.issue_type {
            return false;
        }
        let tolerance =
            Duration::from_std(self.tolerance.resolve(&a.channel)).unwrap_or(Duration::MAX);
        a.start_time - b.end_time <= tolerance && b.start_time - a.end_time <= tolerance
    }

    /// Merges two mergeable issues into one spanning interval.
    ///
    /// The result spans `min(start)..max(end)` and keeps the status of the
    /// earlier-starting issue (ties keep `left`'s status). Equal issues
    /// return `left` unchanged.
    #[must_use]
    pub fn merge(&self, left: &BooleanIssue, right: &BooleanIssue) -> BooleanIssue {
        if left == right {
            return left.clone();
        }

        let status = if right.start_time < left.start_time {
            right.status
        } else {
            left.status
        };

        BooleanIssue {
            channel: left.channel.clone(),
            issue_type: left.issue_type,
            start_time: left.start_time.min(right.start_time),
            end_time: left.end_time.max(right.end_time),
            status,
        }
    }

    /// Collapses a set of issues into the fewest canonical intervals.
    ///
    /// Groups by key, sorts each group ascending by start time, and folds a
    /// single left-to-right pass: while the next issue is within tolerance
    /// of the running accumulator it is merged in, otherwise the
    /// accumulator is flushed and restarted.
    #[must_use]
    pub fn merge_all(&self, issues: HashSet<BooleanIssue>) -> HashSet<BooleanIssue> {
        let mut by_key: HashMap<IssueKey, Vec<BooleanIssue>> = HashMap::new();
        for issue in issues {
            by_key.entry(issue.key()).or_default().push(issue);
        }

        by_key
            .into_values()
            .flat_map(|group| self.merge_group(group))
            .collect()
    }

    fn merge_group(&self, mut group: Vec<BooleanIssue>) -> Vec<BooleanIssue> {
        if group.len() < 2 {
            return group;
        }

        group.sort_by_key(|issue| (issue.start_time, issue.end_time));

        let mut merged = Vec::new();
        let mut iter = group.into_iter();
        let Some(mut current) = iter.next() else {
            return merged;
        };
        for next in iter {
            if self.can_merge(&current, &next) {
                current = self.merge(&current, &next);
            } else {
                merged.push(current);
                current = next;
            }
        }
        merged.push(current);

        merged
    }

    /// Combines two update sets into one.
    ///
    /// Analog inserts/deletes and boolean deletes are set unions; boolean
    /// inserts are unioned and then re-merged.
    #[must_use]
    pub fn combine(&self, mut left: IssueUpdates, right: IssueUpdates) -> IssueUpdates {
        left.analog_inserts.extend(right.analog_inserts);
        left.analog_deletes.extend(right.analog_deletes);
        left.boolean_deletes.extend(right.boolean_deletes);

        let mut inserts = left.boolean_inserts;
        inserts.extend(right.boolean_inserts);
        left.boolean_inserts = self.merge_all(inserts);

        left
    }

    /// Reduces a batch of update sets into one merged set.
    ///
    /// Each set is internally merged first, then the batch is folded with
    /// [`UpdatesMerger::combine`]. An empty batch yields the empty set.
    #[must_use]
    pub fn merge_many(&self, updates: impl IntoIterator<Item = IssueUpdates>) -> IssueUpdates {
        updates
            .into_iter()
            .map(|u| self.merge_within(u))
            .reduce(|left, right| self.combine(left, right))
            .unwrap_or_default()
    }

    /// Merges the boolean inserts internal to one update set.
    #[must_use]
    pub fn merge_within(&self, mut updates: IssueUpdates) -> IssueUpdates {
        updates.boolean_inserts = self.merge_all(updates.boolean_inserts);
        updates
    }

    /// Cancels issues present in both the insert and delete set of the
    /// same kind.
    ///
    /// An issue scheduled for both insertion and deletion is a no-op and is
    /// removed from both sides.
    #[must_use]
    pub fn filter_collisions(&self, updates: IssueUpdates) -> IssueUpdates {
        let IssueUpdates {
            analog_inserts,
            analog_deletes,
            boolean_inserts,
            boolean_deletes,
        } = updates;

        IssueUpdates {
            analog_inserts: analog_inserts
                .iter()
                .filter(|issue| !analog_deletes.contains(issue))
                .cloned()
                .collect(),
            analog_deletes: analog_deletes
                .iter()
                .filter(|issue| !analog_inserts.contains(issue))
                .cloned()
                .collect(),
            boolean_inserts: boolean_inserts
                .iter()
                .filter(|issue| !boolean_deletes.contains(issue))
                .cloned()
                .collect(),
            boolean_deletes: boolean_deletes
                .iter()
                .filter(|issue| !boolean_inserts.contains(issue))
                .cloned()
                .collect(),
        }
    }
}
