//! Insert/delete batches applied to the persistent store.
//!
//! An [`IssueUpdates`] carries two symmetric pairs of sets: analog
//! inserts/deletes (pass-through, plain set union) and boolean
//! inserts/deletes (subject to interval merging in `soh-merge`). After
//! collision filtering, no issue appears in both the insert and delete set
//! of the same kind.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::issue::{AnalogIssue, BooleanIssue, Issue};

/// A batch of store mutations produced from one processed stream buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueUpdates {
    /// Analog issues to insert.
    pub analog_inserts: HashSet<AnalogIssue>,
    /// Analog issues to delete.
    pub analog_deletes: HashSet<AnalogIssue>,
    /// Boolean issues to insert.
    pub boolean_inserts: HashSet<BooleanIssue>,
    /// Boolean issues to delete.
    pub boolean_deletes: HashSet<BooleanIssue>,
}

impl IssueUpdates {
    /// Creates an empty update set.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wraps a single stream record in a singleton update set.
    #[must_use]
    pub fn from_issue(issue: Issue) -> Self {
        match issue {
            Issue::Boolean(issue) => Self::from_boolean(issue),
            Issue::Analog(issue) => Self::from_analog(issue),
        }
    }

    /// Creates an update set inserting one boolean issue.
    #[must_use]
    pub fn from_boolean(issue: BooleanIssue) -> Self {
        Self {
            boolean_inserts: HashSet::from([issue]),
            ..Self::default()
        }
    }

    /// Creates an update set inserting one analog issue.
    #[must_use]
    pub fn from_analog(issue: AnalogIssue) -> Self {
        Self {
            analog_inserts: HashSet::from([issue]),
            ..Self::default()
        }
    }

    /// Returns true when every set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.analog_inserts.is_empty()
            && self.analog_deletes.is_empty()
            && self.boolean_inserts.is_empty()
            && self.boolean_deletes.is_empty()
    }

    /// Returns a builder for assembling an update set field by field.
    #[must_use]
    pub fn builder() -> IssueUpdatesBuilder {
        IssueUpdatesBuilder::default()
    }
}

/// Builder for [`IssueUpdates`].
///
/// Convenience only; the struct's fields are public and plain constructors
/// are sufficient for most call sites.
#[derive(Debug, Default)]
pub struct IssueUpdatesBuilder {
    updates: IssueUpdates,
}

impl IssueUpdatesBuilder {
    /// Replaces the analog insert set.
    #[must_use]
    pub fn analog_inserts(mut self, issues: impl IntoIterator<Item = AnalogIssue>) -> Self {
        self.updates.analog_inserts = issues.into_iter().collect();
        self
    }

    /// Replaces the analog delete set.
    #[must_use]
    pub fn analog_deletes(mut self, issues: impl IntoIterator<Item = AnalogIssue>) -> Self {
        self.updates.analog_deletes = issues.into_iter().collect();
        self
    }

    /// Replaces the boolean insert set.
    #[must_use]
    pub fn boolean_inserts(mut self, issues: impl IntoIterator<Item = BooleanIssue>) -> Self {
        self.updates.boolean_inserts = issues.into_iter().collect();
        self
    }

    /// Replaces the boolean delete set.
    #[must_use]
    pub fn boolean_deletes(mut self, issues: impl IntoIterator<Item = BooleanIssue>) -> Self {
        self.updates.boolean_deletes = issues.into_iter().collect();
        self
    }

    /// Adds one boolean insert.
    #[must_use]
    pub fn boolean_insert(mut self, issue: BooleanIssue) -> Self {
        self.updates.boolean_inserts.insert(issue);
        self
    }

    /// Adds one boolean delete.
    #[must_use]
    pub fn boolean_delete(mut self, issue: BooleanIssue) -> Self {
        self.updates.boolean_deletes.insert(issue);
        self
    }

    /// Finalizes the update set.
    #[must_use]
    pub fn build(self) -> IssueUpdates {
        self.updates
    }
}
