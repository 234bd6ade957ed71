//! Stream consumption abstraction for the partitioned record feed.
//!
//! This module provides:
//!
//! - [`StreamConsumer`]: Trait surfacing partition rebalance events and
//!   per-partition record subscriptions
//! - [`RecordStream`]: Trait for one partition's ordered record feed with
//!   offset commits
//! - [`RawRecord`]: A transport record, opaque payload plus position
//! - [`decode_issue`]: Payload decoding with interval validation
//!
//! ## Design Principles
//!
//! - **Transport agnostic**: The message-bus client, consumer-group
//!   mechanics, and wire codec live behind these traits; the engine sees
//!   only assignments, revocations, ordered records, and commits
//! - **Ordering assumption**: Within a partition, records for a given
//!   channel arrive in time order; the merge protocol depends on the
//!   transport upholding this
//! - **At-least-once**: A subscription resumes after the last committed
//!   offset, so an uncommitted batch redelivers to the next subscriber

pub mod memory;

use std::fmt;

use async_trait::async_trait;

use soh_core::Issue;

use crate::error::{Error, Result};

/// Identifier of one independently ordered stream partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(
    /// The numeric partition as assigned by the transport.
    pub i32,
);

impl PartitionId {
    /// Returns the numeric partition value.
    #[must_use]
    pub const fn value(self) -> i32 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One record as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// The partition the record was read from.
    pub partition: PartitionId,
    /// The record's offset within its partition.
    pub offset: i64,
    /// The opaque serialized payload.
    pub payload: Vec<u8>,
}

/// A partition lifecycle event from the consumer group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebalanceEvent {
    /// The partition was assigned to this process.
    Assigned(PartitionId),
    /// The partition was revoked from this process.
    Revoked(PartitionId),
}

/// One partition's ordered record feed.
#[async_trait]
pub trait RecordStream: Send {
    /// Receives the next record, or `None` once the subscription closes.
    ///
    /// Must be cancel safe: a receive future dropped before completion
    /// must not lose a record.
    async fn recv(&mut self) -> Option<RawRecord>;

    /// Commits `offset` as durably processed.
    ///
    /// # Errors
    ///
    /// Returns a stream error when the commit cannot be issued.
    async fn commit(&mut self, offset: i64) -> Result<()>;
}

/// The consumer-group surface the processor supervises.
#[async_trait]
pub trait StreamConsumer: Send + Sync {
    /// Waits for the next rebalance event, or `None` at consumer shutdown.
    async fn next_event(&self) -> Option<RebalanceEvent>;

    /// Opens the record feed for an assigned partition, resuming after the
    /// last committed offset.
    ///
    /// # Errors
    ///
    /// Returns a stream error when the subscription cannot be opened.
    async fn subscribe(&self, partition: PartitionId) -> Result<Box<dyn RecordStream>>;
}

/// Decodes a raw record payload into an issue, validating its interval.
///
/// # Errors
///
/// Returns [`Error::Decode`] for malformed payloads and records whose
/// start time is after their end time. Callers drop and log such records;
/// they never enter a batch.
pub fn decode_issue(record: &RawRecord) -> Result<Issue> {
    let issue: Issue = serde_json::from_slice(&record.payload).map_err(|err| Error::Decode {
        partition: record.partition.value(),
        offset: record.offset,
        message: err.to_string(),
    })?;
    issue.validate().map_err(|err| Error::Decode {
        partition: record.partition.value(),
        offset: record.offset,
        message: err.to_string(),
    })?;
    Ok(issue)
}
