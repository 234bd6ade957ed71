//! # soh-merge
//!
//! Interval merge engine and partitioned stream pipeline for channel
//! environment issues.
//!
//! This crate implements the merge domain, providing:
//!
//! - **Interval Merging**: Tolerance-based collapsing of adjacent and
//!   overlapping boolean issues into canonical intervals
//! - **Neighbor Resolution**: Cache-first, store-fallback reconciliation of
//!   fresh intervals against persisted history
//! - **Partition Pipelines**: One isolated buffering/merging/committing
//!   worker per stream partition, with rebalance-safe teardown
//!
//! ## Core Concepts
//!
//! - **Merge**: Two same-key issues whose temporal gap is within the
//!   channel's tolerance collapse into one interval spanning both
//! - **Neighbor**: The nearest persisted issue before or after a candidate's
//!   boundary, for the same channel and type
//! - **Enclosure**: A candidate fully contained by a neighbor contributes
//!   nothing and is discarded
//!
//! ## Guarantees
//!
//! - **At-least-once**: Offsets commit only after the store write for the
//!   batch succeeds; merging and cache updates are idempotent under
//!   redelivery
//! - **Partition isolation**: Each pipeline owns its cache and resolver;
//!   the persistent store is the only shared resource
//! - **Non-overlap**: Per key, the cache and the emitted insert set are
//!   mutually non-overlapping after every batch
//!
//! ## Example
//!
//! ```rust
//! use std::collections::HashSet;
//! use std::time::Duration;
//!
//! use chrono::{TimeZone, Utc};
//! use soh_core::{BooleanIssue, IssueType};
//! use soh_merge::merge::UpdatesMerger;
//! use soh_merge::tolerance::ToleranceResolver;
//!
//! let merger = UpdatesMerger::new(ToleranceResolver::with_default(
//!     Duration::from_millis(500),
//! ));
//!
//! let first = BooleanIssue::new(
//!     "ASAR.AS01.SHZ",
//!     IssueType::Clipped,
//!     Utc.timestamp_opt(0, 0).unwrap(),
//!     Utc.timestamp_opt(2, 0).unwrap(),
//!     true,
//! )
//! .unwrap();
//! let second = BooleanIssue::new(
//!     "ASAR.AS01.SHZ",
//!     IssueType::Clipped,
//!     Utc.timestamp_opt(2, 0).unwrap(),
//!     Utc.timestamp_opt(4, 0).unwrap(),
//!     true,
//! )
//! .unwrap();
//!
//! let merged = merger.merge_all(HashSet::from([first, second]));
//! assert_eq!(merged.len(), 1);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod cache;
pub mod config;
pub mod error;
pub mod merge;
pub mod metrics;
pub mod pipeline;
pub mod processor;
pub mod resolver;
pub mod store;
pub mod stream;
pub mod tolerance;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cache::NeighborCache;
    pub use crate::config::MergeConfig;
    pub use crate::error::{Error, Result};
    pub use crate::merge::UpdatesMerger;
    pub use crate::metrics::MergeMetrics;
    pub use crate::pipeline::{PartitionPipeline, PartitionState};
    pub use crate::processor::MergeProcessor;
    pub use crate::resolver::NeighborResolver;
    pub use crate::store::{ChannelTimeRequest, IssueRepository};
    pub use crate::stream::{
        PartitionId, RawRecord, RebalanceEvent, RecordStream, StreamConsumer,
    };
    pub use crate::tolerance::ToleranceResolver;
}
