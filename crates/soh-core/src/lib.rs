//! # soh-core
//!
//! Core domain types for the soh station-of-health pipeline.
//!
//! This crate provides the foundational types shared across the soh
//! components:
//!
//! - **Issue Types**: Acquired channel environment issue records, the
//!   interval-valued signals describing per-channel acquisition health
//! - **Update Sets**: Insert/delete batches applied to the persistent store
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Structured logging initialization and span helpers
//!
//! ## Crate Boundary
//!
//! `soh-core` owns the shared domain vocabulary. Processing logic (merging,
//! neighbor resolution, stream consumption) lives in `soh-merge`; this crate
//! performs no I/O.
//!
//! ## Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use soh_core::{BooleanIssue, IssueType};
//!
//! let issue = BooleanIssue::new(
//!     "ASAR.AS01.SHZ",
//!     IssueType::ClockLocked,
//!     Utc.timestamp_opt(0, 0).unwrap(),
//!     Utc.timestamp_opt(2, 0).unwrap(),
//!     true,
//! )
//! .expect("valid interval");
//! assert_eq!(issue.key().channel, "ASAR.AS01.SHZ");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod issue;
pub mod observability;
pub mod updates;

pub use error::{Error, Result};
pub use issue::{AnalogIssue, BooleanIssue, Issue, IssueKey, IssueType};
pub use updates::IssueUpdates;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use soh_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::issue::{AnalogIssue, BooleanIssue, Issue, IssueKey, IssueType};
    pub use crate::observability::{init_logging, LogFormat};
    pub use crate::updates::IssueUpdates;
}
