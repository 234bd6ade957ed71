//! Error types and result aliases for soh.
//!
//! This module defines the shared error types used across the soh
//! components. Errors are structured for programmatic handling and include
//! context for debugging.

/// The result type used throughout soh-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in soh domain operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An interval with a start time after its end time was constructed.
    #[error("invalid interval for channel {channel}: start {start} is after end {end}")]
    InvalidInterval {
        /// The channel the record belongs to.
        channel: String,
        /// The offending start time (RFC 3339).
        start: String,
        /// The offending end time (RFC 3339).
        end: String,
    },
}
