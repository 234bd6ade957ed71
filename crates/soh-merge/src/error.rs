//! Error types for the merge domain.

/// The result type used throughout soh-merge.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in merge and pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A stream subscription or commit operation failed.
    #[error("stream error: {message}")]
    Stream {
        /// Description of the stream failure.
        message: String,
    },

    /// A record payload could not be decoded.
    #[error("decode error at partition {partition} offset {offset}: {message}")]
    Decode {
        /// The partition the record was read from.
        partition: i32,
        /// The record's offset within the partition.
        offset: i64,
        /// Description of the decode failure.
        message: String,
    },

    /// An invalid configuration value was provided.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration failure.
        message: String,
    },

    /// An error from soh-core.
    #[error("core error: {0}")]
    Core(#[from] soh_core::Error),
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new stream error.
    #[must_use]
    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn storage_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset");
        let err = Error::storage_with_source("sync failed", source);
        assert!(err.to_string().contains("storage error"));
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn decode_error_carries_position() {
        let err = Error::Decode {
            partition: 3,
            offset: 42,
            message: "expected value".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("partition 3"));
        assert!(msg.contains("offset 42"));
    }
}
