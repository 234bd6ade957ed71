//! Per-channel merge tolerance resolution.
//!
//! The tolerance is the maximum temporal gap between two same-key issues'
//! boundaries that still permits merging them into one interval. Channels
//! may carry individual tolerances; unresolved channels fall back to the
//! default rather than failing the batch.

use std::collections::HashMap;
use std::time::Duration;

/// Default merge tolerance applied when a channel has no override.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_millis(500);

/// Resolves the merge tolerance for a channel.
///
/// A flat table of per-channel overrides over a default. The table is
/// loaded once at startup from the processing configuration; resolution is
/// a plain lookup with fallback.
#[derive(Debug, Clone)]
pub struct ToleranceResolver {
    default: Duration,
    by_channel: HashMap<String, Duration>,
}

impl Default for ToleranceResolver {
    fn default() -> Self {
        Self::with_default(DEFAULT_TOLERANCE)
    }
}

impl ToleranceResolver {
    /// Creates a resolver with the given default and no overrides.
    #[must_use]
    pub fn with_default(default: Duration) -> Self {
        Self {
            default,
            by_channel: HashMap::new(),
        }
    }

    /// Creates a resolver with a default and per-channel overrides.
    #[must_use]
    pub fn new(default: Duration, by_channel: HashMap<String, Duration>) -> Self {
        Self {
            default,
            by_channel,
        }
    }

    /// Adds or replaces a per-channel override.
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>, tolerance: Duration) -> Self {
        self.by_channel.insert(channel.into(), tolerance);
        self
    }

    /// Resolves the tolerance for `channel`, falling back to the default.
    #[must_use]
    pub fn resolve(&self, channel: &str) -> Duration {
        self.by_channel.get(channel).copied().unwrap_or(self.default)
    }

    /// Returns the default tolerance.
    #[must_use]
    pub const fn default_tolerance(&self) -> Duration {
        self.default
    }
}
