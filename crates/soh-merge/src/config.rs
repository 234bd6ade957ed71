//! Runtime configuration for the merge pipeline.
//!
//! These settings make the pipeline's buffering, pruning, and retry
//! behavior explicit and reproducible for operators.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::tolerance::ToleranceResolver;

const ENV_BUFFER_SIZE: &str = "SOH_MERGE_BUFFER_SIZE";
const ENV_BUFFER_TIMEOUT_MS: &str = "SOH_MERGE_BUFFER_TIMEOUT_MS";
const ENV_CACHE_PRUNE_INTERVAL_SECS: &str = "SOH_MERGE_CACHE_PRUNE_INTERVAL_SECS";
const ENV_CACHE_MAX_AGE_SECS: &str = "SOH_MERGE_CACHE_MAX_AGE_SECS";
const ENV_RESUBSCRIBE_BACKOFF_MS: &str = "SOH_MERGE_RESUBSCRIBE_BACKOFF_MS";
const ENV_TOLERANCE_MS: &str = "SOH_MERGE_TOLERANCE_MS";

const DEFAULT_BUFFER_SIZE: u64 = 50;
const DEFAULT_BUFFER_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_CACHE_PRUNE_INTERVAL_SECS: u64 = 600;
const DEFAULT_CACHE_MAX_AGE_SECS: u64 = 600;
const DEFAULT_RESUBSCRIBE_BACKOFF_MS: u64 = 500;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Maximum records buffered before a batch is flushed.
    pub buffer_size: usize,
    /// Maximum time a non-empty buffer waits before flushing.
    pub buffer_timeout: Duration,
    /// Period of the per-partition cache pruning task.
    pub cache_prune_interval: Duration,
    /// Age beyond which cached issues are pruned (the newest entry per key
    /// is always retained).
    pub cache_max_age: Duration,
    /// Delay before a pipeline resubscribes after a storage failure.
    pub resubscribe_backoff: Duration,
    /// Per-channel merge tolerances.
    pub tolerance: ToleranceResolver,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            buffer_size: usize::try_from(DEFAULT_BUFFER_SIZE).unwrap_or(50),
            buffer_timeout: Duration::from_millis(DEFAULT_BUFFER_TIMEOUT_MS),
            cache_prune_interval: Duration::from_secs(DEFAULT_CACHE_PRUNE_INTERVAL_SECS),
            cache_max_age: Duration::from_secs(DEFAULT_CACHE_MAX_AGE_SECS),
            resubscribe_backoff: Duration::from_millis(DEFAULT_RESUBSCRIBE_BACKOFF_MS),
            tolerance: ToleranceResolver::default(),
        }
    }
}

impl MergeConfig {
    /// Loads configuration from the process environment.
    ///
    /// Missing keys fall back to defaults. Per-channel tolerance overrides
    /// are attached programmatically via [`MergeConfig::with_tolerance`].
    ///
    /// # Errors
    ///
    /// Returns a configuration error when an environment value is not a
    /// positive integer.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads configuration with a custom environment source.
    ///
    /// This entry point is test-friendly and accepts a key lookup function.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when an environment value is not a
    /// positive integer.
    pub fn from_env_with<F>(get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let buffer_size = parse_positive_u64_env(&get_env, ENV_BUFFER_SIZE, DEFAULT_BUFFER_SIZE)?;
        let buffer_timeout_ms = parse_positive_u64_env(
            &get_env,
            ENV_BUFFER_TIMEOUT_MS,
            DEFAULT_BUFFER_TIMEOUT_MS,
        )?;
        let prune_interval_secs = parse_positive_u64_env(
            &get_env,
            ENV_CACHE_PRUNE_INTERVAL_SECS,
            DEFAULT_CACHE_PRUNE_INTERVAL_SECS,
        )?;
        let max_age_secs =
            parse_positive_u64_env(&get_env, ENV_CACHE_MAX_AGE_SECS, DEFAULT_CACHE_MAX_AGE_SECS)?;
        let backoff_ms = parse_positive_u64_env(
            &get_env,
            ENV_RESUBSCRIBE_BACKOFF_MS,
            DEFAULT_RESUBSCRIBE_BACKOFF_MS,
        )?;
        let tolerance_ms = parse_positive_u64_env(
            &get_env,
            ENV_TOLERANCE_MS,
            u64::try_from(crate::tolerance::DEFAULT_TOLERANCE.as_millis()).unwrap_or(500),
        )?;

        Ok(Self {
            buffer_size: usize::try_from(buffer_size).map_err(|_| {
                Error::configuration(format!(
                    "{ENV_BUFFER_SIZE} value {buffer_size} exceeds supported range"
                ))
            })?,
            buffer_timeout: Duration::from_millis(buffer_timeout_ms),
            cache_prune_interval: Duration::from_secs(prune_interval_secs),
            cache_max_age: Duration::from_secs(max_age_secs),
            resubscribe_backoff: Duration::from_millis(backoff_ms),
            tolerance: ToleranceResolver::with_default(Duration::from_millis(tolerance_ms)),
        })
    }

    /// Replaces the tolerance resolver, keeping everything else.
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: ToleranceResolver) -> Self {
        self.tolerance = tolerance;
        self
    }
}

fn parse_positive_u64_env<F>(get_env: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(default);
    };

    let parsed = raw.parse::<u64>().map_err(|_| {
        Error::configuration(format!("{key} must be a positive integer, got '{raw}'"))
    })?;
    if parsed == 0 {
        return Err(Error::configuration(format!(
            "{key} must be greater than zero"
        )));
    }
    Ok(parsed)
}
