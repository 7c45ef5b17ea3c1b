//! Runner configuration.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default worker pool size (and scratch directory count).
const DEFAULT_CONCURRENCY: usize = 4;

/// Default interval between scheduler ticks.
const DEFAULT_INTERVAL_SECS: u64 = 10;

/// Default duration after which a still-running item is reported by the
/// watchdog.
const DEFAULT_WATCHDOG_SECS: u64 = 30 * 60;

/// Invalid runner configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("scheduling interval must be nonzero")]
    ZeroInterval,
}

/// Configuration for the [`Runner`](super::Runner).
///
/// Constructed fully before use and validated when the runner is built;
/// the runner never observes a partially configured value.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Worker pool size. Also the number of scratch directories, since
    /// each concurrently executing item owns one.
    pub concurrency: usize,

    /// Directory under which per-worker scratch directories are created.
    pub scratch_root: PathBuf,

    /// Interval between scheduler ticks (periodic item collection).
    pub interval: Duration,

    /// How long an item may stay active before the watchdog reports it.
    pub watchdog_timeout: Duration,
}

impl RunnerConfig {
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        RunnerConfig {
            concurrency: DEFAULT_CONCURRENCY,
            scratch_root: scratch_root.into(),
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            watchdog_timeout: Duration::from_secs(DEFAULT_WATCHDOG_SECS),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(())
    }
}
