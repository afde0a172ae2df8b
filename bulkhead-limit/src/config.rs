use std::num::NonZeroUsize;
use std::time::Duration;

/// Errors raised while registering or configuring a bulkhead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A bulkhead with this name is already registered.
    #[error("bulkhead `{0}` is already registered")]
    DuplicateName(String),

    /// A bulkhead must admit at least one concurrent call.
    #[error("max_concurrent_calls must be at least 1")]
    ZeroCapacity,
}

/// Immutable admission settings for a single [`crate::Bulkhead`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkheadConfig {
    max_concurrent_calls: NonZeroUsize,
    max_wait_duration: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: Self::DEFAULT_MAX_CONCURRENT_CALLS,
            max_wait_duration: Duration::ZERO,
        }
    }
}

impl BulkheadConfig {
    /// Capacity used when none is specified.
    pub const DEFAULT_MAX_CONCURRENT_CALLS: NonZeroUsize = NonZeroUsize::new(25).unwrap();

    /// A config admitting `max_concurrent_calls` callers with no queueing.
    pub fn new(max_concurrent_calls: NonZeroUsize) -> Self {
        Self {
            max_concurrent_calls,
            max_wait_duration: Duration::ZERO,
        }
    }

    /// Validate a raw capacity, as read from configuration.
    pub fn try_new(
        max_concurrent_calls: usize,
        max_wait_duration: Duration,
    ) -> Result<Self, ConfigError> {
        let max_concurrent_calls =
            NonZeroUsize::new(max_concurrent_calls).ok_or(ConfigError::ZeroCapacity)?;
        Ok(Self::new(max_concurrent_calls).with_max_wait(max_wait_duration))
    }

    /// Set how long a caller may queue for a permit before being rejected.
    ///
    /// `Duration::ZERO` disables queueing entirely.
    pub fn with_max_wait(mut self, max_wait_duration: Duration) -> Self {
        self.max_wait_duration = max_wait_duration;
        self
    }

    pub fn max_concurrent_calls(&self) -> NonZeroUsize {
        self.max_concurrent_calls
    }

    pub fn max_wait_duration(&self) -> Duration {
        self.max_wait_duration
    }
}
