//! Configuration for batch execution.
//!
//! Controls concurrency, deadlines, failure handling and batch size limits.
//! Request-level options (`max_concurrent`, `stop_on_error`) override the
//! values configured here for a single batch.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default upper bound on the number of operations in one batch.
pub const DEFAULT_MAX_OPERATIONS: usize = 100;

/// Configuration for the batch executor.
///
/// # Examples
///
/// ```ignore
/// use batch_toolkit::batch::BatchConfig;
/// use std::time::Duration;
///
/// let config = BatchConfig::new()
///     .with_max_concurrent(5)
///     .with_batch_timeout(Duration::from_secs(30))
///     .with_stop_on_error(true);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum number of capability invocations running at the same time.
    ///
    /// If `None`, every operation of a wave runs concurrently. In `parallel`
    /// mode the limit applies to the whole batch.
    pub max_concurrent: Option<usize>,

    /// Deadline for the whole batch, measured from the start of execution.
    ///
    /// Operations still running when it elapses are recorded as timed out.
    /// Operations not yet started are recorded as timed out without dispatch.
    pub batch_timeout: Option<Duration>,

    /// Deadline applied to each wave separately.
    pub wave_timeout: Option<Duration>,

    /// Stop dispatching after the first failure.
    ///
    /// Operations that have not started yet are recorded as skipped.
    ///
    /// **Default:** `false`
    #[serde(default)]
    pub stop_on_error: bool,

    /// Largest accepted batch.
    ///
    /// **Default:** 100
    #[serde(default = "default_max_operations")]
    pub max_operations: usize,
}

fn default_max_operations() -> usize {
    DEFAULT_MAX_OPERATIONS
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchConfig {
    /// Creates a new configuration with default values.
    ///
    /// Default values:
    /// - `max_concurrent`: `None` (unlimited)
    /// - `batch_timeout`: `None` (no timeout)
    /// - `wave_timeout`: `None` (no timeout)
    /// - `stop_on_error`: `false`
    /// - `max_operations`: `100`
    pub fn new() -> Self {
        Self {
            max_concurrent: None,
            batch_timeout: None,
            wave_timeout: None,
            stop_on_error: false,
            max_operations: DEFAULT_MAX_OPERATIONS,
        }
    }

    /// Sets the maximum number of concurrent invocations.
    ///
    /// A value of 0 is treated as 1.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = Some(max.max(1));
        self
    }

    /// Removes the concurrency limit.
    pub fn with_unlimited_concurrency(mut self) -> Self {
        self.max_concurrent = None;
        self
    }

    /// Sets the deadline for the whole batch.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let config = BatchConfig::new().with_batch_timeout(Duration::from_secs(30));
    /// ```
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = Some(timeout);
        self
    }

    /// Sets the deadline applied to each wave.
    pub fn with_wave_timeout(mut self, timeout: Duration) -> Self {
        self.wave_timeout = Some(timeout);
        self
    }

    /// Removes both the batch and the wave timeout.
    pub fn with_no_timeout(mut self) -> Self {
        self.batch_timeout = None;
        self.wave_timeout = None;
        self
    }

    pub fn with_stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    pub fn with_max_operations(mut self, max: usize) -> Self {
        self.max_operations = max;
        self
    }
}
