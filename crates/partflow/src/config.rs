//! Engine configuration.

use std::time::Duration;

/// Exponential backoff used when committing a batch fails transiently.
///
/// The delay before retry N is: `min(base_delay * 2^(N-1), max_delay)`.
/// Commits are retried until they succeed or fail permanently, so there is
/// no attempt limit.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use partflow::RetryPolicy;
///
/// let policy = RetryPolicy {
///     base_delay: Duration::from_millis(10),
///     max_delay: Duration::from_millis(50),
/// };
/// assert_eq!(policy.backoff_duration(3), Duration::from_millis(40));
/// assert_eq!(policy.backoff_duration(9), Duration::from_millis(50));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry. Default: 10ms.
    pub base_delay: Duration,

    /// Upper bound for the delay between retries. Default: 5 seconds.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff after the given failed attempt (1-based).
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(multiplier);
        delay.min(self.max_delay)
    }
}

/// Configuration of one partition's stream processor and its scheduled tasks.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use partflow::EngineConfig;
///
/// let config = EngineConfig {
///     redistribution_interval: Duration::from_millis(50),
///     redistribution_max_backoff_cycles: 4,
///     snapshot_period: 10,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fallback poll interval for new log records.
    ///
    /// The processor is normally woken by the log's commit notification.
    /// Default: 100ms.
    pub poll_interval: Duration,

    /// Maximum number of records read from the log at once. Default: 128.
    pub read_batch_size: usize,

    /// Backoff for transient commit failures.
    pub commit_retry: RetryPolicy,

    /// Number of processed commands between two snapshots.
    ///
    /// `0` disables periodic snapshots; a snapshot is still taken on close.
    /// Default: 1000.
    pub snapshot_period: u64,

    /// How often pending deployment distributions are retried.
    ///
    /// Default: 10 seconds.
    pub redistribution_interval: Duration,

    /// Upper bound, in redistribution cycles, for the per-partition backoff
    /// of a pending distribution. `1` retries every pending partition on
    /// every cycle. Default: 1.
    pub redistribution_max_backoff_cycles: u32,

    /// How often due timers are checked. Default: 1 second.
    pub timer_check_interval: Duration,

    /// How often expired messages are checked. Default: 60 seconds.
    pub message_ttl_check_interval: Duration,

    /// How long a gateway waits for a response. Default: 15 seconds.
    pub request_timeout: Duration,

    /// Maximum time to wait for a stream processor to close. Default: 30 seconds.
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            read_batch_size: 128,
            commit_retry: RetryPolicy::default(),
            snapshot_period: 1000,
            redistribution_interval: Duration::from_secs(10),
            redistribution_max_backoff_cycles: 1,
            timer_check_interval: Duration::from_secs(1),
            message_ttl_check_interval: Duration::from_secs(60),
            request_timeout: Duration::from_secs(15),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}
