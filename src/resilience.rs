//! Resilience utilities: retry policy and exponential backoff.
//!
//! [`RetryConfig`] drives both broker reconnect loops:
//!
//! - the publisher reconnects inline on the creation path, so it uses the
//!   short [`RetryConfig::publisher()`] preset to keep that path bounded;
//! - the subscriber runs in the background and never gives up
//!   ([`RetryConfig::daemon()`], with fields overridden from
//!   `ReconnectConfig`).
//!
//! # Example
//!
//! ```rust
//! use record_replication::resilience::RetryConfig;
//! use std::time::Duration;
//!
//! let retry = RetryConfig::publisher();
//! assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(50));
//! assert!(retry.is_exhausted(3));
//! ```

use std::time::Duration;

/// Configuration for connection retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts.
    /// Set to `usize::MAX` for infinite retries (daemon mode).
    pub max_attempts: usize,

    /// Initial delay before first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (ceiling for exponential backoff).
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 = double delay each retry).
    pub backoff_factor: f64,

    /// Timeout for each individual connection attempt.
    pub connection_timeout: Duration,
}

impl RetryConfig {
    /// Bounded reconnect for the publish path.
    ///
    /// A caller is waiting on the creation flow, so the publisher gets three
    /// quick attempts (worst case roughly 3 × connection timeout + 150ms of
    /// sleeps) before the envelope is dropped.
    ///
    /// ```text
    /// Attempt  Delay before next
    /// -------  -----------------
    /// 1        50ms
    /// 2        100ms
    /// 3        (give up)
    /// ```
    pub fn publisher() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            connection_timeout: Duration::from_secs(2),
        }
    }

    /// Infinite retry for the long-running subscriber.
    ///
    /// Base of every subscriber reconnect policy; `ReconnectConfig` overrides
    /// its fields from configuration.
    ///
    /// ```text
    /// Attempt  Delay
    /// -------  -----
    /// 1        100ms
    /// 2        200ms
    /// 3        400ms
    /// ...
    /// 9        25.6s
    /// 10+      30s (cap, retry forever)
    /// ```
    pub fn daemon() -> Self {
        Self {
            max_attempts: usize::MAX,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            connection_timeout: Duration::from_secs(5),
        }
    }

    /// Fast-fail retry for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            connection_timeout: Duration::from_millis(500),
        }
    }

    /// Override the per-attempt connection timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let exponent = (attempt - 1).min(i32::MAX as usize) as i32;
        let multiplier = self.backoff_factor.powi(exponent);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }

        std::cmp::min(Duration::from_secs_f64(delay_secs), self.max_delay)
    }

    /// Whether `attempts` failed attempts use up the budget.
    pub fn is_exhausted(&self, attempts: usize) -> bool {
        attempts >= self.max_attempts
    }
}
