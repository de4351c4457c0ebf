//! Retry strategies and backoff policies for the master's outward calls.
//!
//! Two callers share this crate: the catalog client, which retries
//! recoverable I/O errors a bounded number of times, and the upstream
//! watcher, which retries transport faults indefinitely with a capped,
//! jittered backoff. Both are expressed through [`BackoffConfig`]:
//! `max_attempts = 0` means "retry forever".
//!
//! # Example
//!
//! ```
//! use wheelhouse_retry::{BackoffConfig, BackoffStrategy, delay_for};
//! use std::time::Duration;
//!
//! let config = BackoffConfig {
//!     strategy: BackoffStrategy::Exponential,
//!     max_attempts: 5,
//!     base_delay: Duration::from_secs(1),
//!     max_delay: Duration::from_secs(30),
//!     jitter: 0.0,
//! };
//! assert_eq!(delay_for(&config, 3), Duration::from_secs(4));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Strategy for calculating the delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// No delay between retries.
    Immediate,
    /// Delay doubles each attempt (default).
    #[default]
    Exponential,
    /// Delay increases linearly each attempt.
    Linear,
    /// Same delay every attempt.
    Constant,
}

/// Configuration for a retry loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Strategy for calculating delay between retries.
    #[serde(default)]
    pub strategy: BackoffStrategy,
    /// Maximum number of attempts; 0 retries indefinitely.
    #[serde(default)]
    pub max_attempts: u32,
    /// Base delay for backoff calculations.
    #[serde(default = "default_base_delay")]
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Cap applied to the calculated delay.
    #[serde(default = "default_max_delay")]
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Jitter factor (0.0 = none, 0.5 = delay scaled by 0.5..1.5).
    #[serde(default)]
    pub jitter: f64,
}

fn default_base_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(120)
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::catalog()
    }
}

impl BackoffConfig {
    /// Policy for catalog calls: a handful of quick exponential retries.
    /// Catalog turns are expected to complete in milliseconds, so anything
    /// still failing after this is surfaced to the caller.
    pub fn catalog() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            jitter: 0.3,
        }
    }

    /// Policy for the upstream index: retry forever with a capped,
    /// jittered exponential backoff. The watcher must outlive any
    /// upstream outage.
    pub fn upstream() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            max_attempts: 0,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            jitter: 0.5,
        }
    }

    /// True when `attempt` (1-indexed) has exhausted this policy.
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts != 0 && attempt >= self.max_attempts
    }
}

/// Classification of a failure for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Transient; retry under the configured policy.
    #[default]
    Retryable,
    /// Permanent; surface to the caller immediately.
    Permanent,
}

/// Calculate the delay before the next attempt (`attempt` is 1-indexed).
pub fn delay_for(config: &BackoffConfig, attempt: u32) -> Duration {
    let raw = match config.strategy {
        BackoffStrategy::Immediate => Duration::ZERO,
        BackoffStrategy::Exponential => {
            let pow = attempt.saturating_sub(1).min(16);
            config.base_delay.saturating_mul(2_u32.saturating_pow(pow))
        }
        BackoffStrategy::Linear => config.base_delay.saturating_mul(attempt),
        BackoffStrategy::Constant => config.base_delay,
    };
    let capped = raw.min(config.max_delay);
    if config.jitter > 0.0 {
        apply_jitter(capped, config.jitter)
    } else {
        capped
    }
}

/// Scale a delay by a random factor in `(1 - jitter, 1 + jitter)`.
fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    use rand::Rng;

    let mut rng = rand::rng();
    let random: f64 = rng.random();
    let factor = 1.0 - jitter + random * 2.0 * jitter;
    let millis = (delay.as_millis() as f64 * factor).round() as u64;
    Duration::from_millis(millis)
}

/// Run an async fallible operation under a backoff policy.
///
/// The operation receives the attempt number (starting at 1) and classifies
/// its own failures: a [`ErrorClass::Permanent`] error, or exhaustion of a
/// bounded policy, ends the loop with the last error.
pub async fn retry<T, E, F, Fut>(config: &BackoffConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, (E, ErrorClass)>>,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err((err, ErrorClass::Permanent)) => return Err(err),
            Err((err, ErrorClass::Retryable)) => {
                if config.exhausted(attempt) {
                    return Err(err);
                }
                tokio::time::sleep(delay_for(config, attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(strategy: BackoffStrategy, base: u64, max: u64) -> BackoffConfig {
        BackoffConfig {
            strategy,
            max_attempts: 10,
            base_delay: Duration::from_secs(base),
            max_delay: Duration::from_secs(max),
            jitter: 0.0,
        }
    }

    #[test]
    fn immediate_is_zero() {
        let config = flat(BackoffStrategy::Immediate, 1, 60);
        assert_eq!(delay_for(&config, 1), Duration::ZERO);
        assert_eq!(delay_for(&config, 5), Duration::ZERO);
    }

    #[test]
    fn exponential_doubles_and_caps() {
        let config = flat(BackoffStrategy::Exponential, 1, 60);
        assert_eq!(delay_for(&config, 1), Duration::from_secs(1));
        assert_eq!(delay_for(&config, 2), Duration::from_secs(2));
        assert_eq!(delay_for(&config, 3), Duration::from_secs(4));
        assert_eq!(delay_for(&config, 10), Duration::from_secs(60));
    }

    #[test]
    fn linear_scales_with_attempt() {
        let config = flat(BackoffStrategy::Linear, 1, 10);
        assert_eq!(delay_for(&config, 1), Duration::from_secs(1));
        assert_eq!(delay_for(&config, 5), Duration::from_secs(5));
        assert_eq!(delay_for(&config, 15), Duration::from_secs(10));
    }

    #[test]
    fn constant_never_changes() {
        let config = flat(BackoffStrategy::Constant, 2, 10);
        assert_eq!(delay_for(&config, 1), Duration::from_secs(2));
        assert_eq!(delay_for(&config, 10), Duration::from_secs(2));
    }

    #[test]
    fn jitter_stays_within_band() {
        let config = BackoffConfig {
            strategy: BackoffStrategy::Constant,
            max_attempts: 10,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            jitter: 0.5,
        };
        for _ in 0..100 {
            let delay = delay_for(&config, 1);
            assert!(delay >= Duration::from_millis(5000));
            assert!(delay <= Duration::from_millis(15000));
        }
    }

    #[test]
    fn zero_max_attempts_never_exhausts() {
        let config = BackoffConfig::upstream();
        assert!(!config.exhausted(1));
        assert!(!config.exhausted(1_000_000));
    }

    #[test]
    fn bounded_policy_exhausts() {
        let config = BackoffConfig::catalog();
        assert!(!config.exhausted(4));
        assert!(config.exhausted(5));
    }

    #[tokio::test]
    async fn retry_returns_first_success() {
        let config = flat(BackoffStrategy::Immediate, 0, 0);
        let result: Result<&str, &str> = retry(&config, |attempt| async move {
            if attempt < 3 {
                Err(("transient", ErrorClass::Retryable))
            } else {
                Ok("success")
            }
        })
        .await;
        assert_eq!(result, Ok("success"));
    }

    #[tokio::test]
    async fn retry_stops_on_permanent_error() {
        let config = flat(BackoffStrategy::Immediate, 0, 0);
        let mut attempts = 0;
        let result: Result<(), &str> = retry(&config, |_| {
            attempts += 1;
            async { Err(("constraint violation", ErrorClass::Permanent)) }
        })
        .await;
        assert_eq!(result, Err("constraint violation"));
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let mut config = flat(BackoffStrategy::Immediate, 0, 0);
        config.max_attempts = 3;
        let mut attempts = 0;
        let result: Result<(), &str> = retry(&config, |_| {
            attempts += 1;
            async { Err(("down", ErrorClass::Retryable)) }
        })
        .await;
        assert_eq!(result, Err("down"));
        assert_eq!(attempts, 3);
    }
}
