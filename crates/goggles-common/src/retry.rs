//! Backoff and deadline helpers.
//!
//! Asset population makes a single attempt unless a caller opts in, so
//! [`RetryConfig::none`] is what most call sites hand in.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::GogglesError;

/// How many times to try, and how long to wait between tries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total tries including the first (1 = never retry).
    pub max_attempts: u32,
    /// Wait before the second try.
    pub initial_delay: Duration,
    /// Upper bound for any single wait.
    pub max_delay: Duration,
    /// Growth factor applied per further try.
    pub backoff_multiplier: f64,
    /// Stretch each wait by up to a quarter.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// One try, no waiting.
    pub fn none() -> Self {
        Self::attempts(1)
    }

    /// Default backoff with `max_attempts` tries. Zero counts as one.
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Wait before try number `attempt` (the first try is 1).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let Some(retries) = attempt.checked_sub(2) else {
            return Duration::ZERO;
        };

        let factor = self.backoff_multiplier.max(1.0).powi(retries.min(32) as i32);
        let wait = self
            .initial_delay
            .mul_f64(factor)
            .min(self.max_delay);

        if self.jitter {
            wait + wait.mul_f64(clock_fraction() / 4.0)
        } else {
            wait
        }
    }
}

/// A value in `[0, 1)` derived from the sub-second clock.
fn clock_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    f64::from(nanos) / 1_000_000_000.0
}

/// Run `operation` until it succeeds or `config` runs out of tries.
///
/// The last error is returned.
pub async fn retry_with_backoff<T, E, F, Fut>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_when(config, |_| true, operation).await
}

/// Like [`retry_with_backoff`], but gives up early on errors `transient`
/// rejects.
pub async fn retry_when<T, E, P, F, Fut>(
    config: &RetryConfig,
    transient: P,
    mut operation: F,
) -> Result<T, E>
where
    P: Fn(&E) -> bool,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Succeeded after retrying");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if attempt >= max_attempts || !transient(&error) {
            return Err(error);
        }

        attempt += 1;
        let delay = config.delay_for_attempt(attempt);
        warn!(attempt, max_attempts, ?delay, error = %error, "Attempt failed, retrying");
        tokio::time::sleep(delay).await;
    }
}

/// Fail with [`GogglesError::Timeout`] if `future` does not finish within `limit`.
pub async fn with_timeout<T, Fut>(limit: Duration, future: Fut) -> Result<T, GogglesError>
where
    Fut: Future<Output = T>,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| GogglesError::Timeout(limit))
}
