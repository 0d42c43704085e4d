//! Generic retry executor with exponential backoff.
//!
//! Used by the offline queue when draining items and by one-off service
//! calls. The executor does not interpret error types; classification of
//! retryable vs terminal failures is the caller's responsibility.

use color_eyre::Result;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry parameters.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  /// Total attempt ceiling, including the first try.
  pub max_attempts: u32,
  /// Delay before the second attempt.
  pub initial_delay: Duration,
  /// Multiplier applied to the delay for each subsequent attempt.
  pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      initial_delay: Duration::from_secs(1),
      backoff_multiplier: 2.0,
    }
  }
}

impl RetryPolicy {
  /// Delay before attempt `n` (1-based). Attempt 1 runs immediately;
  /// attempt n (n >= 2) waits `initial_delay * multiplier^(n-2)`.
  pub fn delay_before(&self, attempt: u32) -> Duration {
    if attempt <= 1 {
      return Duration::ZERO;
    }
    let factor = self.backoff_multiplier.powi(attempt as i32 - 2);
    self.initial_delay.mul_f64(factor)
  }
}

/// Run `op` up to `policy.max_attempts` times with exponential backoff
/// between attempts. Returns the last error once attempts are exhausted.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T>>,
{
  let attempts = policy.max_attempts.max(1);
  let mut last_err = None;

  for attempt in 1..=attempts {
    let delay = policy.delay_before(attempt);
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }

    match op().await {
      Ok(value) => return Ok(value),
      Err(e) => {
        debug!("retry: attempt {}/{} failed: {}", attempt, attempts, e);
        last_err = Some(e);
      }
    }
  }

  // attempts >= 1, so last_err is set
  Err(last_err.unwrap_or_else(|| color_eyre::eyre::eyre!("retry: no attempts made")))
}
