use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Tuning knobs for the sync engine.
///
/// Every field has a default matching the engine's contract, so an empty
/// (or absent) config file is valid.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub queue: QueueConfig,
  pub retry: RetryConfig,
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  /// Per-item attempt ceiling before permanent failure.
  pub max_attempts: u32,
  /// Total queue size cap. Pending work is never trimmed to enforce it.
  pub capacity: usize,
  /// How long completed items are kept before pruning.
  pub retention_hours: i64,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      capacity: 500,
      retention_hours: 24,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub initial_delay_ms: u64,
  pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      initial_delay_ms: 1000,
      backoff_multiplier: 2.0,
    }
  }
}

impl RetryConfig {
  /// Build a retry policy with the given attempt ceiling.
  pub fn policy(&self, max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
      max_attempts,
      initial_delay: Duration::from_millis(self.initial_delay_ms),
      backoff_multiplier: self.backoff_multiplier,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      default_ttl_secs: 300,
    }
  }
}

impl CacheConfig {
  pub fn default_ttl(&self) -> Duration {
    Duration::from_secs(self.default_ttl_secs)
  }
}

impl SyncConfig {
  /// Load configuration from a YAML file.
  pub fn load(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: SyncConfig = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = SyncConfig::default();
    assert_eq!(config.queue.max_attempts, 5);
    assert_eq!(config.queue.capacity, 500);
    assert_eq!(config.queue.retention_hours, 24);
    assert_eq!(config.retry.initial_delay_ms, 1000);
    assert_eq!(config.cache.default_ttl_secs, 300);
  }

  #[test]
  fn test_partial_yaml_fills_defaults() {
    let config: SyncConfig = serde_yaml::from_str(
      r#"
queue:
  max_attempts: 3
retry:
  initial_delay_ms: 50
"#,
    )
    .unwrap();

    assert_eq!(config.queue.max_attempts, 3);
    assert_eq!(config.queue.capacity, 500);
    assert_eq!(config.retry.initial_delay_ms, 50);
    assert_eq!(config.retry.backoff_multiplier, 2.0);
  }

  #[test]
  fn test_policy_from_retry_config() {
    let retry = RetryConfig {
      initial_delay_ms: 250,
      backoff_multiplier: 3.0,
    };
    let policy = retry.policy(4);
    assert_eq!(policy.max_attempts, 4);
    assert_eq!(policy.initial_delay, Duration::from_millis(250));
    assert_eq!(policy.delay_before(3), Duration::from_millis(750));
  }
}
