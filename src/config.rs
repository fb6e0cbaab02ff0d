//! Engine configuration, loaded from an optional JSON file.
//!
//! Every field has a default so a partial file (or none at all) is valid.

use crate::domain::validation::ValidationPolicy;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub validation: ValidationPolicy,
    pub retry: RetryPolicy,
    pub concurrency: ConcurrencyPolicy,
}

impl EngineConfig {
    /// Reads the config file if a path is given, otherwise returns defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read(path)?;
                Ok(serde_json::from_slice(&raw)?)
            }
            None => Ok(Self::default()),
        }
    }
}

/// Retry behaviour of the item executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub call_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            call_timeout_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = Duration::from_millis(self.base_delay_ms)
            .mul_f64(self.backoff_multiplier.max(1.0).powi(exponent));
        delay.min(Duration::from_millis(self.max_delay_ms))
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyPolicy {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for ConcurrencyPolicy {
    fn default() -> Self {
        Self {
            default_limit: 5,
            max_limit: 50,
        }
    }
}

impl ConcurrencyPolicy {
    pub fn accepts(&self, limit: u32) -> bool {
        (1..=self.max_limit).contains(&limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            base_delay_ms: 100,
            max_delay_ms: 350,
            backoff_multiplier: 2.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(350));
        assert_eq!(policy.delay_after(30), Duration::from_millis(350));
    }

    #[test]
    fn test_partial_config_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"retry": {{"max_attempts": 5}}, "concurrency": {{"max_limit": 8}}}}"#)
            .unwrap();

        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 200);
        assert_eq!(config.concurrency.max_limit, 8);
        assert_eq!(config.concurrency.default_limit, 5);
        assert_eq!(config.validation, ValidationPolicy::default());
    }

    #[test]
    fn test_concurrency_bounds() {
        let policy = ConcurrencyPolicy::default();
        assert!(!policy.accepts(0));
        assert!(policy.accepts(1));
        assert!(policy.accepts(50));
        assert!(!policy.accepts(51));
    }
}
