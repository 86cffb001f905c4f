//! Generation configuration.
//!
//! Tunables shared by the dispatcher and the workers: repair and retry
//! budgets, the concurrency ceiling, and output locations. Values come from
//! defaults, then `MMFORGE_*` environment variables, then CLI overrides.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::llm::completion::{
    RetryPolicy, DEFAULT_AUTH_BACKOFF, DEFAULT_MAX_ATTEMPTS, DEFAULT_RATE_LIMIT_BACKOFF,
};
use crate::pipeline::repair::DEFAULT_MAX_REPAIRS;

/// Default ceiling on simultaneously running worker processes.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 12;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for generation runs.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Repair calls allowed per item before it is skipped.
    pub max_repair_attempts: usize,
    /// Retry policy of every completion-service call.
    pub retry: RetryPolicy,
    /// Optional sampling temperature for generation calls.
    pub temperature: Option<f64>,
    pub max_concurrent_jobs: usize,
    /// Directory for per-shard logs and the launch-command side file.
    pub logs_dir: PathBuf,
    /// Subdirectory of the output folder receiving shard manifests.
    pub output_subdir: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_repair_attempts: DEFAULT_MAX_REPAIRS,
            retry: RetryPolicy::default(),
            temperature: None,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            logs_dir: PathBuf::from("logs"),
            output_subdir: "generated_data".to_string(),
        }
    }
}

impl GenerationConfig {
    /// Load configuration from `MMFORGE_*` environment variables on top of defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("MMFORGE_MAX_REPAIR_ATTEMPTS") {
            config.max_repair_attempts = parse_env_value(&val, "MMFORGE_MAX_REPAIR_ATTEMPTS")?;
        }

        if let Ok(val) = std::env::var("MMFORGE_MAX_RETRIES") {
            config.retry.max_attempts = parse_env_value(&val, "MMFORGE_MAX_RETRIES")?;
        }

        if let Ok(val) = std::env::var("MMFORGE_RATE_LIMIT_BACKOFF_SECS") {
            let secs: u64 = parse_env_value(&val, "MMFORGE_RATE_LIMIT_BACKOFF_SECS")?;
            config.retry.rate_limit_backoff = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("MMFORGE_AUTH_BACKOFF_SECS") {
            let secs: u64 = parse_env_value(&val, "MMFORGE_AUTH_BACKOFF_SECS")?;
            config.retry.auth_backoff = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("MMFORGE_TEMPERATURE") {
            config.temperature = Some(parse_env_value(&val, "MMFORGE_TEMPERATURE")?);
        }

        if let Ok(val) = std::env::var("MMFORGE_MAX_CONCURRENT_JOBS") {
            config.max_concurrent_jobs = parse_env_value(&val, "MMFORGE_MAX_CONCURRENT_JOBS")?;
        }

        if let Ok(val) = std::env::var("MMFORGE_LOGS_DIR") {
            config.logs_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("MMFORGE_OUTPUT_SUBDIR") {
            config.output_subdir = val;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max retries must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_jobs must be greater than 0".to_string(),
            ));
        }

        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::ValidationFailed(format!(
                    "temperature must be within 0.0..=2.0, got {}",
                    t
                )));
            }
        }

        if self.output_subdir.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "output_subdir cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_max_repair_attempts(mut self, attempts: usize) -> Self {
        self.max_repair_attempts = attempts;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.max_concurrent_jobs = jobs;
        self
    }

    pub fn with_logs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.logs_dir = dir.into();
        self
    }
}

/// Parse an environment variable value into the given type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
