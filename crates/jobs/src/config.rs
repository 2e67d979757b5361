//! Engine configuration.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::types::RetryPolicy;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{var}: {reason}")]
    OutOfRange { var: &'static str, reason: String },
}

pub const ENV_MAX_RETRIES: &str = "PHOTOHUB_MAX_RETRIES";
pub const ENV_UNIT_FAILURE_TOLERANCE: &str = "PHOTOHUB_UNIT_FAILURE_TOLERANCE";
pub const ENV_MAX_CONCURRENT: &str = "PHOTOHUB_MAX_CONCURRENT";
pub const ENV_ETA_WINDOW: &str = "PHOTOHUB_ETA_WINDOW";
pub const ENV_ETA_SMOOTHING: &str = "PHOTOHUB_ETA_SMOOTHING";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "PHOTOHUB_RETRY_BASE_DELAY_MS";
pub const ENV_RETRY_MAX_DELAY_MS: &str = "PHOTOHUB_RETRY_MAX_DELAY_MS";

/// Job engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEngineConfig {
    /// Retry limits and backoff
    pub retry: RetryPolicy,
    /// Unit failures a job absorbs before it fails
    pub unit_failure_tolerance: usize,
    /// Maximum jobs holding a worker slot at once
    pub max_concurrent: usize,
    /// Number of recent unit durations the ETA averages over
    pub eta_window: usize,
    /// EMA smoothing factor in (0, 1]
    pub eta_smoothing: f64,
    /// Prefix for worker thread names
    pub name: String,
}

impl Default for JobEngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            unit_failure_tolerance: 3,
            max_concurrent: 4,
            eta_window: 20,
            eta_smoothing: 0.3,
            name: "photohub-job".to_string(),
        }
    }
}

impl JobEngineConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_unit_failure_tolerance(mut self, tolerance: usize) -> Self {
        self.unit_failure_tolerance = tolerance;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_eta(mut self, window: usize, smoothing: f64) -> Self {
        self.eta_window = window.max(1);
        self.eta_smoothing = smoothing;
        self
    }

    /// Defaults overridden by `PHOTOHUB_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse::<u32, _>(&lookup, ENV_MAX_RETRIES)? {
            config.retry.max_retries = v;
        }
        if let Some(v) = parse::<usize, _>(&lookup, ENV_UNIT_FAILURE_TOLERANCE)? {
            config.unit_failure_tolerance = v;
        }
        if let Some(v) = parse::<usize, _>(&lookup, ENV_MAX_CONCURRENT)? {
            if v == 0 {
                return Err(ConfigError::OutOfRange {
                    var: ENV_MAX_CONCURRENT,
                    reason: "must be at least 1".into(),
                });
            }
            config.max_concurrent = v;
        }
        if let Some(v) = parse::<usize, _>(&lookup, ENV_ETA_WINDOW)? {
            if v == 0 {
                return Err(ConfigError::OutOfRange {
                    var: ENV_ETA_WINDOW,
                    reason: "must be at least 1".into(),
                });
            }
            config.eta_window = v;
        }
        if let Some(v) = parse::<f64, _>(&lookup, ENV_ETA_SMOOTHING)? {
            config.eta_smoothing = v;
        }
        if let Some(v) = parse::<u64, _>(&lookup, ENV_RETRY_BASE_DELAY_MS)? {
            config.retry.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse::<u64, _>(&lookup, ENV_RETRY_MAX_DELAY_MS)? {
            config.retry.max_delay = Duration::from_millis(v);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.eta_smoothing > 0.0 && self.eta_smoothing <= 1.0) {
            return Err(ConfigError::OutOfRange {
                var: ENV_ETA_SMOOTHING,
                reason: format!("{} is outside (0, 1]", self.eta_smoothing),
            });
        }
        if self.retry.max_delay < self.retry.base_delay {
            return Err(ConfigError::OutOfRange {
                var: ENV_RETRY_MAX_DELAY_MS,
                reason: "must not be below the base delay".into(),
            });
        }
        Ok(())
    }
}

fn parse<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<T>()
        .map(Some)
        .map_err(|e| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        })
}
