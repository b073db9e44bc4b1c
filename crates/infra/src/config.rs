//! Dispatcher configuration.

use std::time::Duration;

use thiserror::Error;

use postroom_queue::{BackoffPolicy, MAX_SEND_ATTEMPTS};

pub const ENV_POLL_INTERVAL_MS: &str = "POSTROOM_POLL_INTERVAL_MS";
pub const ENV_WORKERS: &str = "POSTROOM_WORKERS";
pub const ENV_BATCH_SIZE: &str = "POSTROOM_BATCH_SIZE";
pub const ENV_MAX_SEND_ATTEMPTS: &str = "POSTROOM_MAX_SEND_ATTEMPTS";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Sleep between scans that found nothing due
    pub poll_interval: Duration,
    /// Worker threads
    pub workers: usize,
    /// Entries claimed per scan and worker
    pub batch_size: usize,
    /// Backoffs allowed per entry before it is failed. The driven queue must
    /// be built with [`DispatchConfig::backoff_policy`]; `Dispatcher::start`
    /// refuses a queue whose policy differs.
    pub max_send_attempts: u32,
    /// Thread name prefix, also used in logs
    pub name: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            workers: 1,
            batch_size: 10,
            max_send_attempts: MAX_SEND_ATTEMPTS,
            name: "mail-dispatch".to_string(),
        }
    }
}

impl DispatchConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_send_attempts(mut self, max: u32) -> Self {
        self.max_send_attempts = max;
        self
    }

    /// The policy a queue driven by this configuration should use.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.max_send_attempts)
    }

    /// Defaults overridden by the `POSTROOM_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse::<u64>(&lookup, ENV_POLL_INTERVAL_MS)? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(workers) = parse::<usize>(&lookup, ENV_WORKERS)? {
            config.workers = positive(ENV_WORKERS, workers)?;
        }
        if let Some(batch) = parse::<usize>(&lookup, ENV_BATCH_SIZE)? {
            config.batch_size = positive(ENV_BATCH_SIZE, batch)?;
        }
        if let Some(max) = parse::<u32>(&lookup, ENV_MAX_SEND_ATTEMPTS)? {
            config.max_send_attempts = max;
        }

        Ok(config)
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|e| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        })
}

fn positive(key: &'static str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}
