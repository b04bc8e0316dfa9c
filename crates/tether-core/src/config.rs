//! Runtime configuration, read from `TETHER_*` environment variables.
//!
//! Every field has a default; a variable that is set but unparsable is an
//! error rather than silently ignored.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::domain::RetryPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    /// Number of concurrent dispatcher loops in this process.
    pub workers: usize,
    /// Claims per `dispatch_once` tick.
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub poll_jitter: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 10,
            poll_interval: Duration::from_millis(1000),
            poll_jitter: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReaperConfig {
    /// A processing job older than this is presumed dead.
    pub lease_timeout: Duration,
    pub interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            lease_timeout: Duration::from_secs(300),
            interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub dispatcher: DispatcherConfig,
    pub reaper: ReaperConfig,
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            dispatcher: DispatcherConfig::default(),
            reaper: ReaperConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like `from_env`, with variables resolved through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let mut cfg = Self::default();

        cfg.database_url = env.get("TETHER_DATABASE_URL").filter(|s| !s.is_empty());
        env.parse_into("TETHER_MAX_CONNECTIONS", &mut cfg.max_connections)?;

        env.parse_into("TETHER_WORKERS", &mut cfg.dispatcher.workers)?;
        env.parse_into("TETHER_BATCH_SIZE", &mut cfg.dispatcher.batch_size)?;
        env.millis_into("TETHER_POLL_INTERVAL_MS", &mut cfg.dispatcher.poll_interval)?;
        env.millis_into("TETHER_POLL_JITTER_MS", &mut cfg.dispatcher.poll_jitter)?;

        env.secs_into("TETHER_LEASE_TIMEOUT_SECS", &mut cfg.reaper.lease_timeout)?;
        env.secs_into("TETHER_REAPER_INTERVAL_SECS", &mut cfg.reaper.interval)?;

        env.millis_into("TETHER_RETRY_BASE_MS", &mut cfg.retry.base_delay)?;
        env.millis_into("TETHER_RETRY_CAP_MS", &mut cfg.retry.max_delay)?;
        env.parse_into("TETHER_RETRY_JITTER", &mut cfg.retry.jitter_ratio)?;

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |var: &'static str, value: String, reason: &str| ConfigError::Invalid {
            var,
            value,
            reason: reason.to_string(),
        };
        if self.max_connections == 0 {
            return Err(invalid("TETHER_MAX_CONNECTIONS", "0".into(), "must be positive"));
        }
        if self.dispatcher.workers == 0 {
            return Err(invalid("TETHER_WORKERS", "0".into(), "must be positive"));
        }
        if self.dispatcher.batch_size == 0 {
            return Err(invalid("TETHER_BATCH_SIZE", "0".into(), "must be positive"));
        }
        if self.reaper.interval.is_zero() {
            return Err(invalid("TETHER_REAPER_INTERVAL_SECS", "0".into(), "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
            return Err(invalid(
                "TETHER_RETRY_JITTER",
                self.retry.jitter_ratio.to_string(),
                "must be between 0 and 1",
            ));
        }
        if self.retry.max_delay < self.retry.base_delay {
            return Err(invalid(
                "TETHER_RETRY_CAP_MS",
                self.retry.max_delay.as_millis().to_string(),
                "must not be below TETHER_RETRY_BASE_MS",
            ));
        }
        Ok(())
    }
}

struct Lookup<F>(F);

impl<F: Fn(&str) -> Option<String>> Lookup<F> {
    fn get(&self, var: &str) -> Option<String> {
        (self.0)(var).map(|s| s.trim().to_string())
    }

    fn parse_into<T>(&self, var: &'static str, slot: &mut T) -> Result<(), ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(raw) = self.get(var) {
            *slot = raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                value: raw.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn millis_into(&self, var: &'static str, slot: &mut Duration) -> Result<(), ConfigError> {
        let mut ms = slot.as_millis() as u64;
        self.parse_into(var, &mut ms)?;
        *slot = Duration::from_millis(ms);
        Ok(())
    }

    fn secs_into(&self, var: &'static str, slot: &mut Duration) -> Result<(), ConfigError> {
        let mut secs = slot.as_secs();
        self.parse_into(var, &mut secs)?;
        *slot = Duration::from_secs(secs);
        Ok(())
    }
}
