//! Engine configuration.
//!
//! Values are layered: defaults, then an optional JSON file named by
//! `NOTIFY_CONFIG`, then individual environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatch::{
    BackoffTable, DEFAULT_BACKOFF_SECS, DEFAULT_MAX_ERROR_COUNT, DispatchConfig, RetryPolicy,
    WorkerPoolConfig,
};
use crate::logging::LoggingSettings;
use crate::{Error, Result};

pub const ENV_CONFIG_FILE: &str = "NOTIFY_CONFIG";
pub const ENV_WORKERS: &str = "NOTIFY_WORKERS";
pub const ENV_MAX_ERRORS: &str = "NOTIFY_MAX_ERRORS";
pub const ENV_BACKOFF_SECS: &str = "NOTIFY_BACKOFF_SECS";
pub const ENV_POLL_INTERVAL_SECS: &str = "NOTIFY_POLL_INTERVAL_SECS";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_LOG: &str = "NOTIFY_LOG";
pub const ENV_LOG_JSON: &str = "NOTIFY_LOG_JSON";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_max_error_count")]
    pub max_error_count: u32,
    /// Retry delays in seconds for the 1st, 2nd, ... failure.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: Vec<u64>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default)]
    pub log_filter: Option<String>,
    #[serde(default)]
    pub log_json: bool,
}

fn default_worker_count() -> usize {
    1
}

fn default_max_error_count() -> u32 {
    DEFAULT_MAX_ERROR_COUNT
}

fn default_backoff_secs() -> Vec<u64> {
    DEFAULT_BACKOFF_SECS.to_vec()
}

fn default_poll_interval_secs() -> u64 {
    180
}

fn default_database_url() -> String {
    "sqlite:notify.db?mode=rwc".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            max_error_count: default_max_error_count(),
            backoff_secs: default_backoff_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            database_url: default_database_url(),
            log_filter: None,
            log_json: false,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::config(format!("{name}={raw:?}: {e}")))
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::config(format!("{name}={raw:?}: expected a boolean"))),
    }
}

impl EngineConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Load using `lookup` for every variable.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match lookup(ENV_CONFIG_FILE) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(lookup)?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = lookup(ENV_WORKERS) {
            self.worker_count = parse_env(ENV_WORKERS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_ERRORS) {
            self.max_error_count = parse_env(ENV_MAX_ERRORS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_BACKOFF_SECS) {
            self.backoff_secs = raw
                .split(',')
                .filter(|part| !part.trim().is_empty())
                .map(|part| parse_env(ENV_BACKOFF_SECS, part))
                .collect::<Result<_>>()?;
        }
        if let Some(raw) = lookup(ENV_POLL_INTERVAL_SECS) {
            self.poll_interval_secs = parse_env(ENV_POLL_INTERVAL_SECS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_DATABASE_URL) {
            self.database_url = raw;
        }
        if let Some(raw) = lookup(ENV_LOG) {
            self.log_filter = Some(raw);
        }
        if let Some(raw) = lookup(ENV_LOG_JSON) {
            self.log_json = parse_bool(ENV_LOG_JSON, &raw)?;
        }
        Ok(())
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::config("worker_count must be at least 1"));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::config("poll_interval_secs must be at least 1"));
        }
        BackoffTable::from_secs(&self.backoff_secs)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn dispatch_config(&self) -> Result<DispatchConfig> {
        Ok(DispatchConfig {
            retry: RetryPolicy {
                max_error_count: self.max_error_count,
                backoff: BackoffTable::from_secs(&self.backoff_secs)?,
            },
            poll_interval: self.poll_interval(),
        })
    }

    pub fn worker_pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig {
            worker_count: self.worker_count,
            poll_interval: self.poll_interval(),
        }
    }

    pub fn logging(&self) -> LoggingSettings {
        LoggingSettings {
            filter: self.log_filter.clone(),
            json: self.log_json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.max_error_count, 3);
        assert_eq!(config.backoff_secs, vec![60, 900, 7200, 86400, 259200]);
        assert_eq!(config.poll_interval_secs, 180);
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::from_env_with(lookup(&[
            (ENV_WORKERS, "3"),
            (ENV_MAX_ERRORS, "5"),
            (ENV_BACKOFF_SECS, "1, 2,4"),
            (ENV_POLL_INTERVAL_SECS, "10"),
            (ENV_DATABASE_URL, "sqlite::memory:"),
            (ENV_LOG_JSON, "true"),
        ]))
        .unwrap();

        assert_eq!(config.worker_count, 3);
        assert_eq!(config.max_error_count, 5);
        assert_eq!(config.backoff_secs, vec![1, 2, 4]);
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.database_url, "sqlite::memory:");
        assert!(config.log_json);

        let dispatch = config.dispatch_config().unwrap();
        assert_eq!(dispatch.retry.backoff.delay(3), Duration::from_secs(4));
        assert_eq!(config.worker_pool_config().worker_count, 3);
    }

    #[test]
    fn test_bad_env_value() {
        let err = EngineConfig::from_env_with(lookup(&[(ENV_WORKERS, "many")])).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_json_partial() {
        let config = EngineConfig::from_json(r#"{"worker_count": 2}"#).unwrap();
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.max_error_count, 3);
    }

    #[test]
    fn test_validate() {
        let mut config = EngineConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.worker_count = 1;
        config.poll_interval_secs = 0;
        assert!(config.validate().is_err());

        config.poll_interval_secs = 1;
        config.backoff_secs = vec![];
        assert!(config.validate().is_err());

        config.backoff_secs = vec![100, 10];
        assert!(config.validate().is_err());

        config.backoff_secs = vec![10, 100];
        assert!(config.validate().is_ok());
    }
}
