//! Notifier configuration from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::jobs::{DEFAULT_DEAD_LETTER_LIMIT, WorkerPoolConfig};

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Settings of the notification worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifierConfig {
    pub redis_url: String,
    pub workers: usize,
    pub poll_timeout: Duration,
    pub maintenance_interval: Duration,
    pub reconcile_interval: Duration,
    pub batch_size: usize,
    /// Dead letters retained; older ones are trimmed.
    pub dead_letter_limit: usize,
    pub template_dir: PathBuf,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            workers: 10,
            poll_timeout: Duration::from_secs(5),
            maintenance_interval: Duration::from_millis(500),
            reconcile_interval: Duration::from_secs(30),
            batch_size: 100,
            dead_letter_limit: DEFAULT_DEAD_LETTER_LIMIT,
            template_dir: PathBuf::from("templates"),
        }
    }
}

impl NotifierConfig {
    /// Read the process environment. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read settings through `lookup` (variable name -> value).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        Ok(Self {
            redis_url: get("REDIS_URL").unwrap_or(defaults.redis_url),
            workers: positive(parse(&lookup, "NOTIFIER_WORKERS")?, "NOTIFIER_WORKERS")?
                .unwrap_or(defaults.workers),
            poll_timeout: positive(
                parse(&lookup, "NOTIFIER_POLL_TIMEOUT_SECS")?,
                "NOTIFIER_POLL_TIMEOUT_SECS",
            )?
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_timeout),
            maintenance_interval: parse(&lookup, "NOTIFIER_MAINTENANCE_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.maintenance_interval),
            reconcile_interval: parse(&lookup, "NOTIFIER_RECONCILE_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconcile_interval),
            batch_size: positive(parse(&lookup, "NOTIFIER_BATCH_SIZE")?, "NOTIFIER_BATCH_SIZE")?
                .unwrap_or(defaults.batch_size),
            dead_letter_limit: positive(
                parse(&lookup, "NOTIFIER_DEAD_LETTER_LIMIT")?,
                "NOTIFIER_DEAD_LETTER_LIMIT",
            )?
            .unwrap_or(defaults.dead_letter_limit),
            template_dir: get("TEMPLATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.template_dir),
        })
    }

    pub fn pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig {
            workers: self.workers,
            poll_timeout: self.poll_timeout,
            maintenance_interval: self.maintenance_interval,
            reconcile_interval: self.reconcile_interval,
            batch_size: self.batch_size,
            ..WorkerPoolConfig::default()
        }
    }
}

fn parse<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

fn positive<T>(value: Option<T>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: PartialEq + From<u8>,
{
    if value == Some(T::from(0)) {
        return Err(ConfigError::Invalid {
            var,
            value: "0".to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<NotifierConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        NotifierConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(config(&[]).unwrap(), NotifierConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let cfg = config(&[
            ("REDIS_URL", "redis://cache:6380/2"),
            ("NOTIFIER_WORKERS", "4"),
            ("NOTIFIER_POLL_TIMEOUT_SECS", "2"),
            ("NOTIFIER_MAINTENANCE_INTERVAL_MS", "250"),
            ("NOTIFIER_RECONCILE_INTERVAL_SECS", "60"),
            ("NOTIFIER_BATCH_SIZE", " 20 "),
            ("NOTIFIER_DEAD_LETTER_LIMIT", "500"),
            ("TEMPLATE_DIR", "/srv/templates"),
        ])
        .unwrap();

        assert_eq!(cfg.redis_url, "redis://cache:6380/2");
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.poll_timeout, Duration::from_secs(2));
        assert_eq!(cfg.maintenance_interval, Duration::from_millis(250));
        assert_eq!(cfg.reconcile_interval, Duration::from_secs(60));
        assert_eq!(cfg.batch_size, 20);
        assert_eq!(cfg.dead_letter_limit, 500);
        assert_eq!(cfg.template_dir, PathBuf::from("/srv/templates"));

        let pool = cfg.pool_config();
        assert_eq!(pool.workers, 4);
        assert_eq!(pool.batch_size, 20);
    }

    #[test]
    fn rejects_unparsable_numbers() {
        let err = config(&[("NOTIFIER_WORKERS", "many")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "NOTIFIER_WORKERS",
                value: "many".into()
            }
        );
    }

    #[test]
    fn rejects_zero_workers() {
        assert!(config(&[("NOTIFIER_WORKERS", "0")]).is_err());
    }

    #[test]
    fn rejects_zero_poll_timeout() {
        let err = config(&[("NOTIFIER_POLL_TIMEOUT_SECS", "0")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "NOTIFIER_POLL_TIMEOUT_SECS",
                value: "0".into()
            }
        );
        assert!(config(&[("NOTIFIER_DEAD_LETTER_LIMIT", "0")]).is_err());
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = config(&[("REDIS_URL", ""), ("NOTIFIER_WORKERS", "  ")]).unwrap();
        assert_eq!(cfg.redis_url, DEFAULT_REDIS_URL);
        assert_eq!(cfg.workers, 10);
    }
}
