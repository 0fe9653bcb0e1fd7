//! Process configuration from environment variables.

use std::time::Duration;

use thiserror::Error;

use mailflow_infra::rate_limit::DEFAULT_REDIS_URL;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 5_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    /// Broker address; also the shared rate limiter address when it differs
    /// from the local default.
    pub redis_url: String,
    /// Postgres store when set, in-memory store otherwise.
    pub database_url: Option<String>,
    pub broker_probe_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            database_url: None,
            broker_probe_interval: Duration::from_millis(DEFAULT_PROBE_INTERVAL_MS),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let port = match get("PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| ConfigError::Invalid {
                var: "PORT",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => defaults.port,
        };

        let broker_probe_interval = match get("BROKER_PROBE_INTERVAL_MS") {
            Some(raw) => {
                let ms = raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                    var: "BROKER_PROBE_INTERVAL_MS",
                    value: raw.clone(),
                    reason: e.to_string(),
                })?;
                if ms == 0 {
                    return Err(ConfigError::Invalid {
                        var: "BROKER_PROBE_INTERVAL_MS",
                        value: raw,
                        reason: "must be greater than zero".to_string(),
                    });
                }
                Duration::from_millis(ms)
            }
            None => defaults.broker_probe_interval,
        };

        Ok(Self {
            port,
            redis_url: get("REDIS_URL").unwrap_or(defaults.redis_url),
            database_url: get("DATABASE_URL"),
            broker_probe_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.port, 5000);
        assert_eq!(config.redis_url, "redis://localhost:6379");
    }

    #[test]
    fn reads_all_variables() {
        let config = AppConfig::from_lookup(lookup(&[
            ("PORT", "8081"),
            ("REDIS_URL", "redis://cache:6380"),
            ("DATABASE_URL", "postgres://u:p@db/mail"),
            ("BROKER_PROBE_INTERVAL_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8081);
        assert_eq!(config.redis_url, "redis://cache:6380");
        assert_eq!(config.database_url.as_deref(), Some("postgres://u:p@db/mail"));
        assert_eq!(config.broker_probe_interval, Duration::from_millis(250));
    }

    #[test]
    fn blank_database_url_means_in_memory() {
        let config = AppConfig::from_lookup(lookup(&[("DATABASE_URL", "  ")])).unwrap();
        assert_eq!(config.database_url, None);
    }

    #[test]
    fn bad_port_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "PORT", .. }));
    }

    #[test]
    fn zero_probe_interval_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("BROKER_PROBE_INTERVAL_MS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "BROKER_PROBE_INTERVAL_MS", .. }));
    }
}
