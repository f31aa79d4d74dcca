//! Runtime configuration read from the environment.

use std::path::PathBuf;
use std::time::Duration;

/// Default snapshot file for the JSON mirror
const DEFAULT_SNAPSHOT_PATH: &str = "duel_player.json";

/// Default player cache TTL
const DEFAULT_CACHE_TTL_SECS: u64 = 30;

/// Default number of rows the gateway returns for the ladder
const DEFAULT_LADDER_LIMIT: i64 = 100;

/// How often the binary refreshes the ladder
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres URL; `None` runs with the local-only gateway
    pub database_url: Option<String>,
    /// Redis URL; `None` mirrors to a JSON file instead
    pub redis_url: Option<String>,
    pub snapshot_path: PathBuf,
    pub cache_ttl: Duration,
    pub ladder_limit: i64,
    pub refresh_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: None,
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            ladder_limit: DEFAULT_LADDER_LIMIT,
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let cache_ttl = match value("DUEL_CACHE_TTL_SECS") {
            Some(raw) => Duration::from_secs(parse_number("DUEL_CACHE_TTL_SECS", &raw)?),
            None => defaults.cache_ttl,
        };
        let refresh_interval = match value("DUEL_REFRESH_INTERVAL_SECS") {
            Some(raw) => {
                let secs: u64 = parse_number("DUEL_REFRESH_INTERVAL_SECS", &raw)?;
                if secs == 0 {
                    return Err(ConfigError::Invalid {
                        key: "DUEL_REFRESH_INTERVAL_SECS".to_string(),
                        reason: "must be at least 1".to_string(),
                    });
                }
                Duration::from_secs(secs)
            }
            None => defaults.refresh_interval,
        };
        let ladder_limit = match value("DUEL_LADDER_LIMIT") {
            Some(raw) => {
                let limit: i64 = parse_number("DUEL_LADDER_LIMIT", &raw)?;
                if limit <= 0 {
                    return Err(ConfigError::Invalid {
                        key: "DUEL_LADDER_LIMIT".to_string(),
                        reason: "must be positive".to_string(),
                    });
                }
                limit
            }
            None => defaults.ladder_limit,
        };

        Ok(Self {
            database_url: value("DUEL_DATABASE_URL"),
            redis_url: value("DUEL_REDIS_URL"),
            snapshot_path: value("DUEL_SNAPSHOT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.snapshot_path),
            cache_ttl,
            ladder_limit,
            refresh_interval,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        reason: format!("'{}' is not a valid number", raw),
    })
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    Invalid { key: String, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid { key, reason } => write!(f, "Invalid {}: {}", key, reason),
        }
    }
}

impl std::error::Error for ConfigError {}

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
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert!(config.database_url.is_none());
        assert!(config.redis_url.is_none());
        assert_eq!(config.cache_ttl, Duration::from_secs(30));
        assert_eq!(config.ladder_limit, 100);
        assert_eq!(config.snapshot_path, PathBuf::from("duel_player.json"));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DUEL_DATABASE_URL", "postgres://duel@localhost/duel"),
            ("DUEL_CACHE_TTL_SECS", "5"),
            ("DUEL_LADDER_LIMIT", "25"),
            ("DUEL_REDIS_URL", "  "),
        ]))
        .unwrap();
        assert_eq!(config.database_url.as_deref(), Some("postgres://duel@localhost/duel"));
        assert_eq!(config.cache_ttl, Duration::from_secs(5));
        assert_eq!(config.ladder_limit, 25);
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_bad_numbers_are_errors() {
        assert!(Config::from_lookup(lookup(&[("DUEL_CACHE_TTL_SECS", "soon")])).is_err());
        assert!(Config::from_lookup(lookup(&[("DUEL_LADDER_LIMIT", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("DUEL_REFRESH_INTERVAL_SECS", "0")])).is_err());
    }
}
