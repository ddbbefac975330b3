use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, Result};

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_COLLECT_INTERVAL_SECS: u64 = 60;

/// Top-level config (cadence.toml + CADENCE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    /// IANA zone used for timestamps that carry no offset.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Targets a periodic task may name.
    #[serde(default = "default_executables")]
    pub executables: Vec<String>,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            breaker: BreakerConfig::default(),
            collector: CollectorConfig::default(),
            timezone: default_timezone(),
            executables: default_executables(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Circuit-breaker policy applied to terminal task failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures tolerated before the task trips.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// When false failures are still counted but tasks are never disabled.
    /// Override with env var: CADENCE_BREAKER__AUTO_DISABLE=true
    #[serde(default)]
    pub auto_disable: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            auto_disable: false,
        }
    }
}

/// Background reclamation of schedules no task references any more.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_collect_interval")]
    pub interval_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: DEFAULT_COLLECT_INTERVAL_SECS,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_collect_interval() -> u64 {
    DEFAULT_COLLECT_INTERVAL_SECS
}
fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}
fn default_executables() -> Vec<String> {
    vec!["noop".to_string()]
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.db", home)
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.cadence/cadence.toml
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        debug!(%path, "loading config");

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("CADENCE_").split("__")),
        )
    }

    /// Extract and validate a config from an already-assembled figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: CadenceConfig = figment
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;
        config.tz()?;
        if config.collector.interval_secs == 0 {
            return Err(CoreError::Config(
                "collector.interval_secs must be greater than 0".to_string(),
            ));
        }
        Ok(config)
    }

    /// Parsed default timezone.
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| CoreError::UnknownTimezone(self.timezone.clone()))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(s: &str) -> Result<CadenceConfig> {
        CadenceConfig::from_figment(Figment::new().merge(Toml::string(s)))
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = from_toml("").unwrap();
        assert_eq!(config.breaker.max_retries, DEFAULT_MAX_RETRIES);
        assert!(!config.breaker.auto_disable);
        assert!(config.collector.enabled);
        assert_eq!(config.collector.interval_secs, 60);
        assert_eq!(config.timezone, "UTC");
        assert_eq!(config.executables, vec!["noop".to_string()]);
    }

    #[test]
    fn breaker_section_overrides() {
        let config = from_toml(
            r#"
            timezone = "Europe/Moscow"
            executables = ["noop", "report"]

            [breaker]
            max_retries = 2
            auto_disable = true
            "#,
        )
        .unwrap();
        assert_eq!(config.breaker.max_retries, 2);
        assert!(config.breaker.auto_disable);
        assert_eq!(config.tz().unwrap(), chrono_tz::Europe::Moscow);
        assert_eq!(config.executables.len(), 2);
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let err = from_toml(r#"timezone = "Mars/Olympus""#).unwrap_err();
        assert!(matches!(err, CoreError::UnknownTimezone(ref tz) if tz == "Mars/Olympus"));
    }

    #[test]
    fn zero_collect_interval_is_rejected() {
        let err = from_toml(
            r#"
            [collector]
            interval_secs = 0
            "#,
        )
        .unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
