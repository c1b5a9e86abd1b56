//! Runtime configuration.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! environment variables. The binary loads `.env` before any of this runs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;
use color_eyre::eyre::{Result, WrapErr};
use log::info;
use serde::{Deserialize, Serialize};

use crate::cache::CacheOptions;
use crate::ingest::{Ingestor, ParserLimits, RecordParser, Scanner, DEFAULT_FILE_PATTERN};

pub const DEFAULT_DATA_DIR: &str = "/data";
pub const DEFAULT_REFRESH_INTERVAL_SECONDS: u64 = 3600;
pub const DEFAULT_STALE_DATA_HOURS: u64 = 2;
pub const DEFAULT_RANGE_DAYS: u64 = 3;

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {var}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid file pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Invalid plausibility limit: {0}")]
    InvalidLimit(String),

    #[error("Display UTC offset of {0} minutes is out of range")]
    InvalidOffset(i32),

    #[error("Run size must be at least 1")]
    InvalidRunSize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding one JSON file per speedtest result
    pub data_dir: PathBuf,
    /// Dataset TTL; zero means every read triggers a rebuild
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
    /// Regex matched against file names
    pub file_pattern: String,
    pub max_speed_mbps: f64,
    pub max_latency_ms: f64,
    /// Warn about missing data once the newest record is older than this
    #[serde(with = "humantime_serde")]
    pub stale_data_after: Duration,
    /// Records per speedtest run, used by the latest-run summary
    pub recent_run_size: usize,
    /// Window shown when no explicit range is requested
    #[serde(with = "humantime_serde")]
    pub default_range: Duration,
    pub snapshot_path: Option<PathBuf>,
    /// Offset applied to timestamps in reports and the hourly profile
    pub display_utc_offset_minutes: i32,
}

impl Default for Config {
    fn default() -> Self {
        let limits = ParserLimits::default();
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECONDS),
            file_pattern: DEFAULT_FILE_PATTERN.to_string(),
            max_speed_mbps: limits.max_speed_mbps,
            max_latency_ms: limits.max_latency_ms,
            stale_data_after: Duration::from_secs(DEFAULT_STALE_DATA_HOURS * 3600),
            recent_run_size: crate::aggregate::DEFAULT_RUN_SIZE,
            default_range: Duration::from_secs(DEFAULT_RANGE_DAYS * 86_400),
            snapshot_path: None,
            display_utc_offset_minutes: 0,
        }
    }
}

fn env_value<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

impl Config {
    /// Defaults, overlaid with `path` if given, overlaid with the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config
            .apply_env(|var| std::env::var(var).ok())
            .wrap_err("Failed to apply environment overrides")?;
        config.validate().wrap_err("Invalid configuration")?;
        Ok(config)
    }

    /// Parse a YAML configuration file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        info!("Loading configuration from: {:?}", path);
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&content)
            .wrap_err_with(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Apply overrides from environment-style variables.
    ///
    /// `lookup` returns the value of a variable, or `None` when it is unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("DATA_DIR") {
            self.data_dir = PathBuf::from(dir.trim());
        }
        if let Some(v) = get("REFRESH_INTERVAL_SECONDS") {
            self.refresh_interval = Duration::from_secs(env_value("REFRESH_INTERVAL_SECONDS", &v)?);
        }
        if let Some(v) = get("FILE_PATTERN") {
            self.file_pattern = v;
        }
        if let Some(v) = get("MAX_SPEED_MBPS") {
            self.max_speed_mbps = env_value("MAX_SPEED_MBPS", &v)?;
        }
        if let Some(v) = get("MAX_LATENCY_MS") {
            self.max_latency_ms = env_value("MAX_LATENCY_MS", &v)?;
        }
        if let Some(v) = get("STALE_DATA_HOURS") {
            let hours: u64 = env_value("STALE_DATA_HOURS", &v)?;
            self.stale_data_after = Duration::from_secs(hours.saturating_mul(3600));
        }
        if let Some(v) = get("RECENT_RUN_SIZE") {
            self.recent_run_size = env_value("RECENT_RUN_SIZE", &v)?;
        }
        if let Some(v) = get("SNAPSHOT_PATH") {
            self.snapshot_path = Some(PathBuf::from(v.trim()));
        }
        if let Some(v) = get("DISPLAY_UTC_OFFSET_MINUTES") {
            self.display_utc_offset_minutes = env_value("DISPLAY_UTC_OFFSET_MINUTES", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Scanner::with_pattern(&self.file_pattern)?;

        for (name, value) in [
            ("max_speed_mbps", self.max_speed_mbps),
            ("max_latency_ms", self.max_latency_ms),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidLimit(format!(
                    "{} must be a positive number, got {}",
                    name, value
                )));
            }
        }

        if self.recent_run_size == 0 {
            return Err(ConfigError::InvalidRunSize);
        }

        self.display_offset()?;
        Ok(())
    }

    pub fn parser_limits(&self) -> ParserLimits {
        ParserLimits {
            max_speed_mbps: self.max_speed_mbps,
            max_latency_ms: self.max_latency_ms,
        }
    }

    pub fn scanner(&self) -> Result<Scanner, ConfigError> {
        Ok(Scanner::with_pattern(&self.file_pattern)?)
    }

    pub fn ingestor(&self) -> Result<Ingestor, ConfigError> {
        Ok(Ingestor::new(
            self.data_dir.clone(),
            self.scanner()?,
            RecordParser::new(self.parser_limits()),
        ))
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            ttl: self.refresh_interval,
            snapshot_path: self.snapshot_path.clone(),
        }
    }

    pub fn display_offset(&self) -> Result<FixedOffset, ConfigError> {
        self.display_utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or(ConfigError::InvalidOffset(self.display_utc_offset_minutes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var: &str| map.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.data_dir, PathBuf::from("/data"));
        assert_eq!(config.refresh_interval, Duration::from_secs(3600));
        assert_eq!(config.stale_data_after, Duration::from_secs(7200));
        assert_eq!(config.recent_run_size, 5);
        assert_eq!(config.default_range, Duration::from_secs(3 * 86_400));
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_options().ttl, Duration::from_secs(3600));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("DATA_DIR", "/srv/results"),
                ("REFRESH_INTERVAL_SECONDS", "60"),
                ("STALE_DATA_HOURS", "6"),
                ("RECENT_RUN_SIZE", "3"),
                ("SNAPSHOT_PATH", "/var/cache/speedboard.snap"),
                ("DISPLAY_UTC_OFFSET_MINUTES", "60"),
                ("MAX_SPEED_MBPS", "2500"),
            ]))
            .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/srv/results"));
        assert_eq!(config.refresh_interval, Duration::from_secs(60));
        assert_eq!(config.stale_data_after, Duration::from_secs(6 * 3600));
        assert_eq!(config.recent_run_size, 3);
        assert_eq!(
            config.cache_options().snapshot_path,
            Some(PathBuf::from("/var/cache/speedboard.snap"))
        );
        assert_eq!(config.display_offset().unwrap().local_minus_utc(), 3600);
        assert_eq!(config.parser_limits().max_speed_mbps, 2500.0);
    }

    #[test]
    fn test_zero_refresh_interval_is_allowed() {
        let mut config = Config::default();
        config.apply_env(env(&[("REFRESH_INTERVAL_SECONDS", "0")])).unwrap();
        assert_eq!(config.refresh_interval, Duration::ZERO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("REFRESH_INTERVAL_SECONDS", "-5")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv {
                var: "REFRESH_INTERVAL_SECONDS",
                ..
            }
        ));
    }

    #[test]
    fn test_blank_env_values_are_ignored() {
        let mut config = Config::default();
        config.apply_env(env(&[("DATA_DIR", "  ")])).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/data"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config {
            file_pattern: "(".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPattern(_))));

        config.file_pattern = DEFAULT_FILE_PATTERN.to_string();
        config.max_latency_ms = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidLimit(_))));

        config.max_latency_ms = 1000.0;
        config.recent_run_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRunSize)));

        config.recent_run_size = 5;
        config.display_utc_offset_minutes = 24 * 60;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidOffset(1440))));
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("speedboard.yaml");
        std::fs::write(
            &path,
            "data_dir: /mnt/speedtests\nrefresh_interval: 10m\nstale_data_after: 3h\nfile_pattern: '\\.result\\.json$'\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/mnt/speedtests"));
        assert_eq!(config.refresh_interval, Duration::from_secs(600));
        assert_eq!(config.stale_data_after, Duration::from_secs(3 * 3600));
        assert_eq!(config.file_pattern, r"\.result\.json$");
        assert_eq!(config.recent_run_size, 5);
        assert!(config.scanner().is_ok());
    }

    #[test]
    fn test_unknown_yaml_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("speedboard.yaml");
        std::fs::write(&path, "data_directory: /tmp\n").unwrap();
        assert!(Config::from_file(&path).is_err());
    }
}
