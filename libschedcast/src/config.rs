//! Configuration management for Schedcast

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Upper bound for the configured delays, one year
const MAX_DELAY_SECS: u64 = 365 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub platforms: BTreeMap<String, PlatformConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/schedcast/posts.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    pub tick_interval_ms: u64,
    /// Grace period applied when a post is scheduled without a time
    pub default_delay_secs: u64,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    /// Upper bound on concurrent publish calls
    pub workers: usize,
    pub shutdown_timeout_secs: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            default_delay_secs: 300,
            max_attempts: 3,
            retry_delay_secs: 600,
            workers: 4,
            shutdown_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Outbound call budget; unset means unrestricted
    pub calls_per_hour: Option<u32>,
    #[serde(default)]
    pub mode: PublisherMode,
}

fn default_enabled() -> bool {
    true
}

/// Which publisher implementation backs a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublisherMode {
    /// In-process fake that records calls and always succeeds
    #[default]
    Mock,
    /// Supplied by the embedding application through `Manager::register_publisher`
    External,
}

/// Runtime settings the engine is constructed with.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub tick_interval: Duration,
    pub default_delay: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub workers: usize,
    pub shutdown_timeout: Duration,
    /// Calls per hour, keyed by platform name
    pub rate_limits: HashMap<String, u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let scheduling = SchedulingConfig::default();
        Self {
            tick_interval: Duration::from_millis(scheduling.tick_interval_ms),
            default_delay: Duration::from_secs(scheduling.default_delay_secs),
            max_attempts: scheduling.max_attempts,
            retry_delay: Duration::from_secs(scheduling.retry_delay_secs),
            workers: scheduling.workers,
            shutdown_timeout: Duration::from_secs(scheduling.shutdown_timeout_secs),
            rate_limits: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let mut config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;

        if let Ok(db_path) = std::env::var("SCHEDCAST_DB_PATH") {
            config.database.path = db_path;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load the config file if present, otherwise use built-in defaults
    pub fn load_or_default() -> Result<Self> {
        let config_path = resolve_config_path()?;
        if config_path.exists() {
            return Self::load_from_path(&config_path);
        }

        let mut config = Self::default_config();
        if let Ok(db_path) = std::env::var("SCHEDCAST_DB_PATH") {
            config.database.path = db_path;
        }
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        let platforms = [
            ("instagram", 200),
            ("facebook", 200),
            ("twitter", 300),
            ("tiktok", 100),
        ]
        .into_iter()
        .map(|(name, calls_per_hour)| {
            (
                name.to_string(),
                PlatformConfig {
                    enabled: true,
                    calls_per_hour: Some(calls_per_hour),
                    mode: PublisherMode::Mock,
                },
            )
        })
        .collect();

        Self {
            database: DatabaseConfig::default(),
            scheduling: SchedulingConfig::default(),
            platforms,
        }
    }

    fn validate(&self) -> Result<()> {
        let s = &self.scheduling;
        if s.tick_interval_ms == 0 {
            return Err(invalid("scheduling.tick_interval_ms", "must be greater than 0"));
        }
        if s.max_attempts == 0 {
            return Err(invalid("scheduling.max_attempts", "must be at least 1"));
        }
        if s.workers == 0 {
            return Err(invalid("scheduling.workers", "must be at least 1"));
        }
        for (field, secs) in [
            ("scheduling.default_delay_secs", s.default_delay_secs),
            ("scheduling.retry_delay_secs", s.retry_delay_secs),
        ] {
            if secs > MAX_DELAY_SECS {
                return Err(invalid(field, "must be at most one year (31536000 seconds)"));
            }
        }
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::MissingField("database.path".to_string()).into());
        }
        for (name, platform) in &self.platforms {
            if platform.calls_per_hour == Some(0) {
                return Err(invalid(
                    &format!("platforms.{}.calls_per_hour", name),
                    "must be greater than 0",
                ));
            }
        }
        Ok(())
    }

    /// Platforms switched on in the config, in name order
    pub fn enabled_platforms(&self) -> impl Iterator<Item = (&String, &PlatformConfig)> {
        self.platforms.iter().filter(|(_, p)| p.enabled)
    }

    /// Tilde-expanded database path
    pub fn database_path(&self) -> String {
        shellexpand::tilde(&self.database.path).to_string()
    }

    /// Build the engine settings from this configuration
    pub fn engine(&self) -> EngineConfig {
        let s = &self.scheduling;
        EngineConfig {
            tick_interval: Duration::from_millis(s.tick_interval_ms),
            default_delay: Duration::from_secs(s.default_delay_secs),
            max_attempts: s.max_attempts,
            retry_delay: Duration::from_secs(s.retry_delay_secs),
            workers: s.workers,
            shutdown_timeout: Duration::from_secs(s.shutdown_timeout_secs),
            rate_limits: self
                .enabled_platforms()
                .filter_map(|(name, p)| p.calls_per_hour.map(|limit| (name.clone(), limit)))
                .collect(),
        }
    }
}

fn invalid(field: &str, reason: &str) -> crate::error::SchedcastError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("SCHEDCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("schedcast").join("config.toml"))
}
