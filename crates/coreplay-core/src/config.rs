//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/coreplay/config.toml)
//! 3. Environment variables (COREPLAY_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::sync::SyncSettings;

/// Environment variable prefix
const ENV_PREFIX: &str = "COREPLAY";

const DEFAULT_HOST: &str = "http://192.168.2.140";

/// Keys accepted by [`Config::set`]
pub const KEYS: &[&str] = &[
    "host",
    "heartbeat_timeout_ms",
    "debounce_interval_ms",
    "initial_reconnect_delay_ms",
    "max_reconnect_delay_ms",
    "reconnect_multiplier",
    "request_timeout_ms",
    "resync_after_patch_failures",
    "log_file",
];

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device address; anything but authority and directory is dropped
    pub host: String,

    /// Silence after which the stream is considered dead
    pub heartbeat_timeout_ms: u64,

    /// Minimum spacing between variable flushes
    pub debounce_interval_ms: u64,

    pub initial_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub reconnect_multiplier: f64,

    /// Timeout for probe and bulk-fetch requests
    pub request_timeout_ms: u64,

    /// Consecutive rejected patch batches that force a resync (0 = never)
    pub resync_after_patch_failures: u32,

    /// Write logs here instead of stderr
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let settings = SyncSettings::default();
        Self {
            host: DEFAULT_HOST.to_string(),
            heartbeat_timeout_ms: millis(settings.heartbeat_timeout),
            debounce_interval_ms: millis(settings.debounce_interval),
            initial_reconnect_delay_ms: millis(settings.initial_reconnect_delay),
            max_reconnect_delay_ms: millis(settings.max_reconnect_delay),
            reconnect_multiplier: settings.reconnect_multiplier,
            request_timeout_ms: millis(settings.request_timeout),
            resync_after_patch_failures: settings.resync_after_patch_failures,
            log_file: None,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (COREPLAY_HOST, COREPLAY_HEARTBEAT_TIMEOUT_MS, ...)
    /// 2. Config file (~/.config/coreplay/config.toml or COREPLAY_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        for key in [
            "host",
            "heartbeat_timeout_ms",
            "debounce_interval_ms",
            "resync_after_patch_failures",
        ] {
            let var = format!("{}_{}", ENV_PREFIX, key.to_ascii_uppercase());
            if let Ok(val) = std::env::var(&var) {
                self.set(key, &val)
                    .with_context(|| format!("Invalid value in {}", var))?;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        normalize_host(&self.host)?;
        if self.heartbeat_timeout_ms == 0 {
            bail!("heartbeat_timeout_ms must be greater than zero");
        }
        if self.initial_reconnect_delay_ms > self.max_reconnect_delay_ms {
            bail!(
                "initial_reconnect_delay_ms ({}) exceeds max_reconnect_delay_ms ({})",
                self.initial_reconnect_delay_ms,
                self.max_reconnect_delay_ms
            );
        }
        if self.reconnect_multiplier.is_nan() || self.reconnect_multiplier < 1.0 {
            bail!("reconnect_multiplier must be at least 1.0");
        }
        Ok(())
    }

    /// Update one key from its string form
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        fn number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
        where
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            value
                .trim()
                .parse()
                .with_context(|| format!("'{}' is not a valid value for {}", value, key))
        }

        match key {
            "host" => {
                normalize_host(value)?;
                self.host = value.trim().to_string();
            }
            "heartbeat_timeout_ms" => self.heartbeat_timeout_ms = number(key, value)?,
            "debounce_interval_ms" => self.debounce_interval_ms = number(key, value)?,
            "initial_reconnect_delay_ms" => self.initial_reconnect_delay_ms = number(key, value)?,
            "max_reconnect_delay_ms" => self.max_reconnect_delay_ms = number(key, value)?,
            "reconnect_multiplier" => self.reconnect_multiplier = number(key, value)?,
            "request_timeout_ms" => self.request_timeout_ms = number(key, value)?,
            "resync_after_patch_failures" => {
                self.resync_after_patch_failures = number(key, value)?
            }
            "log_file" => {
                self.log_file = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                }
            }
            other => bail!(
                "Unknown config key '{}'. Valid keys: {}",
                other,
                KEYS.join(", ")
            ),
        }
        Ok(())
    }

    /// The device address as requests use it
    pub fn host_url(&self) -> Result<Url> {
        normalize_host(&self.host)
    }

    /// Durations for the connection manager
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
            debounce_interval: Duration::from_millis(self.debounce_interval_ms),
            initial_reconnect_delay: Duration::from_millis(self.initial_reconnect_delay_ms),
            max_reconnect_delay: Duration::from_millis(self.max_reconnect_delay_ms),
            reconnect_multiplier: self.reconnect_multiplier,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            resync_after_patch_failures: self.resync_after_patch_failures,
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with COREPLAY_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("coreplay")
            .join("config.toml")
    }
}

/// Reduce a user-supplied address to `http://<authority><directory>/`
///
/// The device only speaks plain HTTP; scheme, file name, query and fragment
/// are discarded. A bare `host[:port]` is accepted.
pub fn normalize_host(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("Host is empty");
    }

    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    };
    let parsed =
        Url::parse(&with_scheme).with_context(|| format!("Invalid host address '{}'", raw))?;

    let host = parsed
        .host_str()
        .with_context(|| format!("Host address '{}' has no host name", raw))?;
    let authority = match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let path = parsed.path();
    let directory = &path[..path.rfind('/').map_or(0, |i| i + 1)];
    let directory = if directory.is_empty() { "/" } else { directory };

    Url::parse(&format!("http://{}{}", authority, directory))
        .with_context(|| format!("Invalid host address '{}'", raw))
}
