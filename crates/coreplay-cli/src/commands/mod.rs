//! Command handlers

pub mod config;
pub mod probe;
pub mod snapshot;
pub mod watch;

use anyhow::{Context, Result};

use coreplay_core::{Config, HttpDevice};

/// Apply a `--host` override on top of the loaded config
pub fn with_host(mut config: Config, host: Option<String>) -> Result<Config> {
    if let Some(host) = host {
        config.set("host", &host).context("Invalid --host")?;
    }
    Ok(config)
}

/// HTTP client for the configured device
pub fn device(config: &Config) -> Result<HttpDevice> {
    let host = config.host_url()?;
    HttpDevice::new(host, config.sync_settings().request_timeout)
        .context("Failed to create HTTP client")
}
