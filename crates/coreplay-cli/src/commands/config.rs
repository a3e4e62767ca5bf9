//! Config command handlers

use anyhow::{Context, Result};

use coreplay_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(output: &Output) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(&config)?);
        }
        OutputFormat::Quiet => {
            println!("{}", config.host);
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  host:                        {}", config.host);
            println!(
                "  heartbeat_timeout_ms:        {}",
                config.heartbeat_timeout_ms
            );
            println!(
                "  debounce_interval_ms:        {}",
                config.debounce_interval_ms
            );
            println!(
                "  initial_reconnect_delay_ms:  {}",
                config.initial_reconnect_delay_ms
            );
            println!(
                "  max_reconnect_delay_ms:      {}",
                config.max_reconnect_delay_ms
            );
            println!(
                "  reconnect_multiplier:        {}",
                config.reconnect_multiplier
            );
            println!("  request_timeout_ms:          {}", config.request_timeout_ms);
            println!(
                "  resync_after_patch_failures: {}",
                config.resync_after_patch_failures
            );
            println!(
                "  log_file:                    {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", Config::config_file_path().display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: &str, value: &str, output: &Output) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    config.set(key, value)?;
    config.save().context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));
    Ok(())
}
