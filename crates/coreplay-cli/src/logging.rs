//! Tracing setup
//!
//! The level comes from `COREPLAY_LOG` (default `info`) and applies to the
//! core and CLI crates only. Logs go to stderr unless `log_file` is set.

use std::fs::OpenOptions;

use tracing::info;
use tracing_subscriber::EnvFilter;

use coreplay_core::Config;

const LOG_ENV: &str = "COREPLAY_LOG";

/// Filter directive for a level name
fn filter_directive(level: &str) -> String {
    format!("coreplay_core={},coreplay_cli={}", level, level)
}

/// Initialize logging (ignores a second initialization)
pub fn init(config: &Config) {
    let level = std::env::var(LOG_ENV).unwrap_or_else(|_| "info".to_string());
    let env_filter = EnvFilter::new(filter_directive(&level));

    let Some(log_path) = config.log_file.as_ref() else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .try_init();
        return;
    };

    let log_file = match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
            return;
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(log_file)
        .try_init();

    info!("Logging to {:?}", log_path);
}
