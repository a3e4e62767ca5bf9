//! CorePlay CLI
//!
//! Command-line interface for the CorePlay state mirror.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use coreplay_core::Config;

mod commands;
mod logging;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "coreplay")]
#[command(about = "CorePlay - live state mirror for CorePlay media players")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror the device and print variable updates as they flush
    Watch {
        /// Device address (overrides config)
        #[arg(long)]
        host: Option<String>,
    },
    /// Fetch the full state once and print it
    Snapshot {
        /// Device address (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Only print the value at this path (e.g. /players/1/program)
        #[arg(short, long)]
        path: Option<String>,
    },
    /// Check that the device answers and print its version
    Probe {
        /// Device address (overrides config)
        #[arg(long)]
        host: Option<String>,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (host, heartbeat_timeout_ms, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands run without logging or a device
    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => commands::config::show(&output),
            Some(ConfigCommands::Set { key, value }) => commands::config::set(&key, &value, &output),
        };
    }

    let config = Config::load().context("Failed to load configuration")?;
    logging::init(&config);

    match cli.command {
        Commands::Watch { host } => {
            let config = commands::with_host(config, host)?;
            commands::watch::run(&config, &output).await
        }
        Commands::Snapshot { host, path } => {
            let config = commands::with_host(config, host)?;
            commands::snapshot::run(&config, path.as_deref(), &output).await
        }
        Commands::Probe { host } => {
            let config = commands::with_host(config, host)?;
            commands::probe::run(&config, &output).await
        }
        Commands::Config { .. } => Ok(()),
    }
}
