//! Probe command handler

use anyhow::{Context, Result};

use coreplay_core::{Config, DeviceApi};

use crate::output::{Output, OutputFormat};

/// Ask the device for its version and print it
pub async fn run(config: &Config, output: &Output) -> Result<()> {
    let device = super::device(config)?;
    let version = device
        .probe()
        .await
        .with_context(|| format!("Device at {} did not answer", device.host()))?;

    match output.format {
        OutputFormat::Human => {
            println!("✓ {} is reachable", device.host());
            output.print_value(&version);
        }
        OutputFormat::Json => output.print_value(&version),
        OutputFormat::Quiet => {}
    }

    Ok(())
}
