//! Snapshot command handler

use anyhow::{Context, Result};

use coreplay_core::sync::fetch_snapshot;
use coreplay_core::{Config, DeviceApi, Pointer, StateStore};

use crate::output::Output;

/// Fetch every section once and print the document or one path of it
pub async fn run(config: &Config, path: Option<&str>, output: &Output) -> Result<()> {
    let device = super::device(config)?;
    device
        .probe()
        .await
        .with_context(|| format!("Device at {} did not answer", device.host()))?;
    let snapshot = fetch_snapshot(&device)
        .await
        .with_context(|| format!("Failed to fetch state from {}", device.host()))?;

    let mut store = StateStore::new();
    store.begin_sync();
    store.initialize(snapshot)?;

    match path {
        Some(raw) => {
            let pointer = Pointer::parse(raw).with_context(|| format!("Invalid path: {}", raw))?;
            output.print_value(store.read(&pointer)?);
        }
        None => output.print_value(store.document()),
    }

    Ok(())
}
