//! Watch command handler
//!
//! Runs the connection manager until Ctrl-C and prints every flushed
//! variable batch.

use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use tracing::{debug, info};

use coreplay_core::{
    spawn_connection, Config, Consumers, FeedbackId, StateStore, VariableDefinition,
    VariableSink, VariableUpdates,
};

use crate::output::Output;

/// Prints flushed batches
struct PrintSink {
    output: Output,
}

impl VariableSink for PrintSink {
    fn set_variable_values(&self, values: VariableUpdates) {
        self.output.print_variables(Local::now(), &values);
    }
}

/// Logs consumer notifications; the CLI has no feedback UI
struct LogConsumers;

impl Consumers for LogConsumers {
    fn check_feedbacks(&self, ids: &[FeedbackId]) {
        debug!(feedbacks = ?ids, "Feedbacks invalidated");
    }

    fn check_all_feedbacks(&self) {
        debug!("All feedbacks invalidated");
    }

    fn redefine(&self, store: &StateStore, variables: &[VariableDefinition]) {
        let collections = store.collections().map(|c| c.len()).unwrap_or(0);
        let playlists = store.playlists().map(|p| p.len()).unwrap_or(0);
        info!(
            variables = variables.len(),
            collections, playlists, "Definitions rebuilt"
        );
    }
}

/// Mirror the device until interrupted
pub async fn run(config: &Config, output: &Output) -> Result<()> {
    let device = super::device(config)?;
    if !output.is_quiet() {
        output.message(&format!("Watching {} (Ctrl-C to stop)", device.host()));
    }

    let mut handle = spawn_connection(
        Arc::new(device),
        config.sync_settings(),
        Arc::new(PrintSink { output: *output }),
        Arc::new(LogConsumers),
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            event = handle.event_rx.recv() => match event {
                Some(event) => output.print_event(&event),
                None => break,
            },
        }
    }

    handle.shutdown().await;
    Ok(())
}
