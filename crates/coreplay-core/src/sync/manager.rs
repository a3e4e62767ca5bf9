//! Connection lifecycle
//!
//! Runs on its own tokio task and keeps the mirror alive:
//!
//! 1. `Connecting`: probe the device. Failure waits out the backoff delay.
//! 2. `Syncing`: fetch every section concurrently and replace the document.
//! 3. `Streaming`: apply each patch batch from the event stream and route
//!    the changed paths. A heartbeat watchdog forces a fresh sync when the
//!    device goes quiet.
//!
//! A watchdog timeout or patch drift reconnects at once. Anything else,
//! including a stream the device closes, waits out the backoff first.
//!
//! Every exit from a connection tears down the stream, the watchdog and the
//! pending flush timer before the next attempt starts.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::try_join_all;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::backoff::Backoff;
use super::device::{DeviceApi, EventStream};
use crate::error::{ErrorScope, SyncError, SyncResult};
use crate::models::{Section, SystemInfo};
use crate::patch::decode_ops;
use crate::pointer::Pointer;
use crate::queue::{
    DebouncedQueue, UpdateQueue, VariableSink, VariableUpdates, DEFAULT_INTERVAL,
};
use crate::router::{Consumers, DispatchReport, SubscriptionRouter, VARIABLE_DEFINITIONS};
use crate::store::{SharedStore, Snapshot, StateStore};

/// Oldest firmware the mirror is known to work with
const MINIMUM_FIRMWARE: (u32, u32, u32) = (1, 1, 1);

/// Timing and policy knobs of the connection manager
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    pub heartbeat_timeout: Duration,
    pub debounce_interval: Duration,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub reconnect_multiplier: f64,
    pub request_timeout: Duration,
    /// Consecutive rejected batches that force a resync; 0 disables
    pub resync_after_patch_failures: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_millis(2200),
            debounce_interval: DEFAULT_INTERVAL,
            initial_reconnect_delay: Duration::from_millis(600),
            max_reconnect_delay: Duration::from_millis(12_000),
            reconnect_multiplier: 1.1,
            request_timeout: Duration::from_millis(5000),
            resync_after_patch_failures: 3,
        }
    }
}

/// Commands sent to the connection task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionCommand {
    /// Tear down and start over with a fresh sync
    Reconnect,
    /// Tear down and stop the task
    Shutdown,
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected; waiting to retry or stopped
    Disconnected,
    /// Probing the device
    Connecting,
    /// Fetching the full document
    Syncing,
    /// Applying live patches
    Streaming,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Syncing => "syncing",
            ConnectionState::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

/// Events emitted by the connection task
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Connection state changed
    StatusChanged(ConnectionState),
    /// A bulk fetch replaced the document
    Synced { sections: usize },
    /// A patch batch was skipped; the document is unchanged
    PatchRejected(String),
    /// The connection was lost and a fresh sync starts immediately
    Resync(String),
    /// A connection attempt failed and will be retried after backoff
    Error(String),
}

/// Handle to control the connection task
pub struct ConnectionHandle {
    /// Send commands to the connection task
    pub command_tx: mpsc::Sender<ConnectionCommand>,
    /// Receive events from the connection task
    pub event_rx: mpsc::Receiver<ConnectionEvent>,
    /// Watch the connection state
    pub status_rx: watch::Receiver<ConnectionState>,
    /// The mirrored document
    pub store: SharedStore,
    /// Outbound variable queue, for reading tracked values
    pub queue: DebouncedQueue,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    /// Ask for a full teardown and a fresh sync
    pub async fn reconnect(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Reconnect).await;
    }

    /// Stop the task and wait for it to finish tearing down
    pub async fn shutdown(self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "Connection task ended abnormally");
        }
    }
}

/// Spawn the connection task
///
/// Returns a handle to control and monitor it. The task reconnects on its
/// own until shut down.
pub fn spawn_connection(
    device: Arc<dyn DeviceApi>,
    settings: SyncSettings,
    sink: Arc<dyn VariableSink>,
    consumers: Arc<dyn Consumers>,
) -> ConnectionHandle {
    let (command_tx, command_rx) = mpsc::channel(16);
    let (event_tx, event_rx) = mpsc::channel(64);
    let (status_tx, status_rx) = watch::channel(ConnectionState::Disconnected);

    let store = SharedStore::new();
    let queue =
        DebouncedQueue::with_definitions(settings.debounce_interval, sink, VARIABLE_DEFINITIONS);

    let manager = ConnectionManager {
        device,
        store: store.clone(),
        router: SubscriptionRouter::default(),
        queue: queue.clone(),
        consumers,
        backoff: Backoff::new(
            settings.initial_reconnect_delay,
            settings.max_reconnect_delay,
            settings.reconnect_multiplier,
        ),
        settings,
        patch_failures: 0,
        event_tx,
        status_tx,
    };
    let task = tokio::spawn(manager.run(command_rx));

    ConnectionHandle {
        command_tx,
        event_rx,
        status_rx,
        store,
        queue,
        task,
    }
}

/// Fetch every section concurrently
///
/// The first failure drops the remaining requests; nothing is returned
/// unless all sections arrived.
pub async fn fetch_snapshot(device: &dyn DeviceApi) -> SyncResult<Snapshot> {
    let bodies = try_join_all(Section::ALL.into_iter().map(|section| async move {
        let body = device.fetch(section).await?;
        debug!(section = %section, "Fetched section");
        Ok::<_, SyncError>((section, body))
    }))
    .await?;
    Ok(Snapshot::from_sections(bodies)?)
}

/// How one connection ended
enum Exit {
    Shutdown,
    Reconnect,
    /// Ended by an error; `is_connection_loss` decides whether the retry
    /// waits out the backoff
    Ended(SyncError),
}

impl Exit {
    fn from_command(command: Option<ConnectionCommand>) -> Self {
        match command {
            Some(ConnectionCommand::Reconnect) => Exit::Reconnect,
            Some(ConnectionCommand::Shutdown) | None => Exit::Shutdown,
        }
    }
}

struct ConnectionManager {
    device: Arc<dyn DeviceApi>,
    store: SharedStore,
    router: SubscriptionRouter,
    queue: DebouncedQueue,
    consumers: Arc<dyn Consumers>,
    settings: SyncSettings,
    backoff: Backoff,
    patch_failures: u32,
    event_tx: mpsc::Sender<ConnectionEvent>,
    status_tx: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    /// Main loop with reconnection
    async fn run(mut self, mut command_rx: mpsc::Receiver<ConnectionCommand>) {
        loop {
            let exit = self.connect_and_stream(&mut command_rx).await;
            self.teardown();
            self.set_state(ConnectionState::Disconnected);

            match exit {
                Exit::Shutdown => {
                    info!("Connection shut down");
                    break;
                }
                Exit::Reconnect => {
                    info!("Reconnecting on request");
                    self.backoff.reset();
                }
                Exit::Ended(e) if e.is_connection_loss() => {
                    warn!(error = %e, "Connection lost, resyncing");
                    self.emit(ConnectionEvent::Resync(e.to_string()));
                }
                Exit::Ended(e) => {
                    let delay = self.backoff.next_delay();
                    error!(
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Connection failed, will retry in {:.1}s",
                        delay.as_secs_f64()
                    );
                    self.emit(ConnectionEvent::Error(e.to_string()));

                    // Wait before reconnecting, but check for commands
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        command = command_rx.recv() => match command {
                            Some(ConnectionCommand::Reconnect) => self.backoff.reset(),
                            Some(ConnectionCommand::Shutdown) | None => {
                                info!("Connection shut down");
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Connect, sync and stream until the connection ends
    async fn connect_and_stream(
        &mut self,
        command_rx: &mut mpsc::Receiver<ConnectionCommand>,
    ) -> Exit {
        let mut stream = tokio::select! {
            result = self.establish() => match result {
                Ok(stream) => stream,
                Err(e) => return Exit::Ended(e),
            },
            command = command_rx.recv() => return Exit::from_command(command),
        };

        let timeout = self.settings.heartbeat_timeout;
        let watchdog = tokio::time::sleep(timeout);
        tokio::pin!(watchdog);

        loop {
            tokio::select! {
                message = stream.next() => match message {
                    Some(Ok(data)) => {
                        let items = match decode_message(&data) {
                            Ok(items) => items,
                            Err(e) => {
                                error!(error = %e, message = %data, "Dropping stream message");
                                continue;
                            }
                        };
                        watchdog.as_mut().reset(Instant::now() + timeout);

                        let Err(e) = self.apply_batch(items) else {
                            continue;
                        };
                        match e.scope() {
                            ErrorScope::Message => {
                                error!(error = %e, message = %data, "Dropping stream message");
                            }
                            ErrorScope::Batch => {
                                self.patch_failures += 1;
                                error!(
                                    error = %e,
                                    failures = self.patch_failures,
                                    message = %data,
                                    "Can't apply patch batch"
                                );
                                self.emit(ConnectionEvent::PatchRejected(e.to_string()));

                                let limit = self.settings.resync_after_patch_failures;
                                if limit > 0 && self.patch_failures >= limit {
                                    return Exit::Ended(SyncError::Drift {
                                        failures: self.patch_failures,
                                    });
                                }
                            }
                            ErrorScope::Connection => return Exit::Ended(e),
                        }
                    }
                    Some(Err(e)) => return Exit::Ended(e),
                    None => {
                        return Exit::Ended(SyncError::StreamClosed(
                            "device ended the event stream".to_string(),
                        ))
                    }
                },
                () = &mut watchdog => {
                    return Exit::Ended(SyncError::Watchdog {
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                command = command_rx.recv() => return Exit::from_command(command),
            }
        }
    }

    /// Probe, bulk fetch, initialize and open the event stream
    async fn establish(&mut self) -> SyncResult<EventStream> {
        self.set_state(ConnectionState::Connecting);
        let version = self.device.probe().await?;
        self.backoff.reset();
        debug!(version = %version, "Device is alive");

        self.set_state(ConnectionState::Syncing);
        self.store.write().begin_sync();
        let snapshot = fetch_snapshot(self.device.as_ref()).await?;

        {
            let store_handle = self.store.clone();
            let mut store = store_handle.write();
            store.initialize(snapshot)?;
            self.bootstrap(&store);

            let report = self
                .router
                .initialize(&store, &self.queue, self.consumers.as_ref());
            if report.requires_redefinition {
                self.redefine(&store);
            }
            info!(syncs = store.sync_count(), "Synchronized device state");
        }
        self.emit(ConnectionEvent::Synced {
            sections: Section::ALL.len(),
        });

        let stream = self.device.open_stream().await?;
        self.store.write().begin_streaming();
        self.set_state(ConnectionState::Streaming);
        Ok(stream)
    }

    /// Variables and checks that only depend on the freshly fetched system
    fn bootstrap(&self, store: &StateStore) {
        let system = store.system().unwrap_or_else(|e| {
            warn!(error = %e, "System section has an unexpected shape");
            SystemInfo::default()
        });

        let mut updates = VariableUpdates::new();
        updates.insert(
            "serialnumber".to_string(),
            json!(system.serial_number.unwrap_or_default()),
        );
        updates.insert(
            "hostname".to_string(),
            json!(system.hostname.unwrap_or_default()),
        );
        self.queue.enqueue(updates);

        if let Some(version) = system.firmware_version {
            let (major, minor, patch) = MINIMUM_FIRMWARE;
            if !version.is_at_least(major, minor, patch) {
                warn!(
                    "CorePlay firmware {} is older than {}.{}.{}; some state may not mirror correctly",
                    version, major, minor, patch
                );
            }
        }
    }

    /// Apply one batch and route its changed paths
    fn apply_batch(&mut self, items: Vec<Value>) -> SyncResult<()> {
        let batch = decode_ops(items).map_err(|e| SyncError::Decode {
            reason: e.to_string(),
        })?;

        let store_handle = self.store.clone();
        let mut store = store_handle.write();
        let changed = store.mutate(&batch)?;
        self.patch_failures = 0;

        for op in &batch {
            if !is_noisy(op.path()) {
                debug!(op = op.name(), path = %op.path(), "Applied patch");
            } else {
                trace!(path = %op.path(), "Applied patch");
            }
        }

        let mut report = DispatchReport::default();
        for path in &changed {
            report.merge(
                self.router
                    .dispatch(path, &store, &self.queue, self.consumers.as_ref()),
            );
        }
        if report.requires_redefinition {
            self.redefine(&store);
        }
        Ok(())
    }

    /// Republish consumer definitions and re-check every feedback
    fn redefine(&self, store: &StateStore) {
        debug!("Redefining consumer definitions");
        self.consumers.redefine(store, &self.queue.definitions());
        self.consumers.check_all_feedbacks();
    }

    /// Cancel everything owned by the connection that just ended
    fn teardown(&mut self) {
        self.queue.cancel();
        self.store.write().close();
        self.patch_failures = 0;
        debug!("Connection torn down");
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            info!(state = %state, "Connection state changed");
            self.emit(ConnectionEvent::StatusChanged(state));
        }
    }

    /// Deliver an event without ever blocking the connection loop
    fn emit(&self, event: ConnectionEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            trace!(error = %e, "Dropped connection event");
        }
    }
}

/// Parse a stream payload into its raw operations
fn decode_message(data: &str) -> SyncResult<Vec<Value>> {
    let value: Value = serde_json::from_str(data).map_err(|e| SyncError::Decode {
        reason: e.to_string(),
    })?;
    match value {
        Value::Array(items) => Ok(items),
        other => Err(SyncError::Decode {
            reason: format!("expected an array of operations, got {}", json_kind(&other)),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Paths that change several times a second
fn is_noisy(path: &Pointer) -> bool {
    match path.segments() {
        [system, uptime] if system == "system" && uptime == "uptime" => true,
        [.., last] => matches!(last.as_str(), "position" | "normalizedPosition" | "mediaPosition"),
        [] => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_message() {
        assert_eq!(decode_message("[]").unwrap(), Vec::<Value>::new());
        assert_eq!(decode_message("[{\"op\":\"x\"}]").unwrap().len(), 1);

        let err = decode_message("{\"op\":\"add\"}").unwrap_err();
        assert!(err.to_string().contains("an object"));
        assert!(matches!(decode_message("nope"), Err(SyncError::Decode { .. })));
    }

    #[test]
    fn test_noisy_paths() {
        let p = |raw: &str| Pointer::parse(raw).unwrap();
        assert!(is_noisy(&p("/system/uptime")));
        assert!(is_noisy(&p("/players/1/program/position")));
        assert!(is_noisy(&p("/players/1/preview/normalizedPosition")));
        assert!(!is_noisy(&p("/players/1/program/state")));
        assert!(!is_noisy(&p("")));
    }

    #[test]
    fn test_default_settings() {
        let settings = SyncSettings::default();
        assert_eq!(settings.heartbeat_timeout, Duration::from_millis(2200));
        assert_eq!(settings.initial_reconnect_delay, Duration::from_millis(600));
        assert_eq!(settings.max_reconnect_delay, Duration::from_millis(12_000));
        assert_eq!(settings.resync_after_patch_failures, 3);
    }

    #[test]
    fn test_connection_command() {
        assert!(matches!(
            Exit::from_command(Some(ConnectionCommand::Reconnect)),
            Exit::Reconnect
        ));
        assert!(matches!(Exit::from_command(None), Exit::Shutdown));
    }
}
