//! Live synchronization with the device
//!
//! The connection manager owns the lifecycle: probe, bulk fetch, then the
//! patch event stream, with a heartbeat watchdog and reconnect backoff.
//!
//! ## Usage
//!
//! ```ignore
//! let device = Arc::new(HttpDevice::new(config.host_url()?, settings.request_timeout)?);
//! let handle = spawn_connection(device, settings, sink, consumers);
//! ```

mod backoff;
mod device;
mod manager;
mod sse;

pub use backoff::Backoff;
pub use device::{DeviceApi, EventStream, HttpDevice};
pub use manager::{
    fetch_snapshot, spawn_connection, ConnectionCommand, ConnectionEvent, ConnectionHandle,
    ConnectionState, SyncSettings,
};
pub use sse::{events, SseDecoder};
