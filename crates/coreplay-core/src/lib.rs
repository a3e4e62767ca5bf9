//! CorePlay Core Library
//!
//! Keeps a live in-memory mirror of a CorePlay media player's state and
//! derives outbound variables from it.
//!
//! # Architecture
//!
//! - **Snapshot**: every top-level section is fetched over REST and replaces
//!   the document wholesale.
//! - **Patch stream**: the device then pushes JSON patch batches over
//!   server-sent events; each batch is applied atomically.
//! - **Routing**: changed paths are matched against a static subscription
//!   table whose effects push values into a debounced variable queue.
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let settings = config.sync_settings();
//! let device = Arc::new(HttpDevice::new(config.host_url()?, settings.request_timeout)?);
//! let handle = spawn_connection(device, settings, sink, consumers);
//! ```
//!
//! # Modules
//!
//! - `sync`: connection lifecycle, device client, event stream decoding
//! - `store`: the mirrored document and its phase discipline
//! - `patch`: atomic JSON patch application
//! - `router`: path subscriptions and their effects
//! - `queue`: debounced variable emission
//! - `models`: typed views over the document
//! - `config`: application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod patch;
pub mod pointer;
pub mod queue;
pub mod router;
pub mod store;
pub mod sync;

pub use config::Config;
pub use error::{ErrorScope, StoreError, SyncError, SyncResult};
pub use patch::{PatchBatch, PatchError, PatchOp};
pub use pointer::{Pointer, PointerError};
pub use queue::{DebouncedQueue, UpdateQueue, VariableDefinition, VariableSink, VariableUpdates};
pub use router::{Consumers, EffectError, FeedbackId, SubscriptionRouter};
pub use store::{SharedStore, Snapshot, StateStore, StorePhase};
pub use sync::{
    spawn_connection, ConnectionCommand, ConnectionEvent, ConnectionHandle, ConnectionState,
    DeviceApi, HttpDevice, SyncSettings,
};
