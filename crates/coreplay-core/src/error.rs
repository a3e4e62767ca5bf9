//! Error types
//!
//! Every error in the synchronization core is recoverable. The classification
//! helpers tell the connection manager how far the damage reaches: a single
//! message, a single batch, or the whole connection.

use thiserror::Error;

use crate::models::Section;
use crate::patch::PatchError;
use crate::pointer::Pointer;
use crate::store::StorePhase;

/// Errors raised by the state store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Wholesale replacement outside of a bulk sync
    #[error("Cannot initialize the store while {phase}; initialization only happens during sync")]
    NotSyncing { phase: StorePhase },

    /// Incremental patching outside of streaming
    #[error("Cannot patch the store while {phase}; patches only apply while streaming")]
    NotStreaming { phase: StorePhase },

    /// A snapshot was assembled without every section
    #[error("Snapshot is missing the '{missing}' section")]
    IncompleteSnapshot { missing: Section },

    /// The batch could not be applied; the document is unchanged
    #[error(transparent)]
    Patch(#[from] PatchError),

    /// Nothing exists at the requested path
    #[error("Nothing at '{path}'")]
    NotFound { path: Pointer },

    /// A value exists but does not have the expected shape
    #[error("Unexpected shape at '{path}': {source}")]
    Shape {
        path: Pointer,
        #[source]
        source: serde_json::Error,
    },
}

/// How far an error reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Connection is torn down and retried after backoff
    Connection,
    /// One stream message is dropped
    Message,
    /// One patch batch is skipped
    Batch,
}

/// Errors raised by the connection lifecycle
#[derive(Error, Debug)]
pub enum SyncError {
    /// Probe, fetch or stream could not reach the device
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The device answered with a non-success status
    #[error("Device returned HTTP {status} for {resource}")]
    Http { status: u16, resource: String },

    /// The event stream ended or failed
    #[error("Event stream closed: {0}")]
    StreamClosed(String),

    /// A stream payload is not a JSON array
    #[error("Undecodable stream message: {reason}")]
    Decode { reason: String },

    /// A bulk-fetch body is not valid JSON
    #[error("Invalid JSON body for {section}: {source}")]
    Body {
        section: Section,
        #[source]
        source: serde_json::Error,
    },

    /// A patch batch was rejected by the store
    #[error("Patch rejected: {0}")]
    Store(#[from] StoreError),

    /// No message arrived within the heartbeat timeout
    #[error("No message from device within {timeout_ms} ms")]
    Watchdog { timeout_ms: u64 },

    /// Too many consecutive batches failed to apply
    #[error("{failures} consecutive patch batches failed; forcing resync")]
    Drift { failures: u32 },
}

impl SyncError {
    /// Scope this error is contained to
    pub fn scope(&self) -> ErrorScope {
        match self {
            SyncError::Decode { .. } => ErrorScope::Message,
            SyncError::Store(_) => ErrorScope::Batch,
            SyncError::Transport(_)
            | SyncError::Http { .. }
            | SyncError::StreamClosed(_)
            | SyncError::Body { .. }
            | SyncError::Watchdog { .. }
            | SyncError::Drift { .. } => ErrorScope::Connection,
        }
    }

    /// Whether a healthy connection went stale and should be re-established
    /// immediately rather than after a backoff delay
    ///
    /// Transport failures, including a stream the device closes, always wait
    /// out the backoff so a device that hangs up at once is not hammered.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, SyncError::Watchdog { .. } | SyncError::Drift { .. })
    }
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;
