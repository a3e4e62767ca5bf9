//! Reconciled state store
//!
//! The `StateStore` owns the mirrored device document. It has exactly two
//! mutation entry points:
//!
//! - `initialize`: wholesale replacement from a bulk-fetch snapshot, only
//!   while the connection is syncing
//! - `mutate`: atomic application of one patch batch, only while streaming
//!
//! Everything else reads. Typed accessors deserialize common substructures
//! (players, collections, playlists, system, storages, jobs) on demand.
//!
//! ## Usage
//!
//! ```ignore
//! let store = SharedStore::new();
//!
//! store.write().begin_sync();
//! store.write().initialize(snapshot)?;
//! store.write().begin_streaming();
//!
//! let changed = store.write().mutate(&batch)?;
//! let program = store.read().player("1")?.program;
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::StoreError;
use crate::models::{
    default_document, Collection, Player, Playlist, Section, Slot, Storage, SystemInfo,
};
use crate::patch::{self, PatchOp};
use crate::pointer::Pointer;

/// Which mutation the store currently accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePhase {
    /// Neither; connection is down or connecting
    Closed,
    /// Wholesale `initialize` only
    Syncing,
    /// Incremental `mutate` only
    Streaming,
}

impl fmt::Display for StorePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorePhase::Closed => "closed",
            StorePhase::Syncing => "syncing",
            StorePhase::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

/// One complete bulk fetch, one body per section
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    sections: HashMap<Section, Value>,
}

impl Snapshot {
    /// Assemble a snapshot; every section must be present
    pub fn from_sections<I>(sections: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = (Section, Value)>,
    {
        let sections: HashMap<Section, Value> = sections.into_iter().collect();
        if let Some(missing) = Section::ALL.iter().find(|s| !sections.contains_key(s)) {
            return Err(StoreError::IncompleteSnapshot { missing: *missing });
        }
        Ok(Self { sections })
    }

    pub fn get(&self, section: Section) -> Option<&Value> {
        self.sections.get(&section)
    }
}

/// The mirrored document and its mutation discipline
#[derive(Debug)]
pub struct StateStore {
    document: Value,
    phase: StorePhase,
    /// Number of completed `initialize` calls
    syncs: u64,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    /// A closed store holding the default document
    pub fn new() -> Self {
        Self {
            document: default_document(),
            phase: StorePhase::Closed,
            syncs: 0,
        }
    }

    pub fn phase(&self) -> StorePhase {
        self.phase
    }

    /// How many snapshots have been loaded
    pub fn sync_count(&self) -> u64 {
        self.syncs
    }

    /// Accept the next wholesale `initialize`
    pub fn begin_sync(&mut self) {
        self.phase = StorePhase::Syncing;
    }

    /// Accept incremental patches
    pub fn begin_streaming(&mut self) {
        self.phase = StorePhase::Streaming;
    }

    /// Reject all mutation; the last document stays readable
    pub fn close(&mut self) {
        self.phase = StorePhase::Closed;
    }

    // ==================== Mutation ====================

    /// Replace the entire document from a snapshot
    ///
    /// Repeated calls fully overwrite: the result depends only on the
    /// snapshot, never on what was there before.
    pub fn initialize(&mut self, snapshot: Snapshot) -> Result<(), StoreError> {
        if self.phase != StorePhase::Syncing {
            return Err(StoreError::NotSyncing { phase: self.phase });
        }

        let mut document = default_document();
        for section in Section::ALL {
            let body = snapshot
                .get(section)
                .cloned()
                .ok_or(StoreError::IncompleteSnapshot { missing: section })?;
            let target = section
                .pointer()
                .segments()
                .iter()
                .try_fold(&mut document, |node, key| node.get_mut(key.as_str()))
                .ok_or_else(|| StoreError::NotFound {
                    path: section.pointer(),
                })?;
            *target = body;
        }

        self.document = document;
        self.syncs += 1;
        Ok(())
    }

    /// Apply one patch batch atomically
    ///
    /// Returns the distinct operation paths of the batch in batch order. On
    /// error the visible document is exactly what it was before the call.
    pub fn mutate(&mut self, batch: &[PatchOp]) -> Result<Vec<Pointer>, StoreError> {
        if self.phase != StorePhase::Streaming {
            return Err(StoreError::NotStreaming { phase: self.phase });
        }

        self.document = patch::apply(&self.document, batch)?;

        let mut changed: Vec<Pointer> = Vec::with_capacity(batch.len());
        for op in batch {
            if !changed.contains(op.path()) {
                changed.push(op.path().clone());
            }
        }
        Ok(changed)
    }

    // ==================== Reads ====================

    /// The whole document
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Raw value at `path`
    pub fn read(&self, path: &Pointer) -> Result<&Value, StoreError> {
        path.segments()
            .iter()
            .try_fold(&self.document, |node, key| match node {
                Value::Object(map) => map.get(key),
                Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
            .ok_or_else(|| StoreError::NotFound { path: path.clone() })
    }

    /// Value at `path` deserialized into `T`
    pub fn read_as<T: DeserializeOwned>(&self, path: &Pointer) -> Result<T, StoreError> {
        let value = self.read(path)?;
        T::deserialize(value).map_err(|source| StoreError::Shape {
            path: path.clone(),
            source,
        })
    }

    pub fn system(&self) -> Result<SystemInfo, StoreError> {
        self.read_as(&Pointer::from_segments(["system"]))
    }

    pub fn players(&self) -> Result<BTreeMap<String, Player>, StoreError> {
        self.read_as(&Pointer::from_segments(["players"]))
    }

    pub fn player(&self, id: &str) -> Result<Player, StoreError> {
        self.read_as(&Pointer::from_segments(["players", id]))
    }

    pub fn collections(&self) -> Result<BTreeMap<String, Collection>, StoreError> {
        self.read_as(&Pointer::from_segments(["collections"]))
    }

    pub fn collection(&self, id: &str) -> Result<Collection, StoreError> {
        self.read_as(&Pointer::from_segments(["collections", id]))
    }

    pub fn slot(&self, collection: &str, slot: &str) -> Result<Slot, StoreError> {
        self.read_as(&Pointer::from_segments([
            "collections",
            collection,
            "slots",
            slot,
        ]))
    }

    pub fn playlists(&self) -> Result<BTreeMap<String, Playlist>, StoreError> {
        self.read_as(&Pointer::from_segments(["playlists"]))
    }

    pub fn storages(&self) -> Result<BTreeMap<String, Storage>, StoreError> {
        self.read_as(&Pointer::from_segments(["storages"]))
    }

    /// Jobs are passed through untyped
    pub fn jobs(&self) -> Result<&Value, StoreError> {
        self.read(&Pointer::from_segments(["jobs"]))
    }
}

/// A store shared between the connection task (single writer) and readers
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    inner: Arc<RwLock<StateStore>>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read access; a poisoned lock still yields the last committed document
    pub fn read(&self) -> RwLockReadGuard<'_, StateStore> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write access, held by the connection manager for one whole
    /// decode-apply-dispatch cycle
    pub fn write(&self) -> RwLockWriteGuard<'_, StateStore> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::PatchError;
    use serde_json::json;

    fn snapshot() -> Snapshot {
        Snapshot::from_sections([
            (
                Section::System,
                json!({ "uptime": 10, "serialNumber": "CP-1", "hostname": "stage-left" }),
            ),
            (
                Section::Players,
                json!({
                    "preview": { "state": "paused", "mediaUrl": "core://collection/1/slot/1" },
                    "program": { "state": "playing", "position": 2.0 },
                    "takeProgress": null,
                    "takeConfiguration": { "transitionDuration": 1.5, "startPoint": "inpoint", "mode": "copy", "transitionType": "directCut" }
                }),
            ),
            (
                Section::Collections,
                json!({ "1": { "name": "Intro", "slots": { "1": { "name": "Opener", "duration": 10.0 } } } }),
            ),
            (Section::Playlists, json!({})),
            (Section::Storages, json!({ "internal": { "availableSize": 500 } })),
            (Section::Jobs, json!({})),
        ])
        .unwrap()
    }

    fn streaming_store() -> StateStore {
        let mut store = StateStore::new();
        store.begin_sync();
        store.initialize(snapshot()).unwrap();
        store.begin_streaming();
        store
    }

    fn ops(raw: Value) -> Vec<PatchOp> {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn test_new_store_holds_default_document() {
        let store = StateStore::new();
        assert_eq!(store.phase(), StorePhase::Closed);
        assert_eq!(store.player("1").unwrap(), Player::default());
        assert_eq!(store.sync_count(), 0);
    }

    #[test]
    fn test_initialize_requires_syncing() {
        let mut store = StateStore::new();
        let err = store.initialize(snapshot()).unwrap_err();
        assert!(matches!(err, StoreError::NotSyncing { phase: StorePhase::Closed }));

        store.begin_streaming();
        assert!(store.initialize(snapshot()).is_err());
    }

    #[test]
    fn test_initialize_places_sections() {
        let store = streaming_store();
        assert_eq!(store.sync_count(), 1);
        assert_eq!(store.system().unwrap().hostname.as_deref(), Some("stage-left"));
        assert_eq!(store.player("1").unwrap().program.state, "playing");
        assert_eq!(store.collection("1").unwrap().name, "Intro");
        assert_eq!(store.slot("1", "1").unwrap().duration, Some(10.0));
        assert_eq!(store.storages().unwrap()["internal"].available_size, 500.0);
        assert_eq!(store.jobs().unwrap(), &json!({}));
    }

    #[test]
    fn test_initialize_fully_overwrites() {
        let mut store = streaming_store();
        store
            .mutate(&ops(json!([{ "op": "add", "path": "/players/2", "value": {} }])))
            .unwrap();
        assert!(store.player("2").is_ok());

        store.begin_sync();
        store.initialize(snapshot()).unwrap();
        assert!(matches!(store.player("2"), Err(StoreError::NotFound { .. })));
        assert_eq!(store.sync_count(), 2);
    }

    #[test]
    fn test_incomplete_snapshot_rejected() {
        let err = Snapshot::from_sections([(Section::System, json!({}))]).unwrap_err();
        assert!(matches!(err, StoreError::IncompleteSnapshot { missing: Section::Players }));
    }

    #[test]
    fn test_mutate_requires_streaming() {
        let mut store = StateStore::new();
        let err = store
            .mutate(&ops(json!([{ "op": "replace", "path": "/system/uptime", "value": 1 }])))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotStreaming { .. }));
    }

    #[test]
    fn test_mutate_returns_distinct_op_paths() {
        let mut store = streaming_store();
        let changed = store
            .mutate(&ops(json!([
                { "op": "replace", "path": "/players/1/program/position", "value": 3.0 },
                { "op": "replace", "path": "/system/uptime", "value": 11 },
                { "op": "replace", "path": "/players/1/program/position", "value": 3.5 }
            ])))
            .unwrap();
        let changed: Vec<String> = changed.iter().map(|p| p.to_string()).collect();
        assert_eq!(changed, vec!["/players/1/program/position", "/system/uptime"]);
        assert_eq!(store.player("1").unwrap().program.position, 3.5);
    }

    #[test]
    fn test_failed_mutate_keeps_document() {
        let mut store = streaming_store();
        let before = store.document().clone();
        let err = store
            .mutate(&ops(json!([
                { "op": "replace", "path": "/system/uptime", "value": 99 },
                { "op": "remove", "path": "/collections/1/nonexistent" }
            ])))
            .unwrap_err();
        assert!(matches!(err, StoreError::Patch(PatchError::PathNotFound { .. })));
        assert_eq!(store.document(), &before);
    }

    #[test]
    fn test_read_shape_error() {
        let mut store = streaming_store();
        store
            .mutate(&ops(json!([{ "op": "replace", "path": "/collections/1", "value": "oops" }])))
            .unwrap();
        assert!(matches!(store.collection("1"), Err(StoreError::Shape { .. })));
    }

    #[test]
    fn test_read_array_index() {
        let mut store = streaming_store();
        store
            .mutate(&ops(json!([{ "op": "add", "path": "/jobs/list", "value": ["a", "b"] }])))
            .unwrap();
        let value = store.read(&Pointer::parse("/jobs/list/1").unwrap()).unwrap();
        assert_eq!(value, &json!("b"));
    }

    #[test]
    fn test_shared_store_roundtrip() {
        let shared = SharedStore::new();
        shared.write().begin_sync();
        shared.write().initialize(snapshot()).unwrap();
        let reader = shared.clone();
        assert_eq!(reader.read().system().unwrap().serial_number.as_deref(), Some("CP-1"));
    }
}
