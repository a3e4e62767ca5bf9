//! Typed views over the mirrored device state
//!
//! The store keeps the raw JSON tree; these structures are the shapes read
//! back out of it. Every struct is lenient: missing fields and explicit
//! `null`s fall back to defaults, because the device omits or nulls fields
//! freely between firmwares.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

use crate::pointer::Pointer;

/// Top-level sections of the document, each fetched with its own request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    System,
    Players,
    Collections,
    Playlists,
    Storages,
    Jobs,
}

impl Section {
    /// Every section, in bulk-fetch order
    pub const ALL: [Section; 6] = [
        Section::System,
        Section::Players,
        Section::Collections,
        Section::Playlists,
        Section::Storages,
        Section::Jobs,
    ];

    /// REST resource (below the API root) returning this section
    pub fn resource(&self) -> &'static str {
        match self {
            Section::System => "/system",
            Section::Players => "/players/1",
            Section::Collections => "/collections",
            Section::Playlists => "/playlists",
            Section::Storages => "/storages",
            Section::Jobs => "/jobs",
        }
    }

    /// Where the fetched body lands in the document
    pub fn pointer(&self) -> Pointer {
        match self {
            Section::Players => Pointer::from_segments(["players", "1"]),
            other => Pointer::from_segments([other.key()]),
        }
    }

    /// Top-level document key
    pub fn key(&self) -> &'static str {
        match self {
            Section::System => "system",
            Section::Players => "players",
            Section::Collections => "collections",
            Section::Playlists => "playlists",
            Section::Storages => "storages",
            Section::Jobs => "jobs",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// The two playheads of a player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Playback {
    Preview,
    Program,
}

impl Playback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Playback::Preview => "preview",
            Playback::Program => "program",
        }
    }
}

impl FromStr for Playback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preview" => Ok(Playback::Preview),
            "program" => Ok(Playback::Program),
            other => Err(format!("unknown playback '{}'", other)),
        }
    }
}

impl fmt::Display for Playback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one playhead (preview or program)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Playhead {
    #[serde(deserialize_with = "null_as_default")]
    pub state: String,
    /// Seconds into the media
    #[serde(deserialize_with = "null_as_default")]
    pub position: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub normalized_position: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub media_position: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub is_resource_constrained: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub media_url: String,
    /// dB, -200 = mute, otherwise -39 ... +12
    #[serde(deserialize_with = "null_as_default")]
    pub volume: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub is_muted: bool,
}

impl Default for Playhead {
    fn default() -> Self {
        Self {
            state: "stopped".to_string(),
            position: 0.0,
            normalized_position: 0.0,
            media_position: 0.0,
            is_resource_constrained: false,
            media_url: String::new(),
            volume: 0.0,
            is_muted: false,
        }
    }
}

impl Playhead {
    /// The collection slot this playhead is showing, if any
    pub fn media(&self) -> Option<MediaRef> {
        self.media_url.parse().ok()
    }
}

/// How the next take is performed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TakeConfiguration {
    /// Seconds
    #[serde(deserialize_with = "null_as_default")]
    pub transition_duration: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub start_point: String,
    #[serde(deserialize_with = "null_as_default")]
    pub mode: String,
    #[serde(deserialize_with = "null_as_default")]
    pub transition_type: String,
}

impl Default for TakeConfiguration {
    fn default() -> Self {
        Self {
            transition_duration: 0.0,
            start_point: "inpoint".to_string(),
            mode: "swap".to_string(),
            transition_type: "crossfade".to_string(),
        }
    }
}

/// A player with its two playheads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Player {
    #[serde(deserialize_with = "null_as_default")]
    pub preview: Playhead,
    #[serde(deserialize_with = "null_as_default")]
    pub program: Playhead,
    /// Progress of a running take, `None` when idle
    pub take_progress: Option<f64>,
    #[serde(deserialize_with = "null_as_default")]
    pub take_configuration: TakeConfiguration,
}

impl Player {
    pub fn playhead(&self, playback: Playback) -> &Playhead {
        match playback {
            Playback::Preview => &self.preview,
            Playback::Program => &self.program,
        }
    }
}

/// A numbered collection of media slots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Collection {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub slots: BTreeMap<String, Slot>,
}

/// One media slot of a collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Slot {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub content_url: String,
    pub inpoint: Option<f64>,
    pub outpoint: Option<f64>,
    pub custom_duration: Option<f64>,
    /// Effective duration in seconds
    pub duration: Option<f64>,
    pub media_duration: Option<f64>,
    #[serde(deserialize_with = "null_as_default")]
    pub infinite_duration: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub scale_mode: String,
    #[serde(deserialize_with = "null_as_default")]
    pub is_playable: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub media_exists: bool,
    pub metadata: Value,
}

/// A playlist of cue entries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Playlist {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub entries: BTreeMap<String, PlaylistEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlaylistEntry {
    #[serde(deserialize_with = "null_as_default")]
    pub end_action: String,
    #[serde(deserialize_with = "null_as_default")]
    pub media_url: String,
    #[serde(deserialize_with = "null_as_default")]
    pub transition_duration: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub start_point: String,
}

/// A storage volume; only the free space is interpreted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Storage {
    #[serde(deserialize_with = "null_as_default")]
    pub available_size: f64,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Device identity and health
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemInfo {
    #[serde(deserialize_with = "null_as_default")]
    pub uptime: f64,
    pub product_type: Option<String>,
    pub serial_number: Option<String>,
    pub hostname: Option<String>,
    pub firmware_version: Option<FirmwareVersion>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    #[serde(default)]
    pub tag: Option<String>,
}

impl FirmwareVersion {
    /// Compare against a minimum `major.minor.patch`, ignoring the tag
    pub fn is_at_least(&self, major: u32, minor: u32, patch: u32) -> bool {
        (self.major, self.minor, self.patch) >= (major, minor, patch)
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(tag) = &self.tag {
            write!(f, ".{}", tag)?;
        }
        Ok(())
    }
}

/// Treat an explicit `null` like a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Reference to a collection slot, `core://collection/<c>/slot/<s>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub collection: String,
    pub slot: String,
}

impl FromStr for MediaRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("core://collection/")
            .ok_or_else(|| format!("'{}' is not a collection media url", s))?;
        let mut parts = rest.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(collection), Some("slot"), Some(slot))
                if !collection.is_empty() && !slot.is_empty() =>
            {
                Ok(MediaRef {
                    collection: collection.to_string(),
                    slot: slot.to_string(),
                })
            }
            _ => Err(format!("malformed collection media url '{}'", s)),
        }
    }
}

/// The document the store holds before the first successful sync
pub fn default_document() -> Value {
    let playhead = serde_json::to_value(Playhead::default()).unwrap_or(Value::Null);
    json!({
        "storages": {},
        "jobs": {},
        "system": { "uptime": 0 },
        "players": {
            "1": {
                "preview": playhead.clone(),
                "program": playhead,
                "takeProgress": null,
                "takeConfiguration": {
                    "transitionDuration": 0,
                    "startPoint": "inpoint",
                    "mode": "swap",
                    "transitionType": "crossfade"
                }
            }
        },
        "playlists": {},
        "collections": {}
    })
}
