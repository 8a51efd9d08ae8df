//! The two blocking toggles and their in-memory mirror.
//!
//! [`SettingsCache`] is hydrated once from the store and then kept current by
//! change notifications. It has a single writer (the blocker's notification
//! handler) and is passed explicitly to whatever reads it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::store::{ChangeSet, SettingsStore, StorageArea, StoredValues};

pub const BLOCK_IMAGES: &str = "blockImages";
pub const BLOCK_VIDEOS: &str = "blockVideos";

/// User toggles. Both default to `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub block_images: bool,
    pub block_videos: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            block_images: true,
            block_videos: true,
        }
    }
}

impl Settings {
    /// The defaults as store values, for `get(keys, defaults)`.
    pub fn defaults_map() -> StoredValues {
        Settings::default().to_values()
    }

    pub fn to_values(&self) -> StoredValues {
        StoredValues::from([
            (BLOCK_IMAGES.to_string(), Value::Bool(self.block_images)),
            (BLOCK_VIDEOS.to_string(), Value::Bool(self.block_videos)),
        ])
    }

    /// Reads both flags from store values; absent keys keep their default.
    pub fn from_values(values: &StoredValues) -> Self {
        let defaults = Settings::default();
        Self {
            block_images: values
                .get(BLOCK_IMAGES)
                .map_or(defaults.block_images, |v| truthy(Some(v))),
            block_videos: values
                .get(BLOCK_VIDEOS)
                .map_or(defaults.block_videos, |v| truthy(Some(v))),
        }
    }
}

/// Loose boolean reading of a stored value: `null`, `false`, `0`, `""` and
/// an absent value are false, everything else is true.
pub fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// Read-through copy of the store's `sync` settings.
#[derive(Debug, Clone, Default)]
pub struct SettingsCache {
    current: Settings,
    hydrated: bool,
}

impl SettingsCache {
    /// Starts on the defaults; reads before `load` see `true`/`true`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Settings {
        self.current
    }

    /// `true` once `load` has run (whether or not the store answered).
    pub fn is_hydrated(&self) -> bool {
        self.hydrated
    }

    /// Hydrates from the `sync` area. Never fails: a store error falls back
    /// to the defaults.
    pub fn load(&mut self, store: &dyn SettingsStore) -> Settings {
        self.current = match store.get(StorageArea::Sync, &Settings::defaults_map()) {
            Ok(values) => Settings::from_values(&values),
            Err(e) => {
                warn!(error = %e, "Settings store unavailable, using defaults");
                Settings::default()
            }
        };
        self.hydrated = true;
        info!(
            block_images = self.current.block_images,
            block_videos = self.current.block_videos,
            "Settings loaded"
        );
        self.current
    }

    /// Applies one change notification. Keys other than the two flags are
    /// ignored; a removed key reads as `false`.
    pub fn apply(&mut self, changes: &ChangeSet) {
        if let Some(change) = changes.get(BLOCK_IMAGES) {
            self.current.block_images = truthy(change.new_value.as_ref());
        }
        if let Some(change) = changes.get(BLOCK_VIDEOS) {
            self.current.block_videos = truthy(change.new_value.as_ref());
        }
        debug!(
            block_images = self.current.block_images,
            block_videos = self.current.block_videos,
            "Settings updated"
        );
    }
}
