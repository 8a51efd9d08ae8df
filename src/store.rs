//! Settings store collaborators.
//!
//! The store is owned by the host environment: a key/value map per storage
//! area with change notification. Writes queue a [`ChangeSet`] per area; the
//! host drains them with [`SettingsStore::take_changes`] and delivers them in
//! write order.
//!
//! Two implementations:
//! - [`MemoryStore`]: in-process, with a switch that makes reads fail
//! - [`FileStore`]: TOML file on disk, one table per area

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::StoreError;

/// Values of one storage area, keyed by setting name.
pub type StoredValues = BTreeMap<String, Value>;

/// Per-key deltas of a single write.
pub type ChangeSet = BTreeMap<String, StorageChange>;

/// Named storage area. The blocker only listens to [`StorageArea::Sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageArea {
    Sync,
    Local,
    Managed,
}

impl StorageArea {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageArea::Sync => "sync",
            StorageArea::Local => "local",
            StorageArea::Managed => "managed",
        }
    }
}

impl fmt::Display for StorageArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageArea {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(StorageArea::Sync),
            "local" => Ok(StorageArea::Local),
            "managed" => Ok(StorageArea::Managed),
            other => Err(StoreError::Unavailable(format!(
                "unknown storage area `{other}`"
            ))),
        }
    }
}

/// `{newValue, oldValue}` for one key. `None` means the key was absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
}

/// Key/value store with change notification.
pub trait SettingsStore {
    /// Returns the stored value for every key of `defaults`, falling back to
    /// the default where the key is absent.
    fn get(&self, area: StorageArea, defaults: &StoredValues) -> Result<StoredValues, StoreError>;

    /// Writes all `values` at once. Keys whose value actually changed are
    /// reported in a single [`ChangeSet`].
    fn set(&mut self, area: StorageArea, values: &StoredValues) -> Result<(), StoreError>;

    /// Deletes keys, reported as changes with no `new_value`.
    fn remove(&mut self, area: StorageArea, keys: &[&str]) -> Result<(), StoreError>;

    /// Drains pending change notifications, oldest first.
    fn take_changes(&mut self) -> Vec<(StorageArea, ChangeSet)>;
}

/// Area contents plus the notification queue; shared by both stores.
#[derive(Debug, Default)]
struct Areas {
    values: BTreeMap<StorageArea, StoredValues>,
    pending: Vec<(StorageArea, ChangeSet)>,
}

impl Areas {
    fn get(&self, area: StorageArea, defaults: &StoredValues) -> StoredValues {
        let stored = self.values.get(&area);
        defaults
            .iter()
            .map(|(key, default)| {
                let value = stored
                    .and_then(|values| values.get(key))
                    .unwrap_or(default)
                    .clone();
                (key.clone(), value)
            })
            .collect()
    }

    fn set(&mut self, area: StorageArea, values: &StoredValues) {
        let stored = self.values.entry(area).or_default();
        let mut changes = ChangeSet::new();
        for (key, value) in values {
            let old = stored.insert(key.clone(), value.clone());
            if old.as_ref() != Some(value) {
                changes.insert(
                    key.clone(),
                    StorageChange {
                        new_value: Some(value.clone()),
                        old_value: old,
                    },
                );
            }
        }
        self.queue(area, changes);
    }

    fn remove(&mut self, area: StorageArea, keys: &[&str]) {
        let stored = self.values.entry(area).or_default();
        let mut changes = ChangeSet::new();
        for key in keys {
            if let Some(old) = stored.remove(*key) {
                changes.insert(
                    key.to_string(),
                    StorageChange {
                        new_value: None,
                        old_value: Some(old),
                    },
                );
            }
        }
        self.queue(area, changes);
    }

    fn queue(&mut self, area: StorageArea, changes: ChangeSet) {
        if changes.is_empty() {
            return;
        }
        debug!(%area, keys = changes.len(), "storage change queued");
        self.pending.push((area, changes));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryStore
// ─────────────────────────────────────────────────────────────────────────────

/// In-process store. Reads can be made to fail to exercise the
/// store-unavailable path.
#[derive(Debug, Default)]
pub struct MemoryStore {
    areas: Areas,
    unavailable: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an area without queueing change notifications.
    pub fn with_values(mut self, area: StorageArea, values: StoredValues) -> Self {
        self.areas.values.insert(area, values);
        self
    }

    /// While set, every `get` fails with [`StoreError::Unavailable`].
    pub fn set_unavailable(&mut self, unavailable: bool) {
        self.unavailable = unavailable;
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, area: StorageArea, defaults: &StoredValues) -> Result<StoredValues, StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable("storage API not present".into()));
        }
        Ok(self.areas.get(area, defaults))
    }

    fn set(&mut self, area: StorageArea, values: &StoredValues) -> Result<(), StoreError> {
        self.areas.set(area, values);
        Ok(())
    }

    fn remove(&mut self, area: StorageArea, keys: &[&str]) -> Result<(), StoreError> {
        self.areas.remove(area, keys);
        Ok(())
    }

    fn take_changes(&mut self) -> Vec<(StorageArea, ChangeSet)> {
        std::mem::take(&mut self.areas.pending)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FileStore
// ─────────────────────────────────────────────────────────────────────────────

/// Store persisted as a TOML file:
///
/// ```toml
/// [sync]
/// blockImages = true
/// blockVideos = false
/// ```
///
/// The file is read once at open time and rewritten on every write.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    areas: Areas,
}

impl FileStore {
    /// Opens (or lazily creates) the store at `path`. A missing file is an
    /// empty store; an unreadable or invalid one is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut areas = Areas::default();
        if path.is_file() {
            let content = fs::read_to_string(&path)?;
            let tables: BTreeMap<String, StoredValues> = toml::from_str(&content)?;
            for (name, values) in tables {
                areas.values.insert(name.parse()?, values);
            }
            info!(path = %path.display(), "Settings store loaded");
        }
        Ok(Self { path, areas })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), StoreError> {
        let tables: BTreeMap<&str, &StoredValues> = self
            .areas
            .values
            .iter()
            .map(|(area, values)| (area.as_str(), values))
            .collect();
        let content = toml::to_string_pretty(&tables)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, content)?;
        debug!(path = %self.path.display(), "Settings store saved");
        Ok(())
    }
}

impl SettingsStore for FileStore {
    fn get(&self, area: StorageArea, defaults: &StoredValues) -> Result<StoredValues, StoreError> {
        Ok(self.areas.get(area, defaults))
    }

    fn set(&mut self, area: StorageArea, values: &StoredValues) -> Result<(), StoreError> {
        self.areas.set(area, values);
        self.persist()
    }

    fn remove(&mut self, area: StorageArea, keys: &[&str]) -> Result<(), StoreError> {
        self.areas.remove(area, keys);
        self.persist()
    }

    fn take_changes(&mut self) -> Vec<(StorageArea, ChangeSet)> {
        std::mem::take(&mut self.areas.pending)
    }
}
