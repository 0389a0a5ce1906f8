//! Settings collaborator.
//!
//! Settings are a small key/value document shared with the UI. Two keys are
//! recognized: `protocols` (which decoders are watched) and `app` (inactivity
//! threshold and notification mask). The hub re-reads a key whenever it is
//! told that key changed.

use crate::error::SettingsError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const KEY_PROTOCOLS: &str = "protocols";
pub const KEY_APP: &str = "app";

/// Default inactivity threshold in seconds.
pub const DEFAULT_INACTIVE_SECS: u64 = 1800;

/// The `app` settings value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    /// Seconds without data before a sensor counts as inactive
    pub inactive: u64,
    /// Notification bitmask, see `notify::NOTIFY_*`
    #[serde(default)]
    pub notify: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            inactive: DEFAULT_INACTIVE_SECS,
            notify: 0,
        }
    }
}

/// Watch state of one protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolWatch {
    pub watching: bool,
}

/// The `protocols` settings value.
pub type ProtocolSettings = BTreeMap<String, ProtocolWatch>;

/// Key/value settings storage.
pub trait SettingsStore: Send {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&mut self, key: &str, value: Value) -> Result<(), SettingsError>;

    /// Pick up external modifications. Returns the keys whose value changed.
    fn refresh(&mut self) -> Vec<String> {
        Vec::new()
    }
}

/// Read the `app` key. `None` when absent, null or malformed.
pub fn read_app(store: &dyn SettingsStore) -> Option<AppSettings> {
    let value = store.get(KEY_APP)?;
    if value.is_null() {
        return None;
    }
    match serde_json::from_value(value) {
        Ok(app) => Some(app),
        Err(e) => {
            tracing::warn!("Ignoring malformed app settings: {}", e);
            None
        }
    }
}

/// Read the `protocols` key. `None` when absent, null, empty or malformed.
pub fn read_protocols(store: &dyn SettingsStore) -> Option<ProtocolSettings> {
    let value = store.get(KEY_PROTOCOLS)?;
    if value.is_null() {
        return None;
    }
    match serde_json::from_value::<ProtocolSettings>(value) {
        Ok(protocols) if !protocols.is_empty() => Some(protocols),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!("Ignoring malformed protocol settings: {}", e);
            None
        }
    }
}

/// Settings held in memory only.
#[derive(Debug, Default, Clone)]
pub struct MemorySettings {
    values: BTreeMap<String, Value>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), SettingsError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

/// Settings stored as one JSON object in a file.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    values: BTreeMap<String, Value>,
}

impl FileSettings {
    /// Open the settings file, starting empty if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let values = Self::read_file(&path)?;
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(path: &Path) -> Result<BTreeMap<String, Value>, SettingsError> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write_file(&self) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

impl SettingsStore for FileSettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), SettingsError> {
        self.values.insert(key.to_string(), value);
        self.write_file()
    }

    fn refresh(&mut self) -> Vec<String> {
        let fresh = match Self::read_file(&self.path) {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!("Could not reload settings from {:?}: {}", self.path, e);
                return Vec::new();
            }
        };

        let mut changed: Vec<String> = fresh
            .iter()
            .filter(|(k, v)| self.values.get(*k) != Some(*v))
            .map(|(k, _)| k.clone())
            .collect();
        changed.extend(
            self.values
                .keys()
                .filter(|k| !fresh.contains_key(*k))
                .cloned(),
        );
        self.values = fresh;
        changed
    }
}
