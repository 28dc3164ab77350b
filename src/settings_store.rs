//! Key-value persistence for the handful of values that must survive process restarts (the user
//! identifier and the cached API key).
//!
//! The original deployment target kept these in the OS registry; here the store is a capability
//! trait with a JSON-file default so the host application can substitute its own settings
//! mechanism.
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::Result;

/// Settings key holding the persisted user identifier.
pub const SETTING_USER_ID: &str = "user_id";
/// Settings key holding the cached API key.
pub const SETTING_API_KEY: &str = "amplitude_api_key";

/// A small persistent string-to-string store.
///
/// `get` never fails outward (a broken store reads as absent); `set` reports I/O errors so callers
/// can log and degrade to in-memory behavior.
pub trait SettingsStore: Send + Sync {
    /// Read a value. Returns `None` when absent or unreadable.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value durably.
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// [`SettingsStore`] backed by a single JSON object file.
///
/// The whole map is kept in memory and written through on every `set`. Values are tiny and writes
/// are rare (once per generated user id, once per API-key change), so rewriting the file is fine.
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<HashMap<String, String>>,
}

impl JsonFileStore {
    /// Open a store at `path`, loading existing values. A missing or corrupt file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> JsonFileStore {
        let path = path.into();
        let values = std::fs::read(&path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default();
        JsonFileStore {
            path,
            values: Mutex::new(values),
        }
    }

    fn write_out(&self, values: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(&self.path)?;
        file.write_all(&serde_json::to_vec_pretty(values).unwrap_or_default())?;
        Ok(())
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap();
        values.insert(key.to_owned(), value.to_owned());
        self.write_out(&values)
    }
}

/// In-memory [`SettingsStore`], mainly for tests and embedders that manage persistence themselves.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}
