use super::error::PreferencesError;
use rocksdb::{WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

pub const PASSWORD_KEY: &str = "password";
pub const SWAP_ENDPOINT_KEY: &str = "SwapEndpoint";
pub const SELECTED_STAMP_KEY: &str = "selected_stamp";
pub const BATCH_KEY: &str = "batch";
pub const UPLOADS_KEY: &str = "uploads";

/// Durable string key/value store. Missing keys read as empty strings and
/// writing an empty string clears a key.
pub trait Preferences: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, PreferencesError>;

    /// Applies every entry at once: observers see all of them or none.
    fn set_all(&self, entries: &[(&str, &str)]) -> Result<(), PreferencesError>;

    /// Replaces the value of `key` with `f(current)` under the store's lock,
    /// so concurrent updates of one key are never lost.
    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(String) -> Result<String, PreferencesError>,
    ) -> Result<(), PreferencesError>;

    fn set(&self, key: &str, value: &str) -> Result<(), PreferencesError> {
        self.set_all(&[(key, value)])
    }

    fn string(&self, key: &str) -> Result<String, PreferencesError> {
        Ok(self.get(key)?.unwrap_or_default())
    }
}

/// Preferences persisted in a rocksdb instance.
#[derive(Clone)]
pub struct RocksPreferences {
    db: Arc<Mutex<DB>>,
}

impl RocksPreferences {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PreferencesError> {
        let db = DB::open_default(path)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }
}

impl Preferences for RocksPreferences {
    fn get(&self, key: &str) -> Result<Option<String>, PreferencesError> {
        let db = self.db.lock().map_err(|_| PreferencesError::Poisoned)?;
        read_string(&db, key)
    }

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(String) -> Result<String, PreferencesError>,
    ) -> Result<(), PreferencesError> {
        let db = self.db.lock().map_err(|_| PreferencesError::Poisoned)?;
        let value = f(read_string(&db, key)?.unwrap_or_default())?;
        if value.is_empty() {
            db.delete(key.as_bytes())?;
        } else {
            db.put(key.as_bytes(), value.as_bytes())?;
        }
        Ok(())
    }

    fn set_all(&self, entries: &[(&str, &str)]) -> Result<(), PreferencesError> {
        let mut batch = WriteBatch::default();
        for (key, value) in entries {
            if value.is_empty() {
                batch.delete(key.as_bytes());
            } else {
                batch.put(key.as_bytes(), value.as_bytes());
            }
        }
        let db = self.db.lock().map_err(|_| PreferencesError::Poisoned)?;
        db.write(batch)?;
        Ok(())
    }
}

fn read_string(db: &DB, key: &str) -> Result<Option<String>, PreferencesError> {
    match db.get(key.as_bytes())? {
        Some(value) => String::from_utf8(value)
            .map(Some)
            .map_err(|_| PreferencesError::Encoding {
                key: key.to_string(),
            }),
        None => Ok(None),
    }
}

/// In-process preferences, lost on drop.
#[derive(Clone, Default)]
pub struct MemoryPreferences {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored entry.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.values
            .lock()
            .map(|values| values.clone())
            .unwrap_or_default()
    }
}

impl Preferences for MemoryPreferences {
    fn get(&self, key: &str) -> Result<Option<String>, PreferencesError> {
        let values = self.values.lock().map_err(|_| PreferencesError::Poisoned)?;
        Ok(values.get(key).cloned())
    }

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(String) -> Result<String, PreferencesError>,
    ) -> Result<(), PreferencesError> {
        let mut values = self.values.lock().map_err(|_| PreferencesError::Poisoned)?;
        let value = f(values.get(key).cloned().unwrap_or_default())?;
        if value.is_empty() {
            values.remove(key);
        } else {
            values.insert(key.to_string(), value);
        }
        Ok(())
    }

    fn set_all(&self, entries: &[(&str, &str)]) -> Result<(), PreferencesError> {
        let mut values = self.values.lock().map_err(|_| PreferencesError::Poisoned)?;
        for (key, value) in entries {
            if value.is_empty() {
                values.remove(*key);
            } else {
                values.insert(key.to_string(), value.to_string());
            }
        }
        Ok(())
    }
}

/// One entry of the uploads history.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct UploadRecord {
    pub name: String,
    pub reference: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub mimetype: String,
}

pub fn load_uploads(prefs: &dyn Preferences) -> Result<Vec<UploadRecord>, PreferencesError> {
    parse_uploads(&prefs.string(UPLOADS_KEY)?)
}

fn parse_uploads(stored: &str) -> Result<Vec<UploadRecord>, PreferencesError> {
    if stored.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(stored)?)
}

/// Appends to the end of the stored list. Entries are never deduplicated.
pub fn append_upload(
    prefs: &dyn Preferences,
    record: UploadRecord,
) -> Result<Vec<UploadRecord>, PreferencesError> {
    let mut appended = Vec::new();
    let mut append = |stored: String| -> Result<String, PreferencesError> {
        let mut uploads = parse_uploads(&stored)?;
        uploads.push(record.clone());
        let encoded = serde_json::to_string(&uploads)?;
        appended = uploads;
        Ok(encoded)
    };
    prefs.update(UPLOADS_KEY, &mut append)?;
    Ok(appended)
}

/// The stamp the user picked, as shown (`display`) and as full hex (`batch`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub display: String,
    pub batch: String,
}

/// Only a pair of non-empty keys counts as a selection.
pub fn load_selection(prefs: &dyn Preferences) -> Result<Option<Selection>, PreferencesError> {
    let display = prefs.string(SELECTED_STAMP_KEY)?;
    let batch = prefs.string(BATCH_KEY)?;
    if display.is_empty() || batch.is_empty() {
        return Ok(None);
    }
    Ok(Some(Selection { display, batch }))
}

pub fn store_selection(
    prefs: &dyn Preferences,
    selection: Option<&Selection>,
) -> Result<(), PreferencesError> {
    match selection {
        Some(selection) => prefs.set_all(&[
            (SELECTED_STAMP_KEY, selection.display.as_str()),
            (BATCH_KEY, selection.batch.as_str()),
        ]),
        None => prefs.set_all(&[(SELECTED_STAMP_KEY, ""), (BATCH_KEY, "")]),
    }
}
