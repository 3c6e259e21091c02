//! Best-effort key-value persistence
//!
//! Geofences and events are each stored under one string key as a JSON
//! array. Reads of missing or corrupt data degrade to an empty collection and
//! writes never propagate failure to the caller: they report a
//! [`WriteOutcome`] and log a warning.

use crate::{GeofenceError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tracing::{debug, warn};

/// Process-local string key-value storage
pub trait KeyValueStore: Send + Sync {
    /// Read the raw value for `key`, `None` if never written
    fn read(&self, key: &str) -> Result<Option<String>>;

    /// Overwrite the value for `key`
    fn write(&self, key: &str, value: &str) -> Result<()>;
}

/// Result of a best-effort write
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Persisted,
    Failed,
}

impl WriteOutcome {
    pub fn is_persisted(&self) -> bool {
        *self == WriteOutcome::Persisted
    }
}

/// In-memory storage with an optional per-value byte quota
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    quota_bytes: Option<usize>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes whose serialized value exceeds `quota_bytes`
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }

    /// Make every subsequent call fail (storage disabled by the host)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Store a raw value directly, bypassing quota checks
    pub fn seed(&self, key: &str, value: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.to_string(), value.to_string());
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(GeofenceError::StorageUnavailable(
                "memory store disabled".to_string(),
            ));
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        let entries = self
            .entries
            .read()
            .map_err(|_| GeofenceError::StorageUnavailable("lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.check_available()?;
        if let Some(limit) = self.quota_bytes {
            if value.len() > limit {
                return Err(GeofenceError::QuotaExceeded {
                    key: key.to_string(),
                    limit_bytes: limit,
                });
            }
        }
        let mut entries = self
            .entries
            .write()
            .map_err(|_| GeofenceError::StorageUnavailable("lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// One JSON file per key under a state directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a state directory
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `key`; distinct keys always map to distinct files
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(GeofenceError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", encode_key(key))))
    }
}

/// Percent-encode every byte outside `[a-z0-9_-]`
///
/// Upper case is encoded too so keys differing only in case stay apart on
/// case-insensitive filesystems.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

impl KeyValueStore for FileStore {
    fn read(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)?) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        fs::write(self.path_for(key)?, value)?;
        Ok(())
    }
}

/// Serde adapter keeping non-finite floats through JSON
///
/// Finite values are plain numbers; `inf`, `-inf` and `NaN` are written as
/// strings, which JSON numbers cannot express.
pub mod lossless_f64 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    impl Repr {
        fn into_f64<E: de::Error>(self) -> Result<f64, E> {
            match self {
                Repr::Number(value) => Ok(value),
                Repr::Text(text) => text
                    .trim()
                    .parse()
                    .map_err(|_| E::custom(format!("invalid float {:?}", text))),
            }
        }
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_str(&value.to_string())
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Repr::deserialize(deserializer)?.into_f64()
    }

    /// Same encoding for `Option<f64>`; `null` stays `None`
    pub mod option {
        use super::Repr;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => super::serialize(value, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<f64>, D::Error> {
            Option::<Repr>::deserialize(deserializer)?
                .map(Repr::into_f64)
                .transpose()
        }
    }
}

/// Load a JSON array stored under `key`
///
/// Missing, unreadable, unparsable, or non-array data yields an empty list.
/// Array elements that do not decode as `T` are skipped.
pub fn load_array<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Vec<T> {
    let raw = match store.read(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            warn!("Failed to read {}: {}", key, e);
            return Vec::new();
        }
    };

    let items = match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(serde_json::Value::Array(items)) => items,
        Ok(_) => {
            warn!("Stored value for {} is not an array, starting empty", key);
            return Vec::new();
        }
        Err(e) => {
            warn!("Stored value for {} is not valid JSON ({}), starting empty", key, e);
            return Vec::new();
        }
    };

    let total = items.len();
    let decoded: Vec<T> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();

    if decoded.len() < total {
        warn!(
            "Skipped {} malformed entries under {}",
            total - decoded.len(),
            key
        );
    }

    decoded
}

/// Serialize `items` and overwrite `key`, swallowing any failure
pub fn save_array<T: Serialize>(store: &dyn KeyValueStore, key: &str, items: &[T]) -> WriteOutcome {
    let result = serde_json::to_string(items)
        .map_err(GeofenceError::from)
        .and_then(|text| store.write(key, &text));

    match result {
        Ok(()) => {
            debug!("Persisted {} entries under {}", items.len(), key);
            WriteOutcome::Persisted
        }
        Err(e) => {
            warn!("Failed to persist {}: {}", key, e);
            WriteOutcome::Failed
        }
    }
}
