use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::error::{FlowscribeError, FlowscribeResult};

const RECORD_EXTENSION: &str = "json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    Interaction,
    Summary,
    Image,
}

impl std::fmt::Display for CacheKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKind::Interaction => write!(f, "interaction"),
            CacheKind::Summary => write!(f, "summary"),
            CacheKind::Image => write!(f, "image"),
        }
    }
}

/// On-disk layout of one cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord {
    pub key: String,
    pub kind: CacheKind,
    pub created_at: DateTime<Utc>,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

impl CacheOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheOutcome::Hit)
    }
}

/// File-backed memoization store, one JSON record per key.
///
/// Reads never fail: a missing, unreadable or corrupt record is a miss.
/// Writes never fail the caller: errors are logged and reported as `false`.
/// Values stored during a run are also kept in memory, so a key computed once
/// is not recomputed in the same run even if the disk write failed.
pub struct CacheStore {
    root: PathBuf,
    enabled: bool,
    memo: Mutex<HashMap<String, Value>>,
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CacheStore {
    /// Opens the store at `root`, creating the directory if needed. If the
    /// directory cannot be created the store runs disabled.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let enabled = match std::fs::create_dir_all(&root) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Cache directory {} unavailable ({}), continuing without cache",
                    root.display(),
                    e
                );
                false
            }
        };

        Self {
            root,
            enabled,
            memo: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// A store that never hits and never writes.
    pub fn disabled(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            enabled: false,
            memo: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Directory where generated artifacts referenced by cache entries live.
    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{}", key, RECORD_EXTENSION))
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        if !self.enabled {
            return None;
        }

        let path = self.entry_path(key);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!("Cache read failed for {}: {}", path.display(), e);
                }
                return None;
            }
        };

        let record: CacheRecord = match serde_json::from_str(&contents) {
            Ok(r) => r,
            Err(e) => {
                debug!("Ignoring corrupt cache record {}: {}", path.display(), e);
                return None;
            }
        };

        if record.key != key {
            debug!(
                "Ignoring cache record {} stored under a different key",
                path.display()
            );
            return None;
        }

        Some(record.value)
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!("Cache record {} has unexpected shape: {}", key, e);
                None
            }
        }
    }

    pub fn put(&self, key: &str, kind: CacheKind, value: &Value) -> bool {
        if !self.enabled {
            return false;
        }

        self.memo_lock().insert(key.to_string(), value.clone());

        match self.write_record(key, kind, value) {
            Ok(()) => {
                debug!(key = %key, kind = %kind, "Cache entry written");
                true
            }
            Err(e) => {
                warn!(key = %key, kind = %kind, "Failed to write cache entry: {}", e);
                false
            }
        }
    }

    fn write_record(&self, key: &str, kind: CacheKind, value: &Value) -> FlowscribeResult<()> {
        let record = CacheRecord {
            key: key.to_string(),
            kind,
            created_at: Utc::now(),
            value: value.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&record)?;

        // readers only ever see a complete record
        let tmp = self
            .root
            .join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4()));
        std::fs::write(&tmp, bytes)?;
        if let Err(e) = std::fs::rename(&tmp, self.entry_path(key)) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    /// Write-through memoization of `compute` under `key`.
    ///
    /// An existing entry is only trusted if it deserializes into `T` and passes
    /// `validate`. Concurrent calls for the same key are serialized, so the
    /// computation runs at most once per key while the entry can be stored.
    /// Errors from `compute` are returned as-is and nothing is stored.
    pub async fn memoize<T, V, F, Fut>(
        &self,
        key: &str,
        kind: CacheKind,
        validate: V,
        compute: F,
    ) -> FlowscribeResult<(T, CacheOutcome)>
    where
        T: Serialize + DeserializeOwned,
        V: Fn(&T) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = FlowscribeResult<T>>,
    {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        if let Some(value) = self.lookup::<T>(key, &validate) {
            debug!(key = %key, kind = %kind, "Cache hit");
            return Ok((value, CacheOutcome::Hit));
        }

        debug!(key = %key, kind = %kind, "Cache miss");
        let value = compute().await?;

        match serde_json::to_value(&value) {
            Ok(json) => {
                self.put(key, kind, &json);
            }
            Err(e) => warn!(key = %key, "Computed value is not serializable: {}", e),
        }

        Ok((value, CacheOutcome::Miss))
    }

    fn lookup<T: DeserializeOwned>(&self, key: &str, validate: &impl Fn(&T) -> bool) -> Option<T> {
        if !self.enabled {
            return None;
        }

        let memoized = self.memo_lock().get(key).cloned();
        let candidate = match memoized {
            Some(json) => serde_json::from_value(json).ok(),
            None => self.get_as::<T>(key),
        }?;

        if validate(&candidate) {
            Some(candidate)
        } else {
            debug!(key = %key, "Cache entry failed validation, treating as miss");
            self.memo_lock().remove(key);
            None
        }
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        in_flight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn memo_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.memo
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Removes every cache record (artifacts are left in place). Returns the
    /// number of records deleted.
    pub fn clear(&self) -> FlowscribeResult<usize> {
        self.memo_lock().clear();

        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(FlowscribeError::IoError(e.to_string())),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && is_record_path(&path) {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }

        Ok(removed)
    }
}

/// A record file is `<64 lower-case hex chars>.json`. Anything else in the
/// root belongs to someone else.
fn is_record_path(path: &Path) -> bool {
    if !path.extension().is_some_and(|ext| ext == RECORD_EXTENSION) {
        return false;
    }
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| {
            stem.len() == 64 && stem.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        })
}
