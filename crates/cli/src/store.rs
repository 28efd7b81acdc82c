//! Ephemeral key-value stores bridging the two steps of a run.
//!
//! Every entry carries its creation time. Once older than the store's TTL it
//! is reported as [`Slot::Expired`] exactly once and evicted; [`KvStore::reap`]
//! sweeps the rest.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const JOB_PREFIX: &str = "JOB_";
pub const ROSTER_PREFIX: &str = "US_";
pub const SUMMARY_PREFIX: &str = "SM_";

// ============================================================================
// Handle
// ============================================================================

/// Opaque store key: a short kind prefix plus a random UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(String);

impl Handle {
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{prefix}{}", Uuid::new_v4().simple()))
    }

    /// Accept a handle coming back from a caller. Anything but ASCII
    /// alphanumerics and `_` is refused, so a handle never names a path.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Trait
// ============================================================================

/// Result of looking a handle up.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot<T> {
    Live(T),
    /// Found but past its TTL; already evicted.
    Expired(T),
    Missing,
}

impl<T> Slot<T> {
    pub fn live(self) -> Option<T> {
        match self {
            Slot::Live(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum StoreError {
    Io(String),
    Corrupt { handle: String, detail: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "store I/O error: {msg}"),
            Self::Corrupt { handle, detail } => write!(f, "stored entry {handle} is unreadable: {detail}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

pub trait KvStore<T>: Send + Sync {
    /// Store a value under a fresh handle starting with `prefix`.
    fn put(&self, prefix: &str, value: T) -> Result<Handle, StoreError>;

    fn get(&self, handle: &Handle) -> Result<Slot<T>, StoreError>;

    /// Overwrite a live entry, keeping its creation time. False when the
    /// handle is missing or expired.
    fn replace(&self, handle: &Handle, value: T) -> Result<bool, StoreError>;

    /// Remove and return.
    fn take(&self, handle: &Handle) -> Result<Slot<T>, StoreError>;

    /// Evict every expired entry; returns how many went.
    fn reap(&self) -> Result<usize, StoreError>;
}

fn is_expired(created_at: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
    now - created_at > ttl
}

// ============================================================================
// MemoryStore
// ============================================================================

struct Entry<T> {
    created_at: DateTime<Utc>,
    value: T,
}

/// Process-lifetime store.
pub struct MemoryStore<T> {
    ttl: Duration,
    clock: Clock,
    entries: Mutex<HashMap<Handle, Entry<T>>>,
}

impl<T> MemoryStore<T> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, system_clock())
    }

    pub fn with_clock(ttl: Duration, clock: Clock) -> Self {
        Self { ttl, clock, entries: Mutex::new(HashMap::new()) }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send> KvStore<T> for MemoryStore<T> {
    fn put(&self, prefix: &str, value: T) -> Result<Handle, StoreError> {
        let handle = Handle::generate(prefix);
        let entry = Entry { created_at: (self.clock)(), value };
        self.entries.lock().insert(handle.clone(), entry);
        Ok(handle)
    }

    fn get(&self, handle: &Handle) -> Result<Slot<T>, StoreError> {
        let now = (self.clock)();
        let mut entries = self.entries.lock();
        let expired = match entries.get(handle) {
            None => return Ok(Slot::Missing),
            Some(entry) => is_expired(entry.created_at, now, self.ttl),
        };
        if expired {
            let entry = entries.remove(handle).map(|e| e.value);
            return Ok(entry.map_or(Slot::Missing, Slot::Expired));
        }
        Ok(entries.get(handle).map_or(Slot::Missing, |e| Slot::Live(e.value.clone())))
    }

    fn replace(&self, handle: &Handle, value: T) -> Result<bool, StoreError> {
        let now = (self.clock)();
        let mut entries = self.entries.lock();
        match entries.get_mut(handle) {
            Some(entry) if !is_expired(entry.created_at, now, self.ttl) => {
                entry.value = value;
                Ok(true)
            }
            Some(_) => {
                entries.remove(handle);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn take(&self, handle: &Handle) -> Result<Slot<T>, StoreError> {
        let now = (self.clock)();
        Ok(match self.entries.lock().remove(handle) {
            None => Slot::Missing,
            Some(e) if is_expired(e.created_at, now, self.ttl) => Slot::Expired(e.value),
            Some(e) => Slot::Live(e.value),
        })
    }

    fn reap(&self) -> Result<usize, StoreError> {
        let now = (self.clock)();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !is_expired(e.created_at, now, self.ttl));
        Ok(before - entries.len())
    }
}

// ============================================================================
// FileStore
// ============================================================================

#[derive(Serialize, Deserialize)]
struct StoredEntry<T> {
    created_at: DateTime<Utc>,
    value: T,
}

#[derive(Deserialize)]
struct StoredAge {
    created_at: DateTime<Utc>,
}

/// One JSON file per handle under a state directory, so entries outlive the
/// process that wrote them. Writes go through a temp file and a rename.
pub struct FileStore<T> {
    dir: PathBuf,
    ttl: Duration,
    clock: Clock,
    lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FileStore<T> {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self::with_clock(dir, ttl, system_clock())
    }

    pub fn with_clock(dir: impl Into<PathBuf>, ttl: Duration, clock: Clock) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            clock,
            lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    fn path(&self, handle: &Handle) -> PathBuf {
        self.dir.join(format!("{handle}.json"))
    }
}

impl<T: Serialize + DeserializeOwned> FileStore<T> {
    fn read(&self, handle: &Handle, path: &Path) -> Result<Option<StoredEntry<T>>, StoreError> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt { handle: handle.to_string(), detail: e.to_string() })
    }

    fn write(&self, path: &Path, entry: &StoredEntry<T>) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer(&mut tmp, entry).map_err(|e| StoreError::Io(e.to_string()))?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| StoreError::Io(e.error.to_string()))?;
        Ok(())
    }

    fn remove(path: &Path) -> Result<bool, StoreError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl<T: Serialize + DeserializeOwned> KvStore<T> for FileStore<T> {
    fn put(&self, prefix: &str, value: T) -> Result<Handle, StoreError> {
        let _guard = self.lock.lock();
        let handle = Handle::generate(prefix);
        let path = self.path(&handle);
        self.write(&path, &StoredEntry { created_at: (self.clock)(), value })?;
        log::debug!("stored {handle} in {}", self.dir.display());
        Ok(handle)
    }

    fn get(&self, handle: &Handle) -> Result<Slot<T>, StoreError> {
        let path = self.path(handle);
        let _guard = self.lock.lock();
        let Some(entry) = self.read(handle, &path)? else {
            return Ok(Slot::Missing);
        };
        if is_expired(entry.created_at, (self.clock)(), self.ttl) {
            Self::remove(&path)?;
            return Ok(Slot::Expired(entry.value));
        }
        Ok(Slot::Live(entry.value))
    }

    fn replace(&self, handle: &Handle, value: T) -> Result<bool, StoreError> {
        let path = self.path(handle);
        let _guard = self.lock.lock();
        let Some(entry) = self.read(handle, &path)? else {
            return Ok(false);
        };
        if is_expired(entry.created_at, (self.clock)(), self.ttl) {
            Self::remove(&path)?;
            return Ok(false);
        }
        self.write(&path, &StoredEntry { created_at: entry.created_at, value })?;
        Ok(true)
    }

    fn take(&self, handle: &Handle) -> Result<Slot<T>, StoreError> {
        let path = self.path(handle);
        let _guard = self.lock.lock();
        let Some(entry) = self.read(handle, &path)? else {
            return Ok(Slot::Missing);
        };
        if !Self::remove(&path)? {
            return Ok(Slot::Missing);
        }
        if is_expired(entry.created_at, (self.clock)(), self.ttl) {
            return Ok(Slot::Expired(entry.value));
        }
        Ok(Slot::Live(entry.value))
    }

    fn reap(&self) -> Result<usize, StoreError> {
        let _guard = self.lock.lock();
        let listing = match fs::read_dir(&self.dir) {
            Ok(l) => l,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let now = (self.clock)();
        let mut reaped = 0;
        for item in listing {
            let path = item?.path();
            let owned = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".json"));
            if !owned {
                continue;
            }

            let age: Option<StoredAge> = fs::read(&path).ok().and_then(|b| serde_json::from_slice(&b).ok());
            match age {
                Some(a) if !is_expired(a.created_at, now, self.ttl) => {}
                Some(_) => {
                    if Self::remove(&path)? {
                        reaped += 1;
                    }
                }
                None => log::warn!("skipping unreadable store entry {}", path.display()),
            }
        }
        Ok(reaped)
    }
}
