use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use cre_types::ItemId;

use crate::error::JournalResult;
use crate::file::namespace_stem;

#[derive(Default)]
struct CacheState {
    entries: BTreeMap<String, Value>,
    dirty: bool,
}

/// Durable key-value map for one concern and one namespace, stored as JSON
/// at `{dir}/{concern}/{namespace}.json`.
///
/// Load and persist failures are logged and never surfaced: a cache that
/// cannot be written keeps working from memory and retries on the next put.
pub struct KeyValueCache {
    path: Option<PathBuf>,
    state: Mutex<CacheState>,
}

impl KeyValueCache {
    pub fn open(dir: &Path, concern: &str, namespace: &str) -> Self {
        let path = dir
            .join(namespace_stem(concern))
            .join(format!("{}.json", namespace_stem(namespace)));
        let entries = match load(&path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cache unreadable; starting empty");
                BTreeMap::new()
            }
        };
        Self {
            path: Some(path),
            state: Mutex::new(CacheState {
                entries,
                dirty: false,
            }),
        }
    }

    /// A cache that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let state = self.lock();
        let value = state.entries.get(key)?.clone();
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key, error = %e, "cache entry has unexpected shape; ignoring");
                None
            }
        }
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "cache value not serializable; skipped");
                return;
            }
        };
        let mut state = self.lock();
        state.entries.insert(key.to_string(), value);
        self.persist(&mut state);
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut state = self.lock();
        let removed = state.entries.remove(key).is_some();
        if removed {
            self.persist(&mut state);
        }
        removed
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().entries.keys().cloned().collect()
    }

    /// `false` while the file on disk lags behind memory.
    pub fn is_durable(&self) -> bool {
        !self.lock().dirty
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().expect("cache state poisoned")
    }

    fn persist(&self, state: &mut CacheState) {
        let Some(path) = &self.path else {
            return;
        };
        match store(path, &state.entries) {
            Ok(()) => {
                state.dirty = false;
                debug!(path = %path.display(), entries = state.entries.len(), "cache persisted");
            }
            Err(e) => {
                state.dirty = true;
                warn!(path = %path.display(), error = %e, "cache write failed; kept in memory");
            }
        }
    }
}

impl std::fmt::Debug for KeyValueCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueCache").field("path", &self.path).finish()
    }
}

fn load(path: &Path) -> JournalResult<BTreeMap<String, Value>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Atomic replace through a temporary file in the same directory.
fn store(path: &Path, entries: &BTreeMap<String, Value>) -> JournalResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&serde_json::to_vec_pretty(entries)?)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Canonical profile image URL per user, namespaced by the device owner.
#[derive(Debug)]
pub struct ProfileImageCache {
    cache: KeyValueCache,
}

impl ProfileImageCache {
    pub const CONCERN: &'static str = "profile-images";

    pub fn open(dir: &Path, owner: &str) -> Self {
        Self {
            cache: KeyValueCache::open(dir, Self::CONCERN, owner),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            cache: KeyValueCache::in_memory(),
        }
    }

    pub fn get(&self, user: &str) -> Option<String> {
        self.cache.get(user)
    }

    pub fn put(&self, user: &str, url: &str) {
        self.cache.put(user, &url);
    }
}

/// Ids of the items a user authored, oldest first.
#[derive(Debug)]
pub struct MyItemsIndex {
    cache: KeyValueCache,
}

impl MyItemsIndex {
    pub const CONCERN: &'static str = "my-items";
    const KEY: &'static str = "ids";

    pub fn open(dir: &Path, user: &str) -> Self {
        Self {
            cache: KeyValueCache::open(dir, Self::CONCERN, user),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            cache: KeyValueCache::in_memory(),
        }
    }

    pub fn list(&self) -> Vec<ItemId> {
        self.cache.get(Self::KEY).unwrap_or_default()
    }

    pub fn add(&self, id: &str) {
        let mut ids = self.list();
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
            self.cache.put(Self::KEY, &ids);
        }
    }

    pub fn remove(&self, id: &str) {
        let mut ids = self.list();
        let before = ids.len();
        ids.retain(|existing| existing != id);
        if ids.len() != before {
            self.cache.put(Self::KEY, &ids);
        }
    }

    /// A local id was confirmed under a server id; keep its position.
    pub fn rename(&self, old: &str, new: &str) {
        let ids: Vec<ItemId> = self
            .list()
            .into_iter()
            .map(|id| if id == old { new.to_string() } else { id })
            .collect();
        let mut seen = std::collections::HashSet::new();
        let ids: Vec<ItemId> = ids.into_iter().filter(|id| seen.insert(id.clone())).collect();
        self.cache.put(Self::KEY, &ids);
    }
}
