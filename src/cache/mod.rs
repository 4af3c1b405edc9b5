//! Persisted package cache for installed template-pack sources.
//!
//! The cache is the single durable source of truth across process
//! restarts: a JSON record store keyed by (installer id, identifier).
//! Records are opaque to the cache; each installer serializes and
//! deserializes its own packages. Subscribers are notified when the
//! backing file is changed by another process (detected by [`refresh`];
//! in-process writes never self-notify).
//!
//! [`refresh`]: PackageCache::refresh

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::runtime::Runtime;

/// Durable projection of an installed package source.
///
/// `details` is an opaque per-installer payload; nothing outside the
/// owning installer interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub installer_id: String,
    pub identifier: String,
    pub version: String,
    pub mount_uri: String,
    pub display_name: String,
    pub last_change_time: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    packages: Vec<PackageRecord>,
}

/// (modification time, file size) of the store file; changes when another
/// process rewrites it.
type Fingerprint = (u64, u64);

struct CacheState {
    records: Vec<PackageRecord>,
    fingerprint: Option<Fingerprint>,
}

type ChangeListener = Box<dyn Fn() + Send + Sync>;

/// JSON-backed record store with external-change notification.
pub struct PackageCache<R: Runtime> {
    runtime: Arc<R>,
    path: PathBuf,
    state: Mutex<CacheState>,
    listeners: Mutex<Vec<(u64, ChangeListener)>>,
    next_listener_id: AtomicU64,
}

impl<R: Runtime + 'static> PackageCache<R> {
    /// Open (or create) the store at `path` and load its current records.
    pub fn open(runtime: Arc<R>, path: PathBuf) -> Result<Arc<Self>> {
        let cache = Arc::new(Self {
            runtime,
            path,
            state: Mutex::new(CacheState {
                records: Vec::new(),
                fingerprint: None,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
        });

        {
            let mut state = cache.state.lock().expect("cache state poisoned");
            state.records = cache.load_records()?;
            state.fingerprint = cache.current_fingerprint();
        }
        Ok(cache)
    }

    /// Path of the backing store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of all current records.
    pub fn records(&self) -> Vec<PackageRecord> {
        self.state
            .lock()
            .expect("cache state poisoned")
            .records
            .clone()
    }

    /// Add a record, replacing any existing record with the same
    /// (installer id, identifier) key, and persist.
    pub fn add(&self, record: PackageRecord) -> Result<()> {
        let mut state = self.state.lock().expect("cache state poisoned");
        state
            .records
            .retain(|r| !same_key(r, &record.installer_id, &record.identifier));
        state.records.push(record);
        self.persist(&mut state)
    }

    /// Remove the record with the given key, if present, and persist.
    pub fn remove(&self, installer_id: &str, identifier: &str) -> Result<()> {
        let mut state = self.state.lock().expect("cache state poisoned");
        let before = state.records.len();
        state
            .records
            .retain(|r| !same_key(r, installer_id, identifier));
        if state.records.len() == before {
            debug!("No cache record for {}/{}", installer_id, identifier);
            return Ok(());
        }
        self.persist(&mut state)
    }

    /// Re-read the store if another process changed it since the last
    /// load or write. Returns `true` (after notifying subscribers) when
    /// an external change was picked up.
    pub fn refresh(&self) -> Result<bool> {
        let changed = {
            let mut state = self.state.lock().expect("cache state poisoned");
            let fingerprint = self.current_fingerprint();
            if fingerprint == state.fingerprint {
                false
            } else {
                debug!("Package cache changed on disk, reloading {:?}", self.path);
                state.records = self.load_records()?;
                state.fingerprint = fingerprint;
                true
            }
        };
        if changed {
            self.notify();
        }
        Ok(changed)
    }

    /// Register a callback invoked after every externally-detected change.
    ///
    /// The subscription is released when the returned guard is dropped.
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> CacheSubscription {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .expect("cache listeners poisoned")
            .push((id, Box::new(listener)));

        let weak: Weak<Self> = Arc::downgrade(self);
        CacheSubscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(cache) = weak.upgrade() {
                    cache
                        .listeners
                        .lock()
                        .expect("cache listeners poisoned")
                        .retain(|(listener_id, _)| *listener_id != id);
                }
            })),
        }
    }

    fn notify(&self) {
        let listeners = self.listeners.lock().expect("cache listeners poisoned");
        for (_, listener) in listeners.iter() {
            listener();
        }
    }

    fn load_records(&self) -> Result<Vec<PackageRecord>> {
        if !self.runtime.exists(&self.path) {
            return Ok(Vec::new());
        }
        let content = self
            .runtime
            .read_to_string(&self.path)
            .with_context(|| format!("Failed to read package cache at {:?}", self.path))?;
        let store: StoreFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse package cache at {:?}", self.path))?;
        Ok(store.packages)
    }

    /// Persist and advance the fingerprint so our own write is not
    /// reported as an external change.
    fn persist(&self, state: &mut CacheState) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !self.runtime.exists(parent)
        {
            self.runtime.create_dir_all(parent)?;
        }
        let store = StoreFile {
            packages: state.records.clone(),
        };
        let content = serde_json::to_string_pretty(&store)?;
        self.runtime
            .write(&self.path, content.as_bytes())
            .with_context(|| format!("Failed to save package cache to {:?}", self.path))?;
        state.fingerprint = self.current_fingerprint();
        Ok(())
    }

    fn current_fingerprint(&self) -> Option<Fingerprint> {
        if !self.runtime.exists(&self.path) {
            return None;
        }
        let modified = self
            .runtime
            .modified(&self.path)
            .ok()?
            .duration_since(UNIX_EPOCH)
            .ok()?
            .as_nanos() as u64;
        let size = match self.runtime.file_size(&self.path) {
            Ok(size) => size,
            Err(e) => {
                warn!("Failed to fingerprint package cache: {}", e);
                return None;
            }
        };
        Some((modified, size))
    }
}

/// Scoped registration returned by [`PackageCache::subscribe`];
/// deregisters the listener on drop.
pub struct CacheSubscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Drop for CacheSubscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

fn same_key(record: &PackageRecord, installer_id: &str, identifier: &str) -> bool {
    record.installer_id == installer_id && record.identifier == identifier
}
