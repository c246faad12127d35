//! Key/value cache for session data.
//!
//! The auth session manager owns the tokens; this store only caches them so a
//! later process can resume. Every mutation publishes
//! [`ClientEvent::StorageChanged`] so other sessions sharing the store can react.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::errors::{ClientError, ClientResult};
use crate::events::{ClientEvent, NotificationHub};

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const USER_KEY: &str = "user";
pub const PAYWALL_KEY: &str = "paywall_error";

static NEXT_ORIGIN: AtomicU64 = AtomicU64::new(1);

/// Allocates an identifier for a writer so it can recognise its own change events.
pub fn next_origin() -> u64 {
    NEXT_ORIGIN.fetch_add(1, Ordering::Relaxed)
}

pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str, origin: u64) -> ClientResult<()>;
    fn remove(&self, key: &str, origin: u64) -> ClientResult<()>;
}

/// Store that lives only as long as the process.
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
    hub: NotificationHub,
}

impl MemoryStore {
    pub fn new(hub: NotificationHub) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            hub,
        }
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str, origin: u64) -> ClientResult<()> {
        self.entries
            .lock()
            .map_err(|_| ClientError::Internal("session store lock poisoned".into()))?
            .insert(key.to_string(), value.to_string());
        notify(&self.hub, key, Some(value), origin);
        Ok(())
    }

    fn remove(&self, key: &str, origin: u64) -> ClientResult<()> {
        let removed = self
            .entries
            .lock()
            .map_err(|_| ClientError::Internal("session store lock poisoned".into()))?
            .remove(key);
        if removed.is_some() {
            notify(&self.hub, key, None, origin);
        }
        Ok(())
    }
}

/// JSON file store, one object of string values.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
    hub: NotificationHub,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>, hub: NotificationHub) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            hub,
        }
    }

    /// Default location: `$FORECASTAI_HOME/session.json` or `~/.forecastai/session.json`.
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(dir) = std::env::var("FORECASTAI_HOME") {
            let mut path = PathBuf::from(dir);
            path.push("session.json");
            return Some(path);
        }

        std::env::var("HOME").ok().map(|home| {
            let mut path = PathBuf::from(home);
            path.push(".forecastai");
            path.push("session.json");
            path
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> BTreeMap<String, String> {
        if !self.path.exists() {
            return BTreeMap::new();
        }
        match fs::read_to_string(&self.path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_else(|err| {
                warn!("ignoring unreadable session file {}: {}", self.path.display(), err);
                BTreeMap::new()
            }),
            Err(err) => {
                warn!("failed to read session file {}: {}", self.path.display(), err);
                BTreeMap::new()
            }
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> ClientResult<()> {
        if entries.is_empty() {
            if self.path.exists() {
                fs::remove_file(&self.path)?;
            }
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_vec_pretty(entries)?;
        fs::write(&self.path, payload)?;
        Ok(())
    }
}

impl SessionStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        let _guard = self.lock.lock().ok()?;
        self.read_all().remove(key)
    }

    fn set(&self, key: &str, value: &str, origin: u64) -> ClientResult<()> {
        {
            let _guard = self
                .lock
                .lock()
                .map_err(|_| ClientError::Internal("session file lock poisoned".into()))?;
            let mut entries = self.read_all();
            entries.insert(key.to_string(), value.to_string());
            self.write_all(&entries)?;
        }
        notify(&self.hub, key, Some(value), origin);
        Ok(())
    }

    fn remove(&self, key: &str, origin: u64) -> ClientResult<()> {
        let removed = {
            let _guard = self
                .lock
                .lock()
                .map_err(|_| ClientError::Internal("session file lock poisoned".into()))?;
            let mut entries = self.read_all();
            let removed = entries.remove(key).is_some();
            if removed {
                self.write_all(&entries)?;
            }
            removed
        };
        if removed {
            notify(&self.hub, key, None, origin);
        }
        Ok(())
    }
}

fn notify(hub: &NotificationHub, key: &str, value: Option<&str>, origin: u64) {
    debug!(key, removed = value.is_none(), "session store changed");
    hub.publish(ClientEvent::StorageChanged {
        key: key.to_string(),
        value: value.map(str::to_string),
        origin,
    });
}
