//! JSON-backed cookie store.
//!
//! `JsonCookieStore` persists **all zones'** cookie jars in a single JSON file on disk.
//! It implements the [`CookieStore`] trait and returns per-zone jars wrapped in
//! [`PersistentCookieJar`], so that **every mutation** to a jar triggers a snapshot
//! write back to this store.
//!
//! ### Design
//! - One file for all zones (`CookieStoreFile { zones: HashMap<ZoneId, DefaultCookieJar> }`).
//! - In-memory cache: `jars: RwLock<HashMap<ZoneId, CookieJarHandle>>` for quick reuse.
//! - The store keeps a weak self handle so the persistent jars can call back into
//!   `persist_zone_from_snapshot`.
//!
//! ### I/O characteristics & caveats
//! - `persist_zone_from_snapshot` and `remove_zone` **read then rewrite** the entire
//!   JSON file.
//! - File writes are not atomic.
//! - I/O and serialization errors after opening are logged and otherwise ignored; an
//!   unreadable file is treated as empty.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use crate::engine::cookies::cookie_jar::DefaultCookieJar;
use crate::engine::cookies::persistent_cookie_jar::PersistentCookieJar;
use crate::engine::cookies::store::CookieStore;
use crate::engine::cookies::CookieJarHandle;
use crate::engine::errors::EngineError;
use crate::engine::ids::ZoneId;
use serde::{Deserialize, Serialize};

/// On-disk representation of all zones' cookie jars.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CookieStoreFile {
    zones: HashMap<ZoneId, DefaultCookieJar>,
}

/// A JSON-based cookie store that persists cookies across sessions.
pub struct JsonCookieStore {
    /// Path to the JSON file where cookies are stored.
    path: PathBuf,

    /// Actual list of cookie jars per zone
    jars: RwLock<HashMap<ZoneId, CookieJarHandle>>,

    /// Self handle, so `PersistentCookieJar` can call back into this store.
    store_self: Weak<JsonCookieStore>,
}

impl JsonCookieStore {
    /// Creates (or opens) a JSON cookie store at `path`.
    ///
    /// If the file does not exist, an empty structure is written to disk.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Arc<Self>, EngineError> {
        let path = path.into();
        if !path.exists() {
            let empty = serde_json::to_vec(&CookieStoreFile::default())
                .map_err(|e| EngineError::CookieStore(e.to_string()))?;
            fs::write(&path, empty)
                .map_err(|e| EngineError::CookieStore(format!("{}: {}", path.display(), e)))?;
        }

        Ok(Arc::new_cyclic(|me| Self {
            path,
            jars: RwLock::new(HashMap::new()),
            store_self: me.clone(),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads and deserializes the full cookie store file.
    fn load_file(&self) -> CookieStoreFile {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                log::error!("cannot read cookie store {}: {}", self.path.display(), e);
                return CookieStoreFile::default();
            }
        };
        serde_json::from_str(&contents).unwrap_or_else(|e| {
            log::error!("cookie store {} is corrupt, starting empty: {}", self.path.display(), e);
            CookieStoreFile::default()
        })
    }

    /// Serializes and writes the full cookie store file (pretty-printed).
    fn save_file(&self, store_file: &CookieStoreFile) {
        let contents = match serde_json::to_string_pretty(store_file) {
            Ok(c) => c,
            Err(e) => {
                log::error!("cannot serialize cookies: {}", e);
                return;
            }
        };
        if let Err(e) = fs::write(&self.path, contents) {
            log::error!("cannot write cookie store {}: {}", self.path.display(), e);
        }
    }
}

impl CookieStore for JsonCookieStore {
    /// Returns the cookie jar handle for `zone_id`, loading it from disk on first use.
    fn jar_for(&self, zone_id: ZoneId) -> Option<CookieJarHandle> {
        {
            // Fast path: already in memory
            let jars = self.jars.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(jar) = jars.get(&zone_id) {
                return Some(jar.clone());
            }
        }

        let mut file = self.load_file();
        let jar = file.zones.remove(&zone_id).unwrap_or_default();
        let inner: CookieJarHandle = Arc::new(RwLock::new(jar));

        let store: Weak<dyn CookieStore + Send + Sync> = self.store_self.clone();
        let persistent: CookieJarHandle = Arc::new(RwLock::new(PersistentCookieJar::new(zone_id, inner, store)));

        let mut jars = self.jars.write().unwrap_or_else(PoisonError::into_inner);
        Some(jars.entry(zone_id).or_insert(persistent).clone())
    }

    fn persist_zone_from_snapshot(&self, zone_id: ZoneId, snapshot: &DefaultCookieJar) {
        let mut store_file = self.load_file();
        store_file.zones.insert(zone_id, snapshot.clone());
        self.save_file(&store_file);
    }

    fn remove_zone(&self, zone_id: ZoneId) {
        self.jars.write().unwrap_or_else(PoisonError::into_inner).remove(&zone_id);

        let mut file = self.load_file();
        if file.zones.remove(&zone_id).is_some() {
            self.save_file(&file);
        }
    }

    /// Persists **all** in-memory jars to disk by snapshotting them.
    fn persist_all(&self) {
        let jars = self.jars.read().unwrap_or_else(PoisonError::into_inner);

        let mut file = self.load_file();
        for (zone_id, jar) in jars.iter() {
            let jar = jar.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(snapshot) = jar
                .as_any()
                .downcast_ref::<PersistentCookieJar>()
                .and_then(PersistentCookieJar::snapshot)
            {
                file.zones.insert(*zone_id, snapshot);
            }
        }

        self.save_file(&file);
    }
}
