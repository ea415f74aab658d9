use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::engine::cookies::cookie_jar::DefaultCookieJar;
use crate::engine::cookies::store::CookieStore;
use crate::engine::cookies::CookieJarHandle;
use crate::engine::ids::ZoneId;

/// Cookie store that keeps every zone's jar in memory only.
#[derive(Default)]
pub struct InMemoryCookieStore {
    /// Cookie jars per zone
    jars: RwLock<HashMap<ZoneId, CookieJarHandle>>,
}

impl InMemoryCookieStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl CookieStore for InMemoryCookieStore {
    fn jar_for(&self, zone_id: ZoneId) -> Option<CookieJarHandle> {
        let mut jars = self.jars.write().unwrap_or_else(PoisonError::into_inner);
        let handle = jars
            .entry(zone_id)
            .or_insert_with(|| Arc::new(RwLock::new(DefaultCookieJar::new())) as CookieJarHandle)
            .clone();
        Some(handle)
    }

    fn persist_zone_from_snapshot(&self, _zone_id: ZoneId, _snapshot: &DefaultCookieJar) {}

    fn remove_zone(&self, zone_id: ZoneId) {
        self.jars.write().unwrap_or_else(PoisonError::into_inner).remove(&zone_id);
    }

    fn persist_all(&self) {}
}
