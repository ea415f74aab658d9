//! Cookie store infrastructure.
//!
//! A **cookie store** is a provisioner and persistence layer for per-zone cookie jars.
//! - A [`CookieManager`](crate::engine::cookies::CookieManager) only *holds a
//!   [`CookieJarHandle`]* (wrapped in a `JarCookieStore`), never a store directly.
//! - A **CookieStore** can *mint* a jar for a given [`ZoneId`] and persist/flush all
//!   zone jars in one place (e.g., a single JSON file).
//!
//! This module exports two implementations:
//! - [`InMemoryCookieStore`]: nothing survives the process.
//! - [`JsonCookieStore`]: file-backed JSON store (one file for all zones).
//!
//! ## Design notes
//! - Implementations are `Send + Sync` and safe for concurrent access.
//! - `CookieStore::jar_for(zone_id)` returns the *same logical jar instance* for a zone for
//!   the lifetime of the store, so all handles observe consistent state.
mod in_memory;
mod json;

use crate::engine::cookies::cookie_jar::DefaultCookieJar;
use crate::engine::cookies::cookies::CookieJarHandle;
use crate::engine::ids::ZoneId;

pub use in_memory::InMemoryCookieStore;
/// File-backed JSON cookie store (one file for all zones).
pub use json::JsonCookieStore;

/// A cookie **store** mints per-zone cookie **jars** and (optionally) persists them.
pub trait CookieStore: Send + Sync {
    /// Returns (or creates and returns) the cookie jar handle for `zone_id`.
    ///
    /// Returns the *same logical jar instance* for a given `zone_id` across calls.
    /// `None` means provisioning failed irrecoverably.
    fn jar_for(&self, zone_id: ZoneId) -> Option<CookieJarHandle>;

    /// Persists the cookie state for `zone_id` from a provided snapshot.
    ///
    /// This is **best-effort** and must not panic.
    fn persist_zone_from_snapshot(&self, zone_id: ZoneId, snapshot: &DefaultCookieJar);

    /// Removes all persisted cookie data for `zone_id` from the store.
    ///
    /// Idempotent. A later [`CookieStore::jar_for`] creates a fresh, empty jar.
    fn remove_zone(&self, zone_id: ZoneId);

    /// Persists all known zone jars to durable storage.
    fn persist_all(&self);
}
