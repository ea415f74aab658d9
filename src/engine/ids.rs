//! Identifiers used across the network layer.
//!
//! [`ZoneId`] identifies an isolated network partition (its cookies, its request context),
//! [`TabId`] and [`FrameId`] describe who issued a request, and [`RequestId`] / [`ProxyId`]
//! are process-local counters for in-flight requests and request context proxies.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// A unique identifier for a zone, represented as a UUID.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZoneId(Uuid);

impl ZoneId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The zone of the global request context.
    pub const fn global() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for ZoneId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ZoneId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Display for ZoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the tab a request originates from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TabId(Uuid);

impl TabId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TabId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a frame inside a tab. The main frame is `0`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FrameId(pub u64);

impl FrameId {
    pub const MAIN: FrameId = FrameId(0);
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_PROXY_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of a request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub(crate) fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// Process-unique id of a request context proxy.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyId(u64);

impl ProxyId {
    pub(crate) fn next() -> Self {
        Self(NEXT_PROXY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for ProxyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "proxy#{}", self.0)
    }
}
