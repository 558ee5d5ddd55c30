//! Route registry.
//!
//! # Data Flow
//! ```text
//! router.register / router.unregister
//!     → ingest (decode RegisterMessage)
//!     → Registry::register / Registry::unregister
//!
//! proxy request (Host header)
//!     → Registry::lookup → RouteEntry (marked active)
//!
//! snapshot tick
//!     → Registry::active_since(last_flush_at) → Vec<RouteEntry>
//! ```
//!
//! # Design Decisions
//! - The registry is the only serialization point; callers never lock
//! - Application is idempotent: re-register refreshes, unknown unregister is a no-op
//! - Entries are keyed by uri, backends identified by host:port

mod route_registry;

pub use route_registry::RouteRegistry;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;

/// Registration payload carried on `router.register` / `router.unregister`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RegisterMessage {
    /// Backend address.
    pub host: String,
    pub port: u16,

    /// Routable host identifiers served by the backend.
    #[serde(default)]
    pub uris: Vec<String>,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Application the backend belongs to.
    #[serde(default)]
    pub app: Option<String>,

    #[serde(default)]
    pub private_instance_id: Option<String>,
}

impl RegisterMessage {
    /// Decode a raw bus payload.
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// `host:port` of the backend.
    pub fn backend_key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One registered backend as held by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouteEntry {
    pub host: String,
    pub port: u16,
    pub uris: Vec<String>,
    pub tags: BTreeMap<String, String>,
    pub app: Option<String>,
    pub private_instance_id: Option<String>,

    /// First registration.
    pub registered_at: SystemTime,
    /// Most recent (re-)registration.
    pub updated_at: SystemTime,
    /// Most recent request routed to this backend.
    pub last_active_at: Option<SystemTime>,
}

impl RouteEntry {
    pub fn backend_key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Latest of the registration refresh and the last routed request.
    pub fn last_seen(&self) -> SystemTime {
        match self.last_active_at {
            Some(active) if active > self.updated_at => active,
            _ => self.updated_at,
        }
    }
}

/// Thread-safe route storage.
///
/// Shared as `Arc<dyn Registry>` by the ingest loops, the snapshot publisher
/// and the proxy. Every method must be safe to call concurrently.
pub trait Registry: Send + Sync + 'static {
    /// Add or refresh the backend under each of the message's uris.
    fn register(&self, message: &RegisterMessage);

    /// Remove the backend from each of the message's uris.
    fn unregister(&self, message: &RegisterMessage);

    /// Distinct backends seen strictly after `since`.
    fn active_since(&self, since: SystemTime) -> Vec<RouteEntry>;

    /// Pick a backend for a uri and mark it active.
    fn lookup(&self, uri: &str) -> Option<RouteEntry>;

    /// Number of routable uris.
    fn route_count(&self) -> usize;
}
