//! Runtime variables exposed on `/varz`.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::net::connection::ConnectionTracker;
use crate::registry::Registry;

/// Live counters shared by every component.
///
/// Counters are relaxed atomics; a varz read is a loose snapshot, not a
/// consistent cut.
pub struct Varz {
    registry: Arc<dyn Registry>,
    connections: ConnectionTracker,
    registers: AtomicU64,
    unregisters: AtomicU64,
    malformed_messages: AtomicU64,
    snapshots_published: AtomicU64,
    snapshot_failures: AtomicU64,
    requests: AtomicU64,
    bad_requests: AtomicU64,
    upstream_errors: AtomicU64,
}

/// Serializable view of [`Varz`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VarzSnapshot {
    pub routes: usize,
    pub active_connections: u64,
    pub registers: u64,
    pub unregisters: u64,
    pub malformed_messages: u64,
    pub snapshots_published: u64,
    pub snapshot_failures: u64,
    pub requests: u64,
    pub bad_requests: u64,
    pub upstream_errors: u64,
}

impl Varz {
    pub fn new(registry: Arc<dyn Registry>, connections: ConnectionTracker) -> Self {
        Self {
            registry,
            connections,
            registers: AtomicU64::new(0),
            unregisters: AtomicU64::new(0),
            malformed_messages: AtomicU64::new(0),
            snapshots_published: AtomicU64::new(0),
            snapshot_failures: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            bad_requests: AtomicU64::new(0),
            upstream_errors: AtomicU64::new(0),
        }
    }

    pub fn record_register(&self) {
        self.registers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unregister(&self) {
        self.unregisters.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed_message(&self) {
        self.malformed_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot(&self, published: bool) {
        let counter = if published {
            &self.snapshots_published
        } else {
            &self.snapshot_failures
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bad_request(&self) {
        self.bad_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_error(&self) {
        self.upstream_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> VarzSnapshot {
        VarzSnapshot {
            routes: self.registry.route_count(),
            active_connections: self.connections.active_count(),
            registers: self.registers.load(Ordering::Relaxed),
            unregisters: self.unregisters.load(Ordering::Relaxed),
            malformed_messages: self.malformed_messages.load(Ordering::Relaxed),
            snapshots_published: self.snapshots_published.load(Ordering::Relaxed),
            snapshot_failures: self.snapshot_failures.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            bad_requests: self.bad_requests.load(Ordering::Relaxed),
            upstream_errors: self.upstream_errors.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Varz {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Varz").field("snapshot", &self.snapshot()).finish()
    }
}
