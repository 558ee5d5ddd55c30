use std::collections::HashMap;
use std::time::SystemTime;

use dashmap::DashMap;

use crate::registry::{RegisterMessage, Registry, RouteEntry};

/// In-process registry backed by a sharded concurrent map.
///
/// Each uri holds its own copy of a backend's entry, so all reads and writes
/// for one uri go through a single shard lock. `active_since` merges the
/// copies back into one entry per backend.
#[derive(Debug, Default)]
pub struct RouteRegistry {
    routes: DashMap<String, Vec<RouteEntry>>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_at(&self, message: &RegisterMessage, at: SystemTime) {
        for uri in normalized_uris(&message.uris) {
            let mut backends = self.routes.entry(uri).or_default();
            match backends
                .iter_mut()
                .find(|e| e.host == message.host && e.port == message.port)
            {
                Some(existing) => {
                    existing.uris = message.uris.clone();
                    existing.tags = message.tags.clone();
                    existing.app = message.app.clone();
                    existing.private_instance_id = message.private_instance_id.clone();
                    existing.updated_at = at;
                }
                None => backends.push(RouteEntry {
                    host: message.host.clone(),
                    port: message.port,
                    uris: message.uris.clone(),
                    tags: message.tags.clone(),
                    app: message.app.clone(),
                    private_instance_id: message.private_instance_id.clone(),
                    registered_at: at,
                    updated_at: at,
                    last_active_at: None,
                }),
            }
        }
    }

    pub fn lookup_at(&self, uri: &str, at: SystemTime) -> Option<RouteEntry> {
        let mut backends = self.routes.get_mut(&normalize(uri))?;
        if backends.is_empty() {
            return None;
        }
        let pick = fastrand::usize(..backends.len());
        let entry = &mut backends[pick];
        entry.last_active_at = Some(at);
        Some(entry.clone())
    }
}

impl Registry for RouteRegistry {
    fn register(&self, message: &RegisterMessage) {
        self.register_at(message, SystemTime::now());
    }

    fn unregister(&self, message: &RegisterMessage) {
        for uri in normalized_uris(&message.uris) {
            if let Some(mut backends) = self.routes.get_mut(&uri) {
                backends.retain(|e| !(e.host == message.host && e.port == message.port));
            }
            self.routes.remove_if(&uri, |_, backends| backends.is_empty());
        }
    }

    fn active_since(&self, since: SystemTime) -> Vec<RouteEntry> {
        let mut merged: HashMap<String, RouteEntry> = HashMap::new();
        for route in self.routes.iter() {
            for entry in route.value().iter().filter(|e| e.last_seen() > since) {
                merged
                    .entry(entry.backend_key())
                    .and_modify(|current| merge_copy(current, entry))
                    .or_insert_with(|| entry.clone());
            }
        }

        let mut entries: Vec<RouteEntry> = merged.into_values().collect();
        entries.sort_by(|a, b| (&a.host, a.port).cmp(&(&b.host, b.port)));
        entries
    }

    fn lookup(&self, uri: &str) -> Option<RouteEntry> {
        self.lookup_at(uri, SystemTime::now())
    }

    fn route_count(&self) -> usize {
        self.routes.len()
    }
}

/// Fold another uri's copy of the same backend into `current`.
///
/// The most recently registered copy supplies the descriptive fields.
fn merge_copy(current: &mut RouteEntry, other: &RouteEntry) {
    let registered_at = current.registered_at.min(other.registered_at);
    let last_active_at = current.last_active_at.max(other.last_active_at);
    if other.updated_at > current.updated_at {
        *current = other.clone();
    }
    current.registered_at = registered_at;
    current.last_active_at = last_active_at;
}

fn normalize(uri: &str) -> String {
    uri.trim().to_lowercase()
}

fn normalized_uris(uris: &[String]) -> impl Iterator<Item = String> + '_ {
    uris.iter().map(|u| normalize(u)).filter(|u| !u.is_empty())
}
