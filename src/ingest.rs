//! Registration ingest.
//!
//! Two independent consumer loops, one per topic, decode inbound payloads and
//! apply them to the registry. A payload that fails to decode is logged and
//! dropped; the loop keeps consuming. The loops live as long as their
//! subscription and are not part of graceful shutdown.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::task::JoinHandle;

use crate::bus::{BusError, MessageBus, Subscription, REGISTER_TOPIC, UNREGISTER_TOPIC};
use crate::component::varz::Varz;
use crate::registry::{RegisterMessage, Registry};

/// Which registry operation a topic maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Register,
    Unregister,
}

impl Registration {
    pub fn topic(self) -> &'static str {
        match self {
            Registration::Register => REGISTER_TOPIC,
            Registration::Unregister => UNREGISTER_TOPIC,
        }
    }

    fn apply(self, registry: &dyn Registry, varz: &Varz, message: &RegisterMessage) {
        match self {
            Registration::Register => {
                registry.register(message);
                varz.record_register();
            }
            Registration::Unregister => {
                registry.unregister(message);
                varz.record_unregister();
            }
        }
    }
}

/// Handles for the two running consumer loops.
#[derive(Debug)]
pub struct IngestTasks {
    pub register: JoinHandle<()>,
    pub unregister: JoinHandle<()>,
}

impl IngestTasks {
    pub fn abort(&self) {
        self.register.abort();
        self.unregister.abort();
    }
}

pub struct RegistrationIngest {
    bus: Arc<dyn MessageBus>,
    registry: Arc<dyn Registry>,
    varz: Arc<Varz>,
}

impl RegistrationIngest {
    pub fn new(bus: Arc<dyn MessageBus>, registry: Arc<dyn Registry>, varz: Arc<Varz>) -> Self {
        Self {
            bus,
            registry,
            varz,
        }
    }

    /// Subscribe to both topics and spawn a consumer for each.
    ///
    /// Both subscriptions are live when this returns, so a readiness
    /// announcement made afterwards cannot race ahead of them.
    pub async fn start(&self) -> Result<IngestTasks, BusError> {
        let register = self.bus.subscribe(Registration::Register.topic()).await?;
        let unregister = self.bus.subscribe(Registration::Unregister.topic()).await?;

        Ok(IngestTasks {
            register: tokio::spawn(consume(
                Registration::Register,
                register,
                self.registry.clone(),
                self.varz.clone(),
            )),
            unregister: tokio::spawn(consume(
                Registration::Unregister,
                unregister,
                self.registry.clone(),
                self.varz.clone(),
            )),
        })
    }
}

/// Drain a subscription, applying every decodable payload.
pub async fn consume(
    kind: Registration,
    mut subscription: Subscription,
    registry: Arc<dyn Registry>,
    varz: Arc<Varz>,
) {
    while let Some(message) = subscription.next().await {
        handle_payload(kind, &message.payload, registry.as_ref(), &varz);
    }
    tracing::warn!(topic = kind.topic(), "Subscription closed, consumer stopping");
}

/// Decode and apply one payload. Returns whether it was applied.
pub fn handle_payload(
    kind: Registration,
    payload: &[u8],
    registry: &dyn Registry,
    varz: &Varz,
) -> bool {
    match RegisterMessage::decode(payload) {
        Ok(message) => {
            tracing::debug!(topic = kind.topic(), message = ?message, "Applying registration");
            kind.apply(registry, varz, &message);
            true
        }
        Err(e) => {
            varz.record_malformed_message();
            tracing::warn!(
                topic = kind.topic(),
                payload = %String::from_utf8_lossy(payload),
                error = %e,
                "Unable to decode registration"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::net::connection::ConnectionTracker;
    use crate::registry::RouteEntry;
    use std::sync::Mutex;
    use std::time::{Duration, SystemTime};

    #[derive(Default)]
    struct RecordingRegistry {
        calls: Mutex<Vec<(Registration, RegisterMessage)>>,
    }

    impl RecordingRegistry {
        fn calls(&self) -> Vec<(Registration, RegisterMessage)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Registry for RecordingRegistry {
        fn register(&self, message: &RegisterMessage) {
            self.calls
                .lock()
                .unwrap()
                .push((Registration::Register, message.clone()));
        }

        fn unregister(&self, message: &RegisterMessage) {
            self.calls
                .lock()
                .unwrap()
                .push((Registration::Unregister, message.clone()));
        }

        fn active_since(&self, _since: SystemTime) -> Vec<RouteEntry> {
            Vec::new()
        }

        fn lookup(&self, _uri: &str) -> Option<RouteEntry> {
            None
        }

        fn route_count(&self) -> usize {
            0
        }
    }

    fn fixture() -> (Arc<MemoryBus>, Arc<RecordingRegistry>, Arc<Varz>) {
        let bus = Arc::new(MemoryBus::new());
        let registry = Arc::new(RecordingRegistry::default());
        let varz = Arc::new(Varz::new(registry.clone(), ConnectionTracker::new()));
        (bus, registry, varz)
    }

    const GOOD: &str = r#"{"host":"10.0.0.1","port":61001,"uris":["foo.example.com"]}"#;

    async fn wait_for_calls(registry: &RecordingRegistry, n: usize) {
        for _ in 0..100 {
            if registry.calls().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn malformed_payload_is_not_applied() {
        let (_, registry, varz) = fixture();

        assert!(!handle_payload(Registration::Register, b"{not json", registry.as_ref(), &varz));
        assert!(!handle_payload(Registration::Register, br#"{"host":1}"#, registry.as_ref(), &varz));

        assert!(registry.calls().is_empty());
        assert_eq!(varz.snapshot().malformed_messages, 2);
    }

    #[tokio::test]
    async fn consumer_survives_malformed_messages() {
        let (bus, registry, varz) = fixture();
        let ingest = RegistrationIngest::new(bus.clone(), registry.clone(), varz.clone());
        let tasks = ingest.start().await.unwrap();

        bus.inject_payload(REGISTER_TOPIC, "garbage");
        bus.inject_payload(REGISTER_TOPIC, GOOD);
        bus.inject_payload(REGISTER_TOPIC, "");
        bus.inject_payload(REGISTER_TOPIC, GOOD);

        wait_for_calls(&registry, 2).await;
        let calls = registry.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|(kind, _)| *kind == Registration::Register));
        assert!(!tasks.register.is_finished());
        assert_eq!(varz.snapshot().malformed_messages, 2);

        tasks.abort();
    }

    #[tokio::test]
    async fn unregister_topic_maps_to_unregister() {
        let (bus, registry, varz) = fixture();
        let tasks = RegistrationIngest::new(bus.clone(), registry.clone(), varz.clone())
            .start()
            .await
            .unwrap();

        bus.inject_payload(UNREGISTER_TOPIC, "oops");
        bus.inject_payload(UNREGISTER_TOPIC, GOOD);

        wait_for_calls(&registry, 1).await;
        let calls = registry.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, Registration::Unregister);
        assert_eq!(calls[0].1.uris, vec!["foo.example.com".to_string()]);
        assert_eq!(varz.snapshot().unregisters, 1);

        tasks.abort();
    }

    #[tokio::test]
    async fn subscriptions_are_live_when_start_returns() {
        let (bus, registry, varz) = fixture();
        let tasks = RegistrationIngest::new(bus.clone(), registry, varz)
            .start()
            .await
            .unwrap();

        assert_eq!(bus.subscriber_count(REGISTER_TOPIC), 1);
        assert_eq!(bus.subscriber_count(UNREGISTER_TOPIC), 1);

        tasks.abort();
    }
}
