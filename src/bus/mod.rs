//! Message bus subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound:
//!     bus server → subscribe(topic) → Subscription stream → ingest / component
//!
//! Outbound:
//!     startup announcement, snapshots, component announce
//!     → publish(topic, payload) (fire-and-forget)
//! ```
//!
//! # Design Decisions
//! - Delivery is unordered and best-effort; consumers must tolerate loss
//! - One shared client; publish is safe from any number of tasks
//! - Reconnection belongs to the client implementation, not to callers

pub mod memory;
pub mod nats;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;

pub use memory::MemoryBus;
pub use nats::NatsBus;

/// Inbound route registrations.
pub const REGISTER_TOPIC: &str = "router.register";
/// Inbound route removals.
pub const UNREGISTER_TOPIC: &str = "router.unregister";
/// Readiness announcement, empty payload.
pub const START_TOPIC: &str = "router.start";
/// Compressed snapshots of recently active routes.
pub const ACTIVE_APPS_TOPIC: &str = "router.active_apps";
/// Component directory announcement.
pub const COMPONENT_ANNOUNCE_TOPIC: &str = "vcap.component.announce";
/// Component directory discovery requests.
pub const COMPONENT_DISCOVER_TOPIC: &str = "vcap.component.discover";

/// A message delivered on a subscribed topic.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    /// Topic a response should be published to, if the sender expects one.
    pub reply: Option<String>,
    pub payload: Bytes,
}

/// Stream of inbound messages for one subscription.
pub type Subscription = BoxStream<'static, BusMessage>;

/// Errors surfaced by a bus client.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("failed to subscribe to {topic}: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("failed to publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },
}

/// Publish/subscribe access to the message bus.
///
/// Implementations are shared behind `Arc<dyn MessageBus>` by every
/// component and must accept concurrent calls.
pub trait MessageBus: Send + Sync + 'static {
    /// Publish a payload. Success means the client accepted it, not that
    /// anyone received it.
    fn publish(&self, topic: &str, payload: Bytes) -> BoxFuture<'_, Result<(), BusError>>;

    /// Subscribe to a topic. The subscription is live once this resolves.
    fn subscribe(&self, topic: &str) -> BoxFuture<'_, Result<Subscription, BusError>>;
}
