//! Edge router library.
//!
//! Routes are learned from registration messages on the bus, published back
//! as periodic snapshots, and served by a connection-tracking listener that
//! drains gracefully on shutdown.

pub mod bus;
pub mod component;
pub mod config;
pub mod ingest;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod registry;
pub mod snapshot;

pub use bus::{MemoryBus, MessageBus, NatsBus};
pub use config::RouterConfig;
pub use lifecycle::{LifecycleCoordinator, Shutdown, ShutdownState};
pub use registry::{Registry, RouteRegistry};
