//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, close signal)
//!     → connection.rs (guard held for the connection's lifetime)
//!     → ConnectionHandler (proxy)
//!
//! Shutdown:
//!     ListenerHandle::close → accept loop returns
//!     ListenerHandle::wait_for_connections_closed → resolves at zero in-flight
//! ```
//!
//! # Design Decisions
//! - Each connection tracked for graceful shutdown
//! - Close is a watch flag so it can be raised from any task, even before serving

pub mod connection;
pub mod listener;

pub use connection::ConnectionTracker;
pub use listener::{ConnectionHandler, ListenerError, ListenerHandle, TrackingListener};
