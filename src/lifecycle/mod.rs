//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Connect bus → Register component → Subscribe ingest → Announce start
//!     → Schedule snapshots → Bind listener → Warmup → Serve
//!
//! Shutdown (shutdown.rs):
//!     Request received → Close listener → Drain connections ⟷ Deadline → Exit
//!
//! Signals (signals.rs):
//!     SIGUSR1 → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: subscriptions exist before readiness is announced
//! - Fail fast: any startup error is fatal, nothing is retried here
//! - Shutdown has a deadline: whichever of drain/deadline finishes first decides

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownState};
pub use startup::{LifecycleCoordinator, Running, StartupError};
