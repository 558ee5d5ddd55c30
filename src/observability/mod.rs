//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with structured fields
//!     → logging.rs subscriber (stdout, human or JSON)
//!     → component::varz counters, pulled over /varz
//! ```

pub mod logging;

pub use logging::init_logging;
