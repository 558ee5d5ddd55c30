//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, extract bus endpoint from nats.uri)
//!     → validation.rs (semantic checks)
//!     → RouterConfig (validated, immutable)
//!     → passed by value/Arc into each component
//! ```
//!
//! # Design Decisions
//! - Config is built once in main; there is no process-wide global
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{LoggingConfig, NatsConfig, RouterConfig, StatusConfig};
