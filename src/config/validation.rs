//! Configuration validation.
//!
//! Serde handles syntax; this module checks the values make sense together.
//! All problems are reported at once rather than stopping at the first.

use crate::config::schema::RouterConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("nats server not configured")]
    MissingBusEndpoint,

    #[error("port must be non-zero")]
    ZeroPort,

    #[error("status port {0} requires a user and password")]
    MissingStatusCredentials(u16),
}

/// Validate a sanitized configuration.
pub fn validate_config(config: &RouterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.nats.host.is_empty() {
        errors.push(ValidationError::MissingBusEndpoint);
    }

    if config.port == 0 {
        errors.push(ValidationError::ZeroPort);
    }

    if config.status.port != 0
        && (config.status.user.is_empty() || config.status.password.is_empty())
    {
        errors.push(ValidationError::MissingStatusCredentials(config.status.port));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
