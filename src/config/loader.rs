//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::RouterConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    InvalidUri(url::ParseError),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::InvalidUri(e) => write!(f, "Invalid nats uri: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load, sanitize and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<RouterConfig, ConfigError> {
    prepare_config(read_config(path)?)
}

/// Read a TOML file without sanitizing or validating it, so callers can
/// apply overrides first.
pub fn read_config(path: &Path) -> Result<RouterConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    toml::from_str(&content).map_err(ConfigError::Parse)
}

/// Same as [`load_config`] for an in-memory document.
pub fn parse_config(content: &str) -> Result<RouterConfig, ConfigError> {
    let config: RouterConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    prepare_config(config)
}

/// Sanitize and validate an already-built config.
pub fn prepare_config(mut config: RouterConfig) -> Result<RouterConfig, ConfigError> {
    sanitize_config(&mut config)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Fill `nats.host`, `nats.user` and `nats.pass` from `nats.uri`.
pub fn sanitize_config(config: &mut RouterConfig) -> Result<(), ConfigError> {
    if config.nats.uri.is_empty() {
        return Ok(());
    }

    let uri = url::Url::parse(&config.nats.uri).map_err(ConfigError::InvalidUri)?;

    if let Some(host) = uri.host_str() {
        config.nats.host = match uri.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
    }
    if !uri.username().is_empty() {
        config.nats.user = uri.username().to_string();
        config.nats.pass = uri.password().unwrap_or_default().to_string();
    }

    Ok(())
}
