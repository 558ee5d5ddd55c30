//! Component directory registration.
//!
//! # Data Flow
//! ```text
//! startup
//!     → Component (type, index, host, credentials, uuid)
//!     → status.rs serves /healthz and /varz (when a status port is set)
//!     → answer vcap.component.discover via reply topic
//!     → publish vcap.component.announce
//! ```
//!
//! # Design Decisions
//! - One-shot: any failure here is fatal to startup, nothing is retried
//! - The config snapshot handed to observers has passwords redacted

pub mod status;
pub mod varz;

use bytes::Bytes;
use futures_util::StreamExt;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;

use crate::bus::{BusError, MessageBus, COMPONENT_ANNOUNCE_TOPIC, COMPONENT_DISCOVER_TOPIC};
use crate::config::RouterConfig;
use self::status::StatusState;
use self::varz::Varz;

pub const COMPONENT_TYPE: &str = "Router";

#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
    #[error("unable to determine local ip: {0}")]
    LocalIp(String),

    #[error("failed to bind status endpoint on {addr}: {source}")]
    StatusBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize component: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Identity this process announces to the component directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Component {
    #[serde(rename = "type")]
    pub kind: String,
    pub index: u32,
    /// Reachable `ip:port` of the status endpoint, empty when disabled.
    pub host: String,
    pub credentials: Vec<String>,
    pub uuid: String,
    /// Process start, seconds since the Unix epoch.
    pub start: u64,
}

impl Component {
    /// Describe this router from its configuration.
    pub fn for_router(config: &RouterConfig) -> Result<Self, ComponentError> {
        let host = if config.status.port == 0 {
            String::new()
        } else {
            let ip = local_ip_address::local_ip()
                .map_err(|e| ComponentError::LocalIp(e.to_string()))?;
            format!("{}:{}", ip, config.status.port)
        };

        Ok(Self {
            kind: COMPONENT_TYPE.to_string(),
            index: config.index,
            host,
            credentials: vec![config.status.user.clone(), config.status.password.clone()],
            uuid: uuid::Uuid::new_v4().to_string(),
            start: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        })
    }
}

/// Everything the directory can pull from this process after registration.
#[derive(Clone)]
pub struct ComponentSources {
    pub config: Arc<serde_json::Value>,
    pub varz: Arc<Varz>,
}

impl ComponentSources {
    pub fn new(config: &RouterConfig, varz: Arc<Varz>) -> Result<Self, ComponentError> {
        Ok(Self {
            config: Arc::new(serde_json::to_value(config.redacted())?),
            varz,
        })
    }
}

/// Result of a successful registration. Dropping it leaves the background
/// tasks running.
#[derive(Debug)]
pub struct ComponentRegistration {
    pub component: Arc<Component>,
    pub status_addr: Option<SocketAddr>,
    pub discover_task: JoinHandle<()>,
    pub status_task: Option<JoinHandle<()>>,
}

/// Register with the component directory.
///
/// Starts the status endpoint on `status_bind` (if any), answers discovery
/// requests and publishes the announcement.
pub async fn register(
    component: Component,
    sources: ComponentSources,
    bus: Arc<dyn MessageBus>,
    status_bind: Option<SocketAddr>,
) -> Result<ComponentRegistration, ComponentError> {
    let component = Arc::new(component);
    let announcement = Bytes::from(serde_json::to_vec(component.as_ref())?);

    let (status_addr, status_task) = match status_bind {
        Some(addr) => {
            let state = StatusState::new(component.clone(), sources);
            let (local, task) = status::serve(addr, state).await?;
            (Some(local), Some(task))
        }
        None => (None, None),
    };

    let mut discover = bus.subscribe(COMPONENT_DISCOVER_TOPIC).await?;
    let responder_bus = bus.clone();
    let response = announcement.clone();
    let discover_task = tokio::spawn(async move {
        while let Some(message) = discover.next().await {
            let Some(reply) = message.reply else {
                continue;
            };
            if let Err(e) = responder_bus.publish(&reply, response.clone()).await {
                tracing::warn!(error = %e, "Failed to answer component discovery");
            }
        }
    });

    if let Err(e) = bus.publish(COMPONENT_ANNOUNCE_TOPIC, announcement).await {
        discover_task.abort();
        if let Some(task) = &status_task {
            task.abort();
        }
        return Err(e.into());
    }

    tracing::info!(
        uuid = %component.uuid,
        index = component.index,
        host = %component.host,
        "Registered with component directory"
    );

    Ok(ComponentRegistration {
        component,
        status_addr,
        discover_task,
        status_task,
    })
}
