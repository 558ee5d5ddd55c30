//! Startup orchestration.
//!
//! # Responsibilities
//! - Connect to the bus and register with the component directory
//! - Start registration ingest before announcing readiness
//! - Start the snapshot publisher
//! - Bind the listener, warm up, serve until shutdown, then race the drain
//!
//! # Design Decisions
//! - Fail fast: every startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - The listener binds last (traffic only when ready)

use bytes::Bytes;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::bus::{BusError, MessageBus, NatsBus, START_TOPIC};
use crate::component::varz::Varz;
use crate::component::{self, Component, ComponentError, ComponentRegistration, ComponentSources};
use crate::config::RouterConfig;
use crate::ingest::{IngestTasks, RegistrationIngest};
use crate::lifecycle::shutdown::{race_drain, report, ShutdownState};
use crate::net::{ConnectionHandler, ConnectionTracker, ListenerError, ListenerHandle, TrackingListener};
use crate::proxy::ProxyHandler;
use crate::registry::{Registry, RouteRegistry};
use crate::snapshot::SnapshotPublisher;

/// Fatal startup failures.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to connect to message bus: {0}")]
    BusConnect(#[source] BusError),

    #[error("component registration failed: {0}")]
    Component(#[from] ComponentError),

    #[error("failed to subscribe for registrations: {0}")]
    Subscribe(#[source] BusError),

    #[error("failed to open listener: {0}")]
    Listen(#[from] ListenerError),

    #[error("failed to install shutdown signal handler: {0}")]
    Signal(#[source] std::io::Error),
}

/// Connect to the configured bus and start a router backed by a fresh
/// [`RouteRegistry`].
pub async fn launch(config: RouterConfig) -> Result<Running, StartupError> {
    let bus = NatsBus::connect(&config.nats)
        .await
        .map_err(StartupError::BusConnect)?;
    LifecycleCoordinator::new(config, Arc::new(RouteRegistry::new()), Arc::new(bus))
        .start()
        .await
}

/// Sequences startup of every component around an already-connected bus.
pub struct LifecycleCoordinator {
    config: RouterConfig,
    registry: Arc<dyn Registry>,
    bus: Arc<dyn MessageBus>,
    listen_addr: SocketAddr,
    tracker: ConnectionTracker,
    varz: Arc<Varz>,
}

impl LifecycleCoordinator {
    pub fn new(config: RouterConfig, registry: Arc<dyn Registry>, bus: Arc<dyn MessageBus>) -> Self {
        let tracker = ConnectionTracker::new();
        let varz = Arc::new(Varz::new(registry.clone(), tracker.clone()));
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port)),
            config,
            registry,
            bus,
            tracker,
            varz,
        }
    }

    /// Listen somewhere other than `0.0.0.0:<port>`.
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    pub fn varz(&self) -> Arc<Varz> {
        self.varz.clone()
    }

    /// Run every startup step up to and including binding the listener.
    pub async fn start(self) -> Result<Running, StartupError> {
        let component = Component::for_router(&self.config)?;
        let sources = ComponentSources::new(&self.config, self.varz.clone())?;
        let status_bind = match self.config.status.port {
            0 => None,
            port => Some(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))),
        };
        let registration = component::register(component, sources, self.bus.clone(), status_bind).await?;

        let ingest = RegistrationIngest::new(self.bus.clone(), self.registry.clone(), self.varz.clone())
            .start()
            .await
            .map_err(StartupError::Subscribe)?;

        // Fire-and-forget, like every other publish.
        if let Err(e) = self.bus.publish(START_TOPIC, Bytes::new()).await {
            tracing::warn!(error = %e, "Failed to announce router start");
        }

        let snapshots = SnapshotPublisher::new(self.registry.clone(), self.bus.clone(), self.varz.clone())
            .schedule(self.config.flush_apps_interval());

        let listener = TrackingListener::bind_addr(self.listen_addr, self.tracker.clone()).await?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        Ok(Running {
            listener,
            local_addr,
            warmup: self.config.proxy_warmup(),
            deadline: self.config.wait_before_exiting(),
            registry: self.registry,
            varz: self.varz,
            registration,
            ingest,
            snapshots,
        })
    }
}

/// A started router whose listener is bound but not yet serving.
pub struct Running {
    listener: TrackingListener,
    local_addr: SocketAddr,
    warmup: Option<Duration>,
    deadline: Duration,
    registry: Arc<dyn Registry>,
    varz: Arc<Varz>,
    registration: ComponentRegistration,
    ingest: IngestTasks,
    snapshots: Option<JoinHandle<()>>,
}

impl Running {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn listener_handle(&self) -> ListenerHandle {
        self.listener.handle()
    }

    pub fn varz(&self) -> Arc<Varz> {
        self.varz.clone()
    }

    pub fn registration(&self) -> &ComponentRegistration {
        &self.registration
    }

    /// Registration consumers. They run until process exit.
    pub fn ingest(&self) -> &IngestTasks {
        &self.ingest
    }

    pub fn snapshots_scheduled(&self) -> bool {
        self.snapshots.is_some()
    }

    /// Serve with the registry-backed proxy.
    pub async fn serve_proxy<S>(self, shutdown: S) -> ShutdownState
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(ProxyHandler::new(self.registry.clone(), self.varz.clone()));
        self.serve(handler, shutdown).await
    }

    /// Warm up, serve until `shutdown` resolves, then race the drain against
    /// the deadline.
    ///
    /// The drain only starts from a shutdown request. If the listener fails
    /// on its own, nothing drains and the deadline path is taken.
    pub async fn serve<H, S>(self, handler: Arc<H>, shutdown: S) -> ShutdownState
    where
        H: ConnectionHandler,
        S: Future<Output = ()> + Send + 'static,
    {
        let (finished_tx, finished_rx) = oneshot::channel();
        let handle = self.listener.handle();
        tokio::spawn(async move {
            shutdown.await;
            tracing::info!("Closing listener...");
            handle.close();
            handle.wait_for_connections_closed().await;
            let _ = finished_tx.send(());
        });

        if let Some(warmup) = self.warmup {
            tracing::info!(warmup_secs = warmup.as_secs(), "Warming up proxy server ...");
            tokio::time::sleep(warmup).await;
        }

        tracing::info!(address = %self.local_addr, "Serving connections");
        let served = self.listener.serve(handler).await;

        let drained = async {
            if finished_rx.await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        let state = race_drain(drained, self.deadline).await;
        report(state, &served);
        state
    }
}
