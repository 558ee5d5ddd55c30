//! TCP listener with connection tracking.
//!
//! # Responsibilities
//! - Bind the proxy port
//! - Accept connections and hand each to a handler task
//! - Stop accepting on `close()` and let callers wait for in-flight work
//!
//! The socket is bound before serving starts, so during warmup the kernel
//! backlog queues connections that are accepted once `serve` runs.

use std::future::Future;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::net::connection::ConnectionTracker;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(std::io::Error),
    /// Failed to accept connection.
    Accept(std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {}

/// Serves one accepted connection to completion.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn handle(&self, stream: TcpStream, peer: SocketAddr) -> impl Future<Output = ()> + Send;
}

/// Control handle for a [`TrackingListener`], usable from other tasks.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    closed: Arc<watch::Sender<bool>>,
    tracker: ConnectionTracker,
}

impl ListenerHandle {
    /// Stop accepting new connections. In-flight connections continue.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolve once every accepted connection has finished.
    pub async fn wait_for_connections_closed(&self) {
        self.tracker.wait_for_connections_closed().await;
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }
}

pub struct TrackingListener {
    inner: TcpListener,
    handle: ListenerHandle,
}

impl TrackingListener {
    pub async fn bind_addr(
        addr: SocketAddr,
        tracker: ConnectionTracker,
    ) -> Result<Self, ListenerError> {
        let inner = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        let local_addr = inner.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(address = %local_addr, "Listener bound");

        let (closed, _) = watch::channel(false);
        Ok(Self {
            inner,
            handle: ListenerHandle {
                closed: Arc::new(closed),
                tracker,
            },
        })
    }

    pub fn handle(&self) -> ListenerHandle {
        self.handle.clone()
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Accept and serve connections until closed or a fatal accept error.
    ///
    /// Returns `Ok(())` after `close()`. The socket is dropped on return, so
    /// new connections are refused from then on.
    pub async fn serve<H: ConnectionHandler>(self, handler: Arc<H>) -> Result<(), ListenerError> {
        let mut closed = self.handle.closed.subscribe();

        loop {
            tokio::select! {
                biased;
                _ = wait_closed(&mut closed) => {
                    tracing::info!("Listener closed, no longer accepting");
                    return Ok(());
                }
                accepted = self.inner.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let guard = self.handle.tracker.track();
                        let handler = Arc::clone(&handler);
                        tracing::debug!(peer_addr = %peer, connection_id = %guard.id(), "Connection accepted");
                        tokio::spawn(async move {
                            handler.handle(stream, peer).await;
                            drop(guard);
                        });
                    }
                    Err(e) if is_transient(&e) => {
                        tracing::debug!(error = %e, "Transient accept error");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Accept failed, listener stopping");
                        return Err(ListenerError::Accept(e));
                    }
                }
            }
        }
    }
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|c| *c).await;
}

fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::Interrupted
    )
}
