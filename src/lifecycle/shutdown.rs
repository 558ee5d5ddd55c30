//! Shutdown coordination.
//!
//! A shutdown request closes the listener and starts draining. The drain is
//! raced against a deadline; exactly one outcome is acted on and the other is
//! abandoned.

use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::net::ListenerError;

/// Coordinator for shutdown requests.
///
/// Provides a broadcast channel that any task can wait on.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Future resolving once shutdown is triggered.
    ///
    /// Subscribes immediately, so a trigger issued after this call is never
    /// missed. Also resolves if the coordinator is dropped.
    pub fn requested(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            let _ = rx.recv().await;
        }
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Which side of the shutdown race finished first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    /// Every in-flight connection completed before the deadline.
    Drained,
    /// The deadline elapsed first; remaining connections are abandoned.
    TimedOut,
}

/// Race `drained` against `deadline`.
///
/// If both are ready at the same poll, draining wins.
pub async fn race_drain<F>(drained: F, deadline: Duration) -> ShutdownState
where
    F: Future<Output = ()>,
{
    tokio::select! {
        biased;
        _ = drained => ShutdownState::Drained,
        _ = tokio::time::sleep(deadline) => ShutdownState::TimedOut,
    }
}

/// Log the outcome of the race together with how the serve loop ended.
pub fn report(state: ShutdownState, served: &Result<(), ListenerError>) {
    match (state, served) {
        (ShutdownState::Drained, _) => tracing::info!("Shutdown gracefully"),
        (ShutdownState::TimedOut, Err(e)) => {
            tracing::error!(error = %e, "Shutdown deadline exceeded")
        }
        (ShutdownState::TimedOut, Ok(())) => tracing::error!(
            "Shutdown deadline exceeded with connections still in flight; serve loop ended without error, cause unknown"
        ),
    }
}
