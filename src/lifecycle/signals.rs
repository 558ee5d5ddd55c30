//! OS signal handling.
//!
//! SIGUSR1 (Ctrl-C on non-unix targets) requests a graceful shutdown. The
//! coordinator never sees the signal itself, only the [`Shutdown`] trigger.

use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::startup::StartupError;

/// Install the operator's shutdown signal handler.
///
/// The returned future resolves when the signal arrives.
#[cfg(unix)]
pub fn shutdown_signal() -> std::io::Result<impl Future<Output = ()> + Send + 'static> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut usr1 = signal(SignalKind::user_defined1())?;
    Ok(async move {
        usr1.recv().await;
    })
}

#[cfg(not(unix))]
pub fn shutdown_signal() -> std::io::Result<impl Future<Output = ()> + Send + 'static> {
    Ok(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    })
}

/// Trigger `shutdown` when the signal arrives.
///
/// The handler is installed before this returns; failing to install it is
/// fatal since the process could then never shut down gracefully.
pub fn spawn_signal_listener(shutdown: Arc<Shutdown>) -> Result<JoinHandle<()>, StartupError> {
    let signal = shutdown_signal().map_err(StartupError::Signal)?;
    Ok(tokio::spawn(async move {
        signal.await;
        tracing::info!("Shutdown signal received");
        shutdown.trigger();
    }))
}
