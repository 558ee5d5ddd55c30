//! Periodic snapshots of recently active routes.
//!
//! # Data Flow
//! ```text
//! tick (every interval)
//!     → Registry::active_since(last_flush_at)
//!     → JSON encode → zlib compress
//!     → publish on router.active_apps
//!     → last_flush_at = tick time (always, even on failure)
//! ```
//!
//! # Design Decisions
//! - At-most-once: a failed cycle consumes its window and is not retried
//! - One sequential loop; a slow cycle delays the next tick instead of overlapping
//! - Empty windows are still published

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::bus::{BusError, MessageBus, ACTIVE_APPS_TOPIC};
use crate::component::varz::Varz;
use crate::registry::{Registry, RouteEntry};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to compress snapshot: {0}")]
    Compress(#[source] std::io::Error),

    #[error("failed to decompress snapshot: {0}")]
    Decompress(#[source] std::io::Error),

    #[error(transparent)]
    Publish(#[from] BusError),
}

/// Serialize and compress a set of entries for the wire.
pub fn encode_snapshot(entries: &[RouteEntry]) -> Result<Vec<u8>, SnapshotError> {
    let json = serde_json::to_vec(entries)?;
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(json.len() / 2), Compression::default());
    encoder.write_all(&json).map_err(SnapshotError::Compress)?;
    encoder.finish().map_err(SnapshotError::Compress)
}

/// Inverse of [`encode_snapshot`].
pub fn decode_snapshot(payload: &[u8]) -> Result<Vec<RouteEntry>, SnapshotError> {
    let mut json = Vec::new();
    ZlibDecoder::new(payload)
        .read_to_end(&mut json)
        .map_err(SnapshotError::Decompress)?;
    Ok(serde_json::from_slice(&json)?)
}

pub struct SnapshotPublisher {
    registry: Arc<dyn Registry>,
    bus: Arc<dyn MessageBus>,
    varz: Arc<Varz>,
    last_flush_at: watch::Sender<SystemTime>,
}

impl SnapshotPublisher {
    /// Create a publisher whose first window starts now.
    pub fn new(registry: Arc<dyn Registry>, bus: Arc<dyn MessageBus>, varz: Arc<Varz>) -> Self {
        Self::starting_at(registry, bus, varz, SystemTime::now())
    }

    pub fn starting_at(
        registry: Arc<dyn Registry>,
        bus: Arc<dyn MessageBus>,
        varz: Arc<Varz>,
        last_flush_at: SystemTime,
    ) -> Self {
        let (last_flush_at, _) = watch::channel(last_flush_at);
        Self {
            registry,
            bus,
            varz,
            last_flush_at,
        }
    }

    pub fn last_flush_at(&self) -> SystemTime {
        *self.last_flush_at.borrow()
    }

    /// Read-only view of the flush window, usable after the publisher has
    /// been moved into its task.
    pub fn window(&self) -> watch::Receiver<SystemTime> {
        self.last_flush_at.subscribe()
    }

    /// Start the periodic task. `None` (disabled) starts nothing.
    pub fn schedule(self, interval: Option<Duration>) -> Option<JoinHandle<()>> {
        let interval = interval.filter(|i| !i.is_zero())?;
        tracing::info!(interval_secs = interval.as_secs(), "Scheduling active route snapshots");
        Some(tokio::spawn(self.run(interval)))
    }

    async fn run(self, interval: Duration) {
        // Wall-clock tick times are derived from the monotonic clock at the
        // moment the tick is observed, not from the scheduled deadline, which
        // lags behind after an overrunning cycle.
        let wall_origin = self.last_flush_at();
        let origin = Instant::now();
        let mut ticker = time::interval_at(origin + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let tick = wall_origin + Instant::now().duration_since(origin);
            // Failures are logged inside flush; the window is consumed either way.
            let _ = self.flush(tick).await;
        }
    }

    /// Run one publish cycle for the window `(last_flush_at, tick]`.
    ///
    /// The window is advanced to `tick` whatever the outcome. Returns the
    /// compressed payload size on success.
    pub async fn flush(&self, tick: SystemTime) -> Result<usize, SnapshotError> {
        let since = self.last_flush_at();
        let result = self.publish_since(since).await;
        self.last_flush_at.send_replace(tick);

        match &result {
            Ok(_) => self.varz.record_snapshot(true),
            Err(e) => {
                self.varz.record_snapshot(false);
                tracing::warn!(error = %e, "Active route snapshot dropped");
            }
        }
        result
    }

    async fn publish_since(&self, since: SystemTime) -> Result<usize, SnapshotError> {
        let entries = self.registry.active_since(since);
        let payload = encode_snapshot(&entries)?;
        let size = payload.len();

        tracing::debug!(active_routes = entries.len(), message_size = size, "Publishing active routes");

        self.bus.publish(ACTIVE_APPS_TOPIC, Bytes::from(payload)).await?;
        Ok(size)
    }
}
