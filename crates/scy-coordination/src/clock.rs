//! Wall-clock rollback guard.
//!
//! Each node keeps its last observed wall-clock time in a persistent node
//! at `/snowflake/forever/{node_id}`. Id generators that embed timestamps
//! must not start on a node whose clock is behind that watermark.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use scy_store::CoordinationStore;
use scy_store::CreateMode;
use scy_store::path::join;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::constants::CLOCK_MONITOR_PATH;
use crate::error::CoordinationError;
use crate::pure::is_clock_rollback;
use crate::task::PeriodicTask;
use crate::types::now_unix_ms;

/// Uploads and checks this node's clock watermark.
pub struct ClockMonitor<S: CoordinationStore + ?Sized + 'static> {
    store: Arc<S>,
    path: String,
    last_upload_ms: AtomicU64,
}

impl<S: CoordinationStore + ?Sized + 'static> ClockMonitor<S> {
    /// Create a monitor for `node_id`.
    pub fn new(store: Arc<S>, node_id: &str) -> Self {
        Self {
            store,
            path: join(CLOCK_MONITOR_PATH, node_id),
            last_upload_ms: AtomicU64::new(0),
        }
    }

    /// Watermark node path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last watermark uploaded by this monitor, 0 if none.
    pub fn last_upload_ms(&self) -> u64 {
        self.last_upload_ms.load(Ordering::Acquire)
    }

    /// Verify the local clock against the stored watermark, then record now.
    pub async fn check(&self) -> Result<(), CoordinationError> {
        self.check_at(now_unix_ms()).await
    }

    /// [`check`](Self::check) with an explicit current time.
    pub async fn check_at(&self, now_ms: u64) -> Result<(), CoordinationError> {
        match self.store.get_data(&self.path).await {
            Ok(data) => match data.trim().parse::<u64>() {
                Ok(recorded_ms) if is_clock_rollback(recorded_ms, now_ms) => {
                    error!(path = %self.path, recorded_ms, now_ms, "clock rollback detected");
                    return Err(CoordinationError::ClockRollback {
                        path: self.path.clone(),
                        recorded_ms,
                        now_ms,
                    });
                }
                Ok(_) => {}
                Err(_) => warn!(path = %self.path, data = %data, "unreadable clock watermark, overwriting"),
            },
            Err(e) if e.is_not_found() => info!(path = %self.path, "no clock watermark recorded yet"),
            Err(e) => return Err(e.into()),
        }

        self.store.create_or_update(&self.path, &now_ms.to_string(), CreateMode::Persistent).await?;
        self.last_upload_ms.store(now_ms, Ordering::Release);
        Ok(())
    }

    /// Upload the current time as the new watermark.
    pub async fn upload(&self) -> bool {
        self.upload_at(now_unix_ms()).await
    }

    /// [`upload`](Self::upload) with an explicit current time.
    ///
    /// Refuses to move the watermark backwards.
    pub async fn upload_at(&self, now_ms: u64) -> bool {
        let last = self.last_upload_ms();
        if is_clock_rollback(last, now_ms) {
            error!(path = %self.path, last_upload_ms = last, now_ms, "clock moved backwards since last upload");
            return false;
        }

        match self.store.create_or_update(&self.path, &now_ms.to_string(), CreateMode::Persistent).await {
            Ok(_) => {
                self.last_upload_ms.store(now_ms, Ordering::Release);
                true
            }
            Err(e) => {
                warn!(path = %self.path, error = %e, "failed to upload clock watermark");
                false
            }
        }
    }

    /// Check the clock, then upload on a fixed schedule.
    ///
    /// Nothing is scheduled if the check fails.
    pub async fn start(self: &Arc<Self>, initial_delay: Duration, period: Duration) -> Result<PeriodicTask, CoordinationError> {
        self.check().await?;
        let monitor = Arc::clone(self);
        Ok(PeriodicTask::spawn("clock-monitor", initial_delay, period, move || {
            let monitor = monitor.clone();
            async move {
                monitor.upload().await;
            }
        }))
    }
}
