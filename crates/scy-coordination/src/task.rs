//! Fixed-delay background tasks.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A background task that runs a tick function repeatedly with a fixed
/// delay between the end of one run and the start of the next.
///
/// Cancelled on [`stop`](Self::stop) or drop. A tick in progress is
/// abandoned at its next await point.
pub struct PeriodicTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn on the current tokio runtime.
    ///
    /// The first tick runs after `initial_delay`.
    pub fn spawn<F, Fut>(name: &'static str, initial_delay: Duration, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(initial_delay) => {}
            }

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick() => {}
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
            }
            debug!(task = name, "periodic task stopped");
        });

        debug!(task = name, ?initial_delay, ?period, "periodic task started");
        Self {
            name,
            cancel,
            handle: Some(handle),
        }
    }

    /// Task name used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the task is still scheduled.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel and wait for the task to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    use super::*;

    #[tokio::test]
    async fn ticks_repeatedly_until_stopped() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let task = PeriodicTask::spawn("test", Duration::ZERO, Duration::from_millis(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(task.is_running());
        task.stop().await;

        let after_stop = count.load(Ordering::SeqCst);
        assert!(after_stop >= 2, "expected several ticks, got {after_stop}");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn initial_delay_postpones_first_tick() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let task = PeriodicTask::spawn("delayed", Duration::from_secs(60), Duration::from_secs(60), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        task.stop().await;
    }
}
