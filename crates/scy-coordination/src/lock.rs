//! Distributed mutual exclusion over ephemeral nodes.
//!
//! A lock on `key` is held by whoever owns the ephemeral node at
//! `/distributedlocks/{key}`; the store's atomic create-if-absent is the
//! only arbiter. Waiters combine push and poll: a watch on the parent
//! namespace wakes them as soon as the node is deleted, and every wait is
//! bounded by [`LockConfig::retry_timeout_ms`] so a dropped notification
//! only delays acquisition, never prevents it.
//!
//! There is no queue. On release every waiter races for the node.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use scy_store::CoordinationStore;
use scy_store::CreateMode;
use scy_store::StoreError;
use scy_store::WatchMode;
use scy_store::path::parent;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::CoordinationError;
use crate::pure::lock_path;
use crate::pure::validate_lock_key;
use crate::types::LockEntry;
use crate::watch::DataListener;
use crate::watch::ListenerId;
use crate::watch::WatchDispatcher;

/// Lock retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Longest single wait for a delete notification before retrying.
    #[serde(default = "crate::config::defaults::lock_retry_timeout_ms")]
    pub retry_timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            retry_timeout_ms: crate::config::defaults::lock_retry_timeout_ms(),
        }
    }
}

impl LockConfig {
    /// Retry granularity as a [`Duration`].
    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }
}

/// Proof of a held lock. Pass it to [`DistributedLock::unlock`] to release.
///
/// Not tied to the acquiring task; any task may release it.
#[must_use = "a held lock is only released through DistributedLock::unlock"]
#[derive(Debug)]
pub struct LockHandle {
    key: String,
    path: String,
    holder_id: String,
    acquired_at_ms: u64,
    attempts: u32,
    listener: Option<ListenerId>,
}

impl LockHandle {
    /// The locked key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Store path of the lock node.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Unique identity of this acquisition, stored in the lock node.
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// When the lock was acquired (Unix timestamp milliseconds).
    pub fn acquired_at_ms(&self) -> u64 {
        self.acquired_at_ms
    }

    /// Create attempts made before acquisition, including the successful one.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Wakes a waiter when the node at `path` is deleted.
///
/// Armed with a fresh single-use channel before every create attempt.
struct LockWaiter {
    path: String,
    slot: Mutex<Option<oneshot::Sender<()>>>,
}

impl LockWaiter {
    fn new(path: String) -> Self {
        Self {
            path,
            slot: Mutex::new(None),
        }
    }

    fn arm(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        *self.slot.lock() = Some(tx);
        rx
    }
}

#[async_trait]
impl DataListener for LockWaiter {
    async fn delete(&self, path: &str, _old_data: &str) {
        if path != self.path {
            return;
        }
        if let Some(tx) = self.slot.lock().take() {
            let _ = tx.send(());
        }
    }
}

enum Attempt {
    Acquired(LockEntry),
    Contended,
}

/// Distributed lock over a [`CoordinationStore`].
pub struct DistributedLock<S: CoordinationStore + ?Sized + 'static> {
    store: Arc<S>,
    dispatcher: Arc<WatchDispatcher<S>>,
    config: LockConfig,
}

impl<S: CoordinationStore + ?Sized + 'static> DistributedLock<S> {
    /// Create a lock client.
    pub fn new(store: Arc<S>, dispatcher: Arc<WatchDispatcher<S>>, config: LockConfig) -> Self {
        Self {
            store,
            dispatcher,
            config,
        }
    }

    /// Retry settings in use.
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Acquire the lock on `key`, waiting as long as it takes.
    ///
    /// Contention and store faults are retried indefinitely and never
    /// surface. The only error is an invalid key.
    pub async fn lock(&self, key: &str) -> Result<LockHandle, CoordinationError> {
        self.acquire(key, None).await
    }

    /// Acquire the lock on `key`, giving up after `timeout`.
    pub async fn lock_with_timeout(&self, key: &str, timeout: Duration) -> Result<LockHandle, CoordinationError> {
        self.acquire(key, Some(Instant::now() + timeout)).await
    }

    /// Make a single acquisition attempt.
    ///
    /// Returns `Ok(None)` if someone else holds the lock.
    pub async fn try_lock(&self, key: &str) -> Result<Option<LockHandle>, CoordinationError> {
        check_key(key)?;
        let path = lock_path(key);
        match self.attempt(&path).await? {
            Attempt::Acquired(entry) => {
                info!(path = %path, attempt = 1, "lock acquired");
                Ok(Some(new_handle(key, path, entry, 1, None)))
            }
            Attempt::Contended => Ok(None),
        }
    }

    /// Release a held lock.
    ///
    /// Deletes the lock node only if it still carries this handle's holder
    /// id. A node already gone, for example after session expiry, is not an
    /// error. Returns whether a node was deleted.
    pub async fn unlock(&self, handle: LockHandle) -> bool {
        let released = self.release_node(&handle).await;
        if let Some(listener) = handle.listener {
            self.dispatcher.unwatch(listener).await;
        }
        released
    }

    async fn release_node(&self, handle: &LockHandle) -> bool {
        let data = match self.store.get_data(&handle.path).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => {
                debug!(path = %handle.path, "lock node already gone");
                return false;
            }
            Err(e) => {
                warn!(path = %handle.path, error = %e, "failed to read lock node, leaving it to session expiry");
                return false;
            }
        };

        let owned = serde_json::from_str::<LockEntry>(&data).is_ok_and(|entry| entry.holder_id == handle.holder_id);
        if !owned {
            warn!(path = %handle.path, holder_id = %handle.holder_id, "lock node held by another holder, not deleting");
            return false;
        }

        match self.store.delete(&handle.path).await {
            Ok(()) => {
                info!(path = %handle.path, "lock released");
                true
            }
            Err(e) if e.is_not_found() => false,
            Err(e) => {
                warn!(path = %handle.path, error = %e, "failed to delete lock node");
                false
            }
        }
    }

    async fn acquire(&self, key: &str, deadline: Option<Instant>) -> Result<LockHandle, CoordinationError> {
        check_key(key)?;
        let path = lock_path(key);

        // Fast path.
        if let Attempt::Acquired(entry) = self.attempt_logged(&path).await {
            info!(path = %path, attempt = 1, "lock acquired");
            return Ok(new_handle(key, path, entry, 1, None));
        }

        let waiter = Arc::new(LockWaiter::new(path.clone()));
        let namespace = parent(&path).unwrap_or(crate::constants::LOCK_BASE_PATH);
        let listener = match self.dispatcher.watch(namespace, WatchMode::Subtree, waiter.clone()).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(path = %path, error = %e, "failed to watch lock namespace, falling back to polling");
                None
            }
        };

        let retry = self.config.retry_timeout();
        let mut attempts = 1u32;
        loop {
            let woken = waiter.arm();
            attempts = attempts.saturating_add(1);

            if let Attempt::Acquired(entry) = self.attempt_logged(&path).await {
                info!(path = %path, attempt = attempts, "lock acquired");
                return Ok(new_handle(key, path, entry, attempts, listener));
            }

            let wait = match deadline {
                None => retry,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        if let Some(listener) = listener {
                            self.dispatcher.unwatch(listener).await;
                        }
                        debug!(path = %path, attempts, "lock wait timed out");
                        return Err(CoordinationError::Timeout {
                            operation: format!("lock acquisition for '{key}'"),
                        });
                    }
                    remaining.min(retry)
                }
            };

            match tokio::time::timeout(wait, woken).await {
                Ok(Ok(())) => debug!(path = %path, attempt = attempts, "lock node deleted, retrying"),
                Ok(Err(_)) => warn!(path = %path, attempt = attempts, "lock wait interrupted, retrying"),
                Err(_) => debug!(path = %path, attempt = attempts, "lock wait elapsed, retrying"),
            }
        }
    }

    /// One attempt where store faults count as contention.
    async fn attempt_logged(&self, path: &str) -> Attempt {
        match self.attempt(path).await {
            Ok(attempt) => attempt,
            Err(e) => {
                warn!(path = %path, error = %e, "lock attempt failed");
                Attempt::Contended
            }
        }
    }

    async fn attempt(&self, path: &str) -> Result<Attempt, CoordinationError> {
        let entry = LockEntry::new(uuid::Uuid::new_v4().to_string());
        let payload = serde_json::to_string(&entry)?;
        match self.store.create(path, &payload, CreateMode::Ephemeral).await {
            Ok(_) => Ok(Attempt::Acquired(entry)),
            Err(StoreError::NodeExists { .. }) => {
                debug!(path = %path, "lock contended");
                Ok(Attempt::Contended)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn check_key(key: &str) -> Result<(), CoordinationError> {
    validate_lock_key(key).map_err(|reason| CoordinationError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    })
}

fn new_handle(key: &str, path: String, entry: LockEntry, attempts: u32, listener: Option<ListenerId>) -> LockHandle {
    LockHandle {
        key: key.to_string(),
        path,
        holder_id: entry.holder_id,
        acquired_at_ms: entry.acquired_at_ms,
        attempts,
        listener,
    }
}
