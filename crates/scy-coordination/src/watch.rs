//! Typed watch dispatch.
//!
//! [`WatchDispatcher`] turns raw [`StoreEvent`]s into calls on a
//! [`DataListener`], run on a [`CallbackExecutor`]. Every subscription is an
//! explicit entry keyed by [`ListenerId`]; nothing re-subscribes implicitly.
//!
//! Two modes are supported:
//!
//! - [`WatchMode::Subtree`]: one subscription reports every create, update
//!   and delete at or below a path until [`WatchDispatcher::unwatch`].
//! - [`WatchMode::OneShot`]: fires once for the next change to a path or its
//!   direct children, then retires itself. Watching again requires a new
//!   call to [`WatchDispatcher::watch`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use parking_lot::Mutex;
use scy_store::CoordinationStore;
use scy_store::StoreEvent;
use scy_store::WatchId;
use scy_store::WatchMode;
use scy_store::WatchStream;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use crate::error::CoordinationError;

/// Receiver of typed watch notifications.
///
/// Every method defaults to a no-op so listeners implement only what they
/// need. Callbacks may run concurrently with each other.
#[async_trait]
pub trait DataListener: Send + Sync {
    /// A node appeared.
    async fn add(&self, _path: &str, _data: &str) {}

    /// A node's payload changed.
    async fn update(&self, _path: &str, _old_data: &str, _new_data: &str) {}

    /// A node was removed.
    async fn delete(&self, _path: &str, _old_data: &str) {}

    /// The direct children of a watched path changed.
    async fn children_change(&self, _path: &str, _children: Vec<String>) {}
}

/// Identity of one subscription, used to remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Raw numeric value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Bounded worker pool for listener callbacks.
#[derive(Clone)]
pub struct CallbackExecutor {
    handle: Handle,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl CallbackExecutor {
    /// Run callbacks on `handle`, at most `max_concurrent` at a time.
    pub fn new(handle: Handle, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Run callbacks on the runtime of the calling task.
    pub fn current(max_concurrent: usize) -> Result<Self, CoordinationError> {
        let handle = Handle::try_current().map_err(|e| CoordinationError::NoRuntime { reason: e.to_string() })?;
        Ok(Self::new(handle, max_concurrent))
    }

    /// Concurrency bound.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

impl fmt::Debug for CallbackExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackExecutor").field("max_concurrent", &self.max_concurrent).finish()
    }
}

struct Subscription {
    path: String,
    mode: WatchMode,
    watch_id: WatchId,
    pump: JoinHandle<()>,
}

type SubscriptionTable = Arc<Mutex<HashMap<ListenerId, Subscription>>>;

/// Normalizes raw store watches into [`DataListener`] callbacks.
pub struct WatchDispatcher<S: CoordinationStore + ?Sized + 'static> {
    store: Arc<S>,
    executor: CallbackExecutor,
    subscriptions: SubscriptionTable,
    next_id: AtomicU64,
}

impl<S: CoordinationStore + ?Sized + 'static> WatchDispatcher<S> {
    /// Create a dispatcher delivering callbacks on `executor`.
    pub fn new(store: Arc<S>, executor: CallbackExecutor) -> Self {
        Self {
            store,
            executor,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe `listener` to changes at `path`.
    pub async fn watch(
        &self,
        path: &str,
        mode: WatchMode,
        listener: Arc<dyn DataListener>,
    ) -> Result<ListenerId, CoordinationError> {
        let WatchStream { id: watch_id, events } = self.store.watch(path, mode).await?;
        let listener_id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));

        // Insert while holding the table so a one-shot pump that fires
        // immediately cannot try to retire an entry that is not there yet.
        let mut table = self.subscriptions.lock();
        let pump = self.executor.handle.spawn(pump_events(
            self.store.clone(),
            self.executor.clone(),
            self.subscriptions.clone(),
            listener_id,
            mode,
            events,
            listener,
        ));
        table.insert(listener_id, Subscription {
            path: path.to_string(),
            mode,
            watch_id,
            pump,
        });
        drop(table);

        debug!(path, ?mode, listener = %listener_id, watch = %watch_id, "watch registered");
        Ok(listener_id)
    }

    /// Remove a subscription and release its store watch.
    ///
    /// Returns `false` if the subscription was already removed or, for a
    /// one-shot watch, already fired. Safe to call repeatedly.
    pub async fn unwatch(&self, listener_id: ListenerId) -> bool {
        let Some(subscription) = self.subscriptions.lock().remove(&listener_id) else {
            return false;
        };

        subscription.pump.abort();
        if let Err(e) = self.store.unwatch(subscription.watch_id).await {
            warn!(
                path = %subscription.path,
                listener = %listener_id,
                error = %e,
                "failed to release store watch"
            );
        }
        debug!(path = %subscription.path, mode = ?subscription.mode, listener = %listener_id, "watch removed");
        true
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Whether `listener_id` is still subscribed.
    pub fn is_subscribed(&self, listener_id: ListenerId) -> bool {
        self.subscriptions.lock().contains_key(&listener_id)
    }

    /// Remove every subscription.
    pub async fn unwatch_all(&self) {
        let ids: Vec<ListenerId> = self.subscriptions.lock().keys().copied().collect();
        for id in ids {
            self.unwatch(id).await;
        }
    }
}

async fn pump_events<S: CoordinationStore + ?Sized + 'static>(
    store: Arc<S>,
    executor: CallbackExecutor,
    subscriptions: SubscriptionTable,
    listener_id: ListenerId,
    mode: WatchMode,
    mut events: tokio::sync::mpsc::UnboundedReceiver<StoreEvent>,
    listener: Arc<dyn DataListener>,
) {
    while let Some(event) = events.recv().await {
        let Ok(permit) = executor.permits.clone().acquire_owned().await else {
            break;
        };
        let store = store.clone();
        let listener = listener.clone();
        executor.handle.spawn(async move {
            deliver(store.as_ref(), listener.as_ref(), event).await;
            drop(permit);
        });

        if mode == WatchMode::OneShot {
            break;
        }
    }

    // Reached when a one-shot fires or the store closes the stream.
    if subscriptions.lock().remove(&listener_id).is_some() && mode == WatchMode::Subtree {
        debug!(listener = %listener_id, "watch stream closed by store");
    }
}

async fn deliver<S: CoordinationStore + ?Sized>(store: &S, listener: &dyn DataListener, event: StoreEvent) {
    match event {
        StoreEvent::NodeCreated { node } => listener.add(&node.path, &node.data).await,
        StoreEvent::NodeChanged { old, new } => listener.update(&new.path, &old.data, &new.data).await,
        StoreEvent::NodeDeleted { old } => listener.delete(&old.path, &old.data).await,
        StoreEvent::ChildrenChanged { path } => match store.get_children(&path).await {
            Ok(children) => listener.children_change(&path, children).await,
            Err(e) if e.is_not_found() => listener.children_change(&path, Vec::new()).await,
            Err(e) => warn!(path = %path, error = %e, "failed to list children for watch event"),
        },
    }
}
