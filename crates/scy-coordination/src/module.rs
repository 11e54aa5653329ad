//! Explicitly constructed owner of every coordination component.

use std::sync::Arc;
use std::time::Duration;

use scy_store::CoordinationStore;
use scy_store::WatchMode;
use tracing::info;
use tracing::warn;

use crate::clock::ClockMonitor;
use crate::config::CoordinationConfig;
use crate::config_center::ConfigCenter;
use crate::error::CoordinationError;
use crate::lock::DistributedLock;
use crate::register_center::RegisterCenter;
use crate::task::PeriodicTask;
use crate::topic::TopicRegistry;
use crate::watch::CallbackExecutor;
use crate::watch::ListenerId;
use crate::watch::WatchDispatcher;

#[derive(Default)]
struct Lifecycle {
    started: bool,
    tasks: Vec<PeriodicTask>,
    listeners: Vec<ListenerId>,
}

/// One coordination client: lock, registries, discovery, dynamic
/// configuration and clock monitoring over a single store session.
///
/// Nothing runs in the background until [`start`](Self::start). Register
/// dynamic configuration keys with [`config_center`](Self::config_center)
/// before starting.
pub struct CoordinationModule<S: CoordinationStore + ?Sized + 'static> {
    config: CoordinationConfig,
    dispatcher: Arc<WatchDispatcher<S>>,
    lock: DistributedLock<S>,
    register_center: RegisterCenter<S>,
    topics: Arc<TopicRegistry<S>>,
    config_center: Arc<ConfigCenter<S>>,
    clock_monitor: Option<Arc<ClockMonitor<S>>>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

impl<S: CoordinationStore + ?Sized + 'static> CoordinationModule<S> {
    /// Build every component. Must be called inside a tokio runtime.
    pub fn new(store: Arc<S>, config: CoordinationConfig) -> Result<Self, CoordinationError> {
        config.validate()?;
        let executor = CallbackExecutor::current(config.watch.max_concurrent_callbacks)?;
        let dispatcher = Arc::new(WatchDispatcher::new(store.clone(), executor));

        let clock_monitor =
            config.clock_monitor.as_ref().map(|clock| Arc::new(ClockMonitor::new(store.clone(), &clock.node_id)));

        Ok(Self {
            lock: DistributedLock::new(store.clone(), dispatcher.clone(), config.lock.clone()),
            register_center: RegisterCenter::new(store.clone(), &config.env),
            topics: Arc::new(TopicRegistry::new(store.clone(), &config.env)),
            config_center: Arc::new(ConfigCenter::new(store)),
            clock_monitor,
            dispatcher,
            config,
            lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    /// Distributed lock client.
    pub fn lock(&self) -> &DistributedLock<S> {
        &self.lock
    }

    /// RPC service registry and discovery.
    pub fn register_center(&self) -> &RegisterCenter<S> {
        &self.register_center
    }

    /// Messaging consumer-group registry.
    pub fn topics(&self) -> &Arc<TopicRegistry<S>> {
        &self.topics
    }

    /// Dynamic configuration registry.
    pub fn config_center(&self) -> &Arc<ConfigCenter<S>> {
        &self.config_center
    }

    /// Clock monitor, if configured.
    pub fn clock_monitor(&self) -> Option<&Arc<ClockMonitor<S>>> {
        self.clock_monitor.as_ref()
    }

    /// Shared watch dispatcher.
    pub fn dispatcher(&self) -> &Arc<WatchDispatcher<S>> {
        &self.dispatcher
    }

    /// Whether [`start`](Self::start) has completed.
    pub async fn is_started(&self) -> bool {
        self.lifecycle.lock().await.started
    }

    /// Install watches and start background work.
    ///
    /// Fails if dynamic configuration cannot be loaded, the clock has rolled
    /// back, or the discovery watch cannot be registered. Anything already
    /// started is torn down again on failure. Calling twice is a no-op.
    pub async fn start(&self) -> Result<(), CoordinationError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.started {
            return Ok(());
        }

        if let Err(e) = self.start_components(&mut lifecycle).await {
            warn!(error = %e, "coordination module failed to start");
            self.teardown(&mut lifecycle).await;
            return Err(e);
        }

        lifecycle.started = true;
        info!(env = %self.config.env, tasks = lifecycle.tasks.len(), "coordination module started");
        Ok(())
    }

    /// Stop background work and remove every watch. Idempotent.
    pub async fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if !lifecycle.started {
            return;
        }
        self.teardown(&mut lifecycle).await;
        info!(env = %self.config.env, "coordination module stopped");
    }

    async fn start_components(&self, lifecycle: &mut Lifecycle) -> Result<(), CoordinationError> {
        let listener = self.config_center.start(&self.dispatcher).await?;
        lifecycle.listeners.push(listener);

        if let (Some(monitor), Some(clock)) = (&self.clock_monitor, &self.config.clock_monitor) {
            let initial_delay = Duration::from_secs(clock.initial_delay_secs);
            let task = monitor.start(initial_delay, Duration::from_secs(clock.interval_secs)).await?;
            lifecycle.tasks.push(task);
        }

        let discovery = self.register_center.discovery();
        let listener = self.dispatcher.watch(discovery.env_path(), WatchMode::Subtree, discovery.clone()).await?;
        lifecycle.listeners.push(listener);

        let timings = &self.config.registry;
        let registry = self.register_center.registry();
        lifecycle.tasks.push(registry.spawn_reconciler(timings.initial_delay(), timings.reconcile_interval()));
        lifecycle.tasks.push(discovery.spawn_refresher(timings.initial_delay(), timings.discovery_refresh_interval()));
        lifecycle.tasks.push(self.topics.spawn_reconciler(timings.initial_delay(), timings.reconcile_interval()));
        Ok(())
    }

    async fn teardown(&self, lifecycle: &mut Lifecycle) {
        for task in lifecycle.tasks.drain(..) {
            task.stop().await;
        }
        for listener in lifecycle.listeners.drain(..) {
            self.dispatcher.unwatch(listener).await;
        }
        lifecycle.started = false;
    }
}
