//! Dynamic configuration backed by the coordination store.
//!
//! Components register a key, a default value and an apply callback before
//! start. On [`ConfigCenter::start`] every default is published as a
//! persistent node at `/application/config/dynamic_configuration/{key}`
//! (existing values win), current values are loaded and applied, and the
//! namespace is watched so later edits are applied as they land.
//!
//! Deleting a node does not revert the applied value.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use scy_store::CoordinationStore;
use scy_store::CreateMode;
use scy_store::WatchMode;
use scy_store::path::join;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::constants::DYNAMIC_CONFIG_PATH;
use crate::error::CoordinationError;
use crate::pure::direct_child_name;
use crate::pure::validate_segment;
use crate::watch::DataListener;
use crate::watch::ListenerId;
use crate::watch::WatchDispatcher;

/// Callback receiving the raw string value of a configuration key.
pub type ApplyFn = Arc<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;

struct ConfigEntry {
    default_value: String,
    apply: ApplyFn,
}

impl fmt::Debug for ConfigEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigEntry").field("default_value", &self.default_value).finish_non_exhaustive()
    }
}

/// Registry of dynamic configuration keys and their apply callbacks.
pub struct ConfigCenter<S: CoordinationStore + ?Sized + 'static> {
    store: Arc<S>,
    base_path: String,
    entries: RwLock<BTreeMap<String, ConfigEntry>>,
    applied: RwLock<BTreeMap<String, String>>,
    reload_gate: tokio::sync::Mutex<()>,
}

impl<S: CoordinationStore + ?Sized + 'static> ConfigCenter<S> {
    /// Create a config center over the standard namespace.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_base_path(store, DYNAMIC_CONFIG_PATH)
    }

    /// Create a config center over `base_path`.
    pub fn with_base_path(store: Arc<S>, base_path: impl Into<String>) -> Self {
        Self {
            store,
            base_path: base_path.into(),
            entries: RwLock::new(BTreeMap::new()),
            applied: RwLock::new(BTreeMap::new()),
            reload_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Namespace holding one node per key.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Register `key` with its default and apply callback.
    ///
    /// Keys must be single, non-empty path segments and unique.
    pub fn register<F>(&self, key: &str, default_value: impl Into<String>, apply: F) -> Result<(), CoordinationError>
    where
        F: Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if let Err(reason) = validate_segment(key) {
            return Err(CoordinationError::InvalidKey {
                key: key.to_string(),
                reason: reason.to_string(),
            });
        }

        let mut entries = self.entries.write();
        if entries.contains_key(key) {
            return Err(CoordinationError::DuplicateConfigKey { key: key.to_string() });
        }
        entries.insert(key.to_string(), ConfigEntry {
            default_value: default_value.into(),
            apply: Arc::new(apply),
        });
        Ok(())
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Last value successfully applied for `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.applied.read().get(key).cloned()
    }

    /// Publish defaults for keys without a node. Returns how many were created.
    pub async fn publish_defaults(&self) -> Result<usize, CoordinationError> {
        let defaults: Vec<(String, String)> =
            self.entries.read().iter().map(|(key, entry)| (key.clone(), entry.default_value.clone())).collect();

        let mut created = 0;
        for (key, default_value) in defaults {
            let path = join(&self.base_path, &key);
            match self.store.create(&path, &default_value, CreateMode::Persistent).await {
                Ok(_) => {
                    debug!(key = %key, "published configuration default");
                    created += 1;
                }
                Err(e) if e.is_node_exists() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(created)
    }

    /// Load every registered key and apply values that changed.
    ///
    /// Returns the current value of every key that could be read. A missing
    /// node falls back to the key's default. Callback failures are logged
    /// and retried on the next reload.
    pub async fn reload(&self) -> Result<BTreeMap<String, String>, CoordinationError> {
        let _gate = self.reload_gate.lock().await;
        let keys = self.keys();

        let mut values = BTreeMap::new();
        let mut first_error = None;
        for key in keys {
            match self.load_and_apply(&key).await {
                Ok(value) => {
                    values.insert(key, value);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "failed to load configuration value");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(values),
        }
    }

    /// Load and apply a single key.
    pub async fn reload_key(&self, key: &str) -> Result<String, CoordinationError> {
        let _gate = self.reload_gate.lock().await;
        self.load_and_apply(key).await
    }

    /// Publish defaults, subscribe to changes, and apply current values.
    pub async fn start(self: &Arc<Self>, dispatcher: &WatchDispatcher<S>) -> Result<ListenerId, CoordinationError> {
        let published = self.publish_defaults().await?;
        let listener = dispatcher.watch(&self.base_path, WatchMode::Subtree, self.clone()).await?;
        match self.reload().await {
            Ok(values) => {
                info!(keys = values.len(), published, "dynamic configuration loaded");
                Ok(listener)
            }
            Err(e) => {
                dispatcher.unwatch(listener).await;
                Err(e)
            }
        }
    }

    async fn load_and_apply(&self, key: &str) -> Result<String, CoordinationError> {
        let (default_value, apply) = {
            let entries = self.entries.read();
            let Some(entry) = entries.get(key) else {
                return Err(CoordinationError::InvalidKey {
                    key: key.to_string(),
                    reason: "not registered".to_string(),
                });
            };
            (entry.default_value.clone(), entry.apply.clone())
        };

        let value = match self.store.get_data(&join(&self.base_path, key)).await {
            Ok(value) => value,
            Err(e) if e.is_not_found() => default_value,
            Err(e) => return Err(e.into()),
        };

        if self.applied.read().get(key) == Some(&value) {
            return Ok(value);
        }

        match apply(&value) {
            Ok(()) => {
                info!(key, value = %value, "configuration applied");
                self.applied.write().insert(key.to_string(), value.clone());
            }
            Err(e) => warn!(key, value = %value, error = %e, "configuration callback rejected value"),
        }
        Ok(value)
    }

    async fn on_change(&self, path: &str) {
        let Some(key) = direct_child_name(&self.base_path, path) else {
            return;
        };
        if !self.entries.read().contains_key(key) {
            debug!(key, "ignoring change to unregistered configuration key");
            return;
        }
        if let Err(e) = self.reload_key(key).await {
            warn!(key, error = %e, "failed to reload configuration value");
        }
    }
}

#[async_trait]
impl<S: CoordinationStore + ?Sized + 'static> DataListener for ConfigCenter<S> {
    async fn add(&self, path: &str, _data: &str) {
        self.on_change(path).await;
    }

    async fn update(&self, path: &str, _old_data: &str, _new_data: &str) {
        self.on_change(path).await;
    }
}
