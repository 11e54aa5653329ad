//! RPC register center: registry and discovery for one environment.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use scy_store::CoordinationStore;
use tracing::warn;

use crate::constants::RPC_BASE_PATH;
use crate::discovery::ServiceDiscovery;
use crate::pure::namespace_path;
use crate::registry::ServiceRegistry;
use crate::registry::checked_keys;

/// Combined [`ServiceRegistry`] and [`ServiceDiscovery`] over
/// `/scy-rpc/{env}`.
pub struct RegisterCenter<S: CoordinationStore + ?Sized + 'static> {
    registry: Arc<ServiceRegistry<S>>,
    discovery: Arc<ServiceDiscovery<S>>,
}

impl<S: CoordinationStore + ?Sized + 'static> RegisterCenter<S> {
    /// Create a register center for `env`.
    pub fn new(store: Arc<S>, env: &str) -> Self {
        let env_path = namespace_path(RPC_BASE_PATH, env);
        Self {
            registry: Arc::new(ServiceRegistry::new(store.clone(), env_path.clone())),
            discovery: Arc::new(ServiceDiscovery::new(store, env_path)),
        }
    }

    /// Advertise `address` under every key in `service_keys`.
    pub async fn register<I, K>(&self, service_keys: I, address: &str) -> bool
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        self.registry.register(service_keys, address).await
    }

    /// Withdraw `address` from every key in `service_keys`.
    ///
    /// The address also leaves the local discovery view at once.
    pub async fn remove<I, K>(&self, service_keys: I, address: &str) -> bool
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let Some(keys) = checked_keys(service_keys, address) else {
            warn!(address, "rejected removal with empty or malformed key or address");
            return false;
        };
        let removed = self.registry.remove(&keys, address).await;
        for key in &keys {
            self.discovery.evict_address(key, address);
        }
        removed
    }

    /// Enabled addresses of `service_key`.
    pub async fn discover(&self, service_key: &str) -> BTreeSet<String> {
        self.discovery.discover(service_key).await
    }

    /// Enabled addresses for several keys, omitting keys with none.
    pub async fn discover_many<I, K>(&self, service_keys: I) -> BTreeMap<String, BTreeSet<String>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        self.discovery.discover_many(service_keys).await
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Arc<ServiceRegistry<S>> {
        &self.registry
    }

    /// The underlying discovery view.
    pub fn discovery(&self) -> &Arc<ServiceDiscovery<S>> {
        &self.discovery
    }

    /// Namespace root (`/scy-rpc/{env}`).
    pub fn env_path(&self) -> &str {
        self.registry.env_path()
    }
}
