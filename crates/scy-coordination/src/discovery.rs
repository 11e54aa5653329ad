//! Cached service discovery.
//!
//! The view maps each service key to the addresses currently believed
//! enabled. It is derived only from the store and refreshed three ways:
//!
//! - lazily, when a key is asked for and has no cached address
//! - reactively, when a watch event lands under the key's subtree
//! - periodically, for every key already in the view
//!
//! Every refresh replaces the key's set wholesale. Readers see either the
//! old set or the new one, never a mix. The view lags the store by at most
//! one refresh period plus watch latency.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use scy_store::CoordinationStore;
use tracing::debug;
use tracing::warn;

use crate::error::CoordinationError;
use crate::pure::address_path;
use crate::pure::is_address_enabled;
use crate::pure::parse_registration_path;
use crate::pure::service_path;
use crate::pure::validate_segment;
use crate::task::PeriodicTask;
use crate::watch::DataListener;

/// Local view of enabled service addresses.
pub struct ServiceDiscovery<S: CoordinationStore + ?Sized + 'static> {
    store: Arc<S>,
    env_path: String,
    view: RwLock<HashMap<String, Arc<BTreeSet<String>>>>,
}

impl<S: CoordinationStore + ?Sized + 'static> ServiceDiscovery<S> {
    /// Create an empty view over `env_path` (`/scy-rpc/{env}`).
    pub fn new(store: Arc<S>, env_path: impl Into<String>) -> Self {
        Self {
            store,
            env_path: env_path.into(),
            view: RwLock::new(HashMap::new()),
        }
    }

    /// Namespace root this view reads from.
    pub fn env_path(&self) -> &str {
        &self.env_path
    }

    /// Enabled addresses of `service_key`, sorted.
    ///
    /// A key with no cached address, whether never seen or cached empty, is
    /// refreshed from the store first. Store faults yield an empty set and
    /// leave the key uncached so the next call tries again. Keys that are
    /// not a single path segment yield an empty set and are never cached.
    pub async fn discover(&self, service_key: &str) -> BTreeSet<String> {
        if let Err(reason) = validate_segment(service_key) {
            warn!(service_key, reason, "rejected discovery of malformed service key");
            return BTreeSet::new();
        }
        if let Some(cached) = self.cached(service_key)
            && !cached.is_empty()
        {
            return (*cached).clone();
        }
        match self.refresh(service_key).await {
            Ok(addresses) => addresses,
            Err(e) => {
                warn!(service_key, error = %e, "discovery refresh failed");
                BTreeSet::new()
            }
        }
    }

    /// Enabled addresses for several keys. Keys without any are omitted.
    pub async fn discover_many<I, K>(&self, service_keys: I) -> BTreeMap<String, BTreeSet<String>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut result = BTreeMap::new();
        for key in service_keys {
            let key = key.as_ref();
            let addresses = self.discover(key).await;
            if !addresses.is_empty() {
                result.insert(key.to_string(), addresses);
            }
        }
        result
    }

    /// Re-read `service_key` from the store and replace its cached set.
    ///
    /// A missing service node yields an empty set, which is cached. On a
    /// store fault the previous set is kept and the error returned.
    pub async fn refresh(&self, service_key: &str) -> Result<BTreeSet<String>, CoordinationError> {
        let addresses = self.load(service_key).await?;
        self.view.write().insert(service_key.to_string(), Arc::new(addresses.clone()));
        debug!(service_key, count = addresses.len(), "discovery view refreshed");
        Ok(addresses)
    }

    /// Refresh every cached key. Returns the number refreshed successfully.
    pub async fn refresh_all(&self) -> usize {
        let keys: Vec<String> = self.view.read().keys().cloned().collect();
        let mut refreshed = 0;
        for key in &keys {
            match self.refresh(key).await {
                Ok(_) => refreshed += 1,
                Err(e) => warn!(service_key = %key, error = %e, "periodic discovery refresh failed"),
            }
        }
        refreshed
    }

    /// Drop `address` from the cached set of `service_key` without a store
    /// round trip.
    pub fn evict_address(&self, service_key: &str, address: &str) {
        let mut view = self.view.write();
        if let Some(current) = view.get(service_key)
            && current.contains(address)
        {
            let mut addresses = (**current).clone();
            addresses.remove(address);
            view.insert(service_key.to_string(), Arc::new(addresses));
        }
    }

    /// Cached set for `service_key`, if the key has been seen.
    pub fn cached(&self, service_key: &str) -> Option<Arc<BTreeSet<String>>> {
        self.view.read().get(service_key).cloned()
    }

    /// Keys currently in the view, sorted.
    pub fn cached_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.view.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Run [`refresh_all`](Self::refresh_all) in the background.
    pub fn spawn_refresher(self: &Arc<Self>, initial_delay: Duration, period: Duration) -> PeriodicTask {
        let discovery = Arc::clone(self);
        PeriodicTask::spawn("service-discovery-refresh", initial_delay, period, move || {
            let discovery = discovery.clone();
            async move {
                discovery.refresh_all().await;
            }
        })
    }

    async fn load(&self, service_key: &str) -> Result<BTreeSet<String>, CoordinationError> {
        let children = match self.store.get_children(&service_path(&self.env_path, service_key)).await {
            Ok(children) => children,
            Err(e) if e.is_not_found() => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };

        let mut addresses = BTreeSet::new();
        for address in children {
            let path = address_path(&self.env_path, service_key, &address);
            match self.store.get_data(&path).await {
                Ok(data) if is_address_enabled(&data) => {
                    addresses.insert(address);
                }
                Ok(_) => {}
                // Deleted between list and read.
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(addresses)
    }

    async fn on_event(&self, path: &str) {
        let Some((service_key, _address)) = parse_registration_path(&self.env_path, path) else {
            return;
        };
        if let Err(e) = self.refresh(service_key).await {
            warn!(service_key, path, error = %e, "reactive discovery refresh failed");
        }
    }
}

#[async_trait]
impl<S: CoordinationStore + ?Sized + 'static> DataListener for ServiceDiscovery<S> {
    async fn add(&self, path: &str, _data: &str) {
        self.on_event(path).await;
    }

    async fn update(&self, path: &str, _old_data: &str, _new_data: &str) {
        self.on_event(path).await;
    }

    async fn delete(&self, path: &str, _old_data: &str) {
        self.on_event(path).await;
    }
}

#[cfg(test)]
mod tests {
    use scy_store::CreateMode;
    use scy_store::DeterministicCoordinationStore;
    use scy_store::DeterministicSession;

    use super::*;

    const ENV: &str = "/scy-rpc/test";

    async fn put(session: &DeterministicSession, key: &str, address: &str, data: &str) {
        session
            .create_or_update(&address_path(ENV, key, address), data, CreateMode::Persistent)
            .await
            .unwrap();
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn miss_refreshes_and_filters_disabled() {
        let store = DeterministicCoordinationStore::new();
        let session = store.session();
        put(&session, "svc", "h:2", r#"{"enable":true}"#).await;
        put(&session, "svc", "h:1", r#"{"enable":true}"#).await;
        put(&session, "svc", "h:3", r#"{"enable":false}"#).await;
        put(&session, "svc", "h:4", "garbage").await;

        let discovery = ServiceDiscovery::new(session, ENV);
        assert!(discovery.cached("svc").is_none());
        assert_eq!(discovery.discover("svc").await, set(&["h:1", "h:2"]));
        assert!(discovery.cached("svc").is_some());
    }

    #[tokio::test]
    async fn hit_does_not_touch_store() {
        let store = DeterministicCoordinationStore::new();
        let session = store.session();
        put(&session, "svc", "h:1", r#"{"enable":true}"#).await;

        let discovery = ServiceDiscovery::new(session.clone(), ENV);
        discovery.discover("svc").await;
        put(&session, "svc", "h:2", r#"{"enable":true}"#).await;

        assert_eq!(discovery.discover("svc").await, set(&["h:1"]));
    }

    #[tokio::test]
    async fn empty_cached_key_is_read_again() {
        let store = DeterministicCoordinationStore::new();
        let session = store.session();
        let discovery = ServiceDiscovery::new(session.clone(), ENV);

        assert!(discovery.discover("svc").await.is_empty());
        assert_eq!(discovery.cached("svc").map(|s| s.len()), Some(0));

        put(&session, "svc", "h:1", r#"{"enable":true}"#).await;
        assert_eq!(discovery.discover("svc").await, set(&["h:1"]));
    }

    #[tokio::test]
    async fn malformed_key_is_not_cached() {
        let store = DeterministicCoordinationStore::new();
        let session = store.session();
        put(&session, "a", "b", r#"{"enable":true}"#).await;

        let discovery = ServiceDiscovery::new(session, ENV);
        assert!(discovery.discover("a/b").await.is_empty());
        assert!(discovery.discover("").await.is_empty());
        assert!(discovery.cached_keys().is_empty());
    }

    #[tokio::test]
    async fn refresh_replaces_instead_of_merging() {
        let store = DeterministicCoordinationStore::new();
        let session = store.session();
        put(&session, "svc", "h:1", r#"{"enable":true}"#).await;
        put(&session, "svc", "h:2", r#"{"enable":true}"#).await;

        let discovery = ServiceDiscovery::new(session.clone(), ENV);
        assert_eq!(discovery.refresh("svc").await.unwrap(), set(&["h:1", "h:2"]));

        session.delete(&address_path(ENV, "svc", "h:1")).await.unwrap();
        put(&session, "svc", "h:2", r#"{"enable":false}"#).await;
        put(&session, "svc", "h:3", r#"{"enable":true}"#).await;

        assert_eq!(discovery.refresh("svc").await.unwrap(), set(&["h:3"]));
        assert_eq!(discovery.discover("svc").await, set(&["h:3"]));
    }

    #[tokio::test]
    async fn emptied_service_is_cached_as_empty() {
        let store = DeterministicCoordinationStore::new();
        let session = store.session();
        put(&session, "svc", "h:1", r#"{"enable":true}"#).await;

        let discovery = ServiceDiscovery::new(session.clone(), ENV);
        discovery.discover("svc").await;
        session.delete(&service_path(ENV, "svc")).await.unwrap();

        assert!(discovery.refresh("svc").await.unwrap().is_empty());
        assert_eq!(discovery.cached("svc").map(|s| s.len()), Some(0));
    }

    #[tokio::test]
    async fn fault_keeps_previous_view() {
        let store = DeterministicCoordinationStore::new();
        let session = store.session();
        put(&session, "svc", "h:1", r#"{"enable":true}"#).await;

        let discovery = ServiceDiscovery::new(session, ENV);
        discovery.discover("svc").await;

        store.set_unavailable(true);
        assert!(discovery.refresh("svc").await.is_err());
        assert_eq!(discovery.discover("svc").await, set(&["h:1"]));
        // Unseen keys degrade to empty and stay uncached.
        assert!(discovery.discover("other").await.is_empty());
        assert!(discovery.cached("other").is_none());
    }

    #[tokio::test]
    async fn discover_many_skips_empty_keys() {
        let store = DeterministicCoordinationStore::new();
        let session = store.session();
        put(&session, "a", "h:1", r#"{"enable":true}"#).await;
        put(&session, "b", "h:2", r#"{"enable":false}"#).await;

        let discovery = ServiceDiscovery::new(session, ENV);
        let found = discovery.discover_many(["a", "b", "c"]).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found["a"], set(&["h:1"]));
    }

    #[tokio::test]
    async fn listener_refreshes_affected_key_only() {
        let store = DeterministicCoordinationStore::new();
        let session = store.session();
        let discovery = ServiceDiscovery::new(session.clone(), ENV);

        put(&session, "svc", "h:1", r#"{"enable":true}"#).await;
        discovery.add("/scy-rpc/test/svc/h:1", r#"{"enable":true}"#).await;
        assert_eq!(discovery.cached_keys(), vec!["svc".to_string()]);

        // Events outside the registration layout are ignored.
        discovery.add("/scy-rpc/test/svc", "").await;
        discovery.add("/scy-rpc/test", "").await;
        assert_eq!(discovery.cached_keys(), vec!["svc".to_string()]);
    }

    #[tokio::test]
    async fn evict_address_updates_view_only() {
        let store = DeterministicCoordinationStore::new();
        let session = store.session();
        put(&session, "svc", "h:1", r#"{"enable":true}"#).await;
        put(&session, "svc", "h:2", r#"{"enable":true}"#).await;

        let discovery = ServiceDiscovery::new(session, ENV);
        discovery.discover("svc").await;
        discovery.evict_address("svc", "h:1");
        discovery.evict_address("unknown", "h:1");

        assert_eq!(discovery.discover("svc").await, set(&["h:2"]));
        assert!(discovery.cached("unknown").is_none());
    }
}
