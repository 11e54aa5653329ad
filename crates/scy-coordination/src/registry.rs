//! Self-healing service registration.
//!
//! The registry remembers every `(service_key, address)` pair the local
//! process wants advertised and asserts each as an ephemeral node at
//! `/scy-rpc/{env}/{service_key}/{address}` with payload `{"enable":true}`.
//! Ephemeral nodes vanish with the session, so [`ServiceRegistry::reconcile`]
//! re-asserts the whole desired set on a fixed period. That loop is the only
//! repair mechanism; there is no reconnect hook.
//!
//! Asserts use create-if-absent: an existing node is left as is, so an
//! operator who flipped `enable` to `false` is not overridden.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use scy_store::CoordinationStore;
use scy_store::CreateMode;
use scy_store::StoreError;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::CoordinationError;
use crate::pure::address_path;
use crate::pure::validate_segment;
use crate::task::PeriodicTask;
use crate::types::AddressRecord;

/// Desired-state registry for service addresses.
pub struct ServiceRegistry<S: CoordinationStore + ?Sized + 'static> {
    store: Arc<S>,
    env_path: String,
    desired: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl<S: CoordinationStore + ?Sized + 'static> ServiceRegistry<S> {
    /// Create a registry rooted at `env_path` (`/scy-rpc/{env}`).
    pub fn new(store: Arc<S>, env_path: impl Into<String>) -> Self {
        Self {
            store,
            env_path: env_path.into(),
            desired: RwLock::new(HashMap::new()),
        }
    }

    /// Namespace root of this registry.
    pub fn env_path(&self) -> &str {
        &self.env_path
    }

    /// Register `address` under every key in `service_keys`.
    ///
    /// The pairs join the desired set even if the immediate assert fails;
    /// the next reconciliation retries them. Returns `false` if any input
    /// is malformed (nothing is recorded) or any assert failed.
    pub async fn register<I, K>(&self, service_keys: I, address: &str) -> bool
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let Some(keys) = checked_keys(service_keys, address) else {
            warn!(address, "rejected registration with empty or malformed key or address");
            return false;
        };

        {
            let mut desired = self.desired.write();
            for key in &keys {
                let mut addresses = desired.get(key).cloned().unwrap_or_default();
                addresses.insert(address.to_string());
                desired.insert(key.clone(), addresses);
            }
        }

        let mut ok = true;
        for key in &keys {
            match self.assert(key, address).await {
                Ok(created) => {
                    if created {
                        info!(service_key = %key, address, "service registered");
                    }
                }
                Err(e) => {
                    warn!(service_key = %key, address, error = %e, "service registration failed, will retry");
                    ok = false;
                }
            }
        }
        ok
    }

    /// Withdraw `address` from every key in `service_keys`.
    ///
    /// Prunes the desired set first so reconciliation cannot resurrect the
    /// registration, then deletes the nodes. A node already gone counts as
    /// removed.
    pub async fn remove<I, K>(&self, service_keys: I, address: &str) -> bool
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let Some(keys) = checked_keys(service_keys, address) else {
            warn!(address, "rejected removal with empty or malformed key or address");
            return false;
        };

        {
            let mut desired = self.desired.write();
            for key in &keys {
                if let Some(current) = desired.get(key) {
                    let mut addresses = current.clone();
                    addresses.remove(address);
                    if addresses.is_empty() {
                        desired.remove(key);
                    } else {
                        desired.insert(key.clone(), addresses);
                    }
                }
            }
        }

        let mut ok = true;
        for key in &keys {
            let path = address_path(&self.env_path, key, address);
            match self.store.delete(&path).await {
                Ok(()) => info!(service_key = %key, address, "service removed"),
                Err(e) if e.is_not_found() => debug!(path = %path, "registration already absent"),
                Err(e) => {
                    warn!(path = %path, error = %e, "failed to remove registration");
                    ok = false;
                }
            }
        }
        ok
    }

    /// Re-assert every desired registration.
    ///
    /// Returns the number of nodes that had to be recreated. Every pair is
    /// attempted; the first fault is returned after the pass.
    pub async fn reconcile(&self) -> Result<usize, CoordinationError> {
        let snapshot: Vec<(String, String)> = self
            .desired
            .read()
            .iter()
            .flat_map(|(key, addresses)| addresses.iter().map(move |address| (key.clone(), address.clone())))
            .collect();

        let mut restored = 0usize;
        let mut first_error = None;
        for (key, address) in &snapshot {
            match self.assert(key, address).await {
                Ok(true) => {
                    info!(service_key = %key, address = %address, "registration restored");
                    restored += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(service_key = %key, address = %address, error = %e, "failed to re-assert registration");
                    first_error.get_or_insert(e);
                }
            }
        }

        debug!(env_path = %self.env_path, pairs = snapshot.len(), restored, "registry reconciled");
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(restored),
        }
    }

    /// Addresses the local process wants registered under `service_key`.
    pub fn desired_addresses(&self, service_key: &str) -> BTreeSet<String> {
        self.desired.read().get(service_key).cloned().unwrap_or_default()
    }

    /// Service keys with at least one desired address.
    pub fn desired_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.desired.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Run [`reconcile`](Self::reconcile) in the background.
    pub fn spawn_reconciler(self: &Arc<Self>, initial_delay: Duration, period: Duration) -> PeriodicTask {
        let registry = Arc::clone(self);
        PeriodicTask::spawn("service-registry-reconcile", initial_delay, period, move || {
            let registry = registry.clone();
            async move {
                // Faults are already logged per pair.
                let _ = registry.reconcile().await;
            }
        })
    }

    /// Create the node if absent. `Ok(true)` if it was created.
    async fn assert(&self, key: &str, address: &str) -> Result<bool, StoreError> {
        let path = address_path(&self.env_path, key, address);
        let payload = registration_payload();
        match self.store.create(&path, &payload, CreateMode::Ephemeral).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_node_exists() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn registration_payload() -> String {
    serde_json::to_string(&AddressRecord::enabled()).unwrap_or_else(|_| r#"{"enable":true}"#.to_string())
}

/// Validate inputs; `None` if the address or any key is unusable.
pub(crate) fn checked_keys<I, K>(keys: I, address: &str) -> Option<Vec<String>>
where
    I: IntoIterator<Item = K>,
    K: AsRef<str>,
{
    validate_segment(address).ok()?;
    let keys: Vec<String> = keys.into_iter().map(|k| k.as_ref().to_string()).collect();
    if keys.is_empty() || keys.iter().any(|k| validate_segment(k).is_err()) {
        return None;
    }
    Some(keys)
}

#[cfg(test)]
mod tests {
    use scy_store::DeterministicCoordinationStore;
    use scy_store::DeterministicSession;

    use super::*;

    const ENV: &str = "/scy-rpc/test";

    fn registry(session: Arc<DeterministicSession>) -> ServiceRegistry<DeterministicSession> {
        ServiceRegistry::new(session, ENV)
    }

    #[tokio::test]
    async fn register_asserts_ephemeral_enabled_node() {
        let store = DeterministicCoordinationStore::new();
        let session = store.session();
        let registry = registry(session.clone());

        assert!(registry.register(["svcA"], "10.0.0.1:9000").await);

        let path = "/scy-rpc/test/svcA/10.0.0.1:9000";
        assert_eq!(store.is_ephemeral(path), Some(true));
        assert_eq!(session.get_data(path).await.unwrap(), r#"{"enable":true}"#);
        assert_eq!(registry.desired_addresses("svcA"), BTreeSet::from(["10.0.0.1:9000".to_string()]));
    }

    #[tokio::test]
    async fn register_many_keys_is_idempotent() {
        let store = DeterministicCoordinationStore::new();
        let registry = registry(store.session());

        assert!(registry.register(vec!["a", "b"], "h:1").await);
        assert!(registry.register(vec!["a", "b"], "h:1").await);

        assert_eq!(registry.desired_keys(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.desired_addresses("a").len(), 1);
    }

    #[tokio::test]
    async fn malformed_input_is_rejected_without_recording() {
        let store = DeterministicCoordinationStore::new();
        let registry = registry(store.session());

        assert!(!registry.register(["svc"], "").await);
        assert!(!registry.register(Vec::<String>::new(), "h:1").await);
        assert!(!registry.register(["a/b"], "h:1").await);
        assert!(registry.desired_keys().is_empty());
        assert!(store.paths().is_empty());
    }

    #[tokio::test]
    async fn existing_disabled_node_is_not_overridden() {
        let store = DeterministicCoordinationStore::new();
        let session = store.session();
        let path = "/scy-rpc/test/svc/h:1";
        session.create(path, r#"{"enable":false}"#, CreateMode::Persistent).await.unwrap();

        let registry = registry(session.clone());
        assert!(registry.register(["svc"], "h:1").await);
        assert_eq!(registry.reconcile().await.unwrap(), 0);
        assert_eq!(session.get_data(path).await.unwrap(), r#"{"enable":false}"#);
    }

    #[tokio::test]
    async fn reconcile_restores_after_session_expiry() {
        let store = DeterministicCoordinationStore::new();
        let session = store.session();
        let registry = registry(session.clone());

        registry.register(["svc"], "h:1").await;
        registry.register(["svc"], "h:2").await;
        assert_eq!(session.expire(), 2);
        assert!(!session.exists("/scy-rpc/test/svc/h:1").await.unwrap());

        assert_eq!(registry.reconcile().await.unwrap(), 2);
        assert!(session.exists("/scy-rpc/test/svc/h:1").await.unwrap());
        assert!(session.exists("/scy-rpc/test/svc/h:2").await.unwrap());
        assert_eq!(registry.reconcile().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn remove_prunes_desired_set() {
        let store = DeterministicCoordinationStore::new();
        let session = store.session();
        let registry = registry(session.clone());

        registry.register(["svc"], "h:1").await;
        assert!(registry.remove(["svc"], "h:1").await);
        assert!(registry.desired_addresses("svc").is_empty());

        registry.reconcile().await.unwrap();
        assert!(!session.exists("/scy-rpc/test/svc/h:1").await.unwrap());

        // Removing again is harmless.
        assert!(registry.remove(["svc"], "h:1").await);
    }

    #[tokio::test]
    async fn failed_assert_is_retried_by_reconcile() {
        let store = DeterministicCoordinationStore::new();
        let session = store.session();
        let registry = registry(session.clone());

        store.set_unavailable(true);
        assert!(!registry.register(["svc"], "h:1").await);
        assert!(registry.reconcile().await.is_err());

        store.set_unavailable(false);
        assert_eq!(registry.reconcile().await.unwrap(), 1);
        assert!(session.exists("/scy-rpc/test/svc/h:1").await.unwrap());
    }

    #[tokio::test]
    async fn background_reconciler_repairs_drift() {
        let store = DeterministicCoordinationStore::new();
        let session = store.session();
        let registry = Arc::new(registry(session.clone()));

        registry.register(["svc"], "h:1").await;
        let task = registry.spawn_reconciler(Duration::ZERO, Duration::from_millis(20));
        session.expire();

        let path = "/scy-rpc/test/svc/h:1";
        let restored = tokio::time::timeout(Duration::from_secs(2), async {
            while !session.exists(path).await.unwrap() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(restored.is_ok());
        task.stop().await;
    }
}
