//! Messaging consumer-group membership.
//!
//! Memberships are ephemeral nodes at `/scy-mq/{env}/{topic}/{group}` with
//! an empty payload, re-asserted periodically like service registrations.
//! Discovery is an uncached listing on every call.

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

use crate::constants::MQ_BASE_PATH;
use crate::error::CoordinationError;
use crate::pure::group_path;
use crate::pure::namespace_path;
use crate::pure::topic_path;
use crate::pure::validate_segment;
use crate::task::PeriodicTask;

/// Consumer-group registry for one environment.
pub struct TopicRegistry<S: CoordinationStore + ?Sized + 'static> {
    store: Arc<S>,
    env_path: String,
    desired: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl<S: CoordinationStore + ?Sized + 'static> TopicRegistry<S> {
    /// Create a registry over `/scy-mq/{env}`.
    pub fn new(store: Arc<S>, env: &str) -> Self {
        Self {
            store,
            env_path: namespace_path(MQ_BASE_PATH, env),
            desired: RwLock::new(HashMap::new()),
        }
    }

    /// Namespace root.
    pub fn env_path(&self) -> &str {
        &self.env_path
    }

    /// Record `group` as a consumer of `topic` and assert the membership.
    pub async fn register(&self, topic: &str, group: &str) -> bool {
        if validate_segment(topic).is_err() || validate_segment(group).is_err() {
            warn!(topic, group, "rejected membership with empty or malformed topic or group");
            return false;
        }

        {
            let mut desired = self.desired.write();
            let mut groups = desired.get(topic).cloned().unwrap_or_default();
            groups.insert(group.to_string());
            desired.insert(topic.to_string(), groups);
        }

        match self.assert(topic, group).await {
            Ok(created) => {
                if created {
                    info!(topic, group, "consumer group registered");
                }
                true
            }
            Err(e) => {
                warn!(topic, group, error = %e, "consumer group registration failed, will retry");
                false
            }
        }
    }

    /// Withdraw `group` from `topic`. Reconciliation will not restore it.
    pub async fn remove(&self, topic: &str, group: &str) -> bool {
        if validate_segment(topic).is_err() || validate_segment(group).is_err() {
            return false;
        }

        {
            let mut desired = self.desired.write();
            if let Some(current) = desired.get(topic) {
                let mut groups = current.clone();
                groups.remove(group);
                if groups.is_empty() {
                    desired.remove(topic);
                } else {
                    desired.insert(topic.to_string(), groups);
                }
            }
        }

        let path = group_path(&self.env_path, topic, group);
        match self.store.delete(&path).await {
            Ok(()) => {
                info!(topic, group, "consumer group removed");
                true
            }
            Err(e) if e.is_not_found() => true,
            Err(e) => {
                warn!(path = %path, error = %e, "failed to remove consumer group");
                false
            }
        }
    }

    /// Groups currently registered under `topic`, straight from the store.
    ///
    /// Empty when the topic does not exist or the store fails.
    pub async fn discover(&self, topic: &str) -> Vec<String> {
        if validate_segment(topic).is_err() {
            return Vec::new();
        }
        match self.store.get_children(&topic_path(&self.env_path, topic)).await {
            Ok(groups) => groups,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => {
                warn!(topic, error = %e, "consumer group discovery failed");
                Vec::new()
            }
        }
    }

    /// Re-assert every desired membership. Returns how many were recreated.
    pub async fn reconcile(&self) -> Result<usize, CoordinationError> {
        let snapshot: Vec<(String, String)> = self
            .desired
            .read()
            .iter()
            .flat_map(|(topic, groups)| groups.iter().map(move |group| (topic.clone(), group.clone())))
            .collect();

        let mut restored = 0usize;
        let mut first_error = None;
        for (topic, group) in &snapshot {
            match self.assert(topic, group).await {
                Ok(true) => restored += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(topic = %topic, group = %group, error = %e, "failed to re-assert consumer group");
                    first_error.get_or_insert(e);
                }
            }
        }

        debug!(env_path = %self.env_path, memberships = snapshot.len(), restored, "topic registry reconciled");
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(restored),
        }
    }

    /// Groups the local process wants registered under `topic`.
    pub fn desired_groups(&self, topic: &str) -> BTreeSet<String> {
        self.desired.read().get(topic).cloned().unwrap_or_default()
    }

    /// Run [`reconcile`](Self::reconcile) in the background.
    pub fn spawn_reconciler(self: &Arc<Self>, initial_delay: Duration, period: Duration) -> PeriodicTask {
        let registry = Arc::clone(self);
        PeriodicTask::spawn("topic-registry-reconcile", initial_delay, period, move || {
            let registry = registry.clone();
            async move {
                let _ = registry.reconcile().await;
            }
        })
    }

    async fn assert(&self, topic: &str, group: &str) -> Result<bool, StoreError> {
        let path = group_path(&self.env_path, topic, group);
        match self.store.create(&path, "", CreateMode::Ephemeral).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_node_exists() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
