//! In-memory deterministic implementation of [`CoordinationStore`] for testing.
//!
//! A [`DeterministicCoordinationStore`] owns a node tree shared by any number
//! of [`DeterministicSession`] clients. Each session owns the ephemeral nodes
//! it creates; [`DeterministicSession::expire`] drops them exactly like a
//! store would on session loss, then keeps serving under a fresh session id.
//!
//! # Watch semantics
//!
//! - `Subtree` watches replay every existing node at or below the path as
//!   `NodeCreated` on registration, then stream every later change.
//! - `OneShot` watches fire once, on the first create/update/delete of the
//!   exact path or as `ChildrenChanged` when a direct child appears or
//!   disappears.
//!
//! # Fault injection
//!
//! - [`DeterministicCoordinationStore::set_unavailable`] fails every
//!   operation with `ConnectionLoss`.
//! - [`DeterministicCoordinationStore::set_drop_delete_notifications`]
//!   silently drops delete events (nodes are still removed).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::StoreError;
use crate::path::ROOT;
use crate::path::ancestors;
use crate::path::child_prefix;
use crate::path::is_within;
use crate::path::parent;
use crate::path::validate_path;
use crate::traits::CoordinationStore;
use crate::types::CreateMode;
use crate::types::NodeData;
use crate::types::StoreEvent;
use crate::types::WatchId;
use crate::types::WatchMode;
use crate::types::WatchStream;

#[derive(Debug, Clone)]
struct Node {
    data: String,
    mode: CreateMode,
    owner: Option<u64>,
}

#[derive(Debug)]
struct Watcher {
    id: WatchId,
    path: String,
    mode: WatchMode,
    tx: mpsc::UnboundedSender<StoreEvent>,
}

#[derive(Debug, Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    watchers: Vec<Watcher>,
    next_watch_id: u64,
    next_session_id: u64,
    unavailable: bool,
    drop_delete_notifications: bool,
}

impl Tree {
    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::ConnectionLoss {
                reason: "store unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn contains(&self, path: &str) -> bool {
        path == ROOT || self.nodes.contains_key(path)
    }

    fn children(&self, path: &str) -> Vec<String> {
        let prefix = child_prefix(path);
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| !key[prefix.len()..].contains('/'))
            .map(|(key, _)| key[prefix.len()..].to_string())
            .collect()
    }

    fn insert_node(&mut self, path: &str, data: &str, mode: CreateMode, owner: Option<u64>) -> Vec<StoreEvent> {
        let mut events = Vec::new();
        for ancestor in ancestors(path) {
            if !self.nodes.contains_key(ancestor) {
                self.nodes.insert(ancestor.to_string(), Node {
                    data: String::new(),
                    mode: CreateMode::Persistent,
                    owner: None,
                });
                events.push(StoreEvent::NodeCreated {
                    node: NodeData::new(ancestor, ""),
                });
            }
        }
        self.nodes.insert(path.to_string(), Node {
            data: data.to_string(),
            mode,
            owner,
        });
        events.push(StoreEvent::NodeCreated {
            node: NodeData::new(path, data),
        });
        events
    }

    fn remove_subtree(&mut self, path: &str) -> Vec<StoreEvent> {
        let mut doomed: Vec<String> = self.nodes.keys().filter(|key| is_within(path, key)).cloned().collect();
        // Reverse lexicographic order removes children before their parents.
        doomed.sort();
        doomed.reverse();

        doomed
            .into_iter()
            .filter_map(|p| {
                self.nodes.remove(&p).map(|node| StoreEvent::NodeDeleted {
                    old: NodeData::new(p, node.data),
                })
            })
            .collect()
    }

    fn dispatch(&mut self, events: Vec<StoreEvent>) {
        for event in events {
            if self.drop_delete_notifications && matches!(event, StoreEvent::NodeDeleted { .. }) {
                continue;
            }
            let path = event.path().to_string();
            self.watchers.retain(|watcher| {
                let delivery = match watcher.mode {
                    WatchMode::Subtree => is_within(&watcher.path, &path).then(|| event.clone()),
                    WatchMode::OneShot => {
                        if path == watcher.path {
                            Some(event.clone())
                        } else if parent(&path) == Some(watcher.path.as_str())
                            && matches!(event, StoreEvent::NodeCreated { .. } | StoreEvent::NodeDeleted { .. })
                        {
                            Some(StoreEvent::ChildrenChanged {
                                path: watcher.path.clone(),
                            })
                        } else {
                            None
                        }
                    }
                };
                match delivery {
                    None => true,
                    Some(event) => watcher.tx.send(event).is_ok() && watcher.mode == WatchMode::Subtree,
                }
            });
        }
    }
}

fn validate_writable(path: &str) -> Result<(), StoreError> {
    validate_path(path)?;
    if path == ROOT {
        return Err(StoreError::InvalidPath {
            path: path.to_string(),
            reason: "the root node cannot be modified".to_string(),
        });
    }
    Ok(())
}

/// Shared in-memory node tree.
///
/// Clone to share; call [`session`](Self::session) for a client.
#[derive(Clone, Default)]
pub struct DeterministicCoordinationStore {
    tree: Arc<Mutex<Tree>>,
}

impl DeterministicCoordinationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new client session against this store.
    pub fn session(&self) -> Arc<DeterministicSession> {
        let session_id = {
            let mut tree = self.tree.lock();
            tree.next_session_id += 1;
            tree.next_session_id
        };
        Arc::new(DeterministicSession {
            tree: self.tree.clone(),
            session_id: AtomicU64::new(session_id),
        })
    }

    /// Make every operation fail with `ConnectionLoss` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.tree.lock().unavailable = unavailable;
    }

    /// Drop delete notifications while set. Nodes are still removed.
    pub fn set_drop_delete_notifications(&self, drop: bool) {
        self.tree.lock().drop_delete_notifications = drop;
    }

    /// Close every raw watch from the store side, as a lost connection
    /// would. Subscribers see their event stream end. Returns the number
    /// closed.
    pub fn close_watches(&self) -> usize {
        let mut tree = self.tree.lock();
        let closed = tree.watchers.len();
        tree.watchers.clear();
        closed
    }

    /// All node paths currently stored, in order.
    pub fn paths(&self) -> Vec<String> {
        self.tree.lock().nodes.keys().cloned().collect()
    }

    /// Number of live raw watches.
    pub fn watch_count(&self) -> usize {
        self.tree.lock().watchers.len()
    }

    /// Whether the node at `path` is ephemeral. `None` if absent.
    pub fn is_ephemeral(&self, path: &str) -> Option<bool> {
        self.tree.lock().nodes.get(path).map(|node| node.mode == CreateMode::Ephemeral)
    }
}

/// A client session of a [`DeterministicCoordinationStore`].
pub struct DeterministicSession {
    tree: Arc<Mutex<Tree>>,
    session_id: AtomicU64,
}

impl DeterministicSession {
    /// Current session id.
    pub fn session_id(&self) -> u64 {
        self.session_id.load(Ordering::SeqCst)
    }

    /// Simulate session loss: remove every ephemeral node owned by the
    /// current session and continue under a fresh session id.
    ///
    /// Returns the number of nodes removed.
    pub fn expire(&self) -> usize {
        let mut tree = self.tree.lock();
        let expired = self.session_id.load(Ordering::SeqCst);

        let owned: Vec<String> = tree
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(expired))
            .map(|(path, _)| path.clone())
            .collect();

        let mut events = Vec::new();
        for path in &owned {
            events.extend(tree.remove_subtree(path));
        }
        tree.dispatch(events);

        tree.next_session_id += 1;
        self.session_id.store(tree.next_session_id, Ordering::SeqCst);

        debug!(session_id = expired, removed = owned.len(), "session expired");
        owned.len()
    }
}

#[async_trait]
impl CoordinationStore for DeterministicSession {
    async fn create(&self, path: &str, data: &str, mode: CreateMode) -> Result<String, StoreError> {
        validate_writable(path)?;
        let mut tree = self.tree.lock();
        tree.check_available()?;

        if tree.contains(path) {
            return Err(StoreError::NodeExists { path: path.to_string() });
        }

        let owner = match mode {
            CreateMode::Ephemeral => Some(self.session_id()),
            CreateMode::Persistent => None,
        };
        let events = tree.insert_node(path, data, mode, owner);
        tree.dispatch(events);
        Ok(path.to_string())
    }

    async fn create_or_update(&self, path: &str, data: &str, mode: CreateMode) -> Result<String, StoreError> {
        validate_writable(path)?;
        let mut tree = self.tree.lock();
        tree.check_available()?;

        let events = match tree.nodes.get_mut(path) {
            Some(node) => {
                let old = std::mem::replace(&mut node.data, data.to_string());
                vec![StoreEvent::NodeChanged {
                    old: NodeData::new(path, old),
                    new: NodeData::new(path, data),
                }]
            }
            None => {
                let owner = match mode {
                    CreateMode::Ephemeral => Some(self.session_id()),
                    CreateMode::Persistent => None,
                };
                tree.insert_node(path, data, mode, owner)
            }
        };
        tree.dispatch(events);
        Ok(path.to_string())
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        validate_path(path)?;
        let tree = self.tree.lock();
        tree.check_available()?;
        Ok(tree.contains(path))
    }

    async fn get_data(&self, path: &str) -> Result<String, StoreError> {
        validate_path(path)?;
        let tree = self.tree.lock();
        tree.check_available()?;
        if path == ROOT {
            return Ok(String::new());
        }
        tree.nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| StoreError::NotFound { path: path.to_string() })
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>, StoreError> {
        validate_path(path)?;
        let tree = self.tree.lock();
        tree.check_available()?;
        if !tree.contains(path) {
            return Err(StoreError::NotFound { path: path.to_string() });
        }
        Ok(tree.children(path))
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        validate_writable(path)?;
        let mut tree = self.tree.lock();
        tree.check_available()?;
        if !tree.contains(path) {
            return Err(StoreError::NotFound { path: path.to_string() });
        }
        let events = tree.remove_subtree(path);
        tree.dispatch(events);
        Ok(())
    }

    async fn watch(&self, path: &str, mode: WatchMode) -> Result<WatchStream, StoreError> {
        validate_path(path)?;
        let mut tree = self.tree.lock();
        tree.check_available()?;

        tree.next_watch_id += 1;
        let id = WatchId(tree.next_watch_id);
        let (tx, events) = mpsc::unbounded_channel();

        if mode == WatchMode::Subtree {
            for (node_path, node) in tree.nodes.iter().filter(|(p, _)| is_within(path, p)) {
                let _ = tx.send(StoreEvent::NodeCreated {
                    node: NodeData::new(node_path.clone(), node.data.clone()),
                });
            }
        }

        tree.watchers.push(Watcher {
            id,
            path: path.to_string(),
            mode,
            tx,
        });
        Ok(WatchStream { id, events })
    }

    async fn unwatch(&self, id: WatchId) -> Result<(), StoreError> {
        self.tree.lock().watchers.retain(|watcher| watcher.id != id);
        Ok(())
    }
}
