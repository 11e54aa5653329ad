//! Node, watch and event types shared by all store implementations.

use std::fmt;

use tokio::sync::mpsc;

/// Lifetime of a created node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreateMode {
    /// Survives the creating session.
    Persistent,
    /// Removed by the store when the creating session ends.
    Ephemeral,
}

impl CreateMode {
    /// Lowercase name, used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            CreateMode::Persistent => "persistent",
            CreateMode::Ephemeral => "ephemeral",
        }
    }
}

/// How a watch reports changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchMode {
    /// Streams every create/update/delete at or below the path until removed.
    Subtree,
    /// Fires once on the next change to the path or its direct children.
    OneShot,
}

/// Store-assigned identifier of a raw watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(pub u64);

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch-{}", self.0)
    }
}

/// A node path together with its payload at the time of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeData {
    /// Absolute node path.
    pub path: String,
    /// UTF-8 payload.
    pub data: String,
}

impl NodeData {
    /// Create a new node snapshot.
    pub fn new(path: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
        }
    }
}

/// Raw change notification emitted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A node appeared.
    NodeCreated {
        /// The new node.
        node: NodeData,
    },
    /// A node's payload was replaced.
    NodeChanged {
        /// Payload before the change.
        old: NodeData,
        /// Payload after the change.
        new: NodeData,
    },
    /// A node was removed.
    NodeDeleted {
        /// The node as it was before removal.
        old: NodeData,
    },
    /// The set of direct children of `path` changed.
    ChildrenChanged {
        /// The watched parent path.
        path: String,
    },
}

impl StoreEvent {
    /// The path the event concerns.
    pub fn path(&self) -> &str {
        match self {
            StoreEvent::NodeCreated { node } => &node.path,
            StoreEvent::NodeChanged { new, .. } => &new.path,
            StoreEvent::NodeDeleted { old } => &old.path,
            StoreEvent::ChildrenChanged { path } => path,
        }
    }
}

/// Receiving side of a registered raw watch.
#[derive(Debug)]
pub struct WatchStream {
    /// Identifier to pass to `unwatch`.
    pub id: WatchId,
    /// Events in store order. Closed once the watch is removed or, for
    /// one-shot watches, after the single event.
    pub events: mpsc::UnboundedReceiver<StoreEvent>,
}
