//! The coordination store interface.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::CreateMode;
use crate::types::WatchId;
use crate::types::WatchMode;
use crate::types::WatchStream;

/// Hierarchical, watch-capable, linearizable key-value store.
///
/// Implementations provide atomic create-if-absent, session-scoped ephemeral
/// nodes and per-path ordered watch delivery. Coordination recipes consume
/// the store only through this trait.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Create a node, creating missing parents as persistent containers.
    ///
    /// Fails with [`StoreError::NodeExists`] if the path is taken.
    async fn create(&self, path: &str, data: &str, mode: CreateMode) -> Result<String, StoreError>;

    /// Create a node or overwrite the payload of an existing one.
    async fn create_or_update(&self, path: &str, data: &str, mode: CreateMode) -> Result<String, StoreError>;

    /// Whether a node exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool, StoreError>;

    /// Read a node's payload.
    async fn get_data(&self, path: &str) -> Result<String, StoreError>;

    /// Names of the direct children of `path`.
    async fn get_children(&self, path: &str) -> Result<Vec<String>, StoreError>;

    /// Delete a node and all of its descendants.
    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    /// Register a raw watch on `path`.
    async fn watch(&self, path: &str, mode: WatchMode) -> Result<WatchStream, StoreError>;

    /// Remove a raw watch. Unknown or already-fired ids are ignored.
    async fn unwatch(&self, id: WatchId) -> Result<(), StoreError>;
}

// Blanket implementation for Arc<T>
#[async_trait]
impl<T: CoordinationStore + ?Sized> CoordinationStore for std::sync::Arc<T> {
    async fn create(&self, path: &str, data: &str, mode: CreateMode) -> Result<String, StoreError> {
        (**self).create(path, data, mode).await
    }

    async fn create_or_update(&self, path: &str, data: &str, mode: CreateMode) -> Result<String, StoreError> {
        (**self).create_or_update(path, data, mode).await
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        (**self).exists(path).await
    }

    async fn get_data(&self, path: &str) -> Result<String, StoreError> {
        (**self).get_data(path).await
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>, StoreError> {
        (**self).get_children(path).await
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        (**self).delete(path).await
    }

    async fn watch(&self, path: &str, mode: WatchMode) -> Result<WatchStream, StoreError> {
        (**self).watch(path, mode).await
    }

    async fn unwatch(&self, id: WatchId) -> Result<(), StoreError> {
        (**self).unwatch(id).await
    }
}
