//! Error types for coordination store operations.

use snafu::Snafu;

/// Errors returned by a [`crate::CoordinationStore`].
///
/// `NotFound` and `NodeExists` are expected outcomes that callers branch on;
/// the remaining variants are genuine faults.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// Create-if-absent lost the race: a node already lives at this path.
    #[snafu(display("node '{path}' already exists"))]
    NodeExists {
        /// The contended path.
        path: String,
    },

    /// No node lives at this path.
    #[snafu(display("node '{path}' not found"))]
    NotFound {
        /// The missing path.
        path: String,
    },

    /// The path is not a well-formed absolute path.
    #[snafu(display("invalid path '{path}': {reason}"))]
    InvalidPath {
        /// The rejected path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The client lost its connection to the store.
    #[snafu(display("connection lost: {reason}"))]
    ConnectionLoss {
        /// Transport-level description.
        reason: String,
    },

    /// Any other store failure.
    #[snafu(display("operation failed: {reason}"))]
    Failed {
        /// Human-readable description.
        reason: String,
    },
}

impl StoreError {
    /// True for [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// True for [`StoreError::NodeExists`].
    pub fn is_node_exists(&self) -> bool {
        matches!(self, StoreError::NodeExists { .. })
    }
}
