//! Coordination store boundary.
//!
//! This crate defines the interface through which coordination recipes talk
//! to a hierarchical, watch-capable, linearizable key-value store:
//!
//! - [`CoordinationStore`] - async create/read/list/delete/watch operations
//! - [`StoreError`] - `NotFound` / `NodeExists` outcomes and genuine faults
//! - [`StoreEvent`] / [`WatchStream`] - raw watch notifications
//! - [`path`] - pure helpers for absolute `/`-separated paths
//!
//! A deterministic in-memory backend ([`DeterministicCoordinationStore`])
//! with session expiry and fault injection is provided for tests and
//! simulation.

pub mod error;
pub mod inmemory;
pub mod path;
pub mod traits;
pub mod types;

pub use error::StoreError;
pub use inmemory::DeterministicCoordinationStore;
pub use inmemory::DeterministicSession;
pub use traits::CoordinationStore;
pub use types::CreateMode;
pub use types::NodeData;
pub use types::StoreEvent;
pub use types::WatchId;
pub use types::WatchMode;
pub use types::WatchStream;
