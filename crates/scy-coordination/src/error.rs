//! Error types for coordination primitives.

use scy_store::StoreError;
use snafu::Snafu;

use crate::config::ConfigError;

/// Errors from coordination primitives.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CoordinationError {
    /// Underlying store error.
    #[snafu(display("store error: {source}"))]
    Store {
        /// The underlying error.
        source: StoreError,
    },

    /// JSON serialization/deserialization error.
    #[snafu(display("serialization error: {source}"))]
    Serialization {
        /// The underlying error.
        source: serde_json::Error,
    },

    /// Operation timed out.
    #[snafu(display("operation timed out: {operation}"))]
    Timeout {
        /// Description of the operation.
        operation: String,
    },

    /// A key cannot be mapped onto a store path.
    #[snafu(display("invalid key '{key}': {reason}"))]
    InvalidKey {
        /// The rejected key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The same dynamic configuration key was registered twice.
    #[snafu(display("configuration key '{key}' registered more than once"))]
    DuplicateConfigKey {
        /// The duplicated key.
        key: String,
    },

    /// The local clock is behind the last recorded watermark.
    #[snafu(display("clock rollback detected at '{path}': recorded {recorded_ms}ms, now {now_ms}ms"))]
    ClockRollback {
        /// Watermark node.
        path: String,
        /// Recorded watermark.
        recorded_ms: u64,
        /// Local wall clock.
        now_ms: u64,
    },

    /// A component needing a tokio runtime was built outside of one.
    #[snafu(display("no tokio runtime available: {reason}"))]
    NoRuntime {
        /// Runtime lookup failure.
        reason: String,
    },

    /// Configuration could not be loaded or failed validation.
    #[snafu(display("configuration error: {source}"))]
    Config {
        /// The underlying error.
        source: ConfigError,
    },
}

impl From<StoreError> for CoordinationError {
    fn from(source: StoreError) -> Self {
        CoordinationError::Store { source }
    }
}

impl From<serde_json::Error> for CoordinationError {
    fn from(source: serde_json::Error) -> Self {
        CoordinationError::Serialization { source }
    }
}

impl From<ConfigError> for CoordinationError {
    fn from(source: ConfigError) -> Self {
        CoordinationError::Config { source }
    }
}
