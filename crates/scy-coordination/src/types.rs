//! Shared payload types.

use serde::Deserialize;
use serde::Serialize;

/// Payload of a service registration node.
///
/// Serialized as `{"enable":true}`. Only an explicit `true` counts as
/// enabled; a missing field or `false` excludes the address from discovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    /// Whether the address should receive traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,
}

impl AddressRecord {
    /// A record marking the address enabled.
    pub fn enabled() -> Self {
        Self { enable: Some(true) }
    }

    /// A record marking the address disabled.
    pub fn disabled() -> Self {
        Self { enable: Some(false) }
    }

    /// True only for an explicit `enable: true`.
    pub fn is_enabled(&self) -> bool {
        self.enable == Some(true)
    }
}

/// Payload of a lock node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    /// Unique identifier of this acquisition.
    pub holder_id: String,
    /// When the lock was acquired (Unix timestamp milliseconds).
    pub acquired_at_ms: u64,
}

impl LockEntry {
    /// Create an entry stamped with the current time.
    pub fn new(holder_id: impl Into<String>) -> Self {
        Self {
            holder_id: holder_id.into(),
            acquired_at_ms: now_unix_ms(),
        }
    }
}

/// Get current Unix timestamp in milliseconds.
///
/// Returns 0 if system time is before UNIX epoch.
#[inline]
pub fn now_unix_ms() -> u64 {
    use std::time::SystemTime;
    use std::time::UNIX_EPOCH;
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
