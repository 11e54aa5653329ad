//! Pure path and payload functions.
//!
//! Deterministic, side-effect free helpers used by the I/O shells in the
//! other modules. Time is passed in explicitly.

use scy_store::path::join;

use crate::constants::LOCK_BASE_PATH;
use crate::types::AddressRecord;

/// Check that `value` can be used as a single path segment.
pub fn validate_segment(value: &str) -> Result<(), &'static str> {
    if value.is_empty() {
        return Err("must not be empty");
    }
    if value.contains('/') {
        return Err("must not contain '/'");
    }
    Ok(())
}

/// Check that a lock key maps onto a well-formed path.
///
/// Lock keys may be nested (`orders/42`) but must not contain empty segments.
pub fn validate_lock_key(key: &str) -> Result<(), &'static str> {
    if key.is_empty() {
        return Err("must not be empty");
    }
    if key.split('/').any(str::is_empty) {
        return Err("must not contain empty path segments");
    }
    Ok(())
}

/// Store path guarding `key`: `/distributedlocks/{key}`.
pub fn lock_path(key: &str) -> String {
    format!("{LOCK_BASE_PATH}/{key}")
}

/// Per-environment namespace root: `{base}/{env}`.
pub fn namespace_path(base: &str, env: &str) -> String {
    join(base, env)
}

/// Path of one service: `{env_path}/{service_key}`.
pub fn service_path(env_path: &str, service_key: &str) -> String {
    join(env_path, service_key)
}

/// Path of one registration: `{env_path}/{service_key}/{address}`.
pub fn address_path(env_path: &str, service_key: &str, address: &str) -> String {
    join(&service_path(env_path, service_key), address)
}

/// Path of one topic: `{env_path}/{topic}`.
pub fn topic_path(env_path: &str, topic: &str) -> String {
    join(env_path, topic)
}

/// Path of one consumer-group membership: `{env_path}/{topic}/{group}`.
pub fn group_path(env_path: &str, topic: &str, group: &str) -> String {
    join(&topic_path(env_path, topic), group)
}

/// Split a registration event path into `(service_key, address)`.
///
/// Returns `None` for paths outside `env_path` or with fewer than two
/// segments below it (the namespace root or a bare service node).
pub fn parse_registration_path<'a>(env_path: &str, path: &'a str) -> Option<(&'a str, &'a str)> {
    let rest = path.strip_prefix(env_path)?.strip_prefix('/')?;
    let mut segments = rest.split('/');
    let service_key = segments.next().filter(|s| !s.is_empty())?;
    let address = segments.next().filter(|s| !s.is_empty())?;
    Some((service_key, address))
}

/// Parse a registration payload. `None` for empty or malformed data.
pub fn parse_address_record(data: &str) -> Option<AddressRecord> {
    if data.is_empty() {
        return None;
    }
    serde_json::from_str(data).ok()
}

/// Whether a registration payload marks its address enabled.
pub fn is_address_enabled(data: &str) -> bool {
    parse_address_record(data).is_some_and(|record| record.is_enabled())
}

/// Name of a direct child of `base`, or `None` for `base` itself and deeper
/// descendants.
pub fn direct_child_name<'a>(base: &str, path: &'a str) -> Option<&'a str> {
    let rest = path.strip_prefix(base)?.strip_prefix('/')?;
    if rest.is_empty() || rest.contains('/') {
        return None;
    }
    Some(rest)
}

/// Whether the local clock has moved behind a recorded watermark.
#[inline]
pub fn is_clock_rollback(recorded_ms: u64, now_ms: u64) -> bool {
    now_ms < recorded_ms
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn lock_path_layout() {
        assert_eq!(lock_path("resourceX"), "/distributedlocks/resourceX");
        assert_eq!(lock_path("orders/42"), "/distributedlocks/orders/42");
    }

    #[test]
    fn lock_key_validation() {
        assert!(validate_lock_key("a").is_ok());
        assert!(validate_lock_key("a/b").is_ok());
        assert!(validate_lock_key("").is_err());
        assert!(validate_lock_key("/a").is_err());
        assert!(validate_lock_key("a//b").is_err());
        assert!(validate_lock_key("a/").is_err());
    }

    #[test]
    fn registry_path_layout() {
        let env = namespace_path("/scy-rpc", "prod");
        assert_eq!(env, "/scy-rpc/prod");
        assert_eq!(address_path(&env, "svcA", "10.0.0.1:9000"), "/scy-rpc/prod/svcA/10.0.0.1:9000");
        assert_eq!(group_path("/scy-mq/prod", "orders", "billing"), "/scy-mq/prod/orders/billing");
    }

    #[test]
    fn parse_registration_path_extracts_key_and_address() {
        let env = "/scy-rpc/prod";
        assert_eq!(
            parse_registration_path(env, "/scy-rpc/prod/svcA/10.0.0.1:9000"),
            Some(("svcA", "10.0.0.1:9000"))
        );
        assert_eq!(parse_registration_path(env, "/scy-rpc/prod/svcA"), None);
        assert_eq!(parse_registration_path(env, "/scy-rpc/prod"), None);
        assert_eq!(parse_registration_path(env, "/scy-rpc/production/svcA/x"), None);
        assert_eq!(parse_registration_path(env, "/other/svcA/x"), None);
    }

    #[test]
    fn address_enabled_only_for_explicit_true() {
        assert!(is_address_enabled(r#"{"enable":true}"#));
        assert!(!is_address_enabled(r#"{"enable":false}"#));
        assert!(!is_address_enabled("{}"));
        assert!(!is_address_enabled(""));
        assert!(!is_address_enabled("not json"));
    }

    #[test]
    fn direct_child_name_rejects_self_and_grandchildren() {
        let base = "/application/config/dynamic_configuration";
        assert_eq!(direct_child_name(base, "/application/config/dynamic_configuration/timeout"), Some("timeout"));
        assert_eq!(direct_child_name(base, base), None);
        assert_eq!(direct_child_name(base, "/application/config/dynamic_configuration/a/b"), None);
    }

    #[test]
    fn clock_rollback_detection() {
        assert!(is_clock_rollback(2_000, 1_999));
        assert!(!is_clock_rollback(2_000, 2_000));
        assert!(!is_clock_rollback(2_000, 2_001));
    }

    proptest! {
        #[test]
        fn registration_paths_parse_back(
            env in "[a-z]{1,8}",
            key in "[A-Za-z0-9._-]{1,16}",
            address in "[0-9.]{1,15}:[0-9]{1,5}",
        ) {
            let env_path = namespace_path("/scy-rpc", &env);
            let path = address_path(&env_path, &key, &address);
            prop_assert_eq!(parse_registration_path(&env_path, &path), Some((key.as_str(), address.as_str())));
        }

        #[test]
        fn valid_segments_are_valid_lock_keys(segment in "[A-Za-z0-9._:-]{1,24}") {
            prop_assert!(validate_segment(&segment).is_ok());
            prop_assert!(validate_lock_key(&segment).is_ok());
        }
    }
}
