//! Pure helpers for hierarchical store paths.
//!
//! Paths are absolute, `/`-separated, with no empty segments and no trailing
//! slash. `/` is the root.

use crate::error::StoreError;

/// The root path.
pub const ROOT: &str = "/";

/// Validate an absolute node path.
pub fn validate_path(path: &str) -> Result<(), StoreError> {
    let reason = if path.is_empty() {
        Some("path is empty")
    } else if !path.starts_with('/') {
        Some("path must start with '/'")
    } else if path.len() > 1 && path.ends_with('/') {
        Some("path must not end with '/'")
    } else if path.len() > 1 && path[1..].split('/').any(str::is_empty) {
        Some("path contains an empty segment")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StoreError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Append a child name to a parent path.
pub fn join(parent: &str, child: &str) -> String {
    if parent == ROOT {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Parent of a path, `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of a path (empty for the root).
pub fn name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Prefix shared by every descendant of `path`.
pub fn child_prefix(path: &str) -> String {
    if path == ROOT { ROOT.to_string() } else { format!("{path}/") }
}

/// True when `candidate` is `path` itself or lies below it.
pub fn is_within(path: &str, candidate: &str) -> bool {
    if path == ROOT {
        return candidate.starts_with('/');
    }
    candidate == path || (candidate.starts_with(path) && candidate.as_bytes().get(path.len()) == Some(&b'/'))
}

/// Every proper ancestor of `path` except the root, shallowest first.
pub fn ancestors(path: &str) -> Vec<&str> {
    let mut result = Vec::new();
    let mut current = parent(path);
    while let Some(p) = current {
        if p == ROOT {
            break;
        }
        result.push(p);
        current = parent(p);
    }
    result.reverse();
    result
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn validate_accepts_well_formed_paths() {
        assert!(validate_path("/").is_ok());
        assert!(validate_path("/distributedlocks/order-1").is_ok());
        assert!(validate_path("/scy-rpc/prod/svc/10.0.0.1:9000").is_ok());
    }

    #[test]
    fn validate_rejects_malformed_paths() {
        assert!(validate_path("").is_err());
        assert!(validate_path("relative").is_err());
        assert!(validate_path("/trailing/").is_err());
        assert!(validate_path("/double//slash").is_err());
    }

    #[test]
    fn join_and_parent() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
        assert_eq!(parent("/a/b"), Some("/a"));
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/"), None);
    }

    #[test]
    fn name_is_last_segment() {
        assert_eq!(name("/scy-mq/dev/orders/group-a"), "group-a");
        assert_eq!(name("/"), "");
    }

    #[test]
    fn within_respects_segment_boundaries() {
        assert!(is_within("/a", "/a"));
        assert!(is_within("/a", "/a/b/c"));
        assert!(!is_within("/a", "/ab"));
        assert!(is_within("/", "/anything"));
    }

    #[test]
    fn ancestors_exclude_root_and_self() {
        assert_eq!(ancestors("/a/b/c"), vec!["/a", "/a/b"]);
        assert!(ancestors("/a").is_empty());
    }

    fn segment() -> impl Strategy<Value = String> {
        "[a-z0-9.:_-]{1,12}"
    }

    proptest! {
        #[test]
        fn join_then_split_roundtrips(segments in proptest::collection::vec(segment(), 1..6)) {
            let path = segments.iter().fold(ROOT.to_string(), |acc, s| join(&acc, s));
            prop_assert!(validate_path(&path).is_ok());
            prop_assert_eq!(name(&path), segments.last().unwrap().as_str());
            prop_assert_eq!(ancestors(&path).len(), segments.len() - 1);
            let p = parent(&path).unwrap();
            prop_assert!(is_within(p, &path));
        }
    }
}
