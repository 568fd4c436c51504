//! Decomposition helpers for the `/`-separated path strings the filesystem
//! operates on.
//!
//! Paths are assumed normalized: absolute, no trailing slash (except the root
//! itself), no `.` or `..` components, `/` as the only separator. The
//! filesystem performs no normalization of its own.

/// Everything up to the last separator. `dirname("/a/b")` is `"/a"`,
/// `dirname("/a")` and `dirname("/")` are `"/"`.
pub fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => ".",
    }
}

/// Everything after the last separator. `basename("/a/b")` is `"b"`;
/// `basename("/")` is `""`.
pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Joins a directory path and a child name.
pub fn join(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Whether `path` is `ancestor` itself or lies somewhere beneath it.
///
/// This is the loop-prevention predicate used by `rename`: appending `/` to
/// both sides before the prefix test keeps sibling directories sharing a name
/// prefix (`/ab` vs `/abc`) from matching. Correct only for normalized paths.
pub fn is_under(path: &str, ancestor: &str) -> bool {
    format!("{path}/").starts_with(&format!("{ancestor}/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirname_decomposition() {
        assert_eq!(dirname("/a/b/c"), "/a/b");
        assert_eq!(dirname("/a"), "/");
        assert_eq!(dirname("/"), "/");
    }

    #[test]
    fn basename_decomposition() {
        assert_eq!(basename("/a/b/c"), "c");
        assert_eq!(basename("/a"), "a");
        assert_eq!(basename("/"), "");
    }

    #[test]
    fn join_handles_root() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
    }

    #[test]
    fn is_under_is_not_fooled_by_name_prefixes() {
        assert!(is_under("/a/b", "/a"));
        assert!(is_under("/a", "/a"));
        assert!(!is_under("/abc", "/ab"));
        assert!(!is_under("/a", "/a/b"));
    }
}
