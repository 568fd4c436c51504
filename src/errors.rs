use std::fmt;

use thiserror::Error;

/// Errno-style classification of filesystem failures.
///
/// Every error surfaced by this crate is one of these kinds, mirroring the
/// POSIX errno a kernel filesystem would report for the same condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[non_exhaustive]
pub enum Errno {
    /// Path does not resolve, or an inode points at a missing payload.
    #[error("no such file or directory")]
    ENOENT,
    /// Attempt to create at an existing path, or at the root.
    #[error("file exists")]
    EEXIST,
    /// A path component expected to be a directory is not one.
    #[error("not a directory")]
    ENOTDIR,
    /// `unlink` invoked on a directory.
    #[error("is a directory")]
    EISDIR,
    /// `rename` would overwrite a directory.
    #[error("operation not permitted")]
    EPERM,
    /// `rename` would place a directory inside itself or a descendant.
    #[error("device or resource busy")]
    EBUSY,
    /// `rmdir` on a non-empty directory.
    #[error("directory not empty")]
    ENOTEMPTY,
    /// The backing store reported a failure, or id allocation gave up.
    #[error("input/output error")]
    EIO,
}

/// An error raised by a filesystem operation or by the backing store.
///
/// Carries the offending path when one is known, and for store-level
/// failures a detail string describing what the store reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsError {
    errno: Errno,
    path: Option<String>,
    detail: Option<String>,
}

impl FsError {
    /// An error of the given kind at `path`.
    pub fn new(errno: Errno, path: impl Into<String>) -> Self {
        FsError {
            errno,
            path: Some(path.into()),
            detail: None,
        }
    }

    /// An `EIO` describing a backing-store failure. No path is attached;
    /// the store does not know which file it was serving.
    pub fn store(detail: impl Into<String>) -> Self {
        FsError {
            errno: Errno::EIO,
            path: None,
            detail: Some(detail.into()),
        }
    }

    /// An `ENOENT` for an existing inode whose payload key is gone from the
    /// store. Resolving a live directory or file to a missing blob means the
    /// store contents are corrupt, so the detail says as much.
    pub fn corrupt(path: impl Into<String>) -> Self {
        FsError {
            errno: Errno::ENOENT,
            path: Some(path.into()),
            detail: Some("inode payload missing from store".to_string()),
        }
    }

    /// The errno classifying this error.
    pub fn errno(&self) -> Errno {
        self.errno
    }

    /// The offending path, when known.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Store-supplied detail, when present.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.errno, self.errno)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        if let Some(path) = &self.path {
            write!(f, ", path '{path}'")?;
        }
        Ok(())
    }
}

impl std::error::Error for FsError {}

/// Result type used throughout the crate.
pub type Result<T, E = FsError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_errno_and_path() {
        let err = FsError::new(Errno::ENOENT, "/missing");
        let rendered = err.to_string();
        assert!(rendered.starts_with("ENOENT"));
        assert!(rendered.contains("/missing"));
    }

    #[test]
    fn store_errors_are_eio() {
        let err = FsError::store("backend unavailable");
        assert_eq!(err.errno(), Errno::EIO);
        assert_eq!(err.path(), None);
        assert!(err.to_string().contains("backend unavailable"));
    }
}
