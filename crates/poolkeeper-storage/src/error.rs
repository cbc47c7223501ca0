//! Error types for the storage subsystem.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error variants for on-drive file operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// An I/O error tied to a specific path.
    #[error("I/O error on {path}: {source}")]
    PathIo {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// The path does not exist, even after the normalization retry.
    #[error("Not found: {0}")]
    NotFound(PathBuf),

    /// A relative path was empty, absolute or escaped its root.
    #[error("Invalid relative path: {0:?}")]
    InvalidPath(String),

    /// Copied bytes did not hash to the expected value.
    #[error("Checksum mismatch on {path}: expected {expected}, actual {actual}")]
    ChecksumMismatch {
        /// The file with the mismatch.
        path: PathBuf,
        /// The reference checksum.
        expected: String,
        /// The checksum actually computed.
        actual: String,
    },

    /// A symlink chain exceeded the hop limit or looped.
    #[error("Symlink chain too deep at {0}")]
    SymlinkLoop(PathBuf),

    /// The source of a copy is not a regular file.
    #[error("Not a regular file: {0}")]
    NotAFile(PathBuf),
}

impl StorageError {
    /// Builds a [`StorageError::PathIo`], collapsing `NotFound` into
    /// [`StorageError::NotFound`].
    pub fn at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(path)
        } else {
            StorageError::PathIo { path, source }
        }
    }

    /// Returns true for errors that a later pass may not hit again
    /// (permissions, missing mounts, interrupted I/O).
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::IoError(e) | StorageError::PathIo { source: e, .. } => matches!(
                e.kind(),
                std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            StorageError::NotFound(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_collapses_not_found() {
        let err = StorageError::at(
            "/mnt/hdd1/docs/a.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_at_keeps_other_kinds() {
        let err = StorageError::at(
            "/mnt/hdd1",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
        );
        assert!(matches!(err, StorageError::PathIo { .. }));
        assert!(err.is_transient());
        assert!(format!("{}", err).contains("/mnt/hdd1"));
    }

    #[test]
    fn test_checksum_mismatch_message() {
        let err = StorageError::ChecksumMismatch {
            path: PathBuf::from("/mnt/hdd2/docs/report.txt"),
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("expected aa"));
        assert!(msg.contains("actual bb"));
        assert!(!err.is_transient());
    }
}
