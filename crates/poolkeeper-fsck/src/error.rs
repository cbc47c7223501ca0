use poolkeeper_meta::MetaError;
use poolkeeper_pool::PoolError;
use poolkeeper_storage::StorageError;
use thiserror::Error;

/// Errors that abort a consistency check.
///
/// Problems found on individual files are not errors; they go into the
/// report.
#[derive(Debug, Error)]
pub enum FsckError {
    /// The requested share is not configured.
    #[error("share {0} not found")]
    ShareNotFound(String),

    /// A subtree was requested without a share.
    #[error("a subtree check needs a share")]
    SubtreeWithoutShare,

    /// Pool error.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Metastore error.
    #[error(transparent)]
    Meta(#[from] MetaError),

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for consistency checks.
pub type FsckResult<T> = Result<T, FsckError>;

impl From<FsckError> for PoolError {
    fn from(e: FsckError) -> Self {
        match e {
            FsckError::Pool(inner) => inner,
            FsckError::ShareNotFound(name) => PoolError::ShareNotFound(name),
            other => PoolError::Consistency(other.to_string()),
        }
    }
}
