use poolkeeper_meta::{DriveId, MetaError};
use poolkeeper_storage::StorageError;
use thiserror::Error;

use crate::drive::DriveState;

/// Errors from the storage pool manager.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The drive is not part of the pool.
    #[error("drive {0} not found")]
    DriveNotFound(DriveId),

    /// The drive is already registered.
    #[error("drive {0} already registered")]
    DriveExists(DriveId),

    /// The share is not configured.
    #[error("share {0} not found")]
    ShareNotFound(String),

    /// A drive lifecycle transition that is not allowed.
    #[error("invalid state transition for drive {drive}: {from:?} -> {to:?}")]
    InvalidStateTransition {
        /// The drive.
        drive: DriveId,
        /// Current state.
        from: DriveState,
        /// Requested state.
        to: DriveState,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The free-space probe failed for a drive.
    #[error("probe failed for {mount}: {reason}")]
    Probe {
        /// Mount path probed.
        mount: String,
        /// Failure text.
        reason: String,
    },

    /// The operator notification could not be sent.
    #[error("notification failed: {0}")]
    Notify(String),

    /// The restart hook failed.
    #[error("restart hook failed: {0}")]
    RestartHook(String),

    /// A scoped consistency operation failed.
    #[error("consistency check failed: {0}")]
    Consistency(String),

    /// A follow-up task could not be scheduled.
    #[error("failed to schedule follow-up: {0}")]
    Schedule(String),

    /// Storage layer error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Metastore error.
    #[error(transparent)]
    Meta(#[from] MetaError),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;
