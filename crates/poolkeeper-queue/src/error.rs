use poolkeeper_fsck::FsckError;
use poolkeeper_meta::MetaError;
use poolkeeper_pool::PoolError;
use poolkeeper_storage::StorageError;
use thiserror::Error;

/// Errors from the task queue and its handlers.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The task kind is not known.
    #[error("unknown task kind {0:?}")]
    UnknownKind(String),

    /// An option key the task kind does not take.
    #[error("task kind {kind} takes no option {key:?}")]
    UnknownOption {
        /// Task kind.
        kind: String,
        /// Offending key.
        key: String,
    },

    /// An option value that does not parse.
    #[error("invalid value {value:?} for option {key}")]
    InvalidOption {
        /// Option key.
        key: String,
        /// Offending value.
        value: String,
    },

    /// The request is missing a field or carries one its kind forbids.
    #[error("invalid task request: {0}")]
    InvalidRequest(String),

    /// No task with this id.
    #[error("task {0} not found")]
    TaskNotFound(u64),

    /// The task is not running, so it cannot be completed.
    #[error("task {0} is not running")]
    NotRunning(u64),

    /// The handler stopped because the daemon is shutting down. The task
    /// stays running and is picked up again on the next start.
    #[error("interrupted by shutdown")]
    Interrupted,

    /// A handler gave up on its task.
    #[error("{0}")]
    Handler(String),

    /// Metastore or store error.
    #[error(transparent)]
    Meta(#[from] MetaError),

    /// Pool error.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Consistency check error.
    #[error(transparent)]
    Fsck(#[from] FsckError),

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<bincode::Error> for QueueError {
    fn from(e: bincode::Error) -> Self {
        QueueError::Meta(MetaError::Serialization(e.to_string()))
    }
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;
