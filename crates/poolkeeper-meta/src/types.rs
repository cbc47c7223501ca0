use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Identifies a pooled drive by its mount path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DriveId(String);

impl DriveId {
    /// Creates a drive id from its mount path, ignoring trailing slashes.
    pub fn from_mount(mount: &Path) -> Self {
        let raw = mount.to_string_lossy();
        let trimmed = raw.trim_end_matches('/');
        DriveId(if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() })
    }

    /// The id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The mount path this id was built from.
    pub fn mount(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }
}

impl fmt::Display for DriveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a share: a single path component.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShareName(String);

impl ShareName {
    /// Validates and wraps a share name.
    pub fn new(name: &str) -> Result<Self, MetaError> {
        if name.is_empty() || name.contains('/') || name.contains('\0') || name == "." || name == ".." {
            return Err(MetaError::InvalidShareName(name.to_string()));
        }
        Ok(ShareName(name.to_string()))
    }

    /// The name as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShareName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Represents a point in time with second and nanosecond precision
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since Unix epoch
    pub secs: u64,
    /// Nanoseconds within the second
    pub nanos: u32,
}

impl Timestamp {
    /// Returns the current timestamp
    pub fn now() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            secs: now.as_secs(),
            nanos: now.subsec_nanos(),
        }
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.secs
            .cmp(&other.secs)
            .then_with(|| self.nanos.cmp(&other.nanos))
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.secs, self.nanos)
    }
}

/// Result type alias for metadata operations.
pub type MetaResult<T> = Result<T, MetaError>;

/// Error types for metastore and key-value operations
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    /// A share name was empty or contained a separator.
    #[error("invalid share name {0:?}")]
    InvalidShareName(String),

    /// A stored key could not be decoded.
    #[error("corrupt key in store: {0}")]
    CorruptKey(String),

    /// A stored value could not be decoded or encoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An error occurred in the KV store layer.
    #[error("kv store error: {0}")]
    KvError(String),

    /// A path error from the storage layer.
    #[error(transparent)]
    Storage(#[from] poolkeeper_storage::StorageError),

    /// A lower-level I/O error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

impl From<bincode::Error> for MetaError {
    fn from(e: bincode::Error) -> Self {
        MetaError::Serialization(e.to_string())
    }
}
