#![warn(missing_docs)]

//! poolkeeper metadata subsystem: durable key-value store and copy metastore

pub mod kvstore;
pub mod metastore;
pub mod types;
pub mod wal_store;

pub use kvstore::{BatchOp, KvStore, MemoryKvStore};
pub use metastore::{BackupCandidate, CopyRecord, Metastore};
pub use types::{DriveId, MetaError, MetaResult, ShareName, Timestamp};
pub use wal_store::PersistentKvStore;
