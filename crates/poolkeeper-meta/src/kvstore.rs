//! Ordered key-value store abstraction.
//!
//! Both the metastore and the task queue persist through this trait. Keys
//! are byte strings compared lexicographically, which the callers rely on
//! for FIFO order (big-endian ids) and prefix grouping (share, path).

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::types::MetaResult;

/// Key type for the KV store.
pub type Key = Vec<u8>;
/// Value type for the KV store.
pub type Value = Vec<u8>;
/// A key-value pair.
pub type KvPair = (Key, Value);

/// Key-value store trait for metadata persistence.
///
/// Implementations must make every successful mutation durable before
/// returning; [`MemoryKvStore`] is the exception and exists for tests.
pub trait KvStore: Send + Sync {
    /// Get a value by key. Returns None if the key doesn't exist.
    fn get(&self, key: &[u8]) -> MetaResult<Option<Value>>;

    /// Put a key-value pair. Overwrites any existing value.
    fn put(&self, key: Key, value: Value) -> MetaResult<()>;

    /// Delete a key. Returns Ok(()) even if the key didn't exist.
    fn delete(&self, key: &[u8]) -> MetaResult<()>;

    /// Scan all keys with the given prefix, returning (key, value) pairs in sorted order.
    fn scan_prefix(&self, prefix: &[u8]) -> MetaResult<Vec<KvPair>>;

    /// The smallest key with the given prefix, with its value.
    fn first_with_prefix(&self, prefix: &[u8]) -> MetaResult<Option<KvPair>>;

    /// Atomically write a batch of operations (puts and deletes).
    fn write_batch(&self, ops: Vec<BatchOp>) -> MetaResult<()>;
}

/// A single operation in a write batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    /// Put a key-value pair.
    Put {
        /// The key to insert or update.
        key: Vec<u8>,
        /// The value to store.
        value: Vec<u8>,
    },
    /// Delete a key.
    Delete {
        /// The key to delete.
        key: Vec<u8>,
    },
}

pub(crate) fn apply_batch(data: &mut BTreeMap<Key, Value>, ops: Vec<BatchOp>) {
    for op in ops {
        match op {
            BatchOp::Put { key, value } => {
                data.insert(key, value);
            }
            BatchOp::Delete { key } => {
                data.remove(&key);
            }
        }
    }
}

pub(crate) fn prefix_scan(data: &BTreeMap<Key, Value>, prefix: &[u8]) -> Vec<KvPair> {
    data.range::<[u8], _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

pub(crate) fn prefix_first(data: &BTreeMap<Key, Value>, prefix: &[u8]) -> Option<KvPair> {
    data.range::<[u8], _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
        .next()
        .filter(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
}

/// In-memory KV store backed by a BTreeMap. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryKvStore {
    data: RwLock<BTreeMap<Key, Value>>,
}

impl MemoryKvStore {
    /// Creates a new empty in-memory KV store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// True when no keys are held.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &[u8]) -> MetaResult<Option<Value>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: Key, value: Value) -> MetaResult<()> {
        self.data.write().insert(key, value);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> MetaResult<()> {
        self.data.write().remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> MetaResult<Vec<KvPair>> {
        Ok(prefix_scan(&self.data.read(), prefix))
    }

    fn first_with_prefix(&self, prefix: &[u8]) -> MetaResult<Option<KvPair>> {
        Ok(prefix_first(&self.data.read(), prefix))
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> MetaResult<()> {
        apply_batch(&mut self.data.write(), ops);
        Ok(())
    }
}
