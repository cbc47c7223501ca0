//! Persistent file-backed KV store with WAL and checkpoint support.
//!
//! Uses an in-memory BTreeMap as read cache, a write-ahead log (WAL) for durability,
//! and checkpoint files for fast recovery.
//!
//! WAL frame: `[len: u32 LE][crc32: u32 LE][bincode(WalEntry)]`. A batch is a
//! single frame, so it is applied entirely or not at all. Replay stops at the
//! first short or corrupt frame and truncates the log there; that frame was
//! never acknowledged to a caller.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::kvstore::{apply_batch, prefix_first, prefix_scan, BatchOp, Key, KvPair, KvStore, Value};
use crate::types::{MetaError, MetaResult};

const WAL_FILENAME: &str = "wal.log";
const CHECKPOINT_FILENAME: &str = "checkpoint.bin";
const FRAME_HEADER: usize = 8;
const DEFAULT_CHECKPOINT_EVERY: u64 = 10_000;

#[derive(Debug, Serialize, Deserialize, Clone)]
enum WalOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl From<BatchOp> for WalOp {
    fn from(op: BatchOp) -> Self {
        match op {
            BatchOp::Put { key, value } => WalOp::Put { key, value },
            BatchOp::Delete { key } => WalOp::Delete { key },
        }
    }
}

impl From<WalOp> for BatchOp {
    fn from(op: WalOp) -> Self {
        match op {
            WalOp::Put { key, value } => BatchOp::Put { key, value },
            WalOp::Delete { key } => BatchOp::Delete { key },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WalEntry {
    seq: u64,
    ops: Vec<WalOp>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Checkpoint {
    seq: u64,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

struct WalWriter {
    file: File,
    seq: u64,
    frames_since_checkpoint: u64,
}

impl WalWriter {
    fn append(&mut self, ops: Vec<WalOp>) -> MetaResult<()> {
        self.seq += 1;
        let entry = WalEntry { seq: self.seq, ops };
        let payload = bincode::serialize(&entry)?;
        let mut frame = Vec::with_capacity(FRAME_HEADER + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);
        self.file.write_all(&frame)?;
        self.file.sync_data()?;
        self.frames_since_checkpoint += 1;
        Ok(())
    }
}

/// Persistent file-backed KV store.
///
/// On open, loads the last checkpoint and replays the WAL written after it.
/// Every mutation is fsynced before it returns.
pub struct PersistentKvStore {
    data: RwLock<BTreeMap<Key, Value>>,
    wal: Mutex<WalWriter>,
    dir: PathBuf,
    checkpoint_every: u64,
}

impl PersistentKvStore {
    /// Opens or creates a persistent KV store in the given directory.
    pub fn open(dir: &Path) -> MetaResult<Self> {
        Self::open_with(dir, DEFAULT_CHECKPOINT_EVERY)
    }

    /// Like [`PersistentKvStore::open`], checkpointing automatically after
    /// `checkpoint_every` WAL frames (0 disables automatic checkpoints).
    pub fn open_with(dir: &Path, checkpoint_every: u64) -> MetaResult<Self> {
        fs::create_dir_all(dir)?;
        let wal_path = dir.join(WAL_FILENAME);

        let mut data = BTreeMap::new();
        let mut seq = load_checkpoint(&dir.join(CHECKPOINT_FILENAME), &mut data)?;
        let (replayed, last_seq) = replay_wal(&wal_path, seq, &mut data)?;
        seq = seq.max(last_seq);

        let file = OpenOptions::new().create(true).append(true).open(&wal_path)?;
        info!(dir = %dir.display(), keys = data.len(), replayed, "opened persistent kv store");

        Ok(Self {
            data: RwLock::new(data),
            wal: Mutex::new(WalWriter {
                file,
                seq,
                frames_since_checkpoint: replayed,
            }),
            dir: dir.to_path_buf(),
            checkpoint_every,
        })
    }

    /// Directory holding the WAL and checkpoint.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes a checkpoint of the current state and truncates the WAL.
    pub fn checkpoint(&self) -> MetaResult<()> {
        let mut wal = self.wal.lock();
        self.checkpoint_locked(&mut wal)
    }

    fn checkpoint_locked(&self, wal: &mut WalWriter) -> MetaResult<()> {
        let entries: Vec<(Vec<u8>, Vec<u8>)> = self
            .data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let count = entries.len();
        let encoded = bincode::serialize(&Checkpoint { seq: wal.seq, entries })?;

        let checkpoint_path = self.dir.join(CHECKPOINT_FILENAME);
        let tmp_path = checkpoint_path.with_extension("tmp");
        {
            let mut tmp_file = File::create(&tmp_path)?;
            tmp_file.write_all(&encoded)?;
            tmp_file.sync_all()?;
        }
        fs::rename(&tmp_path, &checkpoint_path)?;

        wal.file.set_len(0)?;
        wal.file.sync_all()?;
        wal.frames_since_checkpoint = 0;
        debug!(dir = %self.dir.display(), keys = count, seq = wal.seq, "checkpoint written");
        Ok(())
    }

    fn log(&self, ops: Vec<BatchOp>) -> MetaResult<()> {
        let mut wal = self.wal.lock();
        wal.append(ops.iter().cloned().map(WalOp::from).collect())?;
        apply_batch(&mut self.data.write(), ops);
        if self.checkpoint_every > 0 && wal.frames_since_checkpoint >= self.checkpoint_every {
            self.checkpoint_locked(&mut wal)?;
        }
        Ok(())
    }
}

fn load_checkpoint(path: &Path, data: &mut BTreeMap<Key, Value>) -> MetaResult<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let contents = fs::read(path)?;
    if contents.is_empty() {
        return Ok(0);
    }
    let checkpoint: Checkpoint = bincode::deserialize(&contents)
        .map_err(|e| MetaError::KvError(format!("failed to deserialize checkpoint: {}", e)))?;
    data.extend(checkpoint.entries);
    Ok(checkpoint.seq)
}

fn replay_wal(path: &Path, after_seq: u64, data: &mut BTreeMap<Key, Value>) -> MetaResult<(u64, u64)> {
    if !path.exists() {
        return Ok((0, after_seq));
    }
    let mut buf = Vec::new();
    File::open(path)?.read_to_end(&mut buf)?;

    let mut offset = 0usize;
    let mut replayed = 0u64;
    let mut last_seq = after_seq;
    while offset + FRAME_HEADER <= buf.len() {
        let len = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap_or_default()) as usize;
        let crc = u32::from_le_bytes(buf[offset + 4..offset + 8].try_into().unwrap_or_default());
        let start = offset + FRAME_HEADER;
        if start + len > buf.len() || crc32fast::hash(&buf[start..start + len]) != crc {
            break;
        }
        let entry: WalEntry = match bincode::deserialize(&buf[start..start + len]) {
            Ok(e) => e,
            Err(e) => {
                warn!(path = %path.display(), offset, error = %e, "undecodable WAL frame");
                break;
            }
        };
        if entry.seq > after_seq {
            apply_batch(data, entry.ops.into_iter().map(BatchOp::from).collect());
            last_seq = last_seq.max(entry.seq);
            replayed += 1;
        }
        offset = start + len;
    }

    if offset < buf.len() {
        warn!(
            path = %path.display(),
            valid_bytes = offset,
            dropped_bytes = buf.len() - offset,
            "truncating torn WAL tail"
        );
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(offset as u64)?;
        file.sync_all()?;
    }
    Ok((replayed, last_seq))
}

impl KvStore for PersistentKvStore {
    fn get(&self, key: &[u8]) -> MetaResult<Option<Value>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: Key, value: Value) -> MetaResult<()> {
        self.log(vec![BatchOp::Put { key, value }])
    }

    fn delete(&self, key: &[u8]) -> MetaResult<()> {
        self.log(vec![BatchOp::Delete { key: key.to_vec() }])
    }

    fn scan_prefix(&self, prefix: &[u8]) -> MetaResult<Vec<KvPair>> {
        Ok(prefix_scan(&self.data.read(), prefix))
    }

    fn first_with_prefix(&self, prefix: &[u8]) -> MetaResult<Option<KvPair>> {
        Ok(prefix_first(&self.data.read(), prefix))
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> MetaResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        self.log(ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_put_get() {
        let dir = tempdir().unwrap();
        let store = PersistentKvStore::open(dir.path()).unwrap();
        store.put(b"key1".to_vec(), b"value1".to_vec()).unwrap();
        assert_eq!(store.get(b"key1").unwrap(), Some(b"value1".to_vec()));
        assert_eq!(store.get(b"key2").unwrap(), None);
    }

    #[test]
    fn test_crash_recovery_wal_replay() {
        let dir = tempdir().unwrap();
        {
            let store = PersistentKvStore::open(dir.path()).unwrap();
            store.put(b"key1".to_vec(), b"value1".to_vec()).unwrap();
            store.put(b"key2".to_vec(), b"value2".to_vec()).unwrap();
            store.delete(b"key1").unwrap();
        }

        let store = PersistentKvStore::open(dir.path()).unwrap();
        assert_eq!(store.get(b"key1").unwrap(), None);
        assert_eq!(store.get(b"key2").unwrap(), Some(b"value2".to_vec()));
    }

    #[test]
    fn test_batch_replayed_whole() {
        let dir = tempdir().unwrap();
        {
            let store = PersistentKvStore::open(dir.path()).unwrap();
            store.put(b"old".to_vec(), b"x".to_vec()).unwrap();
            store
                .write_batch(vec![
                    BatchOp::Put {
                        key: b"new".to_vec(),
                        value: b"y".to_vec(),
                    },
                    BatchOp::Delete { key: b"old".to_vec() },
                ])
                .unwrap();
        }
        let store = PersistentKvStore::open(dir.path()).unwrap();
        assert_eq!(store.get(b"new").unwrap(), Some(b"y".to_vec()));
        assert_eq!(store.get(b"old").unwrap(), None);
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let dir = tempdir().unwrap();
        {
            let store = PersistentKvStore::open(dir.path()).unwrap();
            store.put(b"kept".to_vec(), b"1".to_vec()).unwrap();
            store.put(b"torn".to_vec(), b"2".to_vec()).unwrap();
        }
        let wal_path = dir.path().join(WAL_FILENAME);
        let len = fs::metadata(&wal_path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&wal_path).unwrap();
        file.set_len(len - 3).unwrap();

        let store = PersistentKvStore::open(dir.path()).unwrap();
        assert_eq!(store.get(b"kept").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"torn").unwrap(), None);

        store.put(b"after".to_vec(), b"3".to_vec()).unwrap();
        drop(store);
        let store = PersistentKvStore::open(dir.path()).unwrap();
        assert_eq!(store.get(b"after").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn test_checkpoint_and_reload() {
        let dir = tempdir().unwrap();
        {
            let store = PersistentKvStore::open(dir.path()).unwrap();
            store.put(b"a".to_vec(), b"1".to_vec()).unwrap();
            store.checkpoint().unwrap();
            store.put(b"b".to_vec(), b"2".to_vec()).unwrap();
        }
        assert!(fs::metadata(dir.path().join(WAL_FILENAME)).unwrap().len() > 0);

        let store = PersistentKvStore::open(dir.path()).unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_automatic_checkpoint() {
        let dir = tempdir().unwrap();
        {
            let store = PersistentKvStore::open_with(dir.path(), 3).unwrap();
            for i in 0..3u8 {
                store.put(vec![i], vec![i]).unwrap();
            }
        }
        assert_eq!(fs::metadata(dir.path().join(WAL_FILENAME)).unwrap().len(), 0);
        let store = PersistentKvStore::open(dir.path()).unwrap();
        assert_eq!(store.get(&[2]).unwrap(), Some(vec![2]));
    }

    #[test]
    fn test_recovery_after_multiple_writes() {
        let dir = tempdir().unwrap();
        {
            let store = PersistentKvStore::open(dir.path()).unwrap();
            for i in 0..100u32 {
                store
                    .put(format!("key{}", i).into_bytes(), format!("value{}", i).into_bytes())
                    .unwrap();
            }
        }

        let store = PersistentKvStore::open(dir.path()).unwrap();
        for i in 0..100u32 {
            assert_eq!(
                store.get(format!("key{}", i).as_bytes()).unwrap(),
                Some(format!("value{}", i).into_bytes())
            );
        }
        assert_eq!(store.scan_prefix(b"key").unwrap().len(), 100);
    }

    fn op_strategy() -> impl proptest::strategy::Strategy<Value = BatchOp> {
        use proptest::prelude::*;
        let key = proptest::collection::vec(0u8..4, 1..3);
        prop_oneof![
            (key.clone(), proptest::collection::vec(any::<u8>(), 0..8))
                .prop_map(|(key, value)| BatchOp::Put { key, value }),
            key.prop_map(|key| BatchOp::Delete { key }),
        ]
    }

    proptest::proptest! {
        #[test]
        fn prop_reopened_store_matches_model(
            batches in proptest::collection::vec(proptest::collection::vec(op_strategy(), 1..4), 1..12),
            checkpoint_every in 1u64..6,
        ) {
            let dir = tempdir().unwrap();
            let mut model = std::collections::BTreeMap::new();
            {
                let store = PersistentKvStore::open_with(dir.path(), checkpoint_every).unwrap();
                for batch in &batches {
                    for op in batch {
                        match op {
                            BatchOp::Put { key, value } => {
                                model.insert(key.clone(), value.clone());
                            }
                            BatchOp::Delete { key } => {
                                model.remove(key);
                            }
                        }
                    }
                    store.write_batch(batch.clone()).unwrap();
                }
            }
            let store = PersistentKvStore::open(dir.path()).unwrap();
            let stored: Vec<(Vec<u8>, Vec<u8>)> = store.scan_prefix(b"").unwrap();
            let expected: Vec<(Vec<u8>, Vec<u8>)> = model.into_iter().collect();
            proptest::prop_assert_eq!(stored, expected);
        }
    }
}
