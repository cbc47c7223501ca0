//! Per-file copy metadata ("metastore").
//!
//! Maps `(share, relative path)` to the set of drives that hold a physical
//! copy, together with the reference size and checksum used to validate
//! copies. The on-disk state of the drives is the ground truth; this store is
//! a durable cache of it that the consistency checker reconciles.
//!
//! Key layout in the underlying [`KvStore`]:
//! - `f/<share>\0<path>` → bincode [`CopyRecord`]
//! - `d/<drive>\0<share>\0<path>` → empty (reverse index for drive scans)
//! - `l/<drive>` → bincode drive lifecycle state, typed by the pool
//! - `s/backups` → bincode `Vec<DriveId>`

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use poolkeeper_storage::{Checksum, RelPath};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::kvstore::{BatchOp, KvStore};
use crate::types::{DriveId, MetaError, MetaResult, ShareName, Timestamp};

/// File name of the metastore snapshot kept on backup drives.
pub const BACKUP_FILENAME: &str = ".poolkeeper_metastore";

const FILE_PREFIX: &[u8] = b"f/";
const DRIVE_PREFIX: &[u8] = b"d/";
const LIFECYCLE_PREFIX: &[u8] = b"l/";
const BACKUPS_KEY: &[u8] = b"s/backups";

/// What the metastore knows about one logical file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyRecord {
    /// Drives holding a copy.
    pub drives: BTreeSet<DriveId>,
    /// Reference size in bytes.
    pub size: u64,
    /// Reference checksum, when one has been computed.
    pub checksum: Option<Checksum>,
    /// Last mutation time.
    pub updated_at: Timestamp,
}

impl CopyRecord {
    fn empty() -> Self {
        Self {
            drives: BTreeSet::new(),
            size: 0,
            checksum: None,
            updated_at: Timestamp::now(),
        }
    }
}

/// A drive eligible to hold a metastore backup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupCandidate {
    /// The drive.
    pub drive: DriveId,
    /// Free bytes reported by the last probe.
    pub free_bytes: u64,
}

#[derive(Serialize, Deserialize)]
struct BackupSnapshot {
    taken_at: Timestamp,
    entries: Vec<(ShareName, RelPath, CopyRecord)>,
    lifecycle: Vec<(Vec<u8>, Vec<u8>)>,
}

fn file_key(share: &ShareName, path: &RelPath) -> Vec<u8> {
    let mut key = Vec::with_capacity(FILE_PREFIX.len() + share.as_str().len() + 1 + path.as_str().len());
    key.extend_from_slice(FILE_PREFIX);
    key.extend_from_slice(share.as_str().as_bytes());
    key.push(0);
    key.extend_from_slice(path.as_str().as_bytes());
    key
}

fn share_prefix(share: &ShareName) -> Vec<u8> {
    let mut key = FILE_PREFIX.to_vec();
    key.extend_from_slice(share.as_str().as_bytes());
    key.push(0);
    key
}

fn drive_key(drive: &DriveId, share: &ShareName, path: &RelPath) -> Vec<u8> {
    let mut key = drive_prefix(drive);
    key.extend_from_slice(share.as_str().as_bytes());
    key.push(0);
    key.extend_from_slice(path.as_str().as_bytes());
    key
}

fn drive_prefix(drive: &DriveId) -> Vec<u8> {
    let mut key = DRIVE_PREFIX.to_vec();
    key.extend_from_slice(drive.as_str().as_bytes());
    key.push(0);
    key
}

fn lifecycle_key(drive: &DriveId) -> Vec<u8> {
    let mut key = LIFECYCLE_PREFIX.to_vec();
    key.extend_from_slice(drive.as_str().as_bytes());
    key
}

fn split_share_path(rest: &[u8]) -> MetaResult<(ShareName, RelPath)> {
    let raw = String::from_utf8_lossy(rest);
    let (share, path) = raw
        .split_once('\0')
        .ok_or_else(|| MetaError::CorruptKey(raw.to_string()))?;
    Ok((ShareName::new(share)?, RelPath::new(path)?))
}

/// Durable map of logical files to the drives holding their copies.
pub struct Metastore {
    store: Arc<dyn KvStore>,
    // Serializes read-modify-write cycles on records.
    write_lock: Mutex<()>,
}

impl Metastore {
    /// Wraps a key-value store.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// The full record for a file, if any.
    pub fn entry(&self, share: &ShareName, path: &RelPath) -> MetaResult<Option<CopyRecord>> {
        match self.store.get(&file_key(share, path))? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    /// Drives recorded as holding a copy. Unrecorded files yield an empty set.
    pub fn copies_of(&self, share: &ShareName, path: &RelPath) -> MetaResult<BTreeSet<DriveId>> {
        Ok(self
            .entry(share, path)?
            .map(|r| r.drives)
            .unwrap_or_default())
    }

    /// Records that `drive` holds a copy. `size`/`checksum` update the
    /// reference when given.
    pub fn record_copy(
        &self,
        share: &ShareName,
        path: &RelPath,
        drive: &DriveId,
        size: Option<u64>,
        checksum: Option<Checksum>,
    ) -> MetaResult<()> {
        let _guard = self.write_lock.lock();
        let mut record = self.entry(share, path)?.unwrap_or_else(CopyRecord::empty);
        record.drives.insert(drive.clone());
        if let Some(size) = size {
            record.size = size;
        }
        if checksum.is_some() {
            record.checksum = checksum;
        }
        record.updated_at = Timestamp::now();
        self.store.write_batch(vec![
            BatchOp::Put {
                key: file_key(share, path),
                value: bincode::serialize(&record)?,
            },
            BatchOp::Put {
                key: drive_key(drive, share, path),
                value: Vec::new(),
            },
        ])?;
        debug!(%share, %path, %drive, copies = record.drives.len(), "copy recorded");
        Ok(())
    }

    /// Replaces the reference size and checksum without touching the drive set.
    pub fn set_reference(&self, share: &ShareName, path: &RelPath, size: u64, checksum: Checksum) -> MetaResult<()> {
        let _guard = self.write_lock.lock();
        let mut record = self.entry(share, path)?.unwrap_or_else(CopyRecord::empty);
        record.size = size;
        record.checksum = Some(checksum);
        record.updated_at = Timestamp::now();
        self.store
            .put(file_key(share, path), bincode::serialize(&record)?)
    }

    /// Drops `drive` from the record. Returns false when it was not recorded.
    /// A record left without drives is deleted.
    pub fn remove_copy(&self, share: &ShareName, path: &RelPath, drive: &DriveId) -> MetaResult<bool> {
        let _guard = self.write_lock.lock();
        let Some(mut record) = self.entry(share, path)? else {
            return Ok(false);
        };
        if !record.drives.remove(drive) {
            return Ok(false);
        }
        let mut ops = vec![BatchOp::Delete {
            key: drive_key(drive, share, path),
        }];
        if record.drives.is_empty() {
            ops.push(BatchOp::Delete {
                key: file_key(share, path),
            });
        } else {
            record.updated_at = Timestamp::now();
            ops.push(BatchOp::Put {
                key: file_key(share, path),
                value: bincode::serialize(&record)?,
            });
        }
        self.store.write_batch(ops)?;
        debug!(%share, %path, %drive, "copy removed");
        Ok(true)
    }

    /// Deletes the record for a file entirely.
    pub fn remove_entry(&self, share: &ShareName, path: &RelPath) -> MetaResult<Option<CopyRecord>> {
        let _guard = self.write_lock.lock();
        let Some(record) = self.entry(share, path)? else {
            return Ok(None);
        };
        let mut ops: Vec<BatchOp> = record
            .drives
            .iter()
            .map(|d| BatchOp::Delete {
                key: drive_key(d, share, path),
            })
            .collect();
        ops.push(BatchOp::Delete {
            key: file_key(share, path),
        });
        self.store.write_batch(ops)?;
        Ok(Some(record))
    }

    /// Records at `prefix` and below it, in path order.
    pub fn entries_under(&self, share: &ShareName, prefix: &RelPath) -> MetaResult<Vec<(RelPath, CopyRecord)>> {
        let base = share_prefix(share);
        let mut out = Vec::new();
        if !prefix.is_root() {
            if let Some(record) = self.entry(share, prefix)? {
                out.push((prefix.clone(), record));
            }
        }
        let mut scan = base.clone();
        if !prefix.is_root() {
            scan.extend_from_slice(prefix.as_str().as_bytes());
            scan.push(b'/');
        }
        for (key, value) in self.store.scan_prefix(&scan)? {
            let (_, path) = split_share_path(&key[FILE_PREFIX.len()..])?;
            out.push((path, bincode::deserialize(&value)?));
        }
        Ok(out)
    }

    /// Moves the record at `from` (and every record below it) to `to`,
    /// possibly in another share. Returns the number of records moved.
    pub fn rename_entry(
        &self,
        share: &ShareName,
        from: &RelPath,
        to_share: &ShareName,
        to: &RelPath,
    ) -> MetaResult<usize> {
        let moved = self.entries_under(share, from)?;
        if moved.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_lock.lock();
        let mut ops = Vec::with_capacity(moved.len() * 4);
        for (path, record) in &moved {
            let Some(new_path) = path.rebase(from, to) else {
                continue;
            };
            ops.push(BatchOp::Delete {
                key: file_key(share, path),
            });
            for drive in &record.drives {
                ops.push(BatchOp::Delete {
                    key: drive_key(drive, share, path),
                });
            }
            ops.push(BatchOp::Put {
                key: file_key(to_share, &new_path),
                value: bincode::serialize(record)?,
            });
            for drive in &record.drives {
                ops.push(BatchOp::Put {
                    key: drive_key(drive, to_share, &new_path),
                    value: Vec::new(),
                });
            }
        }
        self.store.write_batch(ops)?;
        info!(%share, %from, %to_share, %to, records = moved.len(), "metastore entries renamed");
        Ok(moved.len())
    }

    /// Every `(share, path)` recorded on `drive`.
    pub fn entries_on_drive(&self, drive: &DriveId) -> MetaResult<Vec<(ShareName, RelPath)>> {
        let prefix = drive_prefix(drive);
        self.store
            .scan_prefix(&prefix)?
            .into_iter()
            .map(|(key, _)| split_share_path(&key[prefix.len()..]))
            .collect()
    }

    /// Removes `drive` from every record. Returns the number of records touched.
    pub fn forget_drive(&self, drive: &DriveId) -> MetaResult<usize> {
        let entries = self.entries_on_drive(drive)?;
        let mut touched = 0;
        for (share, path) in &entries {
            if self.remove_copy(share, path, drive)? {
                touched += 1;
            }
        }
        info!(%drive, records = touched, "drive forgotten by metastore");
        Ok(touched)
    }

    /// Persists the lifecycle state of `drive`, replacing the previous one.
    pub fn save_drive_state<T: Serialize>(&self, drive: &DriveId, state: &T) -> MetaResult<()> {
        self.store.put(lifecycle_key(drive), bincode::serialize(state)?)?;
        debug!(%drive, "drive state saved");
        Ok(())
    }

    /// Every persisted drive lifecycle state.
    pub fn drive_states<T: DeserializeOwned>(&self) -> MetaResult<Vec<(DriveId, T)>> {
        self.store
            .scan_prefix(LIFECYCLE_PREFIX)?
            .into_iter()
            .map(|(key, value)| {
                let id = String::from_utf8_lossy(&key[LIFECYCLE_PREFIX.len()..]).into_owned();
                Ok((DriveId::from_mount(Path::new(&id)), bincode::deserialize(&value)?))
            })
            .collect()
    }

    /// Picks which drives keep a backup of the metastore.
    ///
    /// Previous choices that are still candidates are kept so backups do not
    /// churn; remaining slots go to the candidates with the most free space
    /// (ties by drive id). The choice is persisted.
    pub fn choose_backup_metastores(&self, candidates: &[BackupCandidate], count: usize) -> MetaResult<Vec<DriveId>> {
        let previous = self.backup_drives()?;
        let mut chosen: Vec<DriveId> = previous
            .into_iter()
            .filter(|d| candidates.iter().any(|c| &c.drive == d))
            .take(count)
            .collect();

        let mut rest: Vec<&BackupCandidate> = candidates
            .iter()
            .filter(|c| !chosen.contains(&c.drive))
            .collect();
        rest.sort_by(|a, b| b.free_bytes.cmp(&a.free_bytes).then_with(|| a.drive.cmp(&b.drive)));
        for candidate in rest {
            if chosen.len() >= count {
                break;
            }
            chosen.push(candidate.drive.clone());
        }

        self.store
            .put(BACKUPS_KEY.to_vec(), bincode::serialize(&chosen)?)?;
        info!(backups = ?chosen, "backup metastores chosen");
        Ok(chosen)
    }

    /// The persisted backup choice.
    pub fn backup_drives(&self) -> MetaResult<Vec<DriveId>> {
        match self.store.get(BACKUPS_KEY)? {
            Some(raw) => Ok(bincode::deserialize(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn all_entries(&self) -> MetaResult<Vec<(ShareName, RelPath, CopyRecord)>> {
        self.store
            .scan_prefix(FILE_PREFIX)?
            .into_iter()
            .map(|(key, value)| {
                let (share, path) = split_share_path(&key[FILE_PREFIX.len()..])?;
                Ok((share, path, bincode::deserialize(&value)?))
            })
            .collect()
    }

    /// Writes a snapshot of every record to `drive_root`. Returns the
    /// number of records written.
    pub fn write_backup(&self, drive_root: &Path) -> MetaResult<usize> {
        let entries = self.all_entries()?;
        let count = entries.len();
        let encoded = bincode::serialize(&BackupSnapshot {
            taken_at: Timestamp::now(),
            entries,
            lifecycle: self.store.scan_prefix(LIFECYCLE_PREFIX)?,
        })?;
        let path = drive_root.join(BACKUP_FILENAME);
        let tmp = drive_root.join(format!("{}.tmp", BACKUP_FILENAME));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&encoded)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        debug!(drive = %drive_root.display(), records = count, "metastore backup written");
        Ok(count)
    }

    /// Loads a snapshot from `drive_root` into this store, merging drive
    /// sets with existing records. Returns the number of records merged.
    pub fn restore_backup(&self, drive_root: &Path) -> MetaResult<usize> {
        let raw = fs::read(drive_root.join(BACKUP_FILENAME))?;
        let snapshot: BackupSnapshot = bincode::deserialize(&raw)?;
        let count = snapshot.entries.len();
        for (key, value) in snapshot.lifecycle {
            self.store.put(key, value)?;
        }
        for (share, path, record) in snapshot.entries {
            for drive in &record.drives {
                self.record_copy(&share, &path, drive, Some(record.size), record.checksum)?;
            }
        }
        if count == 0 {
            warn!(drive = %drive_root.display(), "metastore backup is empty");
        }
        Ok(count)
    }
}
