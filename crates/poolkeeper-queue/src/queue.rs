//! The durable task queue.
//!
//! Records live in a [`KvStore`] under four prefixes: `p/` for pending and
//! running tasks, `a/` for the archive of finished tasks, `f/` for failed
//! ones, and `x/` for the (share, path) index. Ids are stored big-endian so
//! key order is enqueue order.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use poolkeeper_meta::{BatchOp, KvStore, ShareName, Timestamp};
use poolkeeper_pool::{FollowUpScheduler, PoolError, PoolResult};
use poolkeeper_storage::RelPath;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::options::{FsckOptions, TaskOptions};
use crate::task::{TaskRecord, TaskRequest, TaskStatus};

const ACTIVE_PREFIX: &[u8] = b"p/";
const ARCHIVE_PREFIX: &[u8] = b"a/";
const FAILED_PREFIX: &[u8] = b"f/";
const PATH_INDEX_PREFIX: &[u8] = b"x/";
const NEXT_ID_KEY: &[u8] = b"sys/next_id";

fn id_key(prefix: &[u8], id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 8);
    key.extend_from_slice(prefix);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn path_prefix(share: &ShareName, path: &RelPath) -> Vec<u8> {
    let mut key = Vec::with_capacity(PATH_INDEX_PREFIX.len() + share.as_str().len() + path.as_str().len() + 2);
    key.extend_from_slice(PATH_INDEX_PREFIX);
    key.extend_from_slice(share.as_str().as_bytes());
    key.push(0);
    key.extend_from_slice(path.as_str().as_bytes());
    key.push(0);
    key
}

fn index_key(record: &TaskRecord) -> Option<Vec<u8>> {
    let share = record.share.as_ref()?;
    let mut key = path_prefix(share, &record.path);
    key.extend_from_slice(&record.id.to_be_bytes());
    Some(key)
}

fn decode_id(key: &[u8]) -> Option<u64> {
    let tail: [u8; 8] = key.get(key.len().checked_sub(8)?..)?.try_into().ok()?;
    Some(u64::from_be_bytes(tail))
}

/// Task counts by status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Waiting tasks.
    pub pending: usize,
    /// Claimed tasks.
    pub running: usize,
    /// Finished tasks in the archive.
    pub archived: usize,
    /// Failed tasks.
    pub failed: usize,
}

struct QueueState {
    next_id: u64,
    /// Pending and running tasks by id.
    active: BTreeMap<u64, TaskRecord>,
}

/// Durable FIFO of tasks with path-overlap ordering.
pub struct TaskQueue {
    store: Arc<dyn KvStore>,
    state: Mutex<QueueState>,
    wakeup: Notify,
}

impl TaskQueue {
    /// Opens the queue on `store`. Tasks left running by a previous process
    /// are returned to pending.
    pub fn open(store: Arc<dyn KvStore>) -> QueueResult<Self> {
        let mut active = BTreeMap::new();
        let mut recovered = Vec::new();
        for (_, value) in store.scan_prefix(ACTIVE_PREFIX)? {
            let mut record: TaskRecord = bincode::deserialize(&value)?;
            if record.status == TaskStatus::Running {
                record.status = TaskStatus::Pending;
                record.started_at = None;
                recovered.push(BatchOp::Put {
                    key: id_key(ACTIVE_PREFIX, record.id),
                    value: bincode::serialize(&record)?,
                });
            }
            active.insert(record.id, record);
        }
        if !recovered.is_empty() {
            warn!(tasks = recovered.len(), "interrupted tasks returned to pending");
            store.write_batch(recovered)?;
        }

        let next_id = match store.get(NEXT_ID_KEY)? {
            Some(raw) => bincode::deserialize(&raw)?,
            None => 1,
        };
        info!(pending = active.len(), next_id, "task queue opened");
        Ok(Self {
            store,
            state: Mutex::new(QueueState { next_id, active }),
            wakeup: Notify::new(),
        })
    }

    /// Signalled whenever a task is enqueued or completed.
    pub fn wakeup(&self) -> &Notify {
        &self.wakeup
    }

    /// Validates and durably stores a task. Returns its id.
    pub fn enqueue(&self, request: TaskRequest) -> QueueResult<u64> {
        let options = request.validate()?;
        let record = {
            let mut state = self.state.lock();
            let id = state.next_id;
            let record = TaskRecord::from_request(id, request, &options);
            let mut ops = vec![
                BatchOp::Put {
                    key: id_key(ACTIVE_PREFIX, id),
                    value: bincode::serialize(&record)?,
                },
                BatchOp::Put {
                    key: NEXT_ID_KEY.to_vec(),
                    value: bincode::serialize(&(id + 1))?,
                },
            ];
            if let Some(key) = index_key(&record) {
                ops.push(BatchOp::Put { key, value: Vec::new() });
            }
            self.store.write_batch(ops)?;
            state.next_id = id + 1;
            state.active.insert(id, record.clone());
            record
        };
        debug!(task = %record.describe(), options = %record.options, "task enqueued");
        self.wakeup.notify_one();
        Ok(record.id)
    }

    /// Claims the oldest pending task that overlaps neither a running task
    /// nor an older pending one, and marks it running.
    pub fn claim_next(&self) -> QueueResult<Option<TaskRecord>> {
        let mut state = self.state.lock();
        let running: Vec<&TaskRecord> = state
            .active
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .collect();
        let mut earlier: Vec<&TaskRecord> = Vec::new();
        let mut chosen = None;
        for task in state.active.values().filter(|t| t.status == TaskStatus::Pending) {
            let blocked = running.iter().any(|r| r.overlaps(task)) || earlier.iter().any(|e| e.overlaps(task));
            if !blocked {
                chosen = Some(task.id);
                break;
            }
            earlier.push(task);
        }
        let Some(id) = chosen else {
            return Ok(None);
        };

        let mut record = state.active[&id].clone();
        record.status = TaskStatus::Running;
        record.started_at = Some(Timestamp::now());
        self.store
            .put(id_key(ACTIVE_PREFIX, id), bincode::serialize(&record)?)?;
        state.active.insert(id, record.clone());
        debug!(task = %record.describe(), "task claimed");
        Ok(Some(record))
    }

    /// Finishes a running task. Success archives it with the handler's
    /// summary; failure keeps it among the failed tasks with the error.
    pub fn complete(&self, id: u64, result: Result<String, String>) -> QueueResult<TaskRecord> {
        let record = {
            let mut state = self.state.lock();
            let mut record = match state.active.get(&id) {
                Some(r) if r.status == TaskStatus::Running => r.clone(),
                Some(_) => return Err(QueueError::NotRunning(id)),
                None => return Err(QueueError::TaskNotFound(id)),
            };
            record.completed_at = Some(Timestamp::now());
            let destination = match result {
                Ok(summary) => {
                    // done is transient: the record goes straight to the archive
                    record.status = TaskStatus::Archived;
                    record.result = Some(summary);
                    ARCHIVE_PREFIX
                }
                Err(error) => {
                    record.status = TaskStatus::Failed;
                    record.result = Some(error);
                    FAILED_PREFIX
                }
            };
            let mut ops = vec![
                BatchOp::Delete {
                    key: id_key(ACTIVE_PREFIX, id),
                },
                BatchOp::Put {
                    key: id_key(destination, id),
                    value: bincode::serialize(&record)?,
                },
            ];
            if let Some(key) = index_key(&record) {
                ops.push(BatchOp::Delete { key });
            }
            self.store.write_batch(ops)?;
            state.active.remove(&id);
            record
        };
        match record.status {
            TaskStatus::Failed => warn!(
                task = %record.describe(),
                error = record.result.as_deref().unwrap_or_default(),
                "task failed"
            ),
            _ => info!(
                task = %record.describe(),
                result = record.result.as_deref().unwrap_or_default(),
                "task done"
            ),
        }
        self.wakeup.notify_waiters();
        Ok(record)
    }

    /// The oldest pending task on exactly `share/path`.
    pub fn oldest_pending_for(&self, share: &ShareName, path: &RelPath) -> QueueResult<Option<TaskRecord>> {
        let keys = self.store.scan_prefix(&path_prefix(share, path))?;
        let state = self.state.lock();
        Ok(keys
            .iter()
            .filter_map(|(key, _)| decode_id(key))
            .filter_map(|id| state.active.get(&id))
            .find(|t| t.status == TaskStatus::Pending)
            .cloned())
    }

    /// Looks a task up wherever it is.
    pub fn get(&self, id: u64) -> QueueResult<TaskRecord> {
        if let Some(record) = self.state.lock().active.get(&id) {
            return Ok(record.clone());
        }
        for prefix in [ARCHIVE_PREFIX, FAILED_PREFIX] {
            if let Some(raw) = self.store.get(&id_key(prefix, id))? {
                return Ok(bincode::deserialize(&raw)?);
            }
        }
        Err(QueueError::TaskNotFound(id))
    }

    /// Tasks with `status`, oldest first.
    pub fn list(&self, status: TaskStatus) -> QueueResult<Vec<TaskRecord>> {
        let prefix = match status {
            TaskStatus::Pending | TaskStatus::Running => {
                return Ok(self
                    .state
                    .lock()
                    .active
                    .values()
                    .filter(|t| t.status == status)
                    .cloned()
                    .collect())
            }
            TaskStatus::Done | TaskStatus::Archived => ARCHIVE_PREFIX,
            TaskStatus::Failed => FAILED_PREFIX,
        };
        self.store
            .scan_prefix(prefix)?
            .into_iter()
            .map(|(_, value)| Ok(bincode::deserialize(&value)?))
            .collect()
    }

    /// Counts by status.
    pub fn stats(&self) -> QueueResult<QueueStats> {
        let (pending, running) = {
            let state = self.state.lock();
            let running = state
                .active
                .values()
                .filter(|t| t.status == TaskStatus::Running)
                .count();
            (state.active.len() - running, running)
        };
        Ok(QueueStats {
            pending,
            running,
            archived: self.store.scan_prefix(ARCHIVE_PREFIX)?.len(),
            failed: self.store.scan_prefix(FAILED_PREFIX)?.len(),
        })
    }
}

impl FollowUpScheduler for TaskQueue {
    fn schedule_full_check(&self, reason: &str) -> PoolResult<()> {
        let options = TaskOptions::Fsck(FsckOptions {
            notify: true,
            ..FsckOptions::default()
        });
        let id = self
            .enqueue(TaskRequest::fsck(None, &options))
            .map_err(|e| PoolError::Schedule(e.to_string()))?;
        info!(task = id, %reason, "follow-up fsck scheduled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskKind;
    use poolkeeper_meta::{MemoryKvStore, PersistentKvStore};
    use tempfile::tempdir;

    fn share(name: &str) -> ShareName {
        ShareName::new(name).unwrap()
    }

    fn rel(p: &str) -> RelPath {
        RelPath::new(p).unwrap()
    }

    fn queue() -> TaskQueue {
        TaskQueue::open(Arc::new(MemoryKvStore::new())).unwrap()
    }

    fn create(q: &TaskQueue, path: &str) -> u64 {
        q.enqueue(TaskRequest::new(TaskKind::Create, share("docs"), rel(path)))
            .unwrap()
    }

    #[test]
    fn test_ids_grow_and_claims_are_fifo() {
        let q = queue();
        let a = create(&q, "a");
        let b = create(&q, "b");
        assert!(b > a);
        assert_eq!(q.claim_next().unwrap().unwrap().id, a);
        assert_eq!(q.claim_next().unwrap().unwrap().id, b);
        assert!(q.claim_next().unwrap().is_none());
    }

    #[test]
    fn test_overlapping_task_waits_for_running_one() {
        let q = queue();
        let first = create(&q, "dir/a");
        let second = q
            .enqueue(TaskRequest::new(TaskKind::Delete, share("docs"), rel("dir/a")))
            .unwrap();
        let unrelated = create(&q, "other");

        assert_eq!(q.claim_next().unwrap().unwrap().id, first);
        // the delete must wait; the unrelated task may pass it
        assert_eq!(q.claim_next().unwrap().unwrap().id, unrelated);
        assert!(q.claim_next().unwrap().is_none());

        q.complete(first, Ok("ok".into())).unwrap();
        assert_eq!(q.claim_next().unwrap().unwrap().id, second);
    }

    #[test]
    fn test_pending_overlap_keeps_enqueue_order() {
        let q = queue();
        let blocker = create(&q, "x");
        q.claim_next().unwrap();
        let rmdir = q
            .enqueue(TaskRequest::new(TaskKind::Rmdir, share("docs"), rel("x")))
            .unwrap();
        let child = create(&q, "x/y");
        // rmdir is blocked by the running create; the child is blocked by
        // the older pending rmdir
        assert!(q.claim_next().unwrap().is_none());
        q.complete(blocker, Ok(String::new())).unwrap();
        assert_eq!(q.claim_next().unwrap().unwrap().id, rmdir);
        assert!(q.claim_next().unwrap().is_none());
        q.complete(rmdir, Ok(String::new())).unwrap();
        assert_eq!(q.claim_next().unwrap().unwrap().id, child);
    }

    #[test]
    fn test_complete_archives_or_fails() {
        let q = queue();
        let a = create(&q, "a");
        let b = create(&q, "b");
        q.claim_next().unwrap();
        q.claim_next().unwrap();
        let done = q.complete(a, Ok("2 copies".into())).unwrap();
        assert_eq!(done.status, TaskStatus::Archived);
        let failed = q.complete(b, Err("no drive".into())).unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);

        assert_eq!(q.get(a).unwrap().result.as_deref(), Some("2 copies"));
        assert_eq!(q.get(b).unwrap().result.as_deref(), Some("no drive"));
        let stats = q.stats().unwrap();
        assert_eq!(stats, QueueStats { pending: 0, running: 0, archived: 1, failed: 1 });
        assert!(matches!(q.complete(a, Ok(String::new())), Err(QueueError::TaskNotFound(_))));
    }

    #[test]
    fn test_complete_requires_running() {
        let q = queue();
        let a = create(&q, "a");
        assert!(matches!(q.complete(a, Ok(String::new())), Err(QueueError::NotRunning(_))));
    }

    #[test]
    fn test_unknown_option_rejected_at_enqueue() {
        let q = queue();
        let err = q
            .enqueue(TaskRequest::new(TaskKind::Create, share("docs"), rel("a")).with_options("fast=1"))
            .unwrap_err();
        assert!(matches!(err, QueueError::UnknownOption { .. }));
        assert_eq!(q.stats().unwrap().pending, 0);
    }

    #[test]
    fn test_oldest_pending_for_path() {
        let q = queue();
        let first = create(&q, "a");
        let second = create(&q, "a");
        create(&q, "b");
        assert_eq!(q.oldest_pending_for(&share("docs"), &rel("a")).unwrap().unwrap().id, first);
        q.claim_next().unwrap();
        assert_eq!(q.oldest_pending_for(&share("docs"), &rel("a")).unwrap().unwrap().id, second);
        assert!(q.oldest_pending_for(&share("docs"), &rel("c")).unwrap().is_none());
    }

    #[test]
    fn test_recovery_returns_running_to_pending() {
        let dir = tempdir().unwrap();
        let (a, b) = {
            let q = TaskQueue::open(Arc::new(PersistentKvStore::open(dir.path()).unwrap())).unwrap();
            let a = create(&q, "a");
            let b = create(&q, "b");
            q.claim_next().unwrap();
            (a, b)
        };

        let q = TaskQueue::open(Arc::new(PersistentKvStore::open(dir.path()).unwrap())).unwrap();
        let pending = q.list(TaskStatus::Pending).unwrap();
        assert_eq!(pending.iter().map(|t| t.id).collect::<Vec<_>>(), vec![a, b]);
        assert!(q.list(TaskStatus::Running).unwrap().is_empty());
        let c = create(&q, "c");
        assert!(c > b);
        assert_eq!(q.claim_next().unwrap().unwrap().id, a);
    }

    #[test]
    fn test_follow_up_enqueues_pool_wide_fsck() {
        let q = queue();
        q.schedule_full_check("drive removed").unwrap();
        let task = q.claim_next().unwrap().unwrap();
        assert_eq!(task.kind, TaskKind::Fsck);
        assert!(task.share.is_none());
        let TaskOptions::Fsck(options) = task.options().unwrap() else {
            panic!("expected fsck options");
        };
        assert!(options.notify);
    }

    #[test]
    fn test_removal_blocks_everything() {
        let q = queue();
        let removal = q
            .enqueue(TaskRequest::remove_drive(
                poolkeeper_meta::DriveId::from_mount(std::path::Path::new("/mnt/a")),
                false,
            ))
            .unwrap();
        create(&q, "a");
        assert_eq!(q.claim_next().unwrap().unwrap().id, removal);
        assert!(q.claim_next().unwrap().is_none());
    }
}
