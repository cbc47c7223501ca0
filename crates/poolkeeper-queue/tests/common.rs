//! A small pool on temporary directories, wired the way the daemon wires it.

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use poolkeeper_fsck::{FsckChecker, FsckPolicies};
use poolkeeper_meta::{DriveId, MemoryKvStore, Metastore, ShareName};
use poolkeeper_pool::{
    CopyCount, Drive, DriveRegistry, DriveRemover, NoopRestartHook, Notification, Notifier, PlacementPolicy,
    PoolResult, Replicator, ShareConfig,
};
use poolkeeper_queue::{Handlers, TaskExecutor, TaskQueue, TaskRecord, TaskRequest};
use poolkeeper_storage::RelPath;
use tempfile::{tempdir, TempDir};
use tokio_util::sync::CancellationToken;

/// Keeps every notification.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) -> PoolResult<()> {
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}

pub struct TestPool {
    pub dir: TempDir,
    pub mounts: Vec<PathBuf>,
    pub replicator: Arc<Replicator>,
    pub queue: Arc<TaskQueue>,
    pub handlers: Arc<Handlers>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestPool {
    /// `drives` drives named hdd0.., with hdd0 the emptiest.
    pub fn new(drives: usize) -> Self {
        let dir = tempdir().unwrap();
        let registry = Arc::new(DriveRegistry::new(PlacementPolicy::MostFree, 0));
        let mut mounts = Vec::new();
        for i in 0..drives {
            let mount = dir.path().join(format!("hdd{}", i));
            fs::create_dir_all(&mount).unwrap();
            let mut drive = Drive::new(&mount);
            drive.total_bytes = 10_000_000;
            drive.free_bytes = 10_000_000 - i as u64 * 1_000;
            registry.add_drive(drive).unwrap();
            mounts.push(mount);
        }

        let metastore = Arc::new(Metastore::new(Arc::new(MemoryKvStore::new())));
        let replicator = Arc::new(Replicator::new(registry, metastore));
        let queue = Arc::new(TaskQueue::open(Arc::new(MemoryKvStore::new())).unwrap());
        let checker = Arc::new(FsckChecker::new(replicator.clone(), FsckPolicies::default()));
        let notifier = Arc::new(RecordingNotifier::default());
        let remover = Arc::new(DriveRemover::new(
            replicator.clone(),
            checker.clone(),
            queue.clone(),
            notifier.clone(),
            Arc::new(NoopRestartHook),
        ));
        let handlers = Arc::new(Handlers::new(replicator.clone(), checker, remover, notifier.clone()));
        Self {
            dir,
            mounts,
            replicator,
            queue,
            handlers,
            notifier,
        }
    }

    pub fn add_share(&self, name: &str, copies: CopyCount) -> ShareName {
        let share = ShareName::new(name).unwrap();
        let landing = self.landing(name);
        fs::create_dir_all(&landing).unwrap();
        self.replicator
            .registry()
            .add_share(ShareConfig {
                name: share.clone(),
                landing_zone: landing,
                copies,
                drives: None,
            })
            .unwrap();
        share
    }

    pub fn landing(&self, share: &str) -> PathBuf {
        self.dir.path().join("landing").join(share)
    }

    pub fn copy(&self, drive: usize, share: &str, rel: &str) -> PathBuf {
        self.mounts[drive].join(share).join(rel)
    }

    pub fn id(&self, drive: usize) -> DriveId {
        DriveId::from_mount(&self.mounts[drive])
    }

    /// Drives holding a copy of `share/rel`.
    pub fn holders(&self, share: &str, rel: &str) -> Vec<usize> {
        (0..self.mounts.len())
            .filter(|i| self.copy(*i, share, rel).is_file())
            .collect()
    }

    /// Writes a file into the landing zone, as a client would.
    pub fn write(&self, share: &str, rel: &str, data: &[u8]) {
        let path = self.landing(share).join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    pub fn enqueue(&self, request: TaskRequest) -> u64 {
        self.queue.enqueue(request).unwrap()
    }

    /// Drains the queue on the calling thread, one task at a time.
    pub fn run_all(&self) -> Vec<TaskRecord> {
        let cancel = CancellationToken::new();
        let mut done = Vec::new();
        while let Some(task) = self.queue.claim_next().unwrap() {
            let result = self
                .handlers
                .execute(&task, &cancel)
                .map_err(|e| e.to_string());
            done.push(self.queue.complete(task.id, result).unwrap());
        }
        done
    }
}

pub fn rel(path: &str) -> RelPath {
    RelPath::new(path).unwrap()
}
