//! Wires the pool together and runs its background loops.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use poolkeeper_fsck::{FsckChecker, FsckModes};
use poolkeeper_meta::{BackupCandidate, KvStore, Metastore, PersistentKvStore};
use poolkeeper_pool::{
    CommandNotifier, CommandRestartHook, Drive, DriveRegistry, DriveRemover, DriveState, FreeSpaceProbe, LogNotifier,
    NoopRestartHook, Notifier, Replicator, RestartHook, StatvfsProbe,
};
use poolkeeper_queue::{
    FsckOptions, Handlers, TaskKind, TaskOptions, TaskQueue, TaskRequest, TaskStatus, WorkerConfig, WorkerPool,
};
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DaemonConfig;
use crate::spool::Spool;
use crate::status::StatusSnapshot;

/// A running pool: registry, metastore, queue and handlers.
pub struct Daemon {
    config: DaemonConfig,
    replicator: Arc<Replicator>,
    meta_store: Arc<PersistentKvStore>,
    queue_store: Arc<PersistentKvStore>,
    queue: Arc<TaskQueue>,
    handlers: Arc<Handlers>,
    notifier: Arc<dyn Notifier>,
    probe: Arc<dyn FreeSpaceProbe>,
    spool: Spool,
}

fn split_command(command: &[String]) -> Option<(PathBuf, Vec<String>)> {
    let (program, args) = command.split_first()?;
    Some((PathBuf::from(program), args.to_vec()))
}

impl Daemon {
    pub fn open(config: DaemonConfig) -> anyhow::Result<Self> {
        let probe = Arc::new(StatvfsProbe::new(config.require_mount_point));
        Self::open_with_probe(config, probe)
    }

    /// Opens the state directory and builds the pool, measuring drives with
    /// `probe`.
    pub fn open_with_probe(config: DaemonConfig, probe: Arc<dyn FreeSpaceProbe>) -> anyhow::Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.state_dir)
            .with_context(|| format!("creating state directory {}", config.state_dir.display()))?;

        let registry = Arc::new(DriveRegistry::new(config.placement, config.min_free_bytes));
        for mount in &config.drives {
            registry.add_drive(Drive::new(mount))?;
        }
        for share in &config.shares {
            registry.add_share(share.clone())?;
        }
        let available = registry.refresh_free_space(probe.as_ref());
        info!(drives = config.drives.len(), available, shares = config.shares.len(), "pool configured");

        let meta_store = Arc::new(PersistentKvStore::open(&config.meta_dir())?);
        let metastore = Arc::new(Metastore::new(meta_store.clone()));
        if meta_store.scan_prefix(b"")?.is_empty() {
            restore_metastore(&metastore, &registry);
        }
        apply_drive_states(&metastore, &registry)?;
        let queue_store = Arc::new(PersistentKvStore::open(&config.queue_dir())?);
        let queue = Arc::new(TaskQueue::open(queue_store.clone())?);

        let notifier: Arc<dyn Notifier> = match config.notify_command.as_deref().and_then(split_command) {
            Some((program, args)) => Arc::new(CommandNotifier::new(program, args)),
            None => Arc::new(LogNotifier),
        };
        let restart: Arc<dyn RestartHook> = match config.restart_command.as_deref().and_then(split_command) {
            Some((program, args)) => Arc::new(CommandRestartHook::new(program, args)),
            None => Arc::new(NoopRestartHook),
        };

        let replicator = Arc::new(Replicator::new(registry, metastore));
        let checker = Arc::new(FsckChecker::new(replicator.clone(), config.fsck));
        let remover = Arc::new(
            DriveRemover::new(replicator.clone(), checker.clone(), queue.clone(), notifier.clone(), restart)
                .with_backup_count(config.backup_metastores),
        );
        let handlers = Arc::new(Handlers::new(replicator.clone(), checker, remover, notifier.clone()));
        let spool = Spool::new(config.spool_dir());

        Ok(Self {
            config,
            replicator,
            meta_store,
            queue_store,
            queue,
            handlers,
            notifier,
            probe,
            spool,
        })
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn registry(&self) -> &Arc<DriveRegistry> {
        self.replicator.registry()
    }

    pub fn metastore(&self) -> &Arc<Metastore> {
        self.replicator.metastore()
    }

    /// Enqueues spooled requests.
    pub fn intake(&self) -> anyhow::Result<usize> {
        self.spool.drain(&self.queue)
    }

    /// Re-probes drives and republishes the status snapshot.
    pub fn refresh(&self) -> anyhow::Result<()> {
        let available = self.registry().refresh_free_space(self.probe.as_ref());
        debug!(available, "drive space refreshed");
        self.write_status()
    }

    pub fn write_status(&self) -> anyhow::Result<()> {
        StatusSnapshot::collect(self.registry(), &self.queue)?.write(&self.config.status_path())
    }

    /// Rewrites the metastore backups on the chosen drives.
    pub fn refresh_backups(&self) -> anyhow::Result<usize> {
        if self.config.backup_metastores == 0 {
            return Ok(0);
        }
        let candidates: Vec<BackupCandidate> = self
            .registry()
            .drives()
            .into_iter()
            .filter(|d| d.accepts_copies())
            .map(|d| BackupCandidate {
                drive: d.id,
                free_bytes: d.free_bytes,
            })
            .collect();
        let chosen = self
            .metastore()
            .choose_backup_metastores(&candidates, self.config.backup_metastores)?;
        let mut written = 0;
        for drive in &chosen {
            match self.metastore().write_backup(&drive.mount()) {
                Ok(records) => {
                    debug!(%drive, records, "metastore backup refreshed");
                    written += 1;
                }
                Err(e) => warn!(%drive, error = %e, "failed to write metastore backup"),
            }
        }
        Ok(written)
    }

    /// Queues a pool-wide pass unless one is already waiting.
    pub fn schedule_fsck(&self) -> anyhow::Result<Option<u64>> {
        let waiting = self
            .queue
            .list(TaskStatus::Pending)?
            .iter()
            .any(|t| t.kind == TaskKind::Fsck && t.share.is_none());
        if waiting {
            debug!("pool-wide fsck already pending");
            return Ok(None);
        }
        let options = TaskOptions::Fsck(FsckOptions {
            modes: FsckModes {
                usage: true,
                ..FsckModes::default()
            },
            subtree: None,
            notify: false,
        });
        let id = self.queue.enqueue(TaskRequest::fsck(None, &options))?;
        info!(task = id, "scheduled fsck queued");
        Ok(Some(id))
    }

    /// Runs workers and maintenance loops until `cancel` fires, then flushes
    /// state.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        let workers = WorkerPool::new(
            self.queue.clone(),
            self.handlers.clone(),
            WorkerConfig {
                workers: self.config.workers,
                ..WorkerConfig::default()
            },
        )
        .with_notifier(self.notifier.clone())
        .start(cancel.child_token());

        let mut intake_tick = ticker(self.config.intake_interval_secs);
        let mut probe_tick = ticker(self.config.probe_interval_secs);
        let mut fsck_tick = match self.config.fsck_interval_secs {
            0 => None,
            secs => {
                let period = Duration::from_secs(secs);
                Some(interval_at(Instant::now() + period, period))
            }
        };
        info!(state_dir = %self.config.state_dir.display(), "poolkeeper daemon running");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = intake_tick.tick() => {
                    let daemon = self.clone();
                    blocking("intake", move || daemon.intake().map(|_| ())).await;
                }
                _ = probe_tick.tick() => {
                    let daemon = self.clone();
                    blocking("refresh", move || daemon.refresh()).await;
                }
                _ = next_tick(&mut fsck_tick) => {
                    let daemon = self.clone();
                    blocking("scheduled fsck", move || {
                        daemon.schedule_fsck()?;
                        daemon.refresh_backups().map(|_| ())
                    })
                    .await;
                }
            }
        }

        info!("shutting down, waiting for running tasks");
        workers.join().await;
        let daemon = self.clone();
        blocking("shutdown", move || daemon.flush()).await;
        info!("poolkeeper daemon stopped");
        Ok(())
    }

    fn flush(&self) -> anyhow::Result<()> {
        self.write_status()?;
        self.meta_store.checkpoint()?;
        self.queue_store.checkpoint()?;
        Ok(())
    }
}

fn restore_metastore(metastore: &Metastore, registry: &DriveRegistry) {
    for drive in registry.drives().into_iter().filter(Drive::is_readable) {
        match metastore.restore_backup(&drive.mount) {
            Ok(records) => {
                info!(drive = %drive.id, records, "metastore restored from backup");
                return;
            }
            Err(e) => debug!(drive = %drive.id, error = %e, "no usable metastore backup"),
        }
    }
    info!("starting with an empty metastore");
}

/// Puts drives that were going or gone before the restart back into that
/// state, so none of them is handed new copies.
fn apply_drive_states(metastore: &Metastore, registry: &DriveRegistry) -> anyhow::Result<()> {
    for (drive, state) in metastore.drive_states::<DriveState>()? {
        if registry.drive(&drive).is_err() {
            debug!(%drive, ?state, "saved state for a drive no longer configured");
            continue;
        }
        registry.restore_state(&drive, state)?;
        match state {
            DriveState::Gone => warn!(%drive, "drive was removed from the pool; drop it from the configuration"),
            DriveState::Going => info!(%drive, "drive removal will resume"),
            DriveState::Active => {}
        }
    }
    Ok(())
}

fn ticker(secs: u64) -> Interval {
    let mut tick = interval(Duration::from_secs(secs.max(1)));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick
}

async fn next_tick(tick: &mut Option<Interval>) {
    match tick {
        Some(tick) => {
            tick.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn blocking<F>(what: &'static str, job: F)
where
    F: FnOnce() -> anyhow::Result<()> + Send + 'static,
{
    match tokio::task::spawn_blocking(job).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(job = what, error = %e, "maintenance job failed"),
        Err(e) => error!(job = what, error = %e, "maintenance job panicked"),
    }
}
