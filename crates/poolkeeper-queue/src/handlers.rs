//! What each task kind does to the pool.
//!
//! Handlers are idempotent against the current state of the landing zone:
//! a task whose triggering change has since been undone or overtaken
//! finishes as "superseded" without touching any drive.

use std::fs;
use std::io::ErrorKind;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;

use poolkeeper_fsck::{FsckChecker, FsckRequest, LandingEntry};
use poolkeeper_meta::{DriveId, Metastore, ShareName};
use poolkeeper_pool::{
    notify_best_effort, ConsistencyScope, Drive, DriveRegistry, DriveRemover, Notifier, Replicator, ShareConfig,
};
use poolkeeper_storage::{
    copy_attributes, point_symlink, EntryKind, RelPath, StorageError, TreeWalker, WalkEvent,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::options::TaskOptions;
use crate::task::{TaskKind, TaskRecord};
use crate::worker::TaskExecutor;

const SUPERSEDED: &str = "superseded";

/// Runs tasks against the pool.
pub struct Handlers {
    replicator: Arc<Replicator>,
    checker: Arc<FsckChecker>,
    remover: Arc<DriveRemover>,
    notifier: Arc<dyn Notifier>,
    walker: TreeWalker,
}

impl Handlers {
    /// Creates the handler set.
    pub fn new(
        replicator: Arc<Replicator>,
        checker: Arc<FsckChecker>,
        remover: Arc<DriveRemover>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            replicator,
            checker,
            remover,
            notifier,
            walker: TreeWalker::default(),
        }
    }

    fn registry(&self) -> &DriveRegistry {
        self.replicator.registry()
    }

    fn metastore(&self) -> &Metastore {
        self.replicator.metastore()
    }

    fn readable_drives(&self) -> Vec<Drive> {
        self.registry().drives().into_iter().filter(Drive::is_readable).collect()
    }

    fn create(&self, share: &ShareName, path: &RelPath) -> QueueResult<String> {
        let config = self.registry().share(share)?;
        let landing = config.landing_path(path);
        let needed = self.registry().required_copies(share)?;

        match LandingEntry::inspect(&landing)? {
            LandingEntry::Missing => Ok(format!("{}: {} is gone", SUPERSEDED, path)),
            LandingEntry::Directory => Ok("directory, nothing to copy".to_string()),
            LandingEntry::Regular => self.distribute(&config, path, &landing, None, needed),
            entry @ LandingEntry::Link(_) => {
                let canonical = entry
                    .target()
                    .and_then(|target| self.registry().drive_for_path(target).map(|d| (d, target)))
                    .filter(|(drive, target)| drive.copy_path(share, path) == *target && drive.is_readable());
                match canonical {
                    // rewritten in place through the link
                    Some((drive, target)) => self.distribute(&config, path, target, Some(&drive.id), needed),
                    None => {
                        let summary = self.checker.check_subtree(share, path)?;
                        Ok(format!(
                            "link did not reach a copy; checked {} files, {} copies created",
                            summary.files_checked, summary.copies_created
                        ))
                    }
                }
            }
        }
    }

    fn distribute(
        &self,
        config: &ShareConfig,
        path: &RelPath,
        source: &Path,
        source_drive: Option<&DriveId>,
        needed: usize,
    ) -> QueueResult<String> {
        let outcome = self
            .replicator
            .distribute(config, path, source, source_drive, needed)?;
        if outcome.source_mismatch {
            return Ok(format!("{}: {} changed while it was copied", SUPERSEDED, path));
        }
        if outcome.copies.is_empty() {
            let reasons: Vec<String> = outcome
                .failed
                .iter()
                .map(|(drive, error)| format!("{}: {}", drive, error))
                .collect();
            return Err(QueueError::Handler(format!(
                "no copy of {}/{} could be made ({})",
                config.name,
                path,
                if reasons.is_empty() { "no eligible drive".to_string() } else { reasons.join("; ") }
            )));
        }
        if outcome.copies.len() < needed {
            warn!(
                share = %config.name,
                %path,
                copies = outcome.copies.len(),
                needed,
                "file is under-replicated"
            );
        }
        Ok(format!(
            "{} of {} copies, {} stale removed",
            outcome.copies.len(),
            needed,
            outcome.stale_removed
        ))
    }

    fn delete(&self, share: &ShareName, path: &RelPath) -> QueueResult<String> {
        let config = self.registry().share(share)?;
        if !matches!(LandingEntry::inspect(&config.landing_path(path))?, LandingEntry::Missing) {
            return Ok(format!("{}: {} exists again", SUPERSEDED, path));
        }

        let drives = self.readable_drives();
        let mut removed = 0usize;
        let mut entries: Vec<RelPath> = self
            .metastore()
            .entries_under(share, path)?
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        if !entries.contains(path) {
            // unrecorded copies at the exact path still go
            entries.push(path.clone());
        }
        for entry in &entries {
            for drive in &drives {
                let copy = drive.copy_path(share, entry);
                match fs::remove_file(&copy) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(_) if copy.is_dir() => {
                        debug!(path = %copy.display(), "left directory for rmdir");
                    }
                    Err(e) => return Err(StorageError::at(&copy, e).into()),
                }
            }
            self.metastore().remove_entry(share, entry)?;
        }
        info!(%share, %path, removed, "copies deleted");
        Ok(format!("{} copies removed", removed))
    }

    fn relocate(&self, share: &ShareName, path: &RelPath, to_share: &ShareName, to: &RelPath) -> QueueResult<String> {
        let from_config = self.registry().share(share)?;
        let to_config = self.registry().share(to_share)?;

        let mut moved = 0usize;
        for drive in self.readable_drives() {
            let from = drive.copy_path(share, path);
            if fs::symlink_metadata(&from).is_err() {
                continue;
            }
            let dest = drive.copy_path(to_share, to);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| StorageError::at(parent, e))?;
            }
            fs::rename(&from, &dest).map_err(|e| StorageError::at(&from, e))?;
            moved += 1;
        }
        let records = self.metastore().rename_entry(share, path, to_share, to)?;
        let relinked = self.repoint_links(&from_config, path, &to_config, to)?;
        let summary = self.checker.check_subtree(to_share, to)?;
        info!(%share, %path, %to_share, %to, moved, records, relinked, "copies relocated");
        Ok(format!(
            "{} copies moved, {} records moved, {} links repointed, {} copies created",
            moved, records, relinked, summary.copies_created
        ))
    }

    /// Points every landing link under `to` that still targets a copy under
    /// `from` at the relocated copy.
    fn repoint_links(
        &self,
        from_config: &ShareConfig,
        from: &RelPath,
        to_config: &ShareConfig,
        to: &RelPath,
    ) -> QueueResult<usize> {
        let drives = self.registry().drives();
        let mut links = Vec::new();
        self.walker.walk(&to_config.landing_zone, to, |event| {
            if let WalkEvent::Entry(entry) = event {
                if entry.kind == EntryKind::Symlink {
                    links.push(entry);
                }
            }
            ControlFlow::Continue(())
        });

        let mut repointed = 0;
        for link in links {
            let Ok(target) = fs::read_link(&link.path) else {
                continue;
            };
            let relocated = drives.iter().find_map(|drive| {
                let old = RelPath::from_base(&drive.share_root(&from_config.name), &target).ok()?;
                let new = old.rebase(from, to)?;
                Some(drive.copy_path(&to_config.name, &new))
            });
            if let Some(new_target) = relocated {
                point_symlink(&link.path, &new_target)?;
                repointed += 1;
            }
        }
        Ok(repointed)
    }

    fn attribute_change(&self, share: &ShareName, path: &RelPath) -> QueueResult<String> {
        let config = self.registry().share(share)?;
        let landing = config.landing_path(path);
        let drives = self.readable_drives();
        let holders: Vec<std::path::PathBuf> = drives
            .iter()
            .map(|d| d.copy_path(share, path))
            .filter(|p| fs::symlink_metadata(p).is_ok())
            .collect();

        let source = match LandingEntry::inspect(&landing)? {
            LandingEntry::Missing => return Ok(format!("{}: {} is gone", SUPERSEDED, path)),
            LandingEntry::Directory | LandingEntry::Regular => landing,
            entry @ LandingEntry::Link(_) => match entry.target() {
                Some(target) => target.to_path_buf(),
                None => match holders.first() {
                    Some(first) => first.clone(),
                    None => return Err(QueueError::Handler(format!("no copy of {}/{} to read attributes from", share, path))),
                },
            },
        };

        let mut updated = 0;
        for holder in holders.iter().filter(|h| h.as_path() != source.as_path()) {
            if copy_attributes(&source, holder)? {
                updated += 1;
            }
        }
        debug!(%share, %path, updated, "attributes propagated");
        Ok(format!("attributes updated on {} copies", updated))
    }

    fn rmdir(&self, share: &ShareName, path: &RelPath) -> QueueResult<String> {
        let config = self.registry().share(share)?;
        if !matches!(LandingEntry::inspect(&config.landing_path(path))?, LandingEntry::Missing) {
            return Ok(format!("{}: {} exists again", SUPERSEDED, path));
        }
        let mut removed = 0;
        let mut kept = 0;
        for drive in self.readable_drives() {
            let dir = drive.copy_path(share, path);
            let mut listing = match fs::read_dir(&dir) {
                Ok(listing) => listing,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::at(&dir, e).into()),
            };
            if listing.next().is_some() {
                warn!(drive = %drive.id, path = %dir.display(), "directory not empty, left in place");
                kept += 1;
                continue;
            }
            fs::remove_dir(&dir).map_err(|e| StorageError::at(&dir, e))?;
            removed += 1;
        }
        Ok(format!("{} directories removed, {} not empty", removed, kept))
    }

    fn remove_drive(&self, drive: &DriveId, gone: bool) -> QueueResult<String> {
        let outcome = self.remover.remove_drive(drive, !gone)?;
        Ok(format!(
            "{} files checked, {} relocated, {} failed",
            outcome.files_checked, outcome.relocated, outcome.failed
        ))
    }

    fn fsck(&self, task: &TaskRecord, options: TaskOptions, cancel: &CancellationToken) -> QueueResult<String> {
        let TaskOptions::Fsck(options) = options else {
            return Err(QueueError::InvalidRequest("fsck task without fsck options".to_string()));
        };
        let request = FsckRequest {
            share: task.share.clone(),
            subtree: options.subtree.clone(),
            modes: options.modes,
        };
        let report = self.checker.run(&request, cancel)?;
        if report.cancelled {
            return Err(QueueError::Interrupted);
        }
        if options.notify || !report.is_clean() {
            let scope = match (&task.share, &options.subtree) {
                (Some(share), Some(subtree)) => format!("{}/{}", share, subtree),
                (Some(share), None) => share.to_string(),
                (None, _) => "all shares".to_string(),
            };
            notify_best_effort(self.notifier.as_ref(), &report.to_notification(&scope));
        }
        Ok(format!(
            "{} files checked, {} problems",
            report.stats.files_checked,
            report.problem_count()
        ))
    }
}

fn require_share(task: &TaskRecord) -> QueueResult<&ShareName> {
    task.share
        .as_ref()
        .ok_or_else(|| QueueError::InvalidRequest(format!("{} task without a share", task.kind)))
}

impl TaskExecutor for Handlers {
    fn execute(&self, task: &TaskRecord, cancel: &CancellationToken) -> QueueResult<String> {
        let options = task.options()?;
        match task.kind {
            TaskKind::Create => self.create(require_share(task)?, &task.path),
            TaskKind::Delete => self.delete(require_share(task)?, &task.path),
            TaskKind::Rename | TaskKind::Move => {
                let (to_share, to) = task
                    .target
                    .as_ref()
                    .ok_or_else(|| QueueError::InvalidRequest(format!("{} task without a target", task.kind)))?;
                self.relocate(require_share(task)?, &task.path, to_share, to)
            }
            TaskKind::AttributeChange => self.attribute_change(require_share(task)?, &task.path),
            TaskKind::Rmdir => self.rmdir(require_share(task)?, &task.path),
            TaskKind::RemoveDrive => {
                let drive = task
                    .drive
                    .as_ref()
                    .ok_or_else(|| QueueError::InvalidRequest("remove-drive task without a drive".to_string()))?;
                let gone = matches!(options, TaskOptions::RemoveDrive { gone: true });
                self.remove_drive(drive, gone)
            }
            TaskKind::Fsck => self.fsck(task, options, cancel),
        }
    }
}
