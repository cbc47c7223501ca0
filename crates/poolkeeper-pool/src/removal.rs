//! Drive removal.
//!
//! Removing a drive is a one-way walk through its lifecycle:
//!
//! 1. mark it `going` and wait for copies already aimed at it to land;
//! 2. for a graceful removal, make sure every file it holds has a valid copy
//!    elsewhere (shares with one copy go through a scoped consistency check,
//!    shares with more first get their landing symlinks moved off the drive);
//! 3. detach it from the share configuration and run the restart hook;
//! 4. mark it `gone` and purge it from the metastore;
//!
//! `going` and `gone` are saved in the metastore as they happen, so a
//! restarted daemon never hands a departing drive new copies.
//! 5. schedule a full consistency pass;
//! 6. tell the operator how it went.

use std::collections::BTreeSet;
use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use poolkeeper_meta::{BackupCandidate, DriveId, ShareName};
use poolkeeper_storage::{
    file_checksum, point_symlink, resolve_chain, Checksum, EntryKind, RelPath, SymlinkStatus, TreeWalker, WalkEvent,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::drive::{Drive, DriveState};
use crate::error::{PoolError, PoolResult};
use crate::notify::{notify_best_effort, Notification, Notifier};
use crate::replicate::Replicator;
use crate::restart::RestartHook;
use crate::sentinel::{clear_session, write_session};
use crate::share::{CopyCount, ShareConfig};

/// Counters from a scoped consistency operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeSummary {
    /// Files examined.
    pub files_checked: u64,
    /// New copies made.
    pub copies_created: u64,
    /// Copies found not to match their reference checksum.
    pub checksum_mismatches: u64,
    /// Landing symlinks repointed.
    pub symlinks_repaired: u64,
    /// Problems recorded.
    pub problems: u64,
}

impl std::ops::AddAssign for ScopeSummary {
    fn add_assign(&mut self, other: Self) {
        self.files_checked += other.files_checked;
        self.copies_created += other.copies_created;
        self.checksum_mismatches += other.checksum_mismatches;
        self.symlinks_repaired += other.symlinks_repaired;
        self.problems += other.problems;
    }
}

/// The part of the consistency checker drive removal relies on.
pub trait ConsistencyScope: Send + Sync {
    /// Checks and repairs one file or directory subtree of `share`.
    fn check_subtree(&self, share: &ShareName, path: &RelPath) -> PoolResult<ScopeSummary>;

    /// Repoints every landing symlink of `share` that does not resolve to a
    /// valid copy.
    fn repair_symlinks(&self, share: &ShareName) -> PoolResult<ScopeSummary>;
}

/// Queues work to run after a removal finishes.
pub trait FollowUpScheduler: Send + Sync {
    /// Schedules a consistency pass over every share.
    fn schedule_full_check(&self, reason: &str) -> PoolResult<()>;
}

/// What a removal did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalOutcome {
    /// The removed drive.
    pub drive: DriveId,
    /// Whether files were relocated before the drive went away.
    pub graceful: bool,
    /// Session id written to the drive during a graceful removal.
    pub session: Option<Uuid>,
    /// Files found on the drive.
    pub files_checked: u64,
    /// Files that needed, and got, a new copy elsewhere.
    pub relocated: u64,
    /// Files left without a valid copy elsewhere.
    pub failed: u64,
    /// Copies that did not match their reference checksum.
    pub checksum_mismatches: u64,
    /// Shares with no directory on the drive.
    pub shares_skipped: Vec<ShareName>,
    /// Entries left behind because their name is not valid UTF-8. Each
    /// also counts as failed.
    pub unsupported: Vec<PathBuf>,
    /// Whether the follow-up pass was queued.
    pub follow_up_scheduled: bool,
}

impl RemovalOutcome {
    fn new(drive: DriveId, graceful: bool) -> Self {
        Self {
            drive,
            graceful,
            session: None,
            files_checked: 0,
            relocated: 0,
            failed: 0,
            checksum_mismatches: 0,
            shares_skipped: Vec::new(),
            unsupported: Vec::new(),
            follow_up_scheduled: false,
        }
    }

    /// Operator summary of the removal.
    pub fn notification(&self) -> Notification {
        let subject = if self.failed > 0 {
            format!("drive {} removed with {} unrecovered files", self.drive, self.failed)
        } else {
            format!("drive {} removed", self.drive)
        };
        let mut body = format!(
            "Drive {} has been removed from the pool ({}).\n\
             files checked: {}\n\
             relocated: {}\n\
             failed: {}\n\
             checksum mismatches: {}\n",
            self.drive,
            if self.graceful { "graceful" } else { "drive already gone" },
            self.files_checked,
            self.relocated,
            self.failed,
            self.checksum_mismatches,
        );
        if !self.shares_skipped.is_empty() {
            let names: Vec<&str> = self.shares_skipped.iter().map(|s| s.as_str()).collect();
            body.push_str(&format!("shares without data on the drive: {}\n", names.join(", ")));
        }
        if !self.unsupported.is_empty() {
            body.push_str("entries not relocated, name is not valid UTF-8:\n");
            for path in &self.unsupported {
                body.push_str(&format!("  {}\n", path.display()));
            }
        }
        if !self.follow_up_scheduled {
            body.push_str("WARNING: the follow-up consistency pass could not be scheduled.\n");
        }
        Notification::new(subject, body)
    }
}

/// Runs the drive removal protocol.
pub struct DriveRemover {
    replicator: Arc<Replicator>,
    scope: Arc<dyn ConsistencyScope>,
    scheduler: Arc<dyn FollowUpScheduler>,
    notifier: Arc<dyn Notifier>,
    restart: Arc<dyn RestartHook>,
    walker: TreeWalker,
    backup_count: usize,
}

impl DriveRemover {
    /// Creates a remover.
    pub fn new(
        replicator: Arc<Replicator>,
        scope: Arc<dyn ConsistencyScope>,
        scheduler: Arc<dyn FollowUpScheduler>,
        notifier: Arc<dyn Notifier>,
        restart: Arc<dyn RestartHook>,
    ) -> Self {
        Self {
            replicator,
            scope,
            scheduler,
            notifier,
            restart,
            walker: TreeWalker::default(),
            backup_count: 0,
        }
    }

    /// Number of metastore backups to keep after a removal.
    pub fn with_backup_count(mut self, count: usize) -> Self {
        self.backup_count = count;
        self
    }

    /// Removes `drive` from the pool. A non-graceful removal assumes the
    /// drive is already unreachable and skips relocation.
    pub fn remove_drive(&self, drive: &DriveId, graceful: bool) -> PoolResult<RemovalOutcome> {
        let registry = self.replicator.registry();
        let current = registry.drive(drive)?;
        match current.state {
            DriveState::Active => {
                registry.mark_going(drive)?;
                self.replicator.metastore().save_drive_state(drive, &DriveState::Going)?;
            }
            DriveState::Going => info!(%drive, "resuming interrupted removal"),
            DriveState::Gone => {
                return Err(PoolError::InvalidStateTransition {
                    drive: drive.clone(),
                    from: DriveState::Gone,
                    to: DriveState::Going,
                })
            }
        }
        registry.wait_for_in_flight(drive, None);
        let departing = registry.drive(drive)?;

        let graceful = if graceful && !departing.mount.is_dir() {
            warn!(%drive, "drive mount missing, removing without relocation");
            false
        } else {
            graceful
        };
        let mut outcome = RemovalOutcome::new(drive.clone(), graceful);
        info!(%drive, graceful, "drive removal started");

        if graceful {
            outcome.session = Some(write_session(&departing.mount)?);
            for share in registry.shares() {
                self.evacuate_share(&departing, &share, &mut outcome)?;
            }
        }

        let detached = registry.detach_from_shares(drive);
        debug!(%drive, shares = detached, "drive detached from share configuration");
        if let Err(e) = self.restart.restart() {
            warn!(%drive, error = %e, "restart hook failed");
        }

        registry.mark_gone(drive)?;
        self.replicator.metastore().save_drive_state(drive, &DriveState::Gone)?;
        let purged = self.replicator.metastore().forget_drive(drive)?;
        debug!(%drive, records = purged, "metastore purged");
        self.refresh_backups(drive);

        match self
            .scheduler
            .schedule_full_check(&format!("drive {} removed", drive))
        {
            Ok(()) => outcome.follow_up_scheduled = true,
            Err(e) => error!(%drive, error = %e, "failed to schedule follow-up consistency pass"),
        }
        if graceful {
            if let Err(e) = clear_session(&departing.mount) {
                warn!(%drive, error = %e, "failed to remove session sentinel");
            }
        }

        info!(
            %drive,
            files = outcome.files_checked,
            relocated = outcome.relocated,
            failed = outcome.failed,
            mismatches = outcome.checksum_mismatches,
            "drive removal finished"
        );
        notify_best_effort(self.notifier.as_ref(), &outcome.notification());
        Ok(outcome)
    }

    fn evacuate_share(&self, departing: &Drive, share: &ShareConfig, outcome: &mut RemovalOutcome) -> PoolResult<()> {
        let root = departing.share_root(&share.name);
        if !root.is_dir() {
            info!(drive = %departing.id, share = %share.name, "share has no directory on drive, skipping");
            outcome.shares_skipped.push(share.name.clone());
            return Ok(());
        }

        if share.copies == CopyCount::Fixed(1) {
            for (path, _) in self.files_on(&root, outcome) {
                outcome.files_checked += 1;
                match self.scope.check_subtree(&share.name, &path) {
                    Ok(summary) => {
                        outcome.relocated += summary.copies_created;
                        outcome.checksum_mismatches += summary.checksum_mismatches;
                    }
                    Err(e) => warn!(share = %share.name, %path, error = %e, "scoped check failed"),
                }
                let reference = self.reference_for(departing, share, &path)?;
                if !self.has_copy_elsewhere(departing, share, &path, reference.as_ref()) {
                    outcome.failed += 1;
                }
            }
            return Ok(());
        }

        // Move the share aside so every landing symlink into this drive
        // looks broken and gets repointed at another copy.
        let aside = departing.removing_root(&share.name);
        fs::rename(&root, &aside)?;
        let repaired = self.scope.repair_symlinks(&share.name);
        put_back(&aside, &root)?;
        match repaired {
            Ok(summary) => debug!(share = %share.name, repointed = summary.symlinks_repaired, "landing symlinks repaired"),
            Err(e) => warn!(share = %share.name, error = %e, "symlink repair failed"),
        }

        for (path, _) in self.files_on(&root, outcome) {
            outcome.files_checked += 1;
            let reference = self.reference_for(departing, share, &path)?;
            if self.has_copy_elsewhere(departing, share, &path, reference.as_ref()) {
                continue;
            }
            self.relocate(departing, share, &path, reference, outcome)?;
        }
        Ok(())
    }

    fn files_on(&self, root: &Path, outcome: &mut RemovalOutcome) -> Vec<(RelPath, u64)> {
        let mut files = Vec::new();
        let mut failures = 0;
        let mut unsupported = Vec::new();
        self.walker.walk(root, &RelPath::root(), |event| {
            match event {
                WalkEvent::Entry(entry) if entry.kind == EntryKind::File => files.push((entry.rel, entry.size)),
                WalkEvent::Entry(_) => {}
                WalkEvent::ListDirFailed { path, error } => {
                    warn!(path = %path.display(), %error, "cannot list directory on departing drive");
                    failures += 1;
                }
                WalkEvent::UnsupportedName { path } => {
                    warn!(path = %path.display(), "cannot relocate entry with a non UTF-8 name");
                    unsupported.push(path);
                }
            }
            ControlFlow::Continue(())
        });
        outcome.failed += failures + unsupported.len() as u64;
        outcome.unsupported.extend(unsupported);
        files
    }

    /// The checksum a copy elsewhere must match: the recorded reference,
    /// else the departing copy's own content.
    fn reference_for(&self, departing: &Drive, share: &ShareConfig, path: &RelPath) -> PoolResult<Option<Checksum>> {
        if let Some(sum) = self.replicator.metastore().entry(&share.name, path)?.and_then(|r| r.checksum) {
            return Ok(Some(sum));
        }
        match file_checksum(&departing.copy_path(&share.name, path)) {
            Ok((sum, _)) => Ok(Some(sum)),
            Err(e) => {
                warn!(drive = %departing.id, share = %share.name, %path, error = %e, "cannot read departing copy");
                Ok(None)
            }
        }
    }

    /// True when an active drive other than `departing` holds a copy whose
    /// content matches `reference`. Without a reference nothing counts.
    fn has_copy_elsewhere(&self, departing: &Drive, share: &ShareConfig, path: &RelPath, reference: Option<&Checksum>) -> bool {
        let Some(reference) = reference else {
            return false;
        };
        self.replicator.registry().drives().iter().any(|d| {
            if d.id == departing.id || !d.accepts_copies() {
                return false;
            }
            let candidate = d.copy_path(&share.name, path);
            match file_checksum(&candidate) {
                Ok((sum, _)) if &sum == reference => true,
                Ok(_) => {
                    debug!(drive = %d.id, share = %share.name, %path, "copy elsewhere does not match");
                    false
                }
                Err(_) => false,
            }
        })
    }

    fn relocate(
        &self,
        departing: &Drive,
        share: &ShareConfig,
        path: &RelPath,
        reference: Option<Checksum>,
        outcome: &mut RemovalOutcome,
    ) -> PoolResult<()> {
        let source = departing.copy_path(&share.name, path);
        let exclude: BTreeSet<DriveId> = [departing.id.clone()].into_iter().collect();
        let result = self
            .replicator
            .ensure_copies(&share.name, path, &source, &exclude, 1, reference.as_ref())?;

        if result.source_mismatch {
            outcome.checksum_mismatches += 1;
        }
        let Some(new_home) = result.created.first() else {
            warn!(drive = %departing.id, share = %share.name, %path, "no destination for departing copy");
            outcome.failed += 1;
            return Ok(());
        };
        outcome.relocated += 1;

        let landing = share.landing_path(path);
        let points_here = match resolve_chain(&landing)? {
            SymlinkStatus::Resolved { target, .. } | SymlinkStatus::Broken { target } => departing.contains(&target),
            _ => false,
        };
        if points_here {
            let target = self.replicator.registry().drive(new_home)?.copy_path(&share.name, path);
            point_symlink(&landing, &target)?;
        }
        Ok(())
    }

    fn refresh_backups(&self, removed: &DriveId) {
        if self.backup_count == 0 {
            return;
        }
        let metastore = self.replicator.metastore();
        let candidates: Vec<BackupCandidate> = self
            .replicator
            .registry()
            .drives()
            .into_iter()
            .filter(|d| d.accepts_copies())
            .map(|d| BackupCandidate {
                drive: d.id,
                free_bytes: d.free_bytes,
            })
            .collect();
        let chosen = match metastore.choose_backup_metastores(&candidates, self.backup_count) {
            Ok(chosen) => chosen,
            Err(e) => {
                warn!(drive = %removed, error = %e, "failed to choose backup metastores");
                return;
            }
        };
        for drive in chosen {
            if let Err(e) = metastore.write_backup(&drive.mount()) {
                warn!(%drive, error = %e, "failed to write metastore backup");
            }
        }
    }
}

/// Renames the share directory back from `aside`, retrying once. A failure
/// names both paths so the operator can finish the rename by hand.
fn put_back(aside: &Path, root: &Path) -> PoolResult<()> {
    if let Err(first) = fs::rename(aside, root) {
        warn!(aside = %aside.display(), root = %root.display(), error = %first, "renaming share back failed, retrying");
        if let Err(e) = fs::rename(aside, root) {
            error!(
                aside = %aside.display(),
                root = %root.display(),
                error = %e,
                "share directory left aside; rename it back before retrying the removal"
            );
            return Err(PoolError::Io(std::io::Error::new(
                e.kind(),
                format!("share directory left at {}: {}", aside.display(), e),
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::PlacementPolicy;
    use crate::registry::DriveRegistry;
    use crate::restart::NoopRestartHook;
    use crate::sentinel::read_session;
    use parking_lot::Mutex;
    use poolkeeper_meta::{MemoryKvStore, Metastore};
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};

    #[derive(Default)]
    struct RecordingScope {
        checked: Mutex<Vec<RelPath>>,
        repairs: Mutex<u64>,
    }

    impl ConsistencyScope for RecordingScope {
        fn check_subtree(&self, _share: &ShareName, path: &RelPath) -> PoolResult<ScopeSummary> {
            self.checked.lock().push(path.clone());
            Ok(ScopeSummary {
                files_checked: 1,
                ..Default::default()
            })
        }

        fn repair_symlinks(&self, _share: &ShareName) -> PoolResult<ScopeSummary> {
            *self.repairs.lock() += 1;
            Ok(ScopeSummary::default())
        }
    }

    #[derive(Default)]
    struct RecordingScheduler {
        reasons: Mutex<Vec<String>>,
    }

    impl FollowUpScheduler for RecordingScheduler {
        fn schedule_full_check(&self, reason: &str) -> PoolResult<()> {
            self.reasons.lock().push(reason.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notification: &Notification) -> PoolResult<()> {
            self.sent.lock().push(notification.clone());
            Ok(())
        }
    }

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        replicator: Arc<Replicator>,
        scope: Arc<RecordingScope>,
        scheduler: Arc<RecordingScheduler>,
        notifier: Arc<RecordingNotifier>,
        share: ShareName,
    }

    impl Fixture {
        fn new(copies: CopyCount) -> Self {
            let dir = tempdir().unwrap();
            let root = dir.path().to_path_buf();
            let registry = Arc::new(DriveRegistry::new(PlacementPolicy::MostFree, 0));
            for name in ["a", "b", "c"] {
                let mount = root.join(name);
                fs::create_dir_all(&mount).unwrap();
                let mut d = Drive::new(&mount);
                d.total_bytes = 1000;
                d.free_bytes = 500;
                registry.add_drive(d).unwrap();
            }
            let share = ShareName::new("docs").unwrap();
            registry
                .add_share(ShareConfig {
                    name: share.clone(),
                    landing_zone: root.join("landing"),
                    copies,
                    drives: None,
                })
                .unwrap();
            let metastore = Arc::new(Metastore::new(Arc::new(MemoryKvStore::new())));
            Self {
                _dir: dir,
                root,
                replicator: Arc::new(Replicator::new(registry, metastore)),
                scope: Arc::new(RecordingScope::default()),
                scheduler: Arc::new(RecordingScheduler::default()),
                notifier: Arc::new(RecordingNotifier::default()),
                share,
            }
        }

        fn remover(&self) -> DriveRemover {
            DriveRemover::new(
                Arc::clone(&self.replicator),
                self.scope.clone(),
                self.scheduler.clone(),
                self.notifier.clone(),
                Arc::new(NoopRestartHook),
            )
        }

        fn id(&self, name: &str) -> DriveId {
            DriveId::from_mount(&self.root.join(name))
        }

        fn place(&self, drive: &str, rel: &str, data: &[u8]) -> PathBuf {
            let path = self.root.join(drive).join("docs").join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, data).unwrap();
            self.replicator
                .metastore()
                .record_copy(&self.share, &RelPath::new(rel).unwrap(), &self.id(drive), Some(data.len() as u64), None)
                .unwrap();
            path
        }
    }

    #[test]
    fn test_graceful_removal_relocates_single_copies() {
        let fx = Fixture::new(CopyCount::Fixed(2));
        let only_on_a = fx.place("a", "solo.txt", b"solo");
        fx.place("a", "pair.txt", b"pair");
        fx.place("b", "pair.txt", b"pair");
        let landing = fx.root.join("landing/solo.txt");
        point_symlink(&landing, &only_on_a).unwrap();

        let outcome = fx.remover().remove_drive(&fx.id("a"), true).unwrap();
        assert_eq!(outcome.files_checked, 2);
        assert_eq!(outcome.relocated, 1);
        assert_eq!(outcome.failed, 0);
        assert!(outcome.follow_up_scheduled);
        assert_eq!(*fx.scope.repairs.lock(), 1);

        let target = resolve_chain(&landing).unwrap().target().unwrap().to_path_buf();
        assert!(!target.starts_with(fx.root.join("a")));
        assert_eq!(fs::read(&target).unwrap(), b"solo");

        let registry = fx.replicator.registry();
        assert_eq!(registry.drive(&fx.id("a")).unwrap().state, DriveState::Gone);
        assert!(fx.replicator.metastore().entries_on_drive(&fx.id("a")).unwrap().is_empty());
        assert_eq!(read_session(&fx.root.join("a")).unwrap(), None);
        assert!(fx.root.join("a/docs").is_dir());
        assert_eq!(fx.scheduler.reasons.lock().len(), 1);
        assert_eq!(fx.notifier.sent.lock().len(), 1);
    }

    #[test]
    fn test_single_copy_share_uses_scoped_check() {
        let fx = Fixture::new(CopyCount::Fixed(1));
        fx.place("a", "x/one.txt", b"1");
        fx.place("a", "two.txt", b"2");

        let outcome = fx.remover().remove_drive(&fx.id("a"), true).unwrap();
        let mut checked: Vec<String> = fx.scope.checked.lock().iter().map(|p| p.as_str().to_string()).collect();
        checked.sort();
        assert_eq!(checked, vec!["two.txt", "x/one.txt"]);
        // the recording scope copies nothing, so both files are unrecovered
        assert_eq!(outcome.failed, 2);
        assert!(fx.notifier.sent.lock()[0].subject.contains("2 unrecovered"));
    }

    #[test]
    fn test_share_without_directory_skipped() {
        let fx = Fixture::new(CopyCount::Fixed(2));
        let outcome = fx.remover().remove_drive(&fx.id("c"), true).unwrap();
        assert_eq!(outcome.shares_skipped, vec![fx.share.clone()]);
        assert_eq!(outcome.files_checked, 0);
    }

    #[test]
    fn test_non_graceful_skips_relocation() {
        let fx = Fixture::new(CopyCount::Fixed(2));
        fx.place("a", "solo.txt", b"solo");
        let outcome = fx.remover().remove_drive(&fx.id("a"), false).unwrap();
        assert!(!outcome.graceful);
        assert_eq!(outcome.relocated, 0);
        assert!(outcome.session.is_none());
        assert!(fx.replicator.metastore().entry(&fx.share, &RelPath::new("solo.txt").unwrap()).unwrap().is_none());
        assert_eq!(fx.scheduler.reasons.lock().len(), 1);
    }

    #[test]
    fn test_gone_drive_cannot_be_removed_again() {
        let fx = Fixture::new(CopyCount::Fixed(2));
        fx.remover().remove_drive(&fx.id("c"), false).unwrap();
        assert!(matches!(
            fx.remover().remove_drive(&fx.id("c"), false),
            Err(PoolError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_same_size_copy_elsewhere_is_not_trusted() {
        let fx = Fixture::new(CopyCount::Fixed(2));
        fx.place("a", "pair.txt", b"pair");
        fx.place("b", "pair.txt", b"pbir");

        let outcome = fx.remover().remove_drive(&fx.id("a"), true).unwrap();
        assert_eq!(outcome.relocated, 1);
        assert_eq!(outcome.failed, 0);
        let good = ["b", "c"]
            .iter()
            .any(|d| fs::read(fx.root.join(d).join("docs/pair.txt")).ok().as_deref() == Some(&b"pair"[..]));
        assert!(good);
    }

    #[test]
    fn test_non_utf8_names_counted_as_failed() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let fx = Fixture::new(CopyCount::Fixed(2));
        fx.place("a", "ok.txt", b"ok");
        let odd = fx.root.join("a/docs").join(OsStr::from_bytes(b"caf\xe9.txt"));
        fs::write(&odd, b"accent").unwrap();

        let outcome = fx.remover().remove_drive(&fx.id("a"), true).unwrap();
        assert_eq!(outcome.relocated, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.unsupported, vec![odd.clone()]);
        let sent = fx.notifier.sent.lock();
        assert!(sent[0].subject.contains("1 unrecovered"));
        assert!(sent[0].body.contains(&odd.display().to_string()));
    }

    #[test]
    fn test_lifecycle_saved_in_metastore() {
        let fx = Fixture::new(CopyCount::Fixed(2));
        fx.remover().remove_drive(&fx.id("c"), false).unwrap();
        let states: Vec<(DriveId, DriveState)> = fx.replicator.metastore().drive_states().unwrap();
        assert_eq!(states, vec![(fx.id("c"), DriveState::Gone)]);
    }

    #[test]
    fn test_failed_put_back_names_aside_path() {
        let dir = tempdir().unwrap();
        let aside = dir.path().join("docs.pk-removing");
        let root = dir.path().join("docs");
        let err = put_back(&aside, &root).unwrap_err();
        assert!(err.to_string().contains(&aside.display().to_string()));

        fs::create_dir(&aside).unwrap();
        put_back(&aside, &root).unwrap();
        assert!(root.is_dir() && !aside.exists());
    }

    #[test]
    fn test_backups_rechosen_after_removal() {
        let fx = Fixture::new(CopyCount::Fixed(2));
        fx.place("b", "f.txt", b"f");
        let remover = fx.remover().with_backup_count(1);
        remover.remove_drive(&fx.id("a"), true).unwrap();
        let backups = fx.replicator.metastore().backup_drives().unwrap();
        assert_eq!(backups.len(), 1);
        assert_ne!(backups[0], fx.id("a"));
        assert!(backups[0].mount().join(poolkeeper_meta::metastore::BACKUP_FILENAME).is_file());
    }
}
