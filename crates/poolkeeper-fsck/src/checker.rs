//! The consistency checker.
//!
//! A pass walks the landing zone of each share and reconciles every file
//! entry with what the drives actually hold: copies are discovered on disk
//! as well as through the metastore, validated, topped up or trimmed to the
//! share's copy count, and the landing symlink is pointed at a valid copy.
//! An optional drive scan (see `scan.rs`) then looks for copies nothing
//! refers to.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use poolkeeper_meta::{CopyRecord, DriveId, ShareName};
use poolkeeper_pool::{
    ConsistencyScope, Drive, DriveState, PoolResult, Replicator, ScopeSummary, ShareConfig,
};
use poolkeeper_storage::{file_checksum, point_symlink, Checksum, EntryKind, RelPath, TreeWalker, WalkEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ChecksumPolicy, FsckModes, FsckPolicies, FsckRequest, OrphanPolicy};
use crate::error::{FsckError, FsckResult};
use crate::landing::{same_file, LandingEntry};
use crate::report::{FsckReport, ProblemKind};

/// State of one pass over one share.
pub(crate) struct Pass<'a> {
    pub(crate) share: &'a ShareConfig,
    pub(crate) needed: usize,
    pub(crate) drives: Vec<Drive>,
    pub(crate) modes: FsckModes,
    pub(crate) report: FsckReport,
    pub(crate) cancel: &'a CancellationToken,
    /// Paths already reconciled in this pass.
    pub(crate) seen: HashSet<RelPath>,
}

impl Pass<'_> {
    pub(crate) fn rel_of(&self, root: &Path, path: &Path) -> RelPath {
        RelPath::from_base(root, path).unwrap_or_default()
    }

    /// Directory of `path` relative to `root`, for entries that have no
    /// `RelPath` of their own.
    pub(crate) fn parent_rel_of(&self, root: &Path, path: &Path) -> RelPath {
        path.parent().map(|p| self.rel_of(root, p)).unwrap_or_default()
    }

    /// Checks for cancellation, flagging the report when it happened.
    pub(crate) fn stopped(&mut self) -> bool {
        if self.cancel.is_cancelled() {
            self.report.cancelled = true;
        }
        self.report.cancelled
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CopyClass {
    Valid,
    /// On a draining drive: readable, but never counted.
    SourceOnly,
    Distrusted(String),
}

#[derive(Debug, Clone)]
struct CopyState {
    drive: Drive,
    path: PathBuf,
    size: u64,
    recorded: bool,
    class: CopyClass,
}

impl CopyState {
    fn is_valid(&self) -> bool {
        self.class == CopyClass::Valid
    }

    fn distrust_reason(&self) -> Option<String> {
        match &self.class {
            CopyClass::Distrusted(reason) => Some(reason.clone()),
            _ => None,
        }
    }
}

/// Checks shares and repairs what it can.
pub struct FsckChecker {
    pub(crate) replicator: Arc<Replicator>,
    pub(crate) policies: FsckPolicies,
    pub(crate) walker: TreeWalker,
}

impl FsckChecker {
    /// Creates a checker.
    pub fn new(replicator: Arc<Replicator>, policies: FsckPolicies) -> Self {
        Self {
            replicator,
            policies,
            walker: TreeWalker::default(),
        }
    }

    /// The repair policies in effect.
    pub fn policies(&self) -> FsckPolicies {
        self.policies
    }

    /// Runs one pass. Cancellation is honoured between files; the report
    /// of a cancelled pass covers what was done.
    pub fn run(&self, request: &FsckRequest, cancel: &CancellationToken) -> FsckResult<FsckReport> {
        if request.subtree.is_some() && request.share.is_none() {
            return Err(FsckError::SubtreeWithoutShare);
        }
        let registry = self.replicator.registry();
        let shares = match &request.share {
            Some(name) => vec![registry
                .share(name)
                .map_err(|_| FsckError::ShareNotFound(name.to_string()))?],
            None => registry.shares(),
        };
        let subtree = request.subtree.clone().unwrap_or_default();
        info!(
            shares = shares.len(),
            %subtree,
            copies = request.modes.copies,
            orphans = request.modes.orphans,
            usage = request.modes.usage,
            checksums = request.modes.checksums,
            "fsck started"
        );

        let mut report = FsckReport::new();
        for share in &shares {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.merge(self.check_share(share, &subtree, request.modes, cancel)?);
        }
        report.finish();
        info!(
            problems = report.problem_count(),
            files = report.stats.files_checked,
            created = report.stats.copies_created,
            trimmed = report.stats.copies_trimmed,
            cancelled = report.cancelled,
            "fsck finished"
        );
        Ok(report)
    }

    fn check_share(
        &self,
        share: &ShareConfig,
        subtree: &RelPath,
        modes: FsckModes,
        cancel: &CancellationToken,
    ) -> FsckResult<FsckReport> {
        let registry = self.replicator.registry();
        let mut pass = Pass {
            share,
            needed: registry.required_copies(&share.name)?,
            drives: registry.drives(),
            modes,
            report: FsckReport::new(),
            cancel,
            seen: HashSet::new(),
        };
        debug!(share = %share.name, needed = pass.needed, "checking share");

        if modes.copies {
            self.walk_landing(&mut pass, subtree)?;
        }
        if (modes.orphans || modes.usage) && !pass.stopped() {
            self.scan_drives(&mut pass, subtree)?;
        }
        Ok(pass.report)
    }

    fn walk_landing(&self, pass: &mut Pass<'_>, subtree: &RelPath) -> FsckResult<()> {
        let landing_zone = pass.share.landing_zone.clone();
        let share = pass.share.name.clone();
        if !subtree.is_root() && self.walker.lookup(&landing_zone, subtree)?.is_none() {
            // nothing in the landing zone; copies may still exist on drives
            self.check_file_logged(pass, subtree);
            return Ok(());
        }

        self.walker.walk(&landing_zone, subtree, |event| {
            if pass.stopped() {
                return ControlFlow::Break(());
            }
            match event {
                WalkEvent::Entry(entry) => match entry.kind {
                    EntryKind::Dir => pass.report.stats.dirs_checked += 1,
                    EntryKind::File | EntryKind::Symlink => self.check_file_logged(pass, &entry.rel),
                },
                WalkEvent::ListDirFailed { path, error } => {
                    let rel = pass.rel_of(&landing_zone, &path);
                    pass.report.record(ProblemKind::ListDirFailed, &share, &rel, error);
                }
                WalkEvent::UnsupportedName { path } => {
                    let rel = pass.parent_rel_of(&landing_zone, &path);
                    pass.report.record(
                        ProblemKind::UnsupportedName,
                        &share,
                        &rel,
                        format!("{} in the landing zone", path.display()),
                    );
                }
            }
            ControlFlow::Continue(())
        });
        Ok(())
    }

    /// Reconciles `rel` once per pass; failures become report entries.
    pub(crate) fn check_file_logged(&self, pass: &mut Pass<'_>, rel: &RelPath) {
        if !pass.seen.insert(rel.clone()) {
            return;
        }
        if let Err(e) = self.check_file(pass, rel) {
            let share = pass.share.name.clone();
            warn!(%share, path = %rel, error = %e, "file check failed");
            pass.report
                .record(ProblemKind::CopyFailed, &share, rel, format!("check failed: {}", e));
        }
    }

    fn check_file(&self, pass: &mut Pass<'_>, rel: &RelPath) -> FsckResult<()> {
        pass.report.stats.files_checked += 1;
        let share = pass.share;
        let name = &share.name;
        let metastore = self.replicator.metastore();

        let landing_path = self
            .walker
            .lookup(&share.landing_zone, rel)?
            .unwrap_or_else(|| share.landing_path(rel));
        let landing = LandingEntry::inspect(&landing_path)?;
        match landing {
            LandingEntry::Directory => return Ok(()),
            LandingEntry::Regular => return self.distribute_landing_file(pass, rel, &landing_path),
            _ => {}
        }

        let record = metastore.entry(name, rel)?;
        let mut copies = self.collect_copies(pass, rel, record.as_ref())?;
        if copies.is_empty() && record.is_none() && landing == LandingEntry::Missing {
            return Ok(());
        }
        if landing == LandingEntry::Missing && self.policies.orphans == OrphanPolicy::Flag {
            pass.report.record(
                ProblemKind::Orphaned,
                name,
                rel,
                format!("{} copies without a landing entry", copies.len()),
            );
            return Ok(());
        }

        let canonical = landing
            .target()
            .and_then(|t| copies.iter().find(|c| same_file(&c.path, t)))
            .cloned();

        let canonical_path = canonical.map(|c| c.path);
        self.classify(pass, rel, record.as_ref(), &mut copies, canonical_path.as_deref())?;
        self.handle_distrusted(pass, rel, &mut copies)?;
        let reference = metastore.entry(name, rel)?.and_then(|r| r.checksum);
        self.enforce_count(pass, rel, reference, &mut copies, canonical_path.as_deref())?;
        self.fix_landing(pass, rel, &landing_path, &landing, &copies)?;
        Ok(())
    }

    fn distribute_landing_file(&self, pass: &mut Pass<'_>, rel: &RelPath, landing_path: &Path) -> FsckResult<()> {
        let name = pass.share.name.clone();
        let outcome = self
            .replicator
            .distribute(pass.share, rel, landing_path, None, pass.needed)?;
        if outcome.source_mismatch {
            pass.report
                .record(ProblemKind::CopyFailed, &name, rel, "landing file changed while it was copied");
            return Ok(());
        }
        if outcome.copies.is_empty() {
            pass.report
                .record(ProblemKind::CopyFailed, &name, rel, "no drive could take a copy");
            return Ok(());
        }
        pass.report.stats.distributed += 1;
        self.report_distribution(pass, rel, outcome.copies.len(), &outcome.failed);
        Ok(())
    }

    fn report_distribution(&self, pass: &mut Pass<'_>, rel: &RelPath, placed: usize, failed: &[(DriveId, String)]) {
        let name = pass.share.name.clone();
        for (drive, error) in failed {
            pass.report
                .record(ProblemKind::CopyFailed, &name, rel, format!("copy to {} failed: {}", drive, error));
        }
        if placed < pass.needed {
            pass.report.record(
                ProblemKind::UnderReplicated,
                &name,
                rel,
                format!("{} of {} copies", placed, pass.needed),
            );
        }
    }

    /// Recorded copies plus copies found on drives. Records pointing at
    /// gone, unknown or empty locations are dropped.
    fn collect_copies(&self, pass: &mut Pass<'_>, rel: &RelPath, record: Option<&CopyRecord>) -> FsckResult<Vec<CopyState>> {
        let name = pass.share.name.clone();
        let metastore = self.replicator.metastore();
        let recorded: BTreeSet<DriveId> = record.map(|r| r.drives.clone()).unwrap_or_default();
        let mut copies = Vec::new();

        for drive in &pass.drives {
            let is_recorded = recorded.contains(&drive.id);
            if drive.state == DriveState::Gone {
                if is_recorded {
                    metastore.remove_copy(&name, rel, &drive.id)?;
                    pass.report.stats.records_fixed += 1;
                }
                continue;
            }
            if !drive.available {
                continue;
            }
            let found = self
                .walker
                .lookup(&drive.share_root(&name), rel)?
                .and_then(|p| {
                    fs::symlink_metadata(&p)
                        .ok()
                        .filter(|m| m.is_file())
                        .map(|m| (p, m.len()))
                });
            match found {
                Some((path, size)) => copies.push(CopyState {
                    drive: drive.clone(),
                    path,
                    size,
                    recorded: is_recorded,
                    class: CopyClass::Valid,
                }),
                None if is_recorded => {
                    metastore.remove_copy(&name, rel, &drive.id)?;
                    pass.report.stats.records_fixed += 1;
                    if drive.state == DriveState::Active {
                        pass.report.record(
                            ProblemKind::MissingCopy,
                            &name,
                            rel,
                            format!("recorded copy on {} is missing", drive.id),
                        );
                    }
                }
                None => {}
            }
        }

        for unknown in recorded.iter().filter(|d| !pass.drives.iter().any(|x| &x.id == *d)) {
            metastore.remove_copy(&name, rel, unknown)?;
            pass.report.stats.records_fixed += 1;
        }
        Ok(copies)
    }

    /// Sorts copies into valid, source-only and distrusted, establishing the
    /// reference checksum when asked to and adopting unrecorded valid copies.
    fn classify(
        &self,
        pass: &mut Pass<'_>,
        rel: &RelPath,
        record: Option<&CopyRecord>,
        copies: &mut [CopyState],
        canonical: Option<&Path>,
    ) -> FsckResult<()> {
        let name = pass.share.name.clone();
        let metastore = self.replicator.metastore();
        let first_active = copies
            .iter()
            .filter(|c| c.drive.state == DriveState::Active)
            .find(|c| Some(c.path.as_path()) == canonical)
            .or_else(|| copies.iter().find(|c| c.drive.state == DriveState::Active));

        let reference_size = match record {
            Some(r) if !r.drives.is_empty() || r.checksum.is_some() => Some(r.size),
            _ => first_active.map(|c| c.size),
        };
        let mut reference_sum = record.and_then(|r| r.checksum);
        if pass.modes.checksums && reference_sum.is_none() {
            if let Some(base) = first_active.filter(|c| Some(c.size) == reference_size) {
                let (sum, bytes) = file_checksum(&base.path)?;
                pass.report.stats.bytes_hashed += bytes;
                metastore.set_reference(&name, rel, bytes, sum)?;
                debug!(share = %name, path = %rel, checksum = %sum, "reference checksum established");
                reference_sum = Some(sum);
            }
        }

        for copy in copies.iter_mut() {
            copy.class = CopyClass::Valid;
            if copy.drive.state == DriveState::Going {
                copy.class = CopyClass::SourceOnly;
                continue;
            }
            if let Some(expected) = reference_size {
                if copy.size != expected {
                    copy.class = CopyClass::Distrusted(format!("size {} differs from {}", copy.size, expected));
                    continue;
                }
            }
            if let (true, Some(expected)) = (pass.modes.checksums, reference_sum) {
                let (actual, bytes) = file_checksum(&copy.path)?;
                pass.report.stats.bytes_hashed += bytes;
                if actual != expected {
                    copy.class = CopyClass::Distrusted(format!("checksum {} differs from {}", actual, expected));
                }
            }
        }

        for copy in copies.iter_mut().filter(|c| c.is_valid() && !c.recorded) {
            metastore.record_copy(&name, rel, &copy.drive.id, Some(copy.size), None)?;
            copy.recorded = true;
            pass.report.stats.copies_adopted += 1;
            debug!(share = %name, path = %rel, drive = %copy.drive.id, "unrecorded copy adopted");
        }
        Ok(())
    }

    /// Applies the checksum policy to distrusted copies. When no valid copy
    /// exists they are all kept, so the last copy of a file is never lost.
    fn handle_distrusted(&self, pass: &mut Pass<'_>, rel: &RelPath, copies: &mut Vec<CopyState>) -> FsckResult<()> {
        let name = pass.share.name.clone();
        let metastore = self.replicator.metastore();
        let any_valid = copies.iter().any(CopyState::is_valid);
        let policy = if any_valid {
            self.policies.checksum_mismatch
        } else {
            ChecksumPolicy::Keep
        };
        let mut kept = Vec::with_capacity(copies.len());

        for copy in copies.drain(..) {
            let Some(reason) = copy.distrust_reason() else {
                kept.push(copy);
                continue;
            };
            if copy.recorded && policy != ChecksumPolicy::Keep {
                metastore.remove_copy(&name, rel, &copy.drive.id)?;
            }
            let action = match policy {
                ChecksumPolicy::Quarantine => {
                    let dest = copy.drive.quarantine_path(&name, rel);
                    if let Some(parent) = dest.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::rename(&copy.path, &dest)?;
                    pass.report.stats.copies_quarantined += 1;
                    format!("moved to {}", dest.display())
                }
                ChecksumPolicy::Delete => {
                    fs::remove_file(&copy.path)?;
                    pass.report.stats.copies_deleted += 1;
                    "deleted".to_string()
                }
                ChecksumPolicy::Keep if any_valid => "kept".to_string(),
                ChecksumPolicy::Keep => "kept, no valid copy remains".to_string(),
            };
            warn!(share = %name, path = %rel, drive = %copy.drive.id, %reason, %action, "distrusted copy");
            pass.report.record(
                ProblemKind::WrongChecksum,
                &name,
                rel,
                format!("copy on {}: {}; {}", copy.drive.id, reason, action),
            );
            if policy == ChecksumPolicy::Keep {
                kept.push(copy);
            }
        }
        *copies = kept;
        Ok(())
    }

    /// Tops up or trims valid copies to the share's count. Copies on drives
    /// the share may not use never count; they serve as sources and are
    /// removed once the count is met.
    fn enforce_count(
        &self,
        pass: &mut Pass<'_>,
        rel: &RelPath,
        reference: Option<Checksum>,
        copies: &mut Vec<CopyState>,
        canonical: Option<&Path>,
    ) -> FsckResult<()> {
        let name = pass.share.name.clone();
        let share = pass.share;
        let needed = pass.needed;
        let counted = |c: &CopyState| c.is_valid() && share.is_eligible(&c.drive.id);
        let have = copies.iter().filter(|c| counted(c)).count();

        if have < needed {
            let source = copies
                .iter()
                .find(|c| c.is_valid() && Some(c.path.as_path()) == canonical)
                .or_else(|| copies.iter().find(|c| c.is_valid()))
                .or_else(|| copies.iter().find(|c| c.class == CopyClass::SourceOnly))
                .cloned();
            let Some(source) = source else {
                pass.report.record(
                    ProblemKind::UnderReplicated,
                    &name,
                    rel,
                    format!("0 of {} copies, nothing to copy from", needed),
                );
                return Ok(());
            };
            let exclude: BTreeSet<DriveId> = copies.iter().map(|c| c.drive.id.clone()).collect();
            let outcome =
                self.replicator
                    .ensure_copies(&name, rel, &source.path, &exclude, needed - have, reference.as_ref())?;
            pass.report.stats.copies_created += outcome.created.len() as u64;
            for drive_id in &outcome.created {
                if let Some(drive) = pass.drives.iter().find(|d| &d.id == drive_id) {
                    copies.push(CopyState {
                        path: drive.copy_path(&name, rel),
                        drive: drive.clone(),
                        size: source.size,
                        recorded: true,
                        class: CopyClass::Valid,
                    });
                }
            }
            if outcome.source_mismatch {
                pass.report.record(
                    ProblemKind::WrongChecksum,
                    &name,
                    rel,
                    format!("source copy on {} does not match its reference", source.drive.id),
                );
            }
            let placed = have + outcome.created.len();
            self.report_distribution(pass, rel, placed, &outcome.failed);
            return Ok(());
        }

        // The canonical copy stays unless the share may not use its drive.
        let protected = canonical.filter(|p| copies.iter().any(|c| c.path.as_path() == *p && counted(c)));
        let mut surplus: Vec<usize> = (0..copies.len())
            .filter(|i| copies[*i].is_valid() && Some(copies[*i].path.as_path()) != protected)
            .collect();
        // ineligible drives first, then the fullest
        surplus.sort_by(|a, b| {
            let (x, y) = (&copies[*a].drive, &copies[*b].drive);
            share
                .is_eligible(&x.id)
                .cmp(&share.is_eligible(&y.id))
                .then_with(|| x.free_fraction().total_cmp(&y.free_fraction()))
                .then_with(|| x.id.cmp(&y.id))
        });
        let ineligible = surplus
            .iter()
            .filter(|i| !share.is_eligible(&copies[**i].drive.id))
            .count();
        let excess = have - needed + ineligible;

        let mut trimmed: Vec<usize> = Vec::new();
        for i in surplus.into_iter().take(excess) {
            let copy = &copies[i];
            fs::remove_file(&copy.path)?;
            self.replicator.metastore().remove_copy(&name, rel, &copy.drive.id)?;
            pass.report.stats.copies_trimmed += 1;
            debug!(share = %name, path = %rel, drive = %copy.drive.id, "surplus copy trimmed");
            trimmed.push(i);
        }
        trimmed.sort_unstable_by(|a, b| b.cmp(a));
        for i in trimmed {
            copies.remove(i);
        }
        Ok(())
    }

    /// Points the landing symlink at a valid copy, eligible drives first.
    fn fix_landing(
        &self,
        pass: &mut Pass<'_>,
        rel: &RelPath,
        landing_path: &Path,
        landing: &LandingEntry,
        copies: &[CopyState],
    ) -> FsckResult<()> {
        let name = pass.share.name.clone();
        let share = pass.share;
        let valid: Vec<&CopyState> = copies
            .iter()
            .filter(|c| c.is_valid() && share.is_eligible(&c.drive.id))
            .chain(copies.iter().filter(|c| c.is_valid() && !share.is_eligible(&c.drive.id)))
            .collect();
        if let Some(target) = landing.target() {
            if valid.iter().any(|c| same_file(&c.path, target)) {
                return Ok(());
            }
        }

        let Some(best) = valid.first() else {
            if landing.is_broken_link() {
                let was = landing
                    .dangling_target()
                    .map(|t| t.display().to_string())
                    .unwrap_or_else(|| "a symlink loop".to_string());
                pass.report.record(
                    ProblemKind::BrokenSymlink,
                    &name,
                    rel,
                    format!("pointed to {}; no copy remains", was),
                );
            }
            return Ok(());
        };

        point_symlink(landing_path, &best.path)?;
        pass.report.stats.symlinks_repaired += 1;
        if landing.is_broken_link() {
            pass.report.record(
                ProblemKind::BrokenSymlink,
                &name,
                rel,
                format!("repointed to {}", best.path.display()),
            );
        } else if *landing == LandingEntry::Missing {
            pass.report.record(
                ProblemKind::Orphaned,
                &name,
                rel,
                format!("copies without a landing entry; linked to {}", best.path.display()),
            );
        }
        Ok(())
    }

    /// Repoints landing symlinks of `share` that do not resolve to a copy
    /// of the recorded size on an active drive.
    pub fn repair_share_symlinks(&self, share: &ShareName) -> FsckResult<FsckReport> {
        let registry = self.replicator.registry();
        let config = registry
            .share(share)
            .map_err(|_| FsckError::ShareNotFound(share.to_string()))?;
        let drives: Vec<Drive> = registry
            .drives()
            .into_iter()
            .filter(|d| d.accepts_copies() && config.is_eligible(&d.id))
            .collect();
        let metastore = self.replicator.metastore();
        let mut report = FsckReport::new();

        let mut links = Vec::new();
        self.walker.walk(&config.landing_zone, &RelPath::root(), |event| {
            if let WalkEvent::Entry(entry) = event {
                if entry.kind == EntryKind::Symlink {
                    links.push((entry.rel, entry.path));
                }
            }
            ControlFlow::Continue(())
        });

        for (rel, link) in links {
            report.stats.files_checked += 1;
            let expected_size = metastore.entry(share, &rel)?.map(|r| r.size);
            let fits = |p: &Path| {
                fs::metadata(p)
                    .map(|m| m.is_file() && expected_size.map_or(true, |s| s == m.len()))
                    .unwrap_or(false)
            };
            let landing = LandingEntry::inspect(&link)?;
            let current_ok = landing
                .target()
                .map(|t| fits(t) && drives.iter().any(|d| d.contains(t)))
                .unwrap_or(false);
            if current_ok {
                continue;
            }
            let replacement = drives
                .iter()
                .filter_map(|d| self.walker.lookup(&d.share_root(share), &rel).ok().flatten())
                .find(|p| fits(p));
            match replacement {
                Some(target) => {
                    point_symlink(&link, &target)?;
                    report.stats.symlinks_repaired += 1;
                    debug!(%share, path = %rel, target = %target.display(), "symlink repointed");
                }
                None => debug!(%share, path = %rel, "no other copy to point at"),
            }
        }
        report.finish();
        Ok(report)
    }
}

impl ConsistencyScope for FsckChecker {
    fn check_subtree(&self, share: &ShareName, path: &RelPath) -> PoolResult<ScopeSummary> {
        let modes = FsckModes {
            copies: true,
            orphans: false,
            usage: false,
            checksums: false,
        };
        let request = FsckRequest::share(share.clone(), modes).with_subtree(path.clone());
        let report = self.run(&request, &CancellationToken::new())?;
        Ok(report.scope_summary())
    }

    fn repair_symlinks(&self, share: &ShareName) -> PoolResult<ScopeSummary> {
        Ok(self.repair_share_symlinks(share)?.scope_summary())
    }
}
