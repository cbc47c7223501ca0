//! Drive scan: orphaned copies, directories missing from the landing zone,
//! and per-drive usage.

use std::fs;
use std::ops::ControlFlow;

use poolkeeper_pool::Drive;
use poolkeeper_storage::{file_checksum, point_symlink, EntryKind, RelPath, WalkEntry, WalkEvent};
use tracing::{debug, info, warn};

use crate::checker::{FsckChecker, Pass};
use crate::config::OrphanPolicy;
use crate::error::FsckResult;
use crate::report::ProblemKind;

impl FsckChecker {
    /// Walks `M(D)/S/subtree` on every active drive.
    pub(crate) fn scan_drives(&self, pass: &mut Pass<'_>, subtree: &RelPath) -> FsckResult<()> {
        let drives: Vec<Drive> = pass.drives.iter().filter(|d| d.accepts_copies()).cloned().collect();
        let share = pass.share.name.clone();
        for drive in drives {
            let root = drive.share_root(&share);
            debug!(%share, drive = %drive.id, "scanning drive");
            let summary = self.walker.walk(&root, subtree, |event| {
                if pass.stopped() {
                    return ControlFlow::Break(());
                }
                match event {
                    WalkEvent::Entry(entry) => {
                        let rel = entry.rel.clone();
                        if let Err(e) = self.scan_entry(pass, &drive, entry) {
                            warn!(%share, path = %rel, drive = %drive.id, error = %e, "scan failed");
                            pass.report
                                .record(ProblemKind::CopyFailed, &share, &rel, format!("scan failed: {}", e));
                        }
                    }
                    WalkEvent::ListDirFailed { path, error } => {
                        let rel = pass.rel_of(&root, &path);
                        pass.report.record(
                            ProblemKind::ListDirFailed,
                            &share,
                            &rel,
                            format!("on {}: {}", drive.id, error),
                        );
                    }
                    WalkEvent::UnsupportedName { path } => {
                        let rel = pass.parent_rel_of(&root, &path);
                        pass.report.record(
                            ProblemKind::UnsupportedName,
                            &share,
                            &rel,
                            format!("{} on {}", path.display(), drive.id),
                        );
                    }
                }
                ControlFlow::Continue(())
            });
            if summary.stopped {
                break;
            }
        }
        Ok(())
    }

    fn scan_entry(&self, pass: &mut Pass<'_>, drive: &Drive, entry: WalkEntry) -> FsckResult<()> {
        let share = pass.share;
        let name = &share.name;
        let landing = self.walker.lookup(&share.landing_zone, &entry.rel)?;

        match entry.kind {
            EntryKind::Symlink => return Ok(()),
            EntryKind::Dir => {
                if !pass.modes.orphans || landing.is_some() {
                    return Ok(());
                }
                pass.report.record(
                    ProblemKind::MissingDirectory,
                    name,
                    &entry.rel,
                    format!("present on {}", drive.id),
                );
                if self.policies.orphans == OrphanPolicy::Adopt {
                    let target = share.landing_path(&entry.rel);
                    fs::create_dir_all(&target)?;
                    let perms = fs::metadata(&entry.path)?.permissions();
                    fs::set_permissions(&target, perms)?;
                    debug!(share = %name, path = %entry.rel, "landing directory recreated");
                }
                return Ok(());
            }
            EntryKind::File => {}
        }

        if pass.modes.usage {
            pass.report.add_usage(name, &drive.id, entry.size);
        }
        if !pass.modes.orphans || landing.is_some() || pass.seen.contains(&entry.rel) {
            return Ok(());
        }

        let metastore = self.replicator.metastore();
        if self.policies.orphans == OrphanPolicy::Flag {
            pass.seen.insert(entry.rel.clone());
            pass.report.record(
                ProblemKind::Orphaned,
                name,
                &entry.rel,
                format!("copy on {} has no landing entry", drive.id),
            );
            return Ok(());
        }

        if metastore.entry(name, &entry.rel)?.is_none() {
            let (checksum, size) = file_checksum(&entry.path)?;
            pass.report.stats.bytes_hashed += size;
            metastore.record_copy(name, &entry.rel, &drive.id, Some(size), Some(checksum))?;
        }
        point_symlink(&share.landing_path(&entry.rel), &entry.path)?;
        pass.report.stats.symlinks_repaired += 1;
        info!(share = %name, path = %entry.rel, drive = %drive.id, "orphaned copy adopted");
        pass.report.record(
            ProblemKind::Orphaned,
            name,
            &entry.rel,
            format!("copy on {} adopted", drive.id),
        );
        if pass.modes.copies {
            self.check_file_logged(pass, &entry.rel);
        } else {
            pass.seen.insert(entry.rel);
        }
        Ok(())
    }
}
