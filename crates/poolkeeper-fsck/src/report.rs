//! Consistency check findings.

use std::collections::BTreeMap;
use std::fmt;

use poolkeeper_meta::{DriveId, ShareName, Timestamp};
use poolkeeper_pool::{Notification, ScopeSummary};
use poolkeeper_storage::RelPath;
use serde::Serialize;

/// Severity of a problem kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Data is at risk.
    Error,
    /// Drift that was or can be repaired.
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Warning => write!(f, "WARNING"),
        }
    }
}

/// Kinds of problems a pass can report.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProblemKind {
    /// A copy on a drive that neither the landing zone nor the metastore
    /// knows about.
    Orphaned,
    /// A copy that does not match its reference size or checksum.
    WrongChecksum,
    /// A directory on a drive with no landing-zone counterpart.
    MissingDirectory,
    /// A landing symlink that did not resolve to a valid copy.
    BrokenSymlink,
    /// Fewer valid copies than required after repair.
    UnderReplicated,
    /// A recorded copy that is not on its drive.
    MissingCopy,
    /// A directory that could not be listed.
    ListDirFailed,
    /// A copy that could not be created.
    CopyFailed,
    /// An entry whose name is not valid UTF-8; it is left untouched.
    UnsupportedName,
}

impl ProblemKind {
    /// Every kind, in report order.
    pub const ALL: [ProblemKind; 9] = [
        ProblemKind::Orphaned,
        ProblemKind::WrongChecksum,
        ProblemKind::MissingDirectory,
        ProblemKind::BrokenSymlink,
        ProblemKind::UnderReplicated,
        ProblemKind::MissingCopy,
        ProblemKind::ListDirFailed,
        ProblemKind::CopyFailed,
        ProblemKind::UnsupportedName,
    ];

    /// Kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProblemKind::Orphaned => "orphaned",
            ProblemKind::WrongChecksum => "wrong-checksum",
            ProblemKind::MissingDirectory => "missing-directory",
            ProblemKind::BrokenSymlink => "broken-symlink",
            ProblemKind::UnderReplicated => "under-replicated",
            ProblemKind::MissingCopy => "missing-copy",
            ProblemKind::ListDirFailed => "list-dir-failed",
            ProblemKind::CopyFailed => "copy-failed",
            ProblemKind::UnsupportedName => "unsupported-name",
        }
    }

    /// How serious the kind is.
    pub fn severity(&self) -> Severity {
        match self {
            ProblemKind::WrongChecksum
            | ProblemKind::UnderReplicated
            | ProblemKind::ListDirFailed
            | ProblemKind::CopyFailed
            | ProblemKind::UnsupportedName => Severity::Error,
            ProblemKind::Orphaned
            | ProblemKind::MissingDirectory
            | ProblemKind::BrokenSymlink
            | ProblemKind::MissingCopy => Severity::Warning,
        }
    }
}

impl fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Problem {
    /// Share of the file.
    pub share: ShareName,
    /// Share-relative path.
    pub path: RelPath,
    /// What was found and done.
    pub detail: String,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}: {}", self.share, self.path.as_str(), self.detail)
    }
}

/// Repair counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FsckStats {
    /// Landing entries examined.
    pub files_checked: u64,
    /// Directories walked, in the landing zone and on drives.
    pub dirs_checked: u64,
    /// Landing files distributed for the first time.
    pub distributed: u64,
    /// Copies created to reach the copy count.
    pub copies_created: u64,
    /// Surplus copies removed.
    pub copies_trimmed: u64,
    /// Unrecorded copies added to the metastore.
    pub copies_adopted: u64,
    /// Distrusted copies moved to quarantine.
    pub copies_quarantined: u64,
    /// Distrusted copies deleted.
    pub copies_deleted: u64,
    /// Landing symlinks repointed or recreated.
    pub symlinks_repaired: u64,
    /// Metastore records corrected.
    pub records_fixed: u64,
    /// Bytes hashed while validating.
    pub bytes_hashed: u64,
}

/// Outcome of a pass.
#[derive(Clone, Debug, Serialize)]
pub struct FsckReport {
    /// Findings by kind.
    pub problems: BTreeMap<ProblemKind, Vec<Problem>>,
    /// Repair counters.
    pub stats: FsckStats,
    /// Bytes of valid copies per share and drive, when requested.
    pub usage: BTreeMap<ShareName, BTreeMap<DriveId, u64>>,
    /// The pass stopped early.
    pub cancelled: bool,
    /// When the pass began.
    pub started_at: Timestamp,
    /// When the pass ended.
    pub finished_at: Option<Timestamp>,
}

impl Default for FsckReport {
    fn default() -> Self {
        Self::new()
    }
}

impl FsckReport {
    /// An empty report started now.
    pub fn new() -> Self {
        Self {
            problems: BTreeMap::new(),
            stats: FsckStats::default(),
            usage: BTreeMap::new(),
            cancelled: false,
            started_at: Timestamp::now(),
            finished_at: None,
        }
    }

    /// Adds a finding.
    pub fn record(&mut self, kind: ProblemKind, share: &ShareName, path: &RelPath, detail: impl Into<String>) {
        self.problems.entry(kind).or_default().push(Problem {
            share: share.clone(),
            path: path.clone(),
            detail: detail.into(),
        });
    }

    /// Adds `bytes` to the usage of `share` on `drive`.
    pub fn add_usage(&mut self, share: &ShareName, drive: &DriveId, bytes: u64) {
        *self
            .usage
            .entry(share.clone())
            .or_default()
            .entry(drive.clone())
            .or_insert(0) += bytes;
    }

    /// Findings of one kind.
    pub fn problems_of(&self, kind: ProblemKind) -> &[Problem] {
        self.problems.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of findings.
    pub fn problem_count(&self) -> usize {
        self.problems.values().map(Vec::len).sum()
    }

    /// True when nothing was found.
    pub fn is_clean(&self) -> bool {
        self.problem_count() == 0
    }

    /// Number of error-severity findings.
    pub fn errors(&self) -> usize {
        self.problems
            .iter()
            .filter(|(k, _)| k.severity() == Severity::Error)
            .map(|(_, v)| v.len())
            .sum()
    }

    /// Merges another report into this one.
    pub fn merge(&mut self, other: FsckReport) {
        for (kind, list) in other.problems {
            self.problems.entry(kind).or_default().extend(list);
        }
        let s = &mut self.stats;
        let o = other.stats;
        s.files_checked += o.files_checked;
        s.dirs_checked += o.dirs_checked;
        s.distributed += o.distributed;
        s.copies_created += o.copies_created;
        s.copies_trimmed += o.copies_trimmed;
        s.copies_adopted += o.copies_adopted;
        s.copies_quarantined += o.copies_quarantined;
        s.copies_deleted += o.copies_deleted;
        s.symlinks_repaired += o.symlinks_repaired;
        s.records_fixed += o.records_fixed;
        s.bytes_hashed += o.bytes_hashed;
        for (share, drives) in other.usage {
            for (drive, bytes) in drives {
                self.add_usage(&share, &drive, bytes);
            }
        }
        self.cancelled |= other.cancelled;
    }

    /// Marks the report finished.
    pub fn finish(&mut self) {
        self.finished_at = Some(Timestamp::now());
    }

    /// Counters in the shape drive removal consumes.
    pub fn scope_summary(&self) -> ScopeSummary {
        ScopeSummary {
            files_checked: self.stats.files_checked,
            copies_created: self.stats.copies_created + self.stats.distributed,
            checksum_mismatches: self.problems_of(ProblemKind::WrongChecksum).len() as u64,
            symlinks_repaired: self.stats.symlinks_repaired,
            problems: self.problem_count() as u64,
        }
    }

    /// Human-readable report for the operator.
    pub fn to_notification(&self, scope: &str) -> Notification {
        let subject = if self.is_clean() {
            format!("fsck of {} completed without problems", scope)
        } else {
            format!("fsck of {} found {} problems", scope, self.problem_count())
        };
        Notification::new(subject, self.to_string())
    }
}

const LISTED_PER_KIND: usize = 50;

impl fmt::Display for FsckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.stats;
        writeln!(
            f,
            "checked {} files in {} directories; distributed {}, created {}, trimmed {}, adopted {}, \
             quarantined {}, deleted {}, symlinks repaired {}, records fixed {}",
            s.files_checked,
            s.dirs_checked,
            s.distributed,
            s.copies_created,
            s.copies_trimmed,
            s.copies_adopted,
            s.copies_quarantined,
            s.copies_deleted,
            s.symlinks_repaired,
            s.records_fixed,
        )?;
        if self.cancelled {
            writeln!(f, "the pass was cancelled before it finished")?;
        }
        for kind in ProblemKind::ALL {
            let list = self.problems_of(kind);
            if list.is_empty() {
                continue;
            }
            writeln!(f, "[{}] {} ({})", kind.severity(), kind, list.len())?;
            for problem in list.iter().take(LISTED_PER_KIND) {
                writeln!(f, "  {}", problem)?;
            }
            if list.len() > LISTED_PER_KIND {
                writeln!(f, "  ... and {} more", list.len() - LISTED_PER_KIND)?;
            }
        }
        for (share, drives) in &self.usage {
            for (drive, bytes) in drives {
                writeln!(f, "usage {} on {}: {} bytes", share, drive, bytes)?;
            }
        }
        Ok(())
    }
}
