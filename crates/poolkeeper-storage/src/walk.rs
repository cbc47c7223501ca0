//! Recursive tree walk with a Unicode normalization retry.
//!
//! Drives formatted by different systems may store the same name in NFC or
//! NFD form. A lookup that misses is retried once against each normalized
//! form of the relative path before it is reported as missing. The walker
//! never aborts on an unreadable directory: it reports a
//! [`WalkEvent::ListDirFailed`] and moves on. Names that are not valid
//! UTF-8 are reported as [`WalkEvent::UnsupportedName`], never dropped.

use std::fs;
use std::io::ErrorKind;
use std::ops::ControlFlow;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;
use walkdir::{DirEntry, WalkDir};

use crate::copy::is_partial_name;
use crate::error::{StorageError, StorageResult};
use crate::relpath::RelPath;

/// Prefix of every file poolkeeper itself keeps on drives and landing zones.
pub const INTERNAL_PREFIX: &str = ".poolkeeper_";

/// Kind of a walked entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Symbolic link (not followed).
    Symlink,
    /// Directory.
    Dir,
}

/// One entry found during a walk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalkEntry {
    /// Absolute path of the entry.
    pub path: PathBuf,
    /// Path relative to the walk root.
    pub rel: RelPath,
    /// Entry kind.
    pub kind: EntryKind,
    /// Size in bytes for regular files.
    pub size: u64,
}

/// Event delivered to the walk visitor.
#[derive(Debug)]
pub enum WalkEvent {
    /// A file, symlink or directory. Directories are delivered before
    /// their contents.
    Entry(WalkEntry),
    /// A directory could not be listed; its subtree is skipped.
    ListDirFailed {
        /// The unreadable directory.
        path: PathBuf,
        /// The error text.
        error: String,
    },
    /// An entry whose name is not valid UTF-8. It cannot be tracked, so it
    /// is reported instead of visited; a directory's subtree is skipped.
    UnsupportedName {
        /// The entry.
        path: PathBuf,
    },
}

/// Counters from a finished (or stopped) walk.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WalkSummary {
    /// Regular files seen.
    pub files: u64,
    /// Symlinks seen.
    pub symlinks: u64,
    /// Directories seen (excluding the root).
    pub dirs: u64,
    /// Directories that could not be listed.
    pub failures: u64,
    /// Entries skipped for a name that is not valid UTF-8.
    pub unsupported: u64,
    /// True when the visitor asked to stop.
    pub stopped: bool,
}

/// Returns true for names the walker hides from visitors.
pub fn is_internal_name(name: &str) -> bool {
    name.starts_with(INTERNAL_PREFIX) || is_partial_name(name) || (name.starts_with('.') && name.ends_with(".pk-link"))
}

/// Looks up `rel` under `base`, retrying with NFC and NFD forms.
///
/// Returns the path that exists (without following a final symlink), or
/// [`StorageError::NotFound`] when no form exists.
pub fn resolve_with_normalization(base: &Path, rel: &RelPath) -> StorageResult<PathBuf> {
    let direct = rel.under(base);
    if exists_no_follow(&direct)? {
        return Ok(direct);
    }
    for form in normalized_forms(rel.as_str()) {
        let candidate = base.join(&form);
        if exists_no_follow(&candidate)? {
            debug!(requested = %rel, found = %form, "lookup matched normalized name");
            return Ok(candidate);
        }
    }
    Err(StorageError::NotFound(direct))
}

fn normalized_forms(raw: &str) -> Vec<String> {
    let nfc: String = raw.nfc().collect();
    let nfd: String = raw.nfd().collect();
    let mut forms = Vec::with_capacity(2);
    if nfc != raw {
        forms.push(nfc);
    }
    if nfd != raw && !forms.contains(&nfd) {
        forms.push(nfd);
    }
    forms
}

fn exists_no_follow(path: &Path) -> StorageResult<bool> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::at(path, e)),
    }
}

/// Depth-first walker over a directory tree.
#[derive(Clone, Debug)]
pub struct TreeWalker {
    normalization_retry: bool,
}

impl Default for TreeWalker {
    fn default() -> Self {
        Self {
            normalization_retry: true,
        }
    }
}

impl TreeWalker {
    /// Creates a walker; `normalization_retry` enables the NFC/NFD retry.
    pub fn new(normalization_retry: bool) -> Self {
        Self { normalization_retry }
    }

    /// Looks up `rel` under `base`, honouring the retry policy.
    /// Returns `Ok(None)` when the entry does not exist.
    pub fn lookup(&self, base: &Path, rel: &RelPath) -> StorageResult<Option<PathBuf>> {
        let result = if self.normalization_retry {
            resolve_with_normalization(base, rel)
        } else {
            let direct = rel.under(base);
            if exists_no_follow(&direct)? {
                Ok(direct)
            } else {
                Err(StorageError::NotFound(direct))
            }
        };
        match result {
            Ok(p) => Ok(Some(p)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Walks `root/start`, calling `visit` for every entry. `start` is
    /// resolved through [`TreeWalker::lookup`]; a missing start yields an
    /// empty summary. Relative paths in events are relative to `root`.
    pub fn walk<F>(&self, root: &Path, start: &RelPath, mut visit: F) -> WalkSummary
    where
        F: FnMut(WalkEvent) -> ControlFlow<()>,
    {
        let mut summary = WalkSummary::default();
        let start_path = match self.lookup(root, start) {
            Ok(Some(p)) => p,
            Ok(None) => return summary,
            Err(e) => {
                summary.failures += 1;
                let _ = visit(WalkEvent::ListDirFailed {
                    path: start.under(root),
                    error: e.to_string(),
                });
                return summary;
            }
        };

        let meta = match fs::symlink_metadata(&start_path) {
            Ok(m) => m,
            Err(e) => {
                summary.failures += 1;
                let _ = visit(WalkEvent::ListDirFailed {
                    path: start_path,
                    error: e.to_string(),
                });
                return summary;
            }
        };
        if !meta.is_dir() {
            let kind = if meta.file_type().is_symlink() {
                summary.symlinks += 1;
                EntryKind::Symlink
            } else {
                summary.files += 1;
                EntryKind::File
            };
            let entry = WalkEntry {
                path: start_path,
                rel: start.clone(),
                kind,
                size: meta.len(),
            };
            if visit(WalkEvent::Entry(entry)).is_break() {
                summary.stopped = true;
            }
            return summary;
        }

        let mut entries = WalkDir::new(&start_path)
            .follow_links(false)
            .sort_by_file_name()
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_str().map_or(false, is_internal_name));

        while let Some(next) = entries.next() {
            let event = match next {
                Ok(entry) => match rel_below(start, &start_path, entry.path()) {
                    Some(rel) => match self.classify(entry, rel, &mut summary) {
                        Some(walked) => WalkEvent::Entry(walked),
                        None => continue,
                    },
                    None => {
                        warn!(path = ?entry.path(), "name is not valid UTF-8");
                        summary.unsupported += 1;
                        if entry.file_type().is_dir() {
                            entries.skip_current_dir();
                        }
                        WalkEvent::UnsupportedName {
                            path: entry.into_path(),
                        }
                    }
                },
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| start_path.clone());
                    if e.io_error().map_or(false, |io| io.kind() == ErrorKind::NotFound) {
                        debug!(path = %path.display(), "entry vanished during walk");
                        continue;
                    }
                    warn!(dir = %path.display(), error = %e, "list-dir failed");
                    summary.failures += 1;
                    WalkEvent::ListDirFailed {
                        path,
                        error: e.to_string(),
                    }
                }
            };
            if visit(event).is_break() {
                summary.stopped = true;
                break;
            }
        }
        summary
    }

    fn classify(&self, entry: DirEntry, rel: RelPath, summary: &mut WalkSummary) -> Option<WalkEntry> {
        let ft = entry.file_type();
        let kind = if ft.is_dir() {
            EntryKind::Dir
        } else if ft.is_symlink() {
            EntryKind::Symlink
        } else if ft.is_file() {
            EntryKind::File
        } else {
            return None;
        };
        let size = match kind {
            EntryKind::Dir => 0,
            _ => match entry.metadata() {
                Ok(m) => m.len(),
                Err(e) => {
                    debug!(path = %entry.path().display(), error = %e, "skipping unreadable entry");
                    return None;
                }
            },
        };
        match kind {
            EntryKind::Dir => summary.dirs += 1,
            EntryKind::Symlink => summary.symlinks += 1,
            EntryKind::File => summary.files += 1,
        }
        Some(WalkEntry {
            path: entry.into_path(),
            rel,
            kind,
            size,
        })
    }
}

/// `start` extended by the components of `path` below `start_path`, or
/// `None` when one of them is not valid UTF-8.
fn rel_below(start: &RelPath, start_path: &Path, path: &Path) -> Option<RelPath> {
    let suffix = path.strip_prefix(start_path).ok()?;
    let mut rel = start.clone();
    for comp in suffix.components() {
        match comp {
            Component::Normal(name) => rel = rel.child(name.to_str()?),
            _ => return None,
        }
    }
    Some(rel)
}
