//! Landing-zone symlink maintenance.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{StorageError, StorageResult};

/// Maximum number of links followed before a chain is treated as a loop.
pub const MAX_SYMLINK_HOPS: usize = 8;

/// What a landing-zone entry resolves to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SymlinkStatus {
    /// The path does not exist at all.
    Missing,
    /// The path is not a symlink.
    NotALink,
    /// The chain ends at an existing, non-symlink path.
    Resolved {
        /// Final target of the chain.
        target: PathBuf,
        /// Number of links followed.
        hops: usize,
    },
    /// The chain ends at a path that does not exist.
    Broken {
        /// The dangling target.
        target: PathBuf,
    },
    /// The chain exceeded [`MAX_SYMLINK_HOPS`].
    Loop,
}

impl SymlinkStatus {
    /// The final target when the chain resolves.
    pub fn target(&self) -> Option<&Path> {
        match self {
            SymlinkStatus::Resolved { target, .. } => Some(target),
            _ => None,
        }
    }
}

/// Follows the symlink chain at `link`.
pub fn resolve_chain(link: &Path) -> StorageResult<SymlinkStatus> {
    let first = match fs::symlink_metadata(link) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(SymlinkStatus::Missing),
        Err(e) => return Err(StorageError::at(link, e)),
    };
    if !first.file_type().is_symlink() {
        return Ok(SymlinkStatus::NotALink);
    }

    let mut current = link.to_path_buf();
    for hops in 1..=MAX_SYMLINK_HOPS {
        let raw = fs::read_link(&current).map_err(|e| StorageError::at(&current, e))?;
        let next = if raw.is_absolute() {
            raw
        } else {
            current.parent().unwrap_or_else(|| Path::new("/")).join(raw)
        };
        match fs::symlink_metadata(&next) {
            Ok(m) if m.file_type().is_symlink() => current = next,
            Ok(_) => return Ok(SymlinkStatus::Resolved { target: next, hops }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SymlinkStatus::Broken { target: next })
            }
            Err(e) => return Err(StorageError::at(&next, e)),
        }
    }
    Ok(SymlinkStatus::Loop)
}

/// Points `link` at `target`, replacing whatever is at `link` atomically.
pub fn point_symlink(link: &Path, target: &Path) -> StorageResult<()> {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::at(parent, e))?;
    }
    let name = link
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StorageError::InvalidPath(link.display().to_string()))?;
    let tmp = link.with_file_name(format!(".{}.pk-link", name));
    let _ = fs::remove_file(&tmp);
    symlink(target, &tmp).map_err(|e| StorageError::at(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, link) {
        let _ = fs::remove_file(&tmp);
        return Err(StorageError::at(link, e));
    }
    debug!(link = %link.display(), target = %target.display(), "symlink pointed");
    Ok(())
}
