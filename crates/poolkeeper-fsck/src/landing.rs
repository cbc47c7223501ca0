//! Landing-zone entries.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use poolkeeper_storage::{resolve_chain, StorageError, StorageResult, SymlinkStatus};

/// What sits at `L(S)/p`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LandingEntry {
    /// Nothing.
    Missing,
    /// A regular file that has not been distributed yet.
    Regular,
    /// A directory.
    Directory,
    /// A symlink and where its chain ends.
    Link(SymlinkStatus),
}

impl LandingEntry {
    /// Inspects `path` without following it.
    pub fn inspect(path: &Path) -> StorageResult<Self> {
        let meta = match fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LandingEntry::Missing),
            Err(e) => return Err(StorageError::at(path, e)),
        };
        let kind = meta.file_type();
        if kind.is_symlink() {
            Ok(LandingEntry::Link(resolve_chain(path)?))
        } else if kind.is_dir() {
            Ok(LandingEntry::Directory)
        } else {
            Ok(LandingEntry::Regular)
        }
    }

    /// The resolved symlink target, if the entry is a working link.
    pub fn target(&self) -> Option<&Path> {
        match self {
            LandingEntry::Link(status) => status.target(),
            _ => None,
        }
    }

    /// True for a link whose chain dangles or loops.
    pub fn is_broken_link(&self) -> bool {
        matches!(
            self,
            LandingEntry::Link(SymlinkStatus::Broken { .. }) | LandingEntry::Link(SymlinkStatus::Loop)
        )
    }

    /// Where a broken link pointed, for reporting.
    pub fn dangling_target(&self) -> Option<PathBuf> {
        match self {
            LandingEntry::Link(SymlinkStatus::Broken { target }) => Some(target.clone()),
            _ => None,
        }
    }
}

/// True when both paths name the same inode.
pub fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(x), Ok(y)) => x.dev() == y.dev() && x.ino() == y.ino(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poolkeeper_storage::point_symlink;
    use tempfile::tempdir;

    #[test]
    fn test_inspect_kinds() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, b"x").unwrap();
        let link = dir.path().join("l");
        point_symlink(&link, &file).unwrap();
        let dangling = dir.path().join("d");
        point_symlink(&dangling, &dir.path().join("nowhere")).unwrap();

        assert_eq!(LandingEntry::inspect(&dir.path().join("none")).unwrap(), LandingEntry::Missing);
        assert_eq!(LandingEntry::inspect(&file).unwrap(), LandingEntry::Regular);
        assert_eq!(LandingEntry::inspect(dir.path()).unwrap(), LandingEntry::Directory);

        let entry = LandingEntry::inspect(&link).unwrap();
        assert_eq!(entry.target(), Some(file.as_path()));
        assert!(!entry.is_broken_link());

        let entry = LandingEntry::inspect(&dangling).unwrap();
        assert!(entry.is_broken_link());
        assert_eq!(entry.dangling_target(), Some(dir.path().join("nowhere")));
    }

    #[test]
    fn test_same_file() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"x").unwrap();
        fs::write(&b, b"x").unwrap();
        let link = dir.path().join("l");
        point_symlink(&link, &a).unwrap();
        assert!(same_file(&a, &link));
        assert!(!same_file(&a, &b));
        assert!(!same_file(&a, &dir.path().join("missing")));
    }
}
