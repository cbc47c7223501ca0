//! Share-relative paths.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// A path relative to a share root, stored with `/` separators.
///
/// The empty path denotes the share root itself. Components are never `.`,
/// `..` or empty, so joining a `RelPath` onto a root can't escape it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelPath(String);

impl RelPath {
    /// The share root.
    pub fn root() -> Self {
        RelPath(String::new())
    }

    /// Parses and normalizes a relative path. Leading/trailing slashes and
    /// `.` components are dropped; `..` is rejected.
    pub fn new(raw: &str) -> StorageResult<Self> {
        let mut parts = Vec::new();
        for part in raw.split('/') {
            match part {
                "" | "." => continue,
                ".." => return Err(StorageError::InvalidPath(raw.to_string())),
                p if p.contains('\0') => return Err(StorageError::InvalidPath(raw.to_string())),
                p => parts.push(p),
            }
        }
        Ok(RelPath(parts.join("/")))
    }

    /// Builds a `RelPath` from `path` stripped of `base`.
    pub fn from_base(base: &Path, path: &Path) -> StorageResult<Self> {
        let stripped = path
            .strip_prefix(base)
            .map_err(|_| StorageError::InvalidPath(path.display().to_string()))?;
        let mut parts = Vec::new();
        for comp in stripped.components() {
            match comp {
                Component::Normal(p) => parts.push(
                    p.to_str()
                        .ok_or_else(|| StorageError::InvalidPath(path.display().to_string()))?
                        .to_string(),
                ),
                Component::CurDir => {}
                _ => return Err(StorageError::InvalidPath(path.display().to_string())),
            }
        }
        Ok(RelPath(parts.join("/")))
    }

    /// The path as a `/`-separated string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the share root.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Joins this path under `base`.
    pub fn under(&self, base: &Path) -> PathBuf {
        if self.is_root() {
            base.to_path_buf()
        } else {
            base.join(&self.0)
        }
    }

    /// Appends one name component.
    pub fn child(&self, name: &str) -> Self {
        if self.is_root() {
            RelPath(name.to_string())
        } else {
            RelPath(format!("{}/{}", self.0, name))
        }
    }

    /// The containing directory, `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(idx) => Some(RelPath(self.0[..idx].to_string())),
            None => Some(RelPath::root()),
        }
    }

    /// The last component.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            self.0.rsplit('/').next()
        }
    }

    /// True when `self` equals `other` or is one of its ancestors, compared
    /// on whole components.
    pub fn is_ancestor_of(&self, other: &RelPath) -> bool {
        if self.is_root() || self.0 == other.0 {
            return true;
        }
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    /// True when one path is an ancestor of the other (or they are equal).
    pub fn overlaps(&self, other: &RelPath) -> bool {
        self.is_ancestor_of(other) || other.is_ancestor_of(self)
    }

    /// Replaces the `from` prefix of this path with `to`.
    pub fn rebase(&self, from: &RelPath, to: &RelPath) -> Option<RelPath> {
        if !from.is_ancestor_of(self) {
            return None;
        }
        let rest = if from.is_root() {
            self.0.as_str()
        } else {
            self.0[from.0.len()..].trim_start_matches('/')
        };
        if rest.is_empty() {
            Some(to.clone())
        } else if to.is_root() {
            Some(RelPath(rest.to_string()))
        } else {
            Some(RelPath(format!("{}/{}", to.0, rest)))
        }
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
