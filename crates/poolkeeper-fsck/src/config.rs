//! What a consistency check looks at and how it repairs.

use poolkeeper_meta::ShareName;
use poolkeeper_storage::RelPath;
use serde::{Deserialize, Serialize};

/// Which checks a pass runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsckModes {
    /// Enforce the copy count and repair copies and symlinks.
    pub copies: bool,
    /// Scan drives for files the landing zone does not know about.
    pub orphans: bool,
    /// Account bytes per share and drive.
    pub usage: bool,
    /// Hash every copy against its reference checksum.
    pub checksums: bool,
}

impl Default for FsckModes {
    fn default() -> Self {
        Self {
            copies: true,
            orphans: true,
            usage: false,
            checksums: false,
        }
    }
}

impl FsckModes {
    /// Every check enabled.
    pub fn all() -> Self {
        Self {
            copies: true,
            orphans: true,
            usage: true,
            checksums: true,
        }
    }
}

/// What to do with a copy that fails validation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumPolicy {
    /// Move it under the drive's quarantine directory.
    #[default]
    Quarantine,
    /// Delete it.
    Delete,
    /// Leave it in place; it is reported on every pass.
    Keep,
}

/// What to do with a copy nothing refers to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    /// Give it a landing symlink and a metastore record.
    #[default]
    Adopt,
    /// Report it only.
    Flag,
}

/// Repair policies, usually from configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsckPolicies {
    /// Handling of copies that fail validation.
    pub checksum_mismatch: ChecksumPolicy,
    /// Handling of orphaned copies.
    pub orphans: OrphanPolicy,
}

/// One consistency pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FsckRequest {
    /// Share to check; every share when `None`.
    pub share: Option<ShareName>,
    /// Subtree of `share` to check; the whole share when `None`.
    pub subtree: Option<RelPath>,
    /// Checks to run.
    pub modes: FsckModes,
}

impl FsckRequest {
    /// A pass over every share.
    pub fn all_shares(modes: FsckModes) -> Self {
        Self {
            share: None,
            subtree: None,
            modes,
        }
    }

    /// A pass over one share.
    pub fn share(share: ShareName, modes: FsckModes) -> Self {
        Self {
            share: Some(share),
            subtree: None,
            modes,
        }
    }

    /// Restricts the pass to `subtree`.
    pub fn with_subtree(mut self, subtree: RelPath) -> Self {
        self.subtree = if subtree.is_root() { None } else { Some(subtree) };
        self
    }
}
