//! Pooled drives and their lifecycle.

use std::path::{Path, PathBuf};

use poolkeeper_meta::{DriveId, ShareName};
use poolkeeper_storage::RelPath;
use serde::{Deserialize, Serialize};

use crate::error::{PoolError, PoolResult};

/// Directory on each drive root holding distrusted copies.
pub const QUARANTINE_DIR: &str = ".poolkeeper_quarantine";

/// Suffix of a share directory renamed aside during drive removal.
pub const REMOVING_SUFFIX: &str = ".pk-removing";

/// Lifecycle state of a drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveState {
    /// Accepts new copies.
    Active,
    /// Being removed; its copies are sources only.
    Going,
    /// Removed from the pool; its copies are ignored.
    Gone,
}

impl DriveState {
    /// Checks that `self -> to` is an allowed transition.
    pub fn check_transition(self, drive: &DriveId, to: DriveState) -> PoolResult<()> {
        match (self, to) {
            (DriveState::Active, DriveState::Going) | (DriveState::Going, DriveState::Gone) => Ok(()),
            (from, to) => Err(PoolError::InvalidStateTransition {
                drive: drive.clone(),
                from,
                to,
            }),
        }
    }
}

/// A drive as seen by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drive {
    /// Drive id, derived from the mount path.
    pub id: DriveId,
    /// Mount path `M(D)`.
    pub mount: PathBuf,
    /// Lifecycle state.
    pub state: DriveState,
    /// Free bytes from the last probe, adjusted for copies placed since.
    pub free_bytes: u64,
    /// Total bytes from the last probe.
    pub total_bytes: u64,
    /// Whether the mount was present on the last probe.
    pub available: bool,
}

impl Drive {
    /// A new active drive with no space information yet.
    pub fn new(mount: impl Into<PathBuf>) -> Self {
        let mount = mount.into();
        Self {
            id: DriveId::from_mount(&mount),
            mount,
            state: DriveState::Active,
            free_bytes: 0,
            total_bytes: 0,
            available: true,
        }
    }

    /// `M(D)/S`.
    pub fn share_root(&self, share: &ShareName) -> PathBuf {
        self.mount.join(share.as_str())
    }

    /// `M(D)/S/p`.
    pub fn copy_path(&self, share: &ShareName, path: &RelPath) -> PathBuf {
        path.under(&self.share_root(share))
    }

    /// `M(D)/.poolkeeper_quarantine/S/p`.
    pub fn quarantine_path(&self, share: &ShareName, path: &RelPath) -> PathBuf {
        path.under(&self.mount.join(QUARANTINE_DIR).join(share.as_str()))
    }

    /// `M(D)/S.pk-removing`.
    pub fn removing_root(&self, share: &ShareName) -> PathBuf {
        self.mount.join(format!("{}{}", share.as_str(), REMOVING_SUFFIX))
    }

    /// True when `path` lies on this drive.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.mount)
    }

    /// Free space as a fraction of total; 0 when the total is unknown.
    pub fn free_fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.free_bytes as f64 / self.total_bytes as f64
    }

    /// True when copies may be read from this drive.
    pub fn is_readable(&self) -> bool {
        self.available && self.state != DriveState::Gone
    }

    /// True when the drive may receive new copies.
    pub fn accepts_copies(&self) -> bool {
        self.available && self.state == DriveState::Active
    }
}
