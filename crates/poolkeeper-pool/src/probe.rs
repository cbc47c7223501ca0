//! Free-space probes.
//!
//! A probe answers two questions about a mount path: is the drive there, and
//! how much room does it have. The registry consumes probes through
//! [`FreeSpaceProbe`] so tests can substitute a [`StaticProbe`].

use std::collections::HashMap;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{PoolError, PoolResult};

/// Space reported for one mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveSpace {
    /// Bytes available to unprivileged writers.
    pub free_bytes: u64,
    /// Total size of the filesystem.
    pub total_bytes: u64,
}

/// Reports free space for drive mounts.
pub trait FreeSpaceProbe: Send + Sync {
    /// Space on `mount`, or `None` when the drive is not available.
    fn probe(&self, mount: &Path) -> PoolResult<Option<DriveSpace>>;
}

/// Probe backed by `statvfs(3)`.
#[derive(Debug, Clone, Default)]
pub struct StatvfsProbe {
    /// Treat a mount path on the same device as its parent as unavailable,
    /// so an unmounted drive is not mistaken for an empty one.
    pub require_mount_point: bool,
}

impl StatvfsProbe {
    /// Creates a probe.
    pub fn new(require_mount_point: bool) -> Self {
        Self { require_mount_point }
    }

    fn is_mount_point(mount: &Path) -> std::io::Result<bool> {
        let own = std::fs::metadata(mount)?;
        let Some(parent) = mount.parent() else {
            return Ok(true);
        };
        let parent = std::fs::metadata(parent)?;
        Ok(own.dev() != parent.dev())
    }
}

impl FreeSpaceProbe for StatvfsProbe {
    fn probe(&self, mount: &Path) -> PoolResult<Option<DriveSpace>> {
        match std::fs::metadata(mount) {
            Ok(m) if m.is_dir() => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        if self.require_mount_point && !Self::is_mount_point(mount)? {
            debug!(mount = %mount.display(), "path is not a mount point");
            return Ok(None);
        }

        let c_path = CString::new(mount.as_os_str().as_bytes()).map_err(|e| PoolError::Probe {
            mount: mount.display().to_string(),
            reason: e.to_string(),
        })?;
        // SAFETY: c_path is NUL-terminated and stat is a valid out-pointer.
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return Err(PoolError::Probe {
                mount: mount.display().to_string(),
                reason: std::io::Error::last_os_error().to_string(),
            });
        }
        let frsize = stat.f_frsize as u64;
        Ok(Some(DriveSpace {
            free_bytes: (stat.f_bavail as u64).saturating_mul(frsize),
            total_bytes: (stat.f_blocks as u64).saturating_mul(frsize),
        }))
    }
}

/// Probe returning configured values.
#[derive(Debug, Default)]
pub struct StaticProbe {
    spaces: Mutex<HashMap<PathBuf, Option<DriveSpace>>>,
}

impl StaticProbe {
    /// Creates an empty probe; unknown mounts report unavailable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the space reported for `mount`.
    pub fn set(&self, mount: impl Into<PathBuf>, free_bytes: u64, total_bytes: u64) {
        self.spaces.lock().insert(
            mount.into(),
            Some(DriveSpace {
                free_bytes,
                total_bytes,
            }),
        );
    }

    /// Reports `mount` as unavailable.
    pub fn set_unavailable(&self, mount: impl Into<PathBuf>) {
        self.spaces.lock().insert(mount.into(), None);
    }
}

impl FreeSpaceProbe for StaticProbe {
    fn probe(&self, mount: &Path) -> PoolResult<Option<DriveSpace>> {
        Ok(self.spaces.lock().get(mount).copied().flatten())
    }
}
