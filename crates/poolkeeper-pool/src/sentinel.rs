//! Removal session sentinel on a drive root.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

use crate::error::PoolResult;

/// File name of the session sentinel.
pub const SESSION_FILENAME: &str = ".poolkeeper_session";

fn sentinel_path(mount: &Path) -> PathBuf {
    mount.join(SESSION_FILENAME)
}

/// Writes a fresh session id to `mount` and returns it.
pub fn write_session(mount: &Path) -> PoolResult<Uuid> {
    let id = Uuid::new_v4();
    let path = sentinel_path(mount);
    let tmp = mount.join(format!("{}.tmp", SESSION_FILENAME));
    fs::write(&tmp, id.to_string())?;
    fs::rename(&tmp, &path)?;
    Ok(id)
}

/// Reads the session id on `mount`, if any. An unparsable sentinel is
/// reported as absent.
pub fn read_session(mount: &Path) -> PoolResult<Option<Uuid>> {
    match fs::read_to_string(sentinel_path(mount)) {
        Ok(raw) => match Uuid::parse_str(raw.trim()) {
            Ok(id) => Ok(Some(id)),
            Err(e) => {
                warn!(mount = %mount.display(), error = %e, "ignoring malformed session sentinel");
                Ok(None)
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Removes the sentinel; a missing sentinel is not an error.
pub fn clear_session(mount: &Path) -> PoolResult<()> {
    match fs::remove_file(sentinel_path(mount)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
