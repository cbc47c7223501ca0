//! Atomic file placement on a drive.
//!
//! A copy is written next to its destination under a hidden partial name,
//! hashed while it streams, fsynced and only then renamed into place. Any
//! failure, including a checksum mismatch against the caller's reference,
//! removes the partial file so no phantom copy is left behind.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::checksum::Checksum;
use crate::error::{StorageError, StorageResult};

/// Suffix of in-progress copies.
pub const PARTIAL_SUFFIX: &str = ".pk-partial";

const COPY_BUF_SIZE: usize = 1024 * 1024;

/// Result of a completed copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CopyStats {
    /// Bytes written.
    pub bytes: u64,
    /// Digest of the bytes written.
    pub checksum: Checksum,
}

/// True for file names produced by an interrupted [`copy_file_atomic`].
pub fn is_partial_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX)
}

fn partial_path(dst: &Path) -> StorageResult<PathBuf> {
    let name = dst
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StorageError::InvalidPath(dst.display().to_string()))?;
    Ok(dst.with_file_name(format!(".{}{}", name, PARTIAL_SUFFIX)))
}

/// Copies `src` to `dst` atomically, creating parent directories.
///
/// When `expected` is given the written bytes must hash to it, otherwise the
/// partial copy is discarded and [`StorageError::ChecksumMismatch`] returned.
/// Permission bits of the source are carried over.
pub fn copy_file_atomic(src: &Path, dst: &Path, expected: Option<&Checksum>) -> StorageResult<CopyStats> {
    let meta = fs::metadata(src).map_err(|e| StorageError::at(src, e))?;
    if !meta.is_file() {
        return Err(StorageError::NotAFile(src.to_path_buf()));
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::at(parent, e))?;
    }

    let tmp = partial_path(dst)?;
    match write_partial(src, &tmp, expected) {
        Ok(stats) => {
            if let Err(e) = fs::set_permissions(&tmp, meta.permissions()) {
                warn!(path = %tmp.display(), error = %e, "failed to carry permissions");
            }
            if let Err(e) = fs::rename(&tmp, dst) {
                discard(&tmp);
                return Err(StorageError::at(dst, e));
            }
            debug!(src = %src.display(), dst = %dst.display(), bytes = stats.bytes, "copy placed");
            Ok(stats)
        }
        Err(e) => {
            discard(&tmp);
            Err(e)
        }
    }
}

fn write_partial(src: &Path, tmp: &Path, expected: Option<&Checksum>) -> StorageResult<CopyStats> {
    let mut input = File::open(src).map_err(|e| StorageError::at(src, e))?;
    let mut output = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(tmp)
        .map_err(|e| StorageError::at(tmp, e))?;

    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut bytes = 0u64;
    loop {
        let n = input.read(&mut buf).map_err(|e| StorageError::at(src, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        output
            .write_all(&buf[..n])
            .map_err(|e| StorageError::at(tmp, e))?;
        bytes += n as u64;
    }
    output.sync_all().map_err(|e| StorageError::at(tmp, e))?;

    let checksum = Checksum::of_digest(hasher.finalize());
    if let Some(expected) = expected {
        if *expected != checksum {
            return Err(StorageError::ChecksumMismatch {
                path: src.to_path_buf(),
                expected: expected.to_hex(),
                actual: checksum.to_hex(),
            });
        }
    }
    Ok(CopyStats { bytes, checksum })
}

/// Makes `dst` carry the permission bits and ownership of `src`.
/// Returns true when anything changed.
pub fn copy_attributes(src: &Path, dst: &Path) -> StorageResult<bool> {
    let want = fs::metadata(src).map_err(|e| StorageError::at(src, e))?;
    let have = fs::metadata(dst).map_err(|e| StorageError::at(dst, e))?;
    let mut changed = false;
    if want.permissions().mode() != have.permissions().mode() {
        fs::set_permissions(dst, want.permissions()).map_err(|e| StorageError::at(dst, e))?;
        changed = true;
    }
    if want.uid() != have.uid() || want.gid() != have.gid() {
        std::os::unix::fs::chown(dst, Some(want.uid()), Some(want.gid())).map_err(|e| StorageError::at(dst, e))?;
        changed = true;
    }
    Ok(changed)
}

fn discard(tmp: &Path) {
    if let Err(e) = fs::remove_file(tmp) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %tmp.display(), error = %e, "failed to discard partial copy");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_copy_creates_parents_and_hashes() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.txt");
        fs::write(&src, b"hello pool").unwrap();
        let dst = dir.path().join("hdd1/docs/sub/src.txt");

        let stats = copy_file_atomic(&src, &dst, None).unwrap();
        assert_eq!(stats.bytes, 10);
        assert_eq!(stats.checksum, Checksum::of_bytes(b"hello pool"));
        assert_eq!(fs::read(&dst).unwrap(), b"hello pool");
    }

    #[test]
    fn test_mismatch_discards_partial() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.txt");
        fs::write(&src, b"actual").unwrap();
        let dst = dir.path().join("out/src.txt");
        let wrong = Checksum::of_bytes(b"expected");

        let err = copy_file_atomic(&src, &dst, Some(&wrong)).unwrap_err();
        assert!(matches!(err, StorageError::ChecksumMismatch { .. }));
        assert!(!dst.exists());
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("out")).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_permissions_carried() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("script.sh");
        fs::write(&src, b"#!/bin/sh").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o750)).unwrap();
        let dst = dir.path().join("copy/script.sh");

        copy_file_atomic(&src, &dst, None).unwrap();
        let mode = fs::metadata(&dst).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o750);
    }

    #[test]
    fn test_copy_attributes_syncs_mode() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"x").unwrap();
        fs::write(&b, b"x").unwrap();
        fs::set_permissions(&a, fs::Permissions::from_mode(0o600)).unwrap();
        fs::set_permissions(&b, fs::Permissions::from_mode(0o644)).unwrap();

        assert!(copy_attributes(&a, &b).unwrap());
        assert_eq!(fs::metadata(&b).unwrap().permissions().mode() & 0o777, 0o600);
        assert!(!copy_attributes(&a, &b).unwrap());
    }

    #[test]
    fn test_source_must_be_file() {
        let dir = tempdir().unwrap();
        let err = copy_file_atomic(dir.path(), &dir.path().join("x"), None).unwrap_err();
        assert!(matches!(err, StorageError::NotAFile(_)));
    }

    #[test]
    fn test_partial_name() {
        assert!(is_partial_name(".report.txt.pk-partial"));
        assert!(!is_partial_name("report.txt"));
    }
}
