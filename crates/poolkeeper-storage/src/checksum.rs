//! Content checksums for copy validation.
//!
//! Copies are compared by BLAKE3 digest of their full contents. The digest is
//! stored hex-encoded in the metastore as the reference for later
//! consistency passes.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StorageError, StorageResult};

const READ_BUF_SIZE: usize = 256 * 1024;

/// A BLAKE3 content digest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum([u8; 32]);

impl Checksum {
    /// Digest of an in-memory buffer.
    pub fn of_bytes(data: &[u8]) -> Self {
        Checksum(*blake3::hash(data).as_bytes())
    }

    /// Wraps a finished BLAKE3 digest.
    pub fn of_digest(hash: blake3::Hash) -> Self {
        Checksum(*hash.as_bytes())
    }

    /// Parses the hex form produced by `Display`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        blake3::Hash::from_hex(hex).ok().map(|h| Checksum(*h.as_bytes()))
    }

    /// Hex encoding of the digest.
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Streams `path` through BLAKE3 and returns the digest with the byte count.
pub fn file_checksum(path: &Path) -> StorageResult<(Checksum, u64)> {
    let mut file = File::open(path).map_err(|e| StorageError::at(path, e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf).map_err(|e| StorageError::at(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    let sum = Checksum::of_digest(hasher.finalize());
    debug!(path = %path.display(), size = total, checksum = %sum, "computed checksum");
    Ok((sum, total))
}
