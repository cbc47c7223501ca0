#![warn(missing_docs)]

//! poolkeeper storage subsystem: on-drive file primitives
//!
//! Everything that touches bytes on a pooled drive goes through this crate:
//! content checksums, atomic copy placement, symlink maintenance and the
//! recursive tree walk used by both the consistency checker and the drive
//! removal protocol.

pub mod checksum;
pub mod copy;
pub mod error;
pub mod relpath;
pub mod symlink;
pub mod walk;

pub use checksum::{file_checksum, Checksum};
pub use copy::{copy_attributes, copy_file_atomic, is_partial_name, CopyStats, PARTIAL_SUFFIX};
pub use error::{StorageError, StorageResult};
pub use relpath::RelPath;
pub use symlink::{point_symlink, resolve_chain, SymlinkStatus, MAX_SYMLINK_HOPS};
pub use walk::{
    is_internal_name, resolve_with_normalization, EntryKind, TreeWalker, WalkEntry, WalkEvent, WalkSummary,
    INTERNAL_PREFIX,
};
