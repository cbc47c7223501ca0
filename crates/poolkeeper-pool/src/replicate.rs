//! Copy creation.
//!
//! The replicator is the only place new copies are made. A copy is placed
//! atomically, hashed as it streams, recorded in the metastore and only then
//! is its destination guard released.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use poolkeeper_meta::{DriveId, Metastore, ShareName};
use poolkeeper_storage::{copy_file_atomic, file_checksum, point_symlink, Checksum, RelPath, StorageError};
use tracing::{debug, info, warn};

use crate::error::PoolResult;
use crate::registry::DriveRegistry;
use crate::share::ShareConfig;

/// What [`Replicator::ensure_copies`] achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationOutcome {
    /// Drives that received a new copy.
    pub created: Vec<DriveId>,
    /// Drives where the copy failed, with the error text.
    pub failed: Vec<(DriveId, String)>,
    /// The source did not match the reference checksum.
    pub source_mismatch: bool,
    /// Bytes written across all new copies.
    pub bytes: u64,
}

impl ReplicationOutcome {
    /// Copies still missing out of `needed`.
    pub fn shortfall(&self, needed: usize) -> usize {
        needed.saturating_sub(self.created.len())
    }
}

/// What [`Replicator::distribute`] achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributeOutcome {
    /// Drives now holding the current content, canonical copy first.
    pub copies: Vec<DriveId>,
    /// Drives where a copy failed.
    pub failed: Vec<(DriveId, String)>,
    /// Copies of older content that were removed.
    pub stale_removed: usize,
    /// Path the landing symlink now points to, when it was replaced.
    pub canonical: Option<PathBuf>,
    /// The source changed while it was being copied.
    pub source_mismatch: bool,
}

/// Creates copies of files onto pool drives.
pub struct Replicator {
    registry: Arc<DriveRegistry>,
    metastore: Arc<Metastore>,
}

impl Replicator {
    /// Creates a replicator.
    pub fn new(registry: Arc<DriveRegistry>, metastore: Arc<Metastore>) -> Self {
        Self { registry, metastore }
    }

    /// The registry copies are placed through.
    pub fn registry(&self) -> &Arc<DriveRegistry> {
        &self.registry
    }

    /// The metastore copies are recorded in.
    pub fn metastore(&self) -> &Arc<Metastore> {
        &self.metastore
    }

    /// Makes up to `needed` new copies of `source` as `share/path`, on
    /// drives outside `exclude`.
    ///
    /// A failed destination is replaced by the next ranked drive. When
    /// `reference` is given every copy must hash to it; a source that does
    /// not stops the attempt.
    pub fn ensure_copies(
        &self,
        share: &ShareName,
        path: &RelPath,
        source: &Path,
        exclude: &BTreeSet<DriveId>,
        needed: usize,
        reference: Option<&Checksum>,
    ) -> PoolResult<ReplicationOutcome> {
        let mut outcome = ReplicationOutcome::default();
        let mut skip = exclude.clone();

        while outcome.created.len() < needed && !outcome.source_mismatch {
            let guards = self
                .registry
                .select_destination_drives(share, needed - outcome.created.len(), &skip)?;
            if guards.is_empty() {
                break;
            }
            for guard in guards {
                skip.insert(guard.id().clone());
                let dst = guard.drive().copy_path(share, path);
                match copy_file_atomic(source, &dst, reference) {
                    Ok(stats) => {
                        self.metastore.record_copy(
                            share,
                            path,
                            guard.id(),
                            Some(stats.bytes),
                            Some(stats.checksum),
                        )?;
                        self.registry.consume_space(guard.id(), stats.bytes);
                        outcome.bytes += stats.bytes;
                        outcome.created.push(guard.id().clone());
                        debug!(%share, %path, drive = %guard.id(), bytes = stats.bytes, "copy created");
                    }
                    Err(e @ StorageError::ChecksumMismatch { .. }) => {
                        warn!(%share, %path, source = %source.display(), error = %e, "source does not match reference");
                        outcome.failed.push((guard.id().clone(), e.to_string()));
                        outcome.source_mismatch = true;
                        break;
                    }
                    Err(e) => {
                        warn!(%share, %path, drive = %guard.id(), error = %e, "copy failed");
                        outcome.failed.push((guard.id().clone(), e.to_string()));
                    }
                }
            }
        }

        if !outcome.created.is_empty() {
            debug!(
                %share,
                %path,
                created = outcome.created.len(),
                needed,
                failed = outcome.failed.len(),
                "replication done"
            );
        }
        Ok(outcome)
    }

    /// Spreads new content of `share/path` over the pool.
    ///
    /// `source` holds the new content: either the regular file in the
    /// landing zone, or a copy on `source_drive` that was rewritten in place.
    /// Previous holders are refreshed first so the file stays where it was,
    /// holders beyond `needed` lose their stale copy, and the count is then
    /// topped up. A landing-zone source is replaced by a symlink to the first
    /// copy once at least one copy exists.
    pub fn distribute(
        &self,
        share: &ShareConfig,
        path: &RelPath,
        source: &Path,
        source_drive: Option<&DriveId>,
        needed: usize,
    ) -> PoolResult<DistributeOutcome> {
        let (reference, size) = file_checksum(source)?;
        let mut outcome = DistributeOutcome::default();
        if let Some(drive) = source_drive {
            self.metastore.set_reference(&share.name, path, size, reference)?;
            self.metastore.record_copy(&share.name, path, drive, Some(size), Some(reference))?;
            outcome.copies.push(drive.clone());
        }

        let holders: Vec<DriveId> = self
            .metastore
            .copies_of(&share.name, path)?
            .into_iter()
            .filter(|d| Some(d) != source_drive)
            .collect();
        let mut tried: BTreeSet<DriveId> = outcome.copies.iter().cloned().collect();
        for holder in holders {
            tried.insert(holder.clone());
            let guard = if outcome.copies.len() < needed && share.is_eligible(&holder) {
                self.registry.reserve(&holder)
            } else {
                None
            };
            if let Some(guard) = guard {
                let dst = guard.drive().copy_path(&share.name, path);
                match copy_file_atomic(source, &dst, Some(&reference)) {
                    Ok(stats) => {
                        self.metastore
                            .record_copy(&share.name, path, &holder, Some(stats.bytes), Some(stats.checksum))?;
                        outcome.copies.push(holder);
                        continue;
                    }
                    Err(e @ StorageError::ChecksumMismatch { .. }) => {
                        warn!(share = %share.name, %path, error = %e, "source changed during distribution");
                        outcome.source_mismatch = true;
                        return Ok(outcome);
                    }
                    Err(e) => {
                        warn!(share = %share.name, %path, drive = %holder, error = %e, "refreshing copy failed");
                        outcome.failed.push((holder.clone(), e.to_string()));
                    }
                }
            }
            self.drop_stale(share, path, &holder)?;
            outcome.stale_removed += 1;
        }

        if outcome.copies.len() < needed {
            let more = self.ensure_copies(
                &share.name,
                path,
                source,
                &tried,
                needed - outcome.copies.len(),
                Some(&reference),
            )?;
            outcome.copies.extend(more.created);
            outcome.failed.extend(more.failed);
            outcome.source_mismatch |= more.source_mismatch;
        }

        if source_drive.is_none() {
            if let Some(first) = outcome.copies.first() {
                let target = self.registry.drive(first)?.copy_path(&share.name, path);
                point_symlink(&share.landing_path(path), &target)?;
                outcome.canonical = Some(target);
            }
        }
        info!(
            share = %share.name,
            %path,
            copies = outcome.copies.len(),
            needed,
            stale = outcome.stale_removed,
            "file distributed"
        );
        Ok(outcome)
    }

    fn drop_stale(&self, share: &ShareConfig, path: &RelPath, holder: &DriveId) -> PoolResult<()> {
        self.metastore.remove_copy(&share.name, path, holder)?;
        let Ok(drive) = self.registry.drive(holder) else {
            return Ok(());
        };
        if !drive.is_readable() {
            return Ok(());
        }
        match fs::remove_file(drive.copy_path(&share.name, path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
