#![warn(missing_docs)]

//! poolkeeper storage pool manager
//!
//! Owns the drives and shares of the pool: drive lifecycle, free-space
//! tracking, destination placement, copy creation and the drive removal
//! protocol. Consistency checking and task scheduling live in other crates
//! and are reached through the [`ConsistencyScope`] and
//! [`FollowUpScheduler`] traits.

pub mod drive;
pub mod error;
pub mod notify;
pub mod placement;
pub mod probe;
pub mod registry;
pub mod removal;
pub mod replicate;
pub mod restart;
pub mod sentinel;
pub mod share;

pub use drive::{Drive, DriveState, QUARANTINE_DIR, REMOVING_SUFFIX};
pub use error::{PoolError, PoolResult};
pub use notify::{notify_best_effort, CommandNotifier, LogNotifier, Notification, Notifier};
pub use placement::PlacementPolicy;
pub use probe::{DriveSpace, FreeSpaceProbe, StaticProbe, StatvfsProbe};
pub use registry::{DestinationGuard, DriveRegistry};
pub use removal::{ConsistencyScope, DriveRemover, FollowUpScheduler, RemovalOutcome, ScopeSummary};
pub use replicate::{DistributeOutcome, ReplicationOutcome, Replicator};
pub use restart::{CommandRestartHook, NoopRestartHook, RestartHook};
pub use sentinel::SESSION_FILENAME;
pub use share::{CopyCount, ShareConfig};
