#![warn(missing_docs)]

//! poolkeeper consistency checker
//!
//! Enforces each share's copy count, validates copies against their
//! reference size and checksum, repairs landing-zone symlinks and finds
//! orphaned copies. Drive removal uses it through
//! [`poolkeeper_pool::ConsistencyScope`].

pub mod checker;
pub mod config;
pub mod error;
pub mod landing;
pub mod report;
mod scan;

pub use checker::FsckChecker;
pub use config::{ChecksumPolicy, FsckModes, FsckPolicies, FsckRequest, OrphanPolicy};
pub use error::{FsckError, FsckResult};
pub use landing::{same_file, LandingEntry};
pub use report::{FsckReport, FsckStats, Problem, ProblemKind, Severity};
