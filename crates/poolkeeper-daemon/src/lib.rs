//! The poolkeeper daemon: configuration, wiring, task intake, status and
//! the operator command line.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod spool;
pub mod status;

pub use config::DaemonConfig;
pub use daemon::Daemon;
pub use spool::Spool;
pub use status::StatusSnapshot;
