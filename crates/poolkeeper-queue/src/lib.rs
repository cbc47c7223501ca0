#![warn(missing_docs)]

//! poolkeeper task queue
//!
//! File system events and operator requests become tasks. Tasks are stored
//! durably, ordered so that tasks touching overlapping paths run in enqueue
//! order, and drained by a bounded pool of workers that run the handler of
//! each kind on a blocking thread.

pub mod error;
pub mod handlers;
pub mod options;
pub mod queue;
pub mod task;
pub mod worker;

pub use error::{QueueError, QueueResult};
pub use handlers::Handlers;
pub use options::{FsckOptions, TaskOptions};
pub use queue::{QueueStats, TaskQueue};
pub use task::{TaskKind, TaskRecord, TaskRequest, TaskStatus};
pub use worker::{TaskExecutor, WorkerConfig, WorkerHandle, WorkerPool};
