//! Status snapshot the daemon publishes for the `status` command.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use poolkeeper_meta::Timestamp;
use poolkeeper_pool::{Drive, DriveRegistry, ShareConfig};
use poolkeeper_queue::{QueueResult, QueueStats, TaskQueue, TaskStatus};
use serde::{Deserialize, Serialize};

const LISTED_FAILURES: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareStatus {
    #[serde(flatten)]
    pub config: ShareConfig,
    /// Copy count resolved against the current drives.
    pub required: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub running: usize,
    pub archived: usize,
    pub failed: usize,
}

impl From<QueueStats> for QueueCounts {
    fn from(stats: QueueStats) -> Self {
        Self {
            pending: stats.pending,
            running: stats.running,
            archived: stats.archived,
            failed: stats.failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedTask {
    pub id: u64,
    pub task: String,
    pub error: String,
}

/// Drives, shares and queue counters at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub written_at: Timestamp,
    pub drives: Vec<Drive>,
    pub shares: Vec<ShareStatus>,
    pub queue: QueueCounts,
    /// Most recent failures, newest first.
    pub recent_failures: Vec<FailedTask>,
}

impl StatusSnapshot {
    pub fn collect(registry: &DriveRegistry, queue: &TaskQueue) -> QueueResult<Self> {
        let mut drives = registry.drives();
        drives.sort_by(|a, b| a.id.cmp(&b.id));
        let mut shares = Vec::new();
        for config in registry.shares() {
            let required = registry.required_copies(&config.name)?;
            shares.push(ShareStatus { config, required });
        }
        shares.sort_by(|a, b| a.config.name.cmp(&b.config.name));

        let recent_failures = queue
            .list(TaskStatus::Failed)?
            .into_iter()
            .rev()
            .take(LISTED_FAILURES)
            .map(|t| FailedTask {
                id: t.id,
                task: t.describe(),
                error: t.result.unwrap_or_default(),
            })
            .collect();

        Ok(Self {
            written_at: Timestamp::now(),
            drives,
            shares,
            queue: queue.stats()?.into(),
            recent_failures,
        })
    }

    /// Replaces the snapshot at `path`.
    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&serde_json::to_vec_pretty(self)?)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

fn gib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "as of {}", self.written_at)?;
        writeln!(f, "Drives:")?;
        for d in &self.drives {
            writeln!(
                f,
                "  {:<32} {:<7} {:>10.1} / {:>10.1} GiB free{}",
                d.id.as_str(),
                format!("{:?}", d.state).to_lowercase(),
                gib(d.free_bytes),
                gib(d.total_bytes),
                if d.available { "" } else { "  (unavailable)" }
            )?;
        }
        writeln!(f, "Shares:")?;
        for s in &self.shares {
            writeln!(
                f,
                "  {:<20} copies {} ({} required)  {}",
                s.config.name,
                s.config.copies,
                s.required,
                s.config.landing_zone.display()
            )?;
        }
        let q = &self.queue;
        writeln!(
            f,
            "Tasks: {} pending, {} running, {} archived, {} failed",
            q.pending, q.running, q.archived, q.failed
        )?;
        for failure in &self.recent_failures {
            writeln!(f, "  {}: {}", failure.task, failure.error)?;
        }
        Ok(())
    }
}
