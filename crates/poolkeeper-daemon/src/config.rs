use std::collections::HashSet;
use std::path::{Path, PathBuf};

use poolkeeper_fsck::FsckPolicies;
use poolkeeper_meta::{DriveId, ShareName};
use poolkeeper_pool::{PlacementPolicy, ShareConfig};
use serde::{Deserialize, Serialize};

/// Daemon configuration, read from TOML or JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Metastore, task queue, intake spool and status snapshot live here.
    pub state_dir: PathBuf,
    /// Mount points of the pooled drives.
    pub drives: Vec<PathBuf>,
    /// Shares and their replication policy.
    pub shares: Vec<ShareConfig>,
    /// Concurrent task workers.
    pub workers: usize,
    /// Destination ordering for new copies.
    pub placement: PlacementPolicy,
    /// Drives with less free space are used only when nothing else fits.
    pub min_free_bytes: u64,
    /// A drive path that is not a mount point counts as unavailable.
    pub require_mount_point: bool,
    /// Consistency checker repair policies.
    pub fsck: FsckPolicies,
    /// Program and arguments receiving notifications on stdin; log only when
    /// unset.
    pub notify_command: Option<Vec<String>>,
    /// Program run after a drive is detached, e.g. to reload a file server.
    pub restart_command: Option<Vec<String>>,
    pub probe_interval_secs: u64,
    pub intake_interval_secs: u64,
    /// Pool-wide consistency pass interval; 0 disables it.
    pub fsck_interval_secs: u64,
    /// Drives holding a metastore backup.
    pub backup_metastores: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/poolkeeper"),
            drives: Vec::new(),
            shares: Vec::new(),
            workers: 2,
            placement: PlacementPolicy::MostFree,
            min_free_bytes: 10 * 1024 * 1024 * 1024,
            require_mount_point: true,
            fsck: FsckPolicies::default(),
            notify_command: None,
            restart_command: None,
            probe_interval_secs: 60,
            intake_interval_secs: 1,
            fsck_interval_secs: 0,
            backup_metastores: 2,
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: DaemonConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the pool cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        let mut drives = HashSet::new();
        for mount in &self.drives {
            if !mount.is_absolute() {
                anyhow::bail!("drive mount {} is not an absolute path", mount.display());
            }
            if !drives.insert(DriveId::from_mount(mount)) {
                anyhow::bail!("drive {} is listed twice", mount.display());
            }
        }
        let mut names = HashSet::new();
        for share in &self.shares {
            ShareName::new(share.name.as_str())?;
            if !names.insert(share.name.clone()) {
                anyhow::bail!("share {} is defined twice", share.name);
            }
            if !share.landing_zone.is_absolute() {
                anyhow::bail!("landing zone of share {} is not an absolute path", share.name);
            }
            if let Some(list) = &share.drives {
                if let Some(unknown) = list.iter().find(|d| !drives.contains(*d)) {
                    anyhow::bail!("share {} names unknown drive {}", share.name, unknown);
                }
            }
        }
        if let Some(command) = &self.notify_command {
            if command.is_empty() {
                anyhow::bail!("notify_command is empty");
            }
        }
        if let Some(command) = &self.restart_command {
            if command.is_empty() {
                anyhow::bail!("restart_command is empty");
            }
        }
        Ok(())
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.state_dir.join("meta")
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.state_dir.join("queue")
    }

    /// Task requests waiting to be enqueued by the daemon.
    pub fn spool_dir(&self) -> PathBuf {
        self.state_dir.join("spool")
    }

    pub fn status_path(&self) -> PathBuf {
        self.state_dir.join("status.json")
    }
}
