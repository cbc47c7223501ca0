use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use poolkeeper_fsck::FsckModes;
use poolkeeper_meta::{DriveId, ShareName};
use poolkeeper_queue::{FsckOptions, TaskKind, TaskOptions, TaskRequest};
use poolkeeper_storage::RelPath;

use crate::config::DaemonConfig;
use crate::spool::Spool;
use crate::status::StatusSnapshot;

#[derive(Parser)]
#[command(name = "pk-daemon")]
#[command(about = "poolkeeper storage pool daemon and operator CLI", long_about = None)]
pub struct Cli {
    #[arg(short, long, env = "POOLKEEPER_CONFIG", default_value = "/etc/poolkeeper/poolkeeper.toml")]
    pub config: PathBuf,

    /// Log as JSON lines.
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the daemon in the foreground.
    Serve,
    /// Queue a consistency pass.
    Fsck {
        /// Limit the pass to one share.
        #[arg(short, long)]
        share: Option<String>,
        /// Limit the pass to a subtree of the share.
        #[arg(long, requires = "share")]
        subtree: Option<String>,
        /// Verify copy contents against the recorded checksum.
        #[arg(long)]
        checksums: bool,
        /// Recompute per-share usage.
        #[arg(long)]
        usage: bool,
        /// Skip scanning drives for unrecorded copies.
        #[arg(long)]
        no_orphans: bool,
        /// Send the report even when nothing was found.
        #[arg(long)]
        notify: bool,
    },
    /// Queue the removal of a drive.
    RemoveDrive {
        mount: PathBuf,
        /// The drive is already unreachable.
        #[arg(long)]
        gone: bool,
    },
    /// Show the last status the daemon published.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Queue a file event, as the file server hook does.
    Enqueue {
        kind: String,
        share: String,
        path: String,
        #[arg(long)]
        to_share: Option<String>,
        #[arg(long)]
        to: Option<String>,
        #[arg(long, default_value = "")]
        options: String,
    },
}

impl Cli {
    /// Runs every command except `serve`.
    pub fn run(&self, config: &DaemonConfig) -> Result<()> {
        let spool = Spool::new(config.spool_dir());
        match &self.command {
            Command::Serve => anyhow::bail!("serve is handled by the daemon entry point"),
            Command::Fsck {
                share,
                subtree,
                checksums,
                usage,
                no_orphans,
                notify,
            } => {
                let share = share.as_deref().map(ShareName::new).transpose()?;
                let subtree = subtree.as_deref().map(RelPath::new).transpose()?;
                let options = TaskOptions::Fsck(FsckOptions {
                    modes: FsckModes {
                        copies: true,
                        orphans: !no_orphans,
                        usage: *usage,
                        checksums: *checksums,
                    },
                    subtree,
                    notify: *notify,
                });
                submit(&spool, TaskRequest::fsck(share, &options))
            }
            Command::RemoveDrive { mount, gone } => {
                if !config.drives.iter().any(|d| same_mount(d, mount)) {
                    anyhow::bail!("{} is not a configured drive", mount.display());
                }
                submit(&spool, TaskRequest::remove_drive(DriveId::from_mount(mount), *gone))
            }
            Command::Status { json } => {
                let path = config.status_path();
                let snapshot = StatusSnapshot::read(&path)
                    .with_context(|| format!("reading {}; is the daemon running?", path.display()))?;
                if *json {
                    println!("{}", serde_json::to_string_pretty(&snapshot)?);
                } else {
                    print!("{}", snapshot);
                }
                Ok(())
            }
            Command::Enqueue {
                kind,
                share,
                path,
                to_share,
                to,
                options,
            } => {
                let kind: TaskKind = kind.parse()?;
                let share = ShareName::new(share)?;
                let mut request = TaskRequest::new(kind, share.clone(), RelPath::new(path)?).with_options(options.as_str());
                if let Some(to) = to {
                    let to_share = match to_share {
                        Some(name) => ShareName::new(name)?,
                        None => share,
                    };
                    request.target = Some((to_share, RelPath::new(to)?));
                }
                submit(&spool, request)
            }
        }
    }
}

fn same_mount(a: &Path, b: &Path) -> bool {
    DriveId::from_mount(a) == DriveId::from_mount(b)
}

fn submit(spool: &Spool, request: TaskRequest) -> Result<()> {
    let file = spool.submit(&request)?;
    println!("queued {} ({})", request.kind, file.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn spooled(dir: &Path) -> Vec<TaskRequest> {
        let mut files: Vec<_> = std::fs::read_dir(dir).unwrap().map(|e| e.unwrap().path()).collect();
        files.sort();
        files
            .iter()
            .map(|p| serde_json::from_slice(&std::fs::read(p).unwrap()).unwrap())
            .collect()
    }

    fn config(dir: &Path) -> DaemonConfig {
        DaemonConfig {
            state_dir: dir.to_path_buf(),
            drives: vec![PathBuf::from("/mnt/hdd0")],
            ..DaemonConfig::default()
        }
    }

    #[test]
    fn test_fsck_command_spools_request() {
        let dir = tempdir().unwrap();
        let cli = Cli::parse_from(["pk-daemon", "fsck", "--share", "docs", "--subtree", "a/b", "--no-orphans"]);
        cli.run(&config(dir.path())).unwrap();

        let requests = spooled(&dir.path().join("spool"));
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].kind, TaskKind::Fsck);
        match requests[0].validate().unwrap() {
            TaskOptions::Fsck(fsck) => {
                assert!(!fsck.modes.orphans);
                assert_eq!(fsck.subtree.unwrap().as_str(), "a/b");
            }
            other => panic!("unexpected options {:?}", other),
        }
    }

    #[test]
    fn test_remove_unknown_drive_refused() {
        let dir = tempdir().unwrap();
        let cli = Cli::parse_from(["pk-daemon", "remove-drive", "/mnt/hdd9"]);
        assert!(cli.run(&config(dir.path())).is_err());

        let cli = Cli::parse_from(["pk-daemon", "remove-drive", "/mnt/hdd0/", "--gone"]);
        cli.run(&config(dir.path())).unwrap();
        let requests = spooled(&dir.path().join("spool"));
        assert_eq!(requests[0].drive, Some(DriveId::from_mount(Path::new("/mnt/hdd0"))));
    }

    #[test]
    fn test_enqueue_rename_defaults_to_same_share() {
        let dir = tempdir().unwrap();
        let cli = Cli::parse_from(["pk-daemon", "enqueue", "rename", "docs", "old.txt", "--to", "new.txt"]);
        cli.run(&config(dir.path())).unwrap();
        let requests = spooled(&dir.path().join("spool"));
        let (share, to) = requests[0].target.clone().unwrap();
        assert_eq!(share.as_str(), "docs");
        assert_eq!(to.as_str(), "new.txt");
    }

    #[test]
    fn test_enqueue_unknown_kind_refused() {
        let dir = tempdir().unwrap();
        let cli = Cli::parse_from(["pk-daemon", "enqueue", "explode", "docs", "a"]);
        assert!(cli.run(&config(dir.path())).is_err());
    }
}
