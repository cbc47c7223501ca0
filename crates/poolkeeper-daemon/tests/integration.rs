use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use poolkeeper_daemon::{Daemon, DaemonConfig, Spool, StatusSnapshot};
use poolkeeper_meta::{DriveId, ShareName};
use poolkeeper_pool::{CopyCount, DriveState, ShareConfig, StaticProbe};
use poolkeeper_queue::{TaskKind, TaskRequest};
use poolkeeper_storage::RelPath;
use tempfile::{tempdir, TempDir};
use tokio_util::sync::CancellationToken;

fn setup(drives: usize, copies: CopyCount) -> (TempDir, DaemonConfig, Arc<StaticProbe>) {
    let dir = tempdir().unwrap();
    let probe = Arc::new(StaticProbe::new());
    let mut config = DaemonConfig {
        state_dir: dir.path().join("state"),
        min_free_bytes: 0,
        backup_metastores: 0,
        ..DaemonConfig::default()
    };
    for i in 0..drives {
        let mount = dir.path().join(format!("hdd{}", i));
        fs::create_dir_all(&mount).unwrap();
        probe.set(&mount, 5_000_000 - i as u64 * 1000, 5_000_000);
        config.drives.push(mount);
    }
    let landing = dir.path().join("landing/docs");
    fs::create_dir_all(&landing).unwrap();
    config.shares.push(ShareConfig {
        name: ShareName::new("docs").unwrap(),
        landing_zone: landing,
        copies,
        drives: None,
    });
    (dir, config, probe)
}

fn request(kind: TaskKind, path: &str) -> TaskRequest {
    TaskRequest::new(kind, ShareName::new("docs").unwrap(), RelPath::new(path).unwrap())
}

async fn run_until(daemon: &Arc<Daemon>, done: impl Fn(&Daemon) -> bool) -> bool {
    let cancel = CancellationToken::new();
    let run = tokio::spawn(daemon.clone().run(cancel.clone()));
    let mut reached = false;
    for _ in 0..500 {
        if done(daemon) {
            reached = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cancel.cancel();
    run.await.unwrap().unwrap();
    reached
}

fn copies_on_disk(root: &Path, drives: usize, rel: &str) -> usize {
    (0..drives)
        .filter(|i| root.join(format!("hdd{}/docs/{}", i, rel)).is_file())
        .count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rename_then_remove_drive() {
    let (dir, config, probe) = setup(3, CopyCount::Fixed(2));
    fs::write(dir.path().join("landing/docs/report.txt"), b"quarterly").unwrap();
    let spool = Spool::new(config.spool_dir());
    spool.submit(&request(TaskKind::Create, "report.txt")).unwrap();

    let daemon = Arc::new(Daemon::open_with_probe(config.clone(), probe.clone()).unwrap());
    assert!(run_until(&daemon, |d| d.queue().stats().unwrap().archived == 1).await);
    assert_eq!(copies_on_disk(dir.path(), 3, "report.txt"), 2);

    fs::rename(
        dir.path().join("landing/docs/report.txt"),
        dir.path().join("landing/docs/final.txt"),
    )
    .unwrap();
    spool
        .submit(&TaskRequest::relocate(
            ShareName::new("docs").unwrap(),
            RelPath::new("report.txt").unwrap(),
            ShareName::new("docs").unwrap(),
            RelPath::new("final.txt").unwrap(),
        ))
        .unwrap();
    assert!(run_until(&daemon, |d| d.queue().stats().unwrap().archived >= 2).await);
    assert_eq!(copies_on_disk(dir.path(), 3, "report.txt"), 0);
    assert_eq!(copies_on_disk(dir.path(), 3, "final.txt"), 2);
    assert_eq!(fs::read(dir.path().join("landing/docs/final.txt")).unwrap(), b"quarterly");

    let share = ShareName::new("docs").unwrap();
    let final_path = RelPath::new("final.txt").unwrap();
    let victim = daemon
        .metastore()
        .copies_of(&share, &final_path)
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    spool.submit(&TaskRequest::remove_drive(victim.clone(), false)).unwrap();
    assert!(
        run_until(&daemon, |d| {
            let stats = d.queue().stats().unwrap();
            stats.pending == 0 && stats.running == 0 && stats.archived >= 4
        })
        .await
    );

    let holders = daemon.metastore().copies_of(&share, &final_path).unwrap();
    assert_eq!(holders.len(), 2);
    assert!(!holders.contains(&victim));
    assert_eq!(daemon.registry().drive(&victim).unwrap().state, DriveState::Gone);
    assert_eq!(daemon.queue().stats().unwrap().failed, 0);

    let status = StatusSnapshot::read(&config.status_path()).unwrap();
    assert_eq!(status.queue.failed, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_queue_survives_restart() {
    let (dir, config, probe) = setup(2, CopyCount::Max);
    fs::write(dir.path().join("landing/docs/a.txt"), b"a").unwrap();
    {
        let daemon = Daemon::open_with_probe(config.clone(), probe.clone()).unwrap();
        daemon.queue().enqueue(request(TaskKind::Create, "a.txt")).unwrap();
    }

    let daemon = Arc::new(Daemon::open_with_probe(config, probe).unwrap());
    assert_eq!(daemon.queue().stats().unwrap().pending, 1);
    assert!(run_until(&daemon, |d| d.queue().stats().unwrap().archived == 1).await);
    assert_eq!(copies_on_disk(dir.path(), 2, "a.txt"), 2);
    let drive = DriveId::from_mount(&dir.path().join("hdd0"));
    assert!(daemon
        .metastore()
        .copies_of(&ShareName::new("docs").unwrap(), &RelPath::new("a.txt").unwrap())
        .unwrap()
        .contains(&drive));
}
