//! End-to-end task handling on a pool of temporary drives.

mod common;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use common::{rel, TestPool};
use poolkeeper_fsck::FsckModes;
use poolkeeper_pool::{CopyCount, DriveState};
use poolkeeper_queue::{
    FsckOptions, TaskKind, TaskOptions, TaskRequest, TaskStatus, WorkerConfig, WorkerPool,
};
use poolkeeper_storage::resolve_chain;
use tokio_util::sync::CancellationToken;

fn create(pool: &TestPool, share: &str, path: &str) -> u64 {
    pool.enqueue(TaskRequest::new(
        TaskKind::Create,
        poolkeeper_meta::ShareName::new(share).unwrap(),
        rel(path),
    ))
}

fn full_fsck(notify: bool) -> TaskRequest {
    TaskRequest::fsck(
        None,
        &TaskOptions::Fsck(FsckOptions {
            modes: FsckModes::default(),
            subtree: None,
            notify,
        }),
    )
}

fn link_target(pool: &TestPool, share: &str, path: &str) -> std::path::PathBuf {
    resolve_chain(&pool.landing(share).join(path))
        .unwrap()
        .target()
        .unwrap()
        .to_path_buf()
}

#[test]
fn test_create_replicates_and_links() {
    let pool = TestPool::new(3);
    pool.add_share("docs", CopyCount::Fixed(2));
    pool.write("docs", "report.txt", b"quarterly");
    create(&pool, "docs", "report.txt");

    let done = pool.run_all();
    assert_eq!(done[0].status, TaskStatus::Archived);
    assert_eq!(pool.holders("docs", "report.txt").len(), 2);
    let landing = pool.landing("docs").join("report.txt");
    assert!(fs::symlink_metadata(&landing).unwrap().file_type().is_symlink());
    assert_eq!(fs::read(&landing).unwrap(), b"quarterly");
}

#[test]
fn test_rewrite_through_link_refreshes_other_copies() {
    let pool = TestPool::new(3);
    pool.add_share("docs", CopyCount::Fixed(2));
    pool.write("docs", "notes.txt", b"v1");
    create(&pool, "docs", "notes.txt");
    pool.run_all();

    // a client writes through the landing symlink
    fs::write(pool.landing("docs").join("notes.txt"), b"version two").unwrap();
    create(&pool, "docs", "notes.txt");
    pool.run_all();

    let holders = pool.holders("docs", "notes.txt");
    assert_eq!(holders.len(), 2);
    for drive in holders {
        assert_eq!(fs::read(pool.copy(drive, "docs", "notes.txt")).unwrap(), b"version two");
    }
}

#[test]
fn test_create_of_vanished_file_is_superseded() {
    let pool = TestPool::new(2);
    pool.add_share("docs", CopyCount::Fixed(1));
    create(&pool, "docs", "tmp.txt");
    let done = pool.run_all();
    assert_eq!(done[0].status, TaskStatus::Archived);
    assert!(done[0].result.as_deref().unwrap().starts_with("superseded"));
}

#[test]
fn test_delete_removes_every_copy() {
    let pool = TestPool::new(3);
    let share = pool.add_share("docs", CopyCount::Fixed(2));
    pool.write("docs", "old.txt", b"bye");
    create(&pool, "docs", "old.txt");
    pool.run_all();

    fs::remove_file(pool.landing("docs").join("old.txt")).unwrap();
    pool.enqueue(TaskRequest::new(TaskKind::Delete, share.clone(), rel("old.txt")));
    pool.run_all();

    assert!(pool.holders("docs", "old.txt").is_empty());
    assert!(pool
        .replicator
        .metastore()
        .entry(&share, &rel("old.txt"))
        .unwrap()
        .is_none());
}

#[test]
fn test_delete_skipped_when_file_came_back() {
    let pool = TestPool::new(2);
    let share = pool.add_share("docs", CopyCount::Fixed(2));
    pool.write("docs", "a.txt", b"a");
    create(&pool, "docs", "a.txt");
    pool.enqueue(TaskRequest::new(TaskKind::Delete, share, rel("a.txt")));
    let done = pool.run_all();
    assert!(done[1].result.as_deref().unwrap().starts_with("superseded"));
    assert_eq!(pool.holders("docs", "a.txt").len(), 2);
}

#[test]
fn test_rename_moves_copies_and_repoints_link() {
    let pool = TestPool::new(3);
    let share = pool.add_share("docs", CopyCount::Fixed(2));
    pool.write("docs", "draft.txt", b"text");
    create(&pool, "docs", "draft.txt");
    pool.run_all();

    fs::create_dir_all(pool.landing("docs").join("final")).unwrap();
    fs::rename(
        pool.landing("docs").join("draft.txt"),
        pool.landing("docs").join("final/paper.txt"),
    )
    .unwrap();
    pool.enqueue(TaskRequest::relocate(
        share.clone(),
        rel("draft.txt"),
        share.clone(),
        rel("final/paper.txt"),
    ));
    let done = pool.run_all();
    assert_eq!(done[0].kind, TaskKind::Rename);
    assert_eq!(done[0].status, TaskStatus::Archived);

    assert!(pool.holders("docs", "draft.txt").is_empty());
    assert_eq!(pool.holders("docs", "final/paper.txt").len(), 2);
    let target = link_target(&pool, "docs", "final/paper.txt");
    assert!(target.ends_with("docs/final/paper.txt"));
    let record = pool
        .replicator
        .metastore()
        .entry(&share, &rel("final/paper.txt"))
        .unwrap()
        .unwrap();
    assert_eq!(record.drives.len(), 2);
}

#[test]
fn test_move_enforces_target_share_count() {
    let pool = TestPool::new(3);
    let docs = pool.add_share("docs", CopyCount::Fixed(1));
    let archive = pool.add_share("archive", CopyCount::Fixed(3));
    pool.write("docs", "photo.jpg", b"pixels");
    create(&pool, "docs", "photo.jpg");
    pool.run_all();

    fs::rename(
        pool.landing("docs").join("photo.jpg"),
        pool.landing("archive").join("photo.jpg"),
    )
    .unwrap();
    pool.enqueue(TaskRequest::relocate(docs, rel("photo.jpg"), archive, rel("photo.jpg")));
    let done = pool.run_all();
    assert_eq!(done[0].kind, TaskKind::Move);

    assert!(pool.holders("docs", "photo.jpg").is_empty());
    assert_eq!(pool.holders("archive", "photo.jpg").len(), 3);
    assert_eq!(fs::read(pool.landing("archive").join("photo.jpg")).unwrap(), b"pixels");
}

#[test]
fn test_attribute_change_propagates_mode() {
    let pool = TestPool::new(2);
    let share = pool.add_share("docs", CopyCount::Fixed(2));
    pool.write("docs", "script.sh", b"#!/bin/sh\n");
    create(&pool, "docs", "script.sh");
    pool.run_all();

    let canonical = link_target(&pool, "docs", "script.sh");
    fs::set_permissions(&canonical, fs::Permissions::from_mode(0o750)).unwrap();
    pool.enqueue(TaskRequest::new(TaskKind::AttributeChange, share, rel("script.sh")));
    pool.run_all();

    for drive in pool.holders("docs", "script.sh") {
        let mode = fs::metadata(pool.copy(drive, "docs", "script.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o750);
    }
}

#[test]
fn test_rmdir_removes_empty_directories() {
    let pool = TestPool::new(2);
    let share = pool.add_share("docs", CopyCount::Fixed(2));
    for i in 0..2 {
        fs::create_dir_all(pool.copy(i, "docs", "empty")).unwrap();
    }
    fs::create_dir_all(pool.copy(0, "docs", "busy/child")).unwrap();

    pool.enqueue(TaskRequest::new(TaskKind::Rmdir, share.clone(), rel("empty")));
    pool.enqueue(TaskRequest::new(TaskKind::Rmdir, share, rel("busy")));
    pool.run_all();

    assert!(!pool.copy(0, "docs", "empty").exists());
    assert!(!pool.copy(1, "docs", "empty").exists());
    assert!(pool.copy(0, "docs", "busy").is_dir());
}

#[test]
fn test_unknown_share_fails_task() {
    let pool = TestPool::new(1);
    create(&pool, "nowhere", "a.txt");
    let done = pool.run_all();
    assert_eq!(done[0].status, TaskStatus::Failed);
    assert!(done[0].failure().is_some());
}

#[test]
fn test_removing_drive_keeps_two_copies_elsewhere() {
    let pool = TestPool::new(3);
    pool.add_share("docs", CopyCount::Fixed(2));
    for name in ["a.txt", "b.txt", "sub/c.txt"] {
        pool.write("docs", name, name.as_bytes());
        create(&pool, "docs", name);
    }
    pool.run_all();
    assert!(pool.holders("docs", "a.txt").contains(&0));

    pool.enqueue(TaskRequest::remove_drive(pool.id(0), false));
    let done = pool.run_all();
    // the removal queues a pool-wide check that runs after it
    assert_eq!(done.len(), 2);
    assert_eq!(done[0].kind, TaskKind::RemoveDrive);
    assert_eq!(done[1].kind, TaskKind::Fsck);
    assert!(done.iter().all(|t| t.status == TaskStatus::Archived));

    let registry = pool.replicator.registry();
    assert_eq!(registry.drive(&pool.id(0)).unwrap().state, DriveState::Gone);
    for name in ["a.txt", "b.txt", "sub/c.txt"] {
        let holders: Vec<usize> = pool.holders("docs", name).into_iter().filter(|d| *d != 0).collect();
        assert_eq!(holders.len(), 2, "{}", name);
        assert!(!link_target(&pool, "docs", name).starts_with(&pool.mounts[0]));
        assert_eq!(fs::read(pool.landing("docs").join(name)).unwrap(), name.as_bytes());
    }
    let sent = pool.notifier.sent.lock();
    assert!(sent.iter().any(|n| n.subject.contains("completed without problems")));
}

#[test]
fn test_single_copy_survives_drive_removal() {
    let pool = TestPool::new(2);
    pool.add_share("docs", CopyCount::Fixed(1));
    pool.write("docs", "only.txt", b"precious");
    create(&pool, "docs", "only.txt");
    pool.run_all();
    assert_eq!(pool.holders("docs", "only.txt"), vec![0]);

    pool.enqueue(TaskRequest::remove_drive(pool.id(0), false));
    pool.run_all();

    assert_eq!(fs::read(pool.copy(1, "docs", "only.txt")).unwrap(), b"precious");
    assert_eq!(fs::read(pool.landing("docs").join("only.txt")).unwrap(), b"precious");
}

#[test]
fn test_second_fsck_finds_nothing() {
    let pool = TestPool::new(3);
    pool.add_share("docs", CopyCount::Fixed(2));
    pool.write("docs", "x.txt", b"x");
    pool.write("docs", "y.txt", b"y");
    create(&pool, "docs", "x.txt");
    pool.run_all();
    // y.txt was never distributed and one copy of x.txt goes missing
    let holder = pool.holders("docs", "x.txt")[0];
    fs::remove_file(pool.copy(holder, "docs", "x.txt")).unwrap();

    pool.enqueue(full_fsck(false));
    let first = pool.run_all();
    assert!(!first[0].result.as_deref().unwrap().contains(" 0 problems"));
    pool.enqueue(full_fsck(false));
    let second = pool.run_all();
    assert!(second[0].result.as_deref().unwrap().ends_with(" 0 problems"));

    assert_eq!(pool.holders("docs", "x.txt").len(), 2);
    assert_eq!(pool.holders("docs", "y.txt").len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_same_path_tasks_finish_in_enqueue_order() {
    let pool = TestPool::new(3);
    let share = pool.add_share("docs", CopyCount::Fixed(2));
    let mut ids = Vec::new();
    for i in 0..4 {
        let name = format!("f{}.txt", i);
        pool.write("docs", &name, name.as_bytes());
        ids.push(create(&pool, "docs", &name));
        ids.push(pool.enqueue(TaskRequest::new(TaskKind::AttributeChange, share.clone(), rel(&name))));
    }

    let cancel = CancellationToken::new();
    let handle = WorkerPool::new(
        Arc::clone(&pool.queue),
        pool.handlers.clone(),
        WorkerConfig {
            workers: 4,
            idle_poll: Duration::from_millis(20),
        },
    )
    .start(cancel.clone());
    for _ in 0..500 {
        let stats = pool.queue.stats().unwrap();
        if stats.pending == 0 && stats.running == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cancel.cancel();
    handle.join().await;

    for pair in ids.chunks(2) {
        let create = pool.queue.get(pair[0]).unwrap();
        let attrs = pool.queue.get(pair[1]).unwrap();
        assert_eq!(create.status, TaskStatus::Archived);
        assert_eq!(attrs.status, TaskStatus::Archived);
        assert!(attrs.started_at.unwrap() >= create.completed_at.unwrap());
    }
}
