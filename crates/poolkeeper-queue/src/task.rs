//! Tasks: kinds, requests as they arrive, and records as they are stored.

use std::fmt;
use std::str::FromStr;

use poolkeeper_meta::{DriveId, ShareName, Timestamp};
use poolkeeper_storage::RelPath;
use serde::{Deserialize, Serialize};

use crate::error::{QueueError, QueueResult};
use crate::options::TaskOptions;

/// What a task does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    /// A file was closed after writing.
    Create,
    /// A file was deleted.
    Delete,
    /// A file or directory was renamed within its share.
    Rename,
    /// A file or directory was moved to another share.
    Move,
    /// Permissions or ownership changed.
    AttributeChange,
    /// A directory was removed.
    Rmdir,
    /// A drive leaves the pool.
    RemoveDrive,
    /// A consistency pass.
    Fsck,
}

impl TaskKind {
    /// Every kind.
    pub const ALL: [TaskKind; 8] = [
        TaskKind::Create,
        TaskKind::Delete,
        TaskKind::Rename,
        TaskKind::Move,
        TaskKind::AttributeChange,
        TaskKind::Rmdir,
        TaskKind::RemoveDrive,
        TaskKind::Fsck,
    ];

    /// Name used in task intake and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Create => "create",
            TaskKind::Delete => "delete",
            TaskKind::Rename => "rename",
            TaskKind::Move => "move",
            TaskKind::AttributeChange => "attribute-change",
            TaskKind::Rmdir => "rmdir",
            TaskKind::RemoveDrive => "remove-drive",
            TaskKind::Fsck => "fsck",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| QueueError::UnknownKind(s.to_string()))
    }
}

/// Lifecycle of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a worker.
    Running,
    /// Finished successfully; moved to the archive right away.
    Done,
    /// Finished with an error.
    Failed,
    /// Retained after success.
    Archived,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Archived => "archived",
        };
        f.write_str(s)
    }
}

/// A task as submitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Task kind.
    pub kind: TaskKind,
    /// Share the path belongs to; `None` only for remove-drive and
    /// pool-wide fsck.
    pub share: Option<ShareName>,
    /// Path within the share.
    pub path: RelPath,
    /// Destination of a rename or move.
    #[serde(default)]
    pub target: Option<(ShareName, RelPath)>,
    /// Drive of a remove-drive task.
    #[serde(default)]
    pub drive: Option<DriveId>,
    /// Options as `key=value|key=value`.
    #[serde(default)]
    pub options: String,
}

impl TaskRequest {
    /// A request on `share/path` with no options.
    pub fn new(kind: TaskKind, share: ShareName, path: RelPath) -> Self {
        Self {
            kind,
            share: Some(share),
            path,
            target: None,
            drive: None,
            options: String::new(),
        }
    }

    /// A rename (same share) or move (other share) of `share/path`.
    pub fn relocate(share: ShareName, path: RelPath, to_share: ShareName, to: RelPath) -> Self {
        let kind = if share == to_share { TaskKind::Rename } else { TaskKind::Move };
        Self {
            target: Some((to_share, to)),
            ..Self::new(kind, share, path)
        }
    }

    /// Removal of `drive`; `gone` when it is already unreachable.
    pub fn remove_drive(drive: DriveId, gone: bool) -> Self {
        Self {
            kind: TaskKind::RemoveDrive,
            share: None,
            path: RelPath::root(),
            target: None,
            drive: Some(drive),
            options: TaskOptions::RemoveDrive { gone }.encode(),
        }
    }

    /// A consistency pass over `share`, or every share.
    pub fn fsck(share: Option<ShareName>, options: &TaskOptions) -> Self {
        Self {
            kind: TaskKind::Fsck,
            share,
            path: RelPath::root(),
            target: None,
            drive: None,
            options: options.encode(),
        }
    }

    /// Replaces the option string.
    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        self.options = options.into();
        self
    }

    /// Checks the request's shape and options; returns the typed options.
    pub fn validate(&self) -> QueueResult<TaskOptions> {
        let options = TaskOptions::parse(self.kind, &self.options)?;
        let invalid = |msg: &str| Err(QueueError::InvalidRequest(format!("{}: {}", self.kind, msg)));

        match self.kind {
            TaskKind::RemoveDrive => {
                if self.drive.is_none() {
                    return invalid("a drive is required");
                }
                if self.share.is_some() || self.target.is_some() {
                    return invalid("takes a drive only");
                }
                return Ok(options);
            }
            TaskKind::Fsck => {
                if let TaskOptions::Fsck(fsck) = &options {
                    if fsck.subtree.is_some() && self.share.is_none() {
                        return invalid("a subtree needs a share");
                    }
                }
                if self.target.is_some() || self.drive.is_some() || !self.path.is_root() {
                    return invalid("takes a share and options only");
                }
                return Ok(options);
            }
            _ => {}
        }

        if self.share.is_none() {
            return invalid("a share is required");
        }
        if self.path.is_root() {
            return invalid("the share root cannot be the subject");
        }
        if self.drive.is_some() {
            return invalid("takes no drive");
        }
        match (self.kind, &self.target) {
            (TaskKind::Rename, Some((to_share, _))) if Some(to_share) != self.share.as_ref() => {
                invalid("target must be in the same share")
            }
            (TaskKind::Move, Some((to_share, _))) if Some(to_share) == self.share.as_ref() => {
                invalid("target must be in another share")
            }
            (TaskKind::Rename | TaskKind::Move, Some((_, to))) if to.is_root() => invalid("target cannot be a share root"),
            (TaskKind::Rename | TaskKind::Move, Some(_)) => Ok(options),
            (TaskKind::Rename | TaskKind::Move, None) => invalid("a target is required"),
            (_, Some(_)) => invalid("takes no target"),
            (_, None) => Ok(options),
        }
    }
}

/// A stored task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Queue-assigned id; ids grow with enqueue order.
    pub id: u64,
    /// Task kind.
    pub kind: TaskKind,
    /// Share of `path`.
    pub share: Option<ShareName>,
    /// Path within the share.
    pub path: RelPath,
    /// Destination of a rename or move.
    pub target: Option<(ShareName, RelPath)>,
    /// Drive of a remove-drive task.
    pub drive: Option<DriveId>,
    /// Validated options in canonical encoding.
    pub options: String,
    /// Current status.
    pub status: TaskStatus,
    /// Enqueue time.
    pub created_at: Timestamp,
    /// Time of the last claim.
    pub started_at: Option<Timestamp>,
    /// Completion time.
    pub completed_at: Option<Timestamp>,
    /// Failure text, or the handler's summary on success.
    pub result: Option<String>,
}

/// Paths a task touches, for ordering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Footprint {
    /// Everything in the pool.
    All,
    /// These paths and everything below them.
    Paths(Vec<(ShareName, RelPath)>),
}

impl TaskRecord {
    /// Builds a pending record from a validated request.
    pub(crate) fn from_request(id: u64, request: TaskRequest, options: &TaskOptions) -> Self {
        Self {
            id,
            kind: request.kind,
            share: request.share,
            path: request.path,
            target: request.target,
            drive: request.drive,
            options: options.encode(),
            status: TaskStatus::Pending,
            created_at: Timestamp::now(),
            started_at: None,
            completed_at: None,
            result: None,
        }
    }

    /// Typed options.
    pub fn options(&self) -> QueueResult<TaskOptions> {
        TaskOptions::parse(self.kind, &self.options)
    }

    pub(crate) fn footprint(&self) -> Footprint {
        if self.kind == TaskKind::RemoveDrive {
            return Footprint::All;
        }
        let Some(share) = &self.share else {
            return Footprint::All;
        };
        let mut paths = Vec::with_capacity(2);
        if self.kind == TaskKind::Fsck {
            let subtree = match self.options() {
                Ok(TaskOptions::Fsck(fsck)) => fsck.subtree.unwrap_or_default(),
                _ => RelPath::root(),
            };
            paths.push((share.clone(), subtree));
        } else {
            paths.push((share.clone(), self.path.clone()));
        }
        if let Some(target) = &self.target {
            paths.push(target.clone());
        }
        Footprint::Paths(paths)
    }

    /// True when the two tasks must not run at the same time, or out of
    /// enqueue order.
    pub fn overlaps(&self, other: &TaskRecord) -> bool {
        match (self.footprint(), other.footprint()) {
            (Footprint::All, _) | (_, Footprint::All) => true,
            (Footprint::Paths(a), Footprint::Paths(b)) => a
                .iter()
                .any(|(sa, pa)| b.iter().any(|(sb, pb)| sa == sb && pa.overlaps(pb))),
        }
    }

    /// The error text of a failed task.
    pub fn failure(&self) -> Option<&str> {
        match self.status {
            TaskStatus::Failed => self.result.as_deref(),
            _ => None,
        }
    }

    /// Short description for logs and notifications.
    pub fn describe(&self) -> String {
        let mut out = format!("#{} {}", self.id, self.kind);
        if let Some(drive) = &self.drive {
            out.push_str(&format!(" {}", drive));
        }
        if let Some(share) = &self.share {
            out.push_str(&format!(" {}:{}", share, self.path));
        }
        if let Some((share, path)) = &self.target {
            out.push_str(&format!(" -> {}:{}", share, path));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn share(name: &str) -> ShareName {
        ShareName::new(name).unwrap()
    }

    fn rel(p: &str) -> RelPath {
        RelPath::new(p).unwrap()
    }

    fn record(request: TaskRequest) -> TaskRecord {
        let options = request.validate().unwrap();
        TaskRecord::from_request(1, request, &options)
    }

    #[test]
    fn test_kind_names() {
        for kind in TaskKind::ALL {
            assert_eq!(kind.as_str().parse::<TaskKind>().unwrap(), kind);
        }
        assert!(matches!("copy".parse::<TaskKind>(), Err(QueueError::UnknownKind(_))));
    }

    #[test]
    fn test_validate_shapes() {
        assert!(TaskRequest::new(TaskKind::Create, share("docs"), rel("a")).validate().is_ok());
        assert!(TaskRequest::new(TaskKind::Create, share("docs"), RelPath::root())
            .validate()
            .is_err());
        assert!(TaskRequest::new(TaskKind::Rename, share("docs"), rel("a")).validate().is_err());

        let mut req = TaskRequest::relocate(share("docs"), rel("a"), share("docs"), rel("b"));
        assert_eq!(req.kind, TaskKind::Rename);
        assert!(req.validate().is_ok());
        req.kind = TaskKind::Move;
        assert!(req.validate().is_err());

        let req = TaskRequest::relocate(share("docs"), rel("a"), share("media"), rel("a"));
        assert_eq!(req.kind, TaskKind::Move);
        assert!(req.validate().is_ok());

        let req = TaskRequest::remove_drive(DriveId::from_mount(std::path::Path::new("/mnt/a")), false);
        assert!(req.validate().is_ok());

        let req = TaskRequest::fsck(None, &TaskOptions::default_for(TaskKind::Fsck)).with_options("subtree=a");
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_same_path_overlaps() {
        let a = record(TaskRequest::new(TaskKind::Create, share("docs"), rel("a/b")));
        let b = record(TaskRequest::new(TaskKind::Delete, share("docs"), rel("a/b")));
        let c = record(TaskRequest::new(TaskKind::Rmdir, share("docs"), rel("a")));
        let d = record(TaskRequest::new(TaskKind::Create, share("docs"), rel("a/bc")));
        let e = record(TaskRequest::new(TaskKind::Create, share("media"), rel("a/b")));
        assert!(a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(!a.overlaps(&d));
        assert!(!a.overlaps(&e));
    }

    #[test]
    fn test_rename_target_overlaps() {
        let mv = record(TaskRequest::relocate(share("docs"), rel("a"), share("media"), rel("x")));
        let other = record(TaskRequest::new(TaskKind::Create, share("media"), rel("x/y")));
        assert!(mv.overlaps(&other));
    }

    #[test]
    fn test_wide_tasks_overlap() {
        let file = record(TaskRequest::new(TaskKind::Create, share("docs"), rel("a")));
        let other_share = record(TaskRequest::new(TaskKind::Create, share("media"), rel("a")));
        let fsck_docs = record(TaskRequest::fsck(
            Some(share("docs")),
            &TaskOptions::default_for(TaskKind::Fsck),
        ));
        let fsck_sub = record(
            TaskRequest::fsck(Some(share("docs")), &TaskOptions::default_for(TaskKind::Fsck))
                .with_options("subtree=b"),
        );
        let fsck_all = record(TaskRequest::fsck(None, &TaskOptions::default_for(TaskKind::Fsck)));
        let removal = record(TaskRequest::remove_drive(
            DriveId::from_mount(std::path::Path::new("/mnt/a")),
            true,
        ));

        assert!(fsck_docs.overlaps(&file));
        assert!(!fsck_docs.overlaps(&other_share));
        assert!(!fsck_sub.overlaps(&file));
        assert!(fsck_all.overlaps(&other_share));
        assert!(removal.overlaps(&file));
        assert!(removal.overlaps(&fsck_sub));
    }

    proptest! {
        #[test]
        fn prop_overlap_is_symmetric(
            a in "[ab]{1,2}(/[ab]{1,2}){0,2}",
            b in "[ab]{1,2}(/[ab]{1,2}){0,2}",
            same_share: bool,
        ) {
            let x = record(TaskRequest::new(TaskKind::Create, share("docs"), rel(&a)));
            let other = if same_share { "docs" } else { "media" };
            let y = record(TaskRequest::new(TaskKind::Delete, share(other), rel(&b)));
            prop_assert_eq!(x.overlaps(&y), y.overlaps(&x));
            if same_share && a == b {
                prop_assert!(x.overlaps(&y));
            }
            if !same_share {
                prop_assert!(!x.overlaps(&y));
            }
        }
    }
}
