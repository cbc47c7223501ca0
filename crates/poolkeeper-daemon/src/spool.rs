//! Task intake from other processes.
//!
//! Only the daemon opens the queue store. Other processes (the operator CLI,
//! the file server's event hook) drop one JSON task request per file into
//! the spool directory; the daemon enqueues them in file name order and
//! removes each file once its task is durable.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use poolkeeper_meta::Timestamp;
use poolkeeper_queue::{TaskQueue, TaskRequest};
use poolkeeper_storage::RelPath;
use tracing::{debug, info, warn};
use uuid::Uuid;

const REQUEST_EXT: &str = "json";
const REJECTED_EXT: &str = "rejected";

/// A directory of pending task requests.
#[derive(Debug, Clone)]
pub struct Spool {
    dir: PathBuf,
}

impl Spool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `request` atomically. File names sort in submission order.
    pub fn submit(&self, request: &TaskRequest) -> anyhow::Result<PathBuf> {
        request.validate()?;
        fs::create_dir_all(&self.dir).with_context(|| format!("creating spool {}", self.dir.display()))?;

        let now = Timestamp::now();
        let name = format!("{:012}{:09}-{}", now.secs, now.nanos, Uuid::new_v4());
        let tmp = self.dir.join(format!(".{}.tmp", name));
        let path = self.dir.join(format!("{}.{}", name, REQUEST_EXT));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&serde_json::to_vec(request)?)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), kind = %request.kind, "task request spooled");
        Ok(path)
    }

    /// Enqueues every spooled request. Requests that do not parse or
    /// validate are renamed aside and logged. Returns the number enqueued.
    pub fn drain(&self, queue: &TaskQueue) -> anyhow::Result<usize> {
        let mut files = match fs::read_dir(&self.dir) {
            Ok(listing) => listing
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(REQUEST_EXT))
                .collect::<Vec<_>>(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).with_context(|| format!("listing spool {}", self.dir.display())),
        };
        files.sort();

        let mut enqueued = 0;
        for path in files {
            match read_request(&path).and_then(|request| Ok(queue.enqueue(request)?)) {
                Ok(id) => {
                    debug!(task = id, path = %path.display(), "spooled request enqueued");
                    enqueued += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "rejected spooled request");
                    fs::rename(&path, path.with_extension(REJECTED_EXT))?;
                    continue;
                }
            }
            fs::remove_file(&path)?;
        }
        if enqueued > 0 {
            info!(tasks = enqueued, "spooled requests enqueued");
        }
        Ok(enqueued)
    }
}

fn read_request(path: &Path) -> anyhow::Result<TaskRequest> {
    let raw = fs::read(path)?;
    let mut request: TaskRequest = serde_json::from_slice(&raw)?;
    // paths arrive unchecked from disk
    request.path = RelPath::new(request.path.as_str())?;
    if let Some((share, to)) = request.target.take() {
        request.target = Some((share, RelPath::new(to.as_str())?));
    }
    Ok(request)
}
