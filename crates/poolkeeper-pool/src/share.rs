//! Share configuration.

use std::fmt;
use std::path::PathBuf;

use poolkeeper_meta::{DriveId, ShareName};
use poolkeeper_storage::RelPath;
use serde::{Deserialize, Serialize};

/// Required number of copies for every file of a share.
///
/// Serialized as a positive integer or the string `"max"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CopyCountRepr", into = "CopyCountRepr")]
pub enum CopyCount {
    /// Exactly `n` copies, `n >= 1`.
    Fixed(usize),
    /// One copy on every eligible active drive.
    Max,
}

impl CopyCount {
    /// Resolves the count against the number of eligible active drives.
    pub fn resolve(self, eligible_active: usize) -> usize {
        match self {
            CopyCount::Fixed(n) => n,
            CopyCount::Max => eligible_active.max(1),
        }
    }
}

impl fmt::Display for CopyCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyCount::Fixed(n) => write!(f, "{}", n),
            CopyCount::Max => write!(f, "max"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum CopyCountRepr {
    Number(usize),
    Text(String),
}

impl TryFrom<CopyCountRepr> for CopyCount {
    type Error = String;

    fn try_from(repr: CopyCountRepr) -> Result<Self, Self::Error> {
        match repr {
            CopyCountRepr::Number(0) => Err("copy count must be at least 1".to_string()),
            CopyCountRepr::Number(n) => Ok(CopyCount::Fixed(n)),
            CopyCountRepr::Text(s) if s.eq_ignore_ascii_case("max") => Ok(CopyCount::Max),
            CopyCountRepr::Text(s) => s
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .map(CopyCount::Fixed)
                .ok_or_else(|| format!("invalid copy count {:?}", s)),
        }
    }
}

impl From<CopyCount> for CopyCountRepr {
    fn from(count: CopyCount) -> Self {
        match count {
            CopyCount::Fixed(n) => CopyCountRepr::Number(n),
            CopyCount::Max => CopyCountRepr::Text("max".to_string()),
        }
    }
}

/// A share: a landing zone plus its replication policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareConfig {
    /// Share name; also the directory name on every drive.
    pub name: ShareName,
    /// Landing zone `L(S)`.
    pub landing_zone: PathBuf,
    /// Required copies.
    pub copies: CopyCount,
    /// Drives allowed to hold copies; `None` means every drive.
    #[serde(default)]
    pub drives: Option<Vec<DriveId>>,
}

impl ShareConfig {
    /// `L(S)/p`.
    pub fn landing_path(&self, path: &RelPath) -> PathBuf {
        path.under(&self.landing_zone)
    }

    /// True when `drive` may hold copies of this share.
    pub fn is_eligible(&self, drive: &DriveId) -> bool {
        match &self.drives {
            Some(list) => list.contains(drive),
            None => true,
        }
    }
}
