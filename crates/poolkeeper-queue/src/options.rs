//! Typed task options and their `key=value|key=value` encoding.
//!
//! Options travel as text so the interception layer can produce them. Each
//! kind accepts a closed set of keys; anything else is rejected when the
//! task is enqueued. Encoding is key-ordered, so equal options encode to the
//! same string.

use std::collections::BTreeMap;

use poolkeeper_fsck::FsckModes;
use poolkeeper_storage::RelPath;

use crate::error::{QueueError, QueueResult};
use crate::task::TaskKind;

/// Options of a consistency-check task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FsckOptions {
    /// Checks to run.
    pub modes: FsckModes,
    /// Subtree of the task's share.
    pub subtree: Option<RelPath>,
    /// Send the report even when it is clean.
    pub notify: bool,
}

impl Default for FsckOptions {
    fn default() -> Self {
        Self {
            modes: FsckModes::default(),
            subtree: None,
            notify: false,
        }
    }
}

/// Options by task kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOptions {
    /// Kinds without options.
    None,
    /// `remove-drive`.
    RemoveDrive {
        /// The drive is already unreachable; skip relocation.
        gone: bool,
    },
    /// `fsck`.
    Fsck(FsckOptions),
}

impl TaskOptions {
    /// Default options for `kind`.
    pub fn default_for(kind: TaskKind) -> Self {
        match kind {
            TaskKind::RemoveDrive => TaskOptions::RemoveDrive { gone: false },
            TaskKind::Fsck => TaskOptions::Fsck(FsckOptions::default()),
            _ => TaskOptions::None,
        }
    }

    /// Parses `raw` for `kind`. Unknown keys, repeated keys and bad values
    /// are errors.
    pub fn parse(kind: TaskKind, raw: &str) -> QueueResult<Self> {
        let mut pairs = BTreeMap::new();
        for item in raw.split('|').filter(|s| !s.is_empty()) {
            let (key, value) = item.split_once('=').ok_or_else(|| QueueError::InvalidOption {
                key: item.to_string(),
                value: String::new(),
            })?;
            if pairs.insert(key.to_string(), unescape(value)?).is_some() {
                return Err(QueueError::InvalidOption {
                    key: key.to_string(),
                    value: "given twice".to_string(),
                });
            }
        }

        let mut options = Self::default_for(kind);
        for (key, value) in pairs {
            match &mut options {
                TaskOptions::None => {}
                TaskOptions::RemoveDrive { gone } => {
                    if key == "gone" {
                        *gone = parse_flag(&key, &value)?;
                        continue;
                    }
                }
                TaskOptions::Fsck(fsck) => {
                    match key.as_str() {
                        "copies" => fsck.modes.copies = parse_flag(&key, &value)?,
                        "orphans" => fsck.modes.orphans = parse_flag(&key, &value)?,
                        "usage" => fsck.modes.usage = parse_flag(&key, &value)?,
                        "checksums" => fsck.modes.checksums = parse_flag(&key, &value)?,
                        "notify" => fsck.notify = parse_flag(&key, &value)?,
                        "subtree" => {
                            let path = RelPath::new(&value).map_err(|_| QueueError::InvalidOption {
                                key: key.clone(),
                                value: value.clone(),
                            })?;
                            fsck.subtree = if path.is_root() { None } else { Some(path) };
                        }
                        _ => {
                            return Err(QueueError::UnknownOption {
                                kind: kind.to_string(),
                                key: key.clone(),
                            })
                        }
                    }
                    continue;
                }
            }
            return Err(QueueError::UnknownOption {
                kind: kind.to_string(),
                key,
            });
        }
        Ok(options)
    }

    /// Key-ordered encoding; every key of the kind is written.
    pub fn encode(&self) -> String {
        let mut pairs: BTreeMap<&str, String> = BTreeMap::new();
        match self {
            TaskOptions::None => {}
            TaskOptions::RemoveDrive { gone } => {
                pairs.insert("gone", flag(*gone));
            }
            TaskOptions::Fsck(fsck) => {
                pairs.insert("copies", flag(fsck.modes.copies));
                pairs.insert("orphans", flag(fsck.modes.orphans));
                pairs.insert("usage", flag(fsck.modes.usage));
                pairs.insert("checksums", flag(fsck.modes.checksums));
                pairs.insert("notify", flag(fsck.notify));
                if let Some(subtree) = &fsck.subtree {
                    pairs.insert("subtree", escape(subtree.as_str()));
                }
            }
        }
        pairs
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("|")
    }
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

fn parse_flag(key: &str, value: &str) -> QueueResult<bool> {
    match value {
        "1" => Ok(true),
        "0" => Ok(false),
        _ => Err(QueueError::InvalidOption {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

// `|` separates pairs and `%` introduces an escape.
fn escape(value: &str) -> String {
    value.replace('%', "%25").replace('|', "%7C")
}

fn unescape(value: &str) -> QueueResult<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3);
        match code {
            Some("25") => out.push('%'),
            Some("7C") | Some("7c") => out.push('|'),
            _ => {
                return Err(QueueError::InvalidOption {
                    key: "escape".to_string(),
                    value: value.to_string(),
                })
            }
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fsck_defaults() {
        let opts = TaskOptions::parse(TaskKind::Fsck, "").unwrap();
        assert_eq!(opts, TaskOptions::Fsck(FsckOptions::default()));
    }

    #[test]
    fn test_fsck_options_parse() {
        let opts = TaskOptions::parse(TaskKind::Fsck, "checksums=1|subtree=photos/2024|notify=1").unwrap();
        let TaskOptions::Fsck(fsck) = opts else {
            panic!("expected fsck options");
        };
        assert!(fsck.modes.checksums);
        assert!(fsck.modes.copies);
        assert!(fsck.notify);
        assert_eq!(fsck.subtree, Some(RelPath::new("photos/2024").unwrap()));
    }

    #[test]
    fn test_encoding_is_key_ordered() {
        let opts = TaskOptions::Fsck(FsckOptions {
            modes: FsckModes::all(),
            subtree: Some(RelPath::new("a").unwrap()),
            notify: false,
        });
        assert_eq!(
            opts.encode(),
            "checksums=1|copies=1|notify=0|orphans=1|subtree=a|usage=1"
        );
        assert_eq!(TaskOptions::RemoveDrive { gone: true }.encode(), "gone=1");
        assert_eq!(TaskOptions::None.encode(), "");
    }

    #[test]
    fn test_unknown_option_rejected() {
        let err = TaskOptions::parse(TaskKind::Create, "force=1").unwrap_err();
        assert!(matches!(err, QueueError::UnknownOption { ref key, .. } if key == "force"));
        let err = TaskOptions::parse(TaskKind::Fsck, "copies=1|deep=1").unwrap_err();
        assert!(matches!(err, QueueError::UnknownOption { ref key, .. } if key == "deep"));
        let err = TaskOptions::parse(TaskKind::RemoveDrive, "subtree=a").unwrap_err();
        assert!(matches!(err, QueueError::UnknownOption { .. }));
    }

    #[test]
    fn test_bad_values_rejected() {
        assert!(TaskOptions::parse(TaskKind::RemoveDrive, "gone=yes").is_err());
        assert!(TaskOptions::parse(TaskKind::Fsck, "copies").is_err());
        assert!(TaskOptions::parse(TaskKind::Fsck, "copies=1|copies=0").is_err());
        assert!(TaskOptions::parse(TaskKind::Fsck, "subtree=../etc").is_err());
    }

    #[test]
    fn test_subtree_with_separator() {
        let opts = TaskOptions::Fsck(FsckOptions {
            subtree: Some(RelPath::new("a|b/100%").unwrap()),
            ..FsckOptions::default()
        });
        let encoded = opts.encode();
        assert!(encoded.contains("subtree=a%7Cb/100%25"));
        assert_eq!(TaskOptions::parse(TaskKind::Fsck, &encoded).unwrap(), opts);
    }

    proptest! {
        #[test]
        fn prop_fsck_options_survive_encoding(
            copies: bool,
            orphans: bool,
            usage: bool,
            checksums: bool,
            notify: bool,
            subtree in proptest::option::of("[a-z|%=]{1,8}(/[a-z|%=]{1,8}){0,3}"),
        ) {
            let opts = TaskOptions::Fsck(FsckOptions {
                modes: FsckModes { copies, orphans, usage, checksums },
                subtree: subtree.map(|s| RelPath::new(&s).unwrap()),
                notify,
            });
            let encoded = opts.encode();
            let keys: Vec<&str> = encoded.split('|').filter_map(|p| p.split_once('=')).map(|(k, _)| k).collect();
            let mut sorted = keys.clone();
            sorted.sort_unstable();
            prop_assert_eq!(keys, sorted);
            prop_assert_eq!(TaskOptions::parse(TaskKind::Fsck, &encoded).unwrap(), opts);
        }
    }
}
