//! Shared data-model types that cross the store/pipeline/orchestrator
//! boundary: `FileRecord`, `GroupKey`, and session status/stage enums
//! (spec §3).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A discovered filesystem entry, immutable once produced by the walker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub size: u64,
    pub mtime: i64,
    pub device_id: u64,
    pub inode: u64,
}

impl FileRecord {
    #[must_use]
    pub fn identity(&self) -> (u64, u64) {
        (self.device_id, self.inode)
    }
}

/// Session lifecycle status (spec §3, §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Paused,
    Completed,
    Partial,
    Failed,
}

impl SessionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown session status {other:?}")),
        }
    }
}

/// Pipeline stage (spec §3, §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Collect,
    QuickHash,
    FullHash,
    Group,
    FolderDup,
    SimilarImage,
    Finalize,
}

impl Stage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Collect => "collect",
            Self::QuickHash => "quick_hash",
            Self::FullHash => "full_hash",
            Self::Group => "group",
            Self::FolderDup => "folder_dup",
            Self::SimilarImage => "similar_image",
            Self::Finalize => "finalize",
        }
    }

    /// The stage that follows this one in the orchestrator's fixed order,
    /// or `None` once `Finalize` is reached.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Collect => Some(Self::QuickHash),
            Self::QuickHash => Some(Self::FullHash),
            Self::FullHash => Some(Self::Group),
            Self::Group => Some(Self::FolderDup),
            Self::FolderDup => Some(Self::SimilarImage),
            Self::SimilarImage => Some(Self::Finalize),
            Self::Finalize => None,
        }
    }

    /// Fixed position in the orchestrator's stage order, for "has this
    /// session already passed stage X" comparisons on resume.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Collect => 0,
            Self::QuickHash => 1,
            Self::FullHash => 2,
            Self::Group => 3,
            Self::FolderDup => 4,
            Self::SimilarImage => 5,
            Self::Finalize => 6,
        }
    }
}

impl std::str::FromStr for Stage {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collect" => Ok(Self::Collect),
            "quick_hash" => Ok(Self::QuickHash),
            "full_hash" => Ok(Self::FullHash),
            "group" => Ok(Self::Group),
            "folder_dup" => Ok(Self::FolderDup),
            "similar_image" => Ok(Self::SimilarImage),
            "finalize" => Ok(Self::Finalize),
            other => Err(format!("unknown stage {other:?}")),
        }
    }
}

/// Tagged-union group key (spec §3, §9 "Dynamic dispatch").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupKey {
    Content { size: u64, full_hash: String },
    NameOnly { lowercased_filename: String },
    SimilarImage { cluster_id: u64, representative_size: u64 },
    FolderDup { manifest_hash: String },
}

impl GroupKey {
    /// Encode as the export wire format `"<tag>:<payload>"` (spec §6).
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Content { full_hash, .. } => format!("content:{full_hash}"),
            Self::NameOnly { lowercased_filename } => format!("name:{lowercased_filename}"),
            Self::SimilarImage { cluster_id, .. } => format!("similar:{cluster_id}"),
            Self::FolderDup { manifest_hash } => format!("folder:{manifest_hash}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_is_fixed() {
        let mut s = Stage::Collect;
        let mut order = vec![s];
        while let Some(next) = s.next() {
            order.push(next);
            s = next;
        }
        assert_eq!(
            order,
            vec![
                Stage::Collect,
                Stage::QuickHash,
                Stage::FullHash,
                Stage::Group,
                Stage::FolderDup,
                Stage::SimilarImage,
                Stage::Finalize,
            ]
        );
    }

    #[test]
    fn rank_increases_along_stage_order() {
        assert!(Stage::Collect.rank() < Stage::FullHash.rank());
        assert!(Stage::FullHash.rank() < Stage::Group.rank());
        assert!(Stage::Group.rank() < Stage::Finalize.rank());
    }

    #[test]
    fn group_key_render_matches_wire_format() {
        assert_eq!(
            GroupKey::Content {
                size: 5,
                full_hash: "abcd".into()
            }
            .render(),
            "content:abcd"
        );
        assert_eq!(
            GroupKey::NameOnly {
                lowercased_filename: "report.txt".into()
            }
            .render(),
            "name:report.txt"
        );
        assert_eq!(
            GroupKey::SimilarImage {
                cluster_id: 3,
                representative_size: 100
            }
            .render(),
            "similar:3"
        );
        assert_eq!(
            GroupKey::FolderDup {
                manifest_hash: "deadbeef".into()
            }
            .render(),
            "folder:deadbeef"
        );
    }

    #[test]
    fn status_roundtrips_through_str() {
        for s in [
            SessionStatus::Running,
            SessionStatus::Paused,
            SessionStatus::Completed,
            SessionStatus::Partial,
            SessionStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<SessionStatus>().unwrap(), s);
        }
    }
}
