//! Group builder: turns surviving hash-pipeline output (or, in
//! `name_only` mode, raw file records) into `Group` equivalence classes,
//! inode-deduplicating members and optionally verifying byte-exact equality
//! (spec §4.6).

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::core::config::GroupMode;
use crate::core::errors::Result;
use crate::store::model::{FileRecord, GroupKey};

#[cfg(feature = "sqlite")]
use crate::pipeline::hash_pipeline::HashedFile;

const VERIFY_BUFFER: usize = 64 * 1024;

/// A resolved equivalence class: key plus its inode-deduplicated members.
#[derive(Debug, Clone)]
pub struct Group {
    pub key: GroupKey,
    pub members: Vec<FileRecord>,
}

/// Build groups from hashed files in content/content+name mode.
///
/// Input is assumed already reduced to `(size, full_hash)`-equal classes by
/// the hash pipeline; this function performs inode dedup, optional
/// byte-exact verification (which can split a group), and name-qualification
/// in `content_and_name` mode.
#[cfg(feature = "sqlite")]
pub fn build_content_groups(
    hashed: &[HashedFile],
    mode: GroupMode,
    byte_verify: bool,
) -> Result<Vec<Group>> {
    let mut by_key: HashMap<(u64, String, Option<String>), Vec<FileRecord>> = HashMap::new();

    for h in hashed {
        let name_component = match mode {
            GroupMode::ContentAndName => h
                .record
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_ascii_lowercase()),
            _ => None,
        };
        by_key
            .entry((h.record.size, h.full_hash.clone(), name_component))
            .or_default()
            .push(h.record.clone());
    }

    let mut groups = Vec::new();
    for ((size, full_hash, _name_component), members) in by_key {
        let deduped = dedup_by_inode(members);
        if deduped.len() < 2 {
            continue;
        }

        let split_members = if byte_verify {
            verify_and_split(&deduped)
        } else {
            vec![deduped]
        };

        for members in split_members {
            if members.len() < 2 {
                continue;
            }
            // content_and_name already folded the name into the grouping key
            // above; the exported key stays a plain Content tag.
            let key = GroupKey::Content {
                size,
                full_hash: full_hash.clone(),
            };
            groups.push(Group { key, members });
        }
    }

    Ok(groups)
}

/// Build groups in `name_only` mode: bypasses the hash pipeline entirely,
/// grouping by lowercased filename.
pub fn build_name_only_groups(files: &[FileRecord]) -> Vec<Group> {
    let mut by_name: HashMap<String, Vec<FileRecord>> = HashMap::new();
    for f in files {
        let Some(name) = f.path.file_name() else {
            continue;
        };
        by_name
            .entry(name.to_string_lossy().to_ascii_lowercase())
            .or_default()
            .push(f.clone());
    }

    by_name
        .into_iter()
        .filter_map(|(name, members)| {
            let deduped = dedup_by_inode(members);
            if deduped.len() < 2 {
                return None;
            }
            Some(Group {
                key: GroupKey::NameOnly {
                    lowercased_filename: name,
                },
                members: deduped,
            })
        })
        .collect()
}

/// Collapse multiple paths sharing a `(device, inode)` identity to a single
/// representative (spec §3: "members are unique by (device, inode)").
fn dedup_by_inode(members: Vec<FileRecord>) -> Vec<FileRecord> {
    let mut seen = std::collections::HashSet::new();
    let mut result = Vec::with_capacity(members.len());
    for m in members {
        if seen.insert(m.identity()) {
            result.push(m);
        }
    }
    result
}

/// Stream pairs through a bytewise compare, splitting the group on the
/// first mismatch found for a given representative. O(n) reads against the
/// first member as a pivot; a mismatching file starts a new subgroup.
fn verify_and_split(members: &[FileRecord]) -> Vec<Vec<FileRecord>> {
    let mut buckets: Vec<Vec<FileRecord>> = Vec::new();

    'outer: for candidate in members {
        for bucket in &mut buckets {
            if files_byte_equal(&bucket[0].path, &candidate.path).unwrap_or(false) {
                bucket.push(candidate.clone());
                continue 'outer;
            }
        }
        buckets.push(vec![candidate.clone()]);
    }

    buckets
}

fn files_byte_equal(a: &Path, b: &Path) -> Result<bool> {
    let mut ra = BufReader::with_capacity(VERIFY_BUFFER, File::open(a).map_err(|e| crate::core::errors::DsError::io(a, e))?);
    let mut rb = BufReader::with_capacity(VERIFY_BUFFER, File::open(b).map_err(|e| crate::core::errors::DsError::io(b, e))?);

    let mut buf_a = [0u8; VERIFY_BUFFER];
    let mut buf_b = [0u8; VERIFY_BUFFER];

    loop {
        let na = ra.read(&mut buf_a).map_err(|e| crate::core::errors::DsError::io(a, e))?;
        let nb = rb.read(&mut buf_b).map_err(|e| crate::core::errors::DsError::io(b, e))?;
        if na != nb {
            return Ok(false);
        }
        if na == 0 {
            return Ok(true);
        }
        if buf_a[..na] != buf_b[..nb] {
            return Ok(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, device_id: u64, inode: u64, size: u64) -> FileRecord {
        FileRecord {
            path: path.into(),
            size,
            mtime: 0,
            device_id,
            inode,
        }
    }

    #[test]
    fn name_only_groups_by_lowercased_filename() {
        let files = vec![
            file("/p/report.txt", 1, 1, 10),
            file("/q/REPORT.txt", 1, 2, 20),
            file("/r/other.txt", 1, 3, 30),
        ];
        let groups = build_name_only_groups(&files);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 2);
    }

    #[test]
    fn name_only_discards_singletons() {
        let files = vec![file("/p/unique.txt", 1, 1, 10)];
        assert!(build_name_only_groups(&files).is_empty());
    }

    #[test]
    fn inode_dedup_collapses_hardlinks() {
        let files = vec![
            file("/a/x", 1, 100, 10),
            file("/a/x-link", 1, 100, 10),
            file("/a/y", 1, 200, 10),
        ];
        let deduped = dedup_by_inode(files);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn byte_verify_splits_on_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        let c = tmp.path().join("c");
        std::fs::write(&a, b"hello world").unwrap();
        std::fs::write(&b, b"hello world").unwrap();
        std::fs::write(&c, b"hello earth").unwrap();

        let members = vec![
            file(a.to_str().unwrap(), 1, 1, 11),
            file(b.to_str().unwrap(), 1, 2, 11),
            file(c.to_str().unwrap(), 1, 3, 11),
        ];

        let buckets = verify_and_split(&members);
        assert_eq!(buckets.len(), 2);
        let sizes: Vec<usize> = buckets.iter().map(Vec::len).collect();
        assert!(sizes.contains(&2));
        assert!(sizes.contains(&1));
    }
}
