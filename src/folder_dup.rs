//! Folder-duplicate detector: aggregates per-directory file fingerprints
//! into manifests and groups directories sharing a manifest hash
//! (spec §4.8).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::core::hash::hash_bytes;
use crate::store::model::GroupKey;

/// `(filename, size, full_hash)` for one direct file child of a directory.
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    pub filename: String,
    pub size: u64,
    pub full_hash: String,
}

/// A candidate file, as seen by the detector: its parent directory plus
/// the fields that go into that directory's manifest.
#[derive(Debug, Clone)]
pub struct FolderDupInput {
    pub path: PathBuf,
    pub size: u64,
    pub full_hash: String,
}

/// A directory identified as duplicating another by manifest hash.
#[derive(Debug, Clone)]
pub struct FolderDupGroup {
    pub key: GroupKey,
    pub directories: Vec<PathBuf>,
}

/// Build per-directory manifests from hashed files, then group directories
/// sharing a manifest hash.
///
/// `recursive` controls whether a directory's manifest also folds in its
/// subdirectories' manifests (spec §9 Open Question — defaults to local-only
/// unless the caller opts in via the `folder_dup_recursive` config switch).
#[must_use]
pub fn detect(inputs: &[FolderDupInput], recursive: bool) -> Vec<FolderDupGroup> {
    let mut by_dir: HashMap<PathBuf, Vec<ManifestEntry>> = HashMap::new();
    for input in inputs {
        let Some(parent) = input.path.parent() else {
            continue;
        };
        let Some(filename) = input.path.file_name() else {
            continue;
        };
        by_dir.entry(parent.to_path_buf()).or_default().push(ManifestEntry {
            filename: filename.to_string_lossy().to_string(),
            size: input.size,
            full_hash: input.full_hash.clone(),
        });
    }

    let manifest_hashes: HashMap<PathBuf, String> = by_dir
        .iter()
        .map(|(dir, entries)| (dir.clone(), manifest_hash(entries)))
        .collect();

    let effective_hashes: HashMap<PathBuf, String> = if recursive {
        by_dir
            .keys()
            .map(|dir| (dir.clone(), recursive_manifest_hash(dir, &by_dir, &manifest_hashes)))
            .collect()
    } else {
        manifest_hashes
    };

    let mut by_hash: HashMap<String, Vec<PathBuf>> = HashMap::new();
    for (dir, hash) in effective_hashes {
        by_hash.entry(hash).or_default().push(dir);
    }

    by_hash
        .into_iter()
        .filter(|(_, dirs)| dirs.len() >= 2)
        .map(|(hash, mut dirs)| {
            dirs.sort();
            FolderDupGroup {
                key: GroupKey::FolderDup { manifest_hash: hash },
                directories: dirs,
            }
        })
        .collect()
}

/// Canonical manifest hash: sort entries, serialize deterministically, hash
/// the bytes (spec §4.8, §9 glossary "Manifest hash").
fn manifest_hash(entries: &[ManifestEntry]) -> String {
    let mut sorted = entries.to_vec();
    sorted.sort_by(|a, b| (&a.filename, a.size, &a.full_hash).cmp(&(&b.filename, b.size, &b.full_hash)));

    let mut buf = String::new();
    for e in &sorted {
        buf.push_str(&e.filename);
        buf.push('\0');
        buf.push_str(&e.size.to_string());
        buf.push('\0');
        buf.push_str(&e.full_hash);
        buf.push('\n');
    }

    hash_bytes(buf.as_bytes()).to_hex()
}

/// Fold subdirectory manifest hashes into a directory's own manifest,
/// recursively, for the opt-in recursive variant.
fn recursive_manifest_hash(
    dir: &Path,
    by_dir: &HashMap<PathBuf, Vec<ManifestEntry>>,
    base_hashes: &HashMap<PathBuf, String>,
) -> String {
    let mut entries = by_dir.get(dir).cloned().unwrap_or_default();

    let mut child_dirs: Vec<&PathBuf> = by_dir
        .keys()
        .filter(|candidate| candidate.parent() == Some(dir))
        .collect();
    child_dirs.sort();

    for child in child_dirs {
        let child_hash = recursive_manifest_hash(child, by_dir, base_hashes);
        entries.push(ManifestEntry {
            filename: child
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            size: 0,
            full_hash: child_hash,
        });
    }

    manifest_hash(&entries)
}
