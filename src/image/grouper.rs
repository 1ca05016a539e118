//! Perceptual image grouper: computes pHashes for candidate images, builds
//! a metric tree, and accumulates transitive similarity via union-find
//! (spec §4.7).

#![cfg(feature = "images")]

use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::errors::Result;
use crate::image::metric_tree::MetricTree;
use crate::image::phash::{compute, similarity_to_radius, PerceptualHash};
use crate::image::union_find::UnionFind;
use crate::store::model::{FileRecord, GroupKey};

/// One successfully-hashed image candidate.
struct Candidate {
    record: FileRecord,
    hash: PerceptualHash,
}

/// A resulting `SimilarImage` cluster.
#[derive(Debug, Clone)]
pub struct SimilarGroup {
    pub key: GroupKey,
    pub members: Vec<FileRecord>,
}

/// Extensions treated as candidate images. Decoding failures for files with
/// these extensions are per-file faults, not configuration errors.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

#[must_use]
pub fn is_candidate_image(path: &std::path::Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Group candidate images by perceptual similarity.
///
/// Returns clusters of size >= 2. `similarity` must already be validated at
/// configuration time (spec §4.7's fail-fast rule); this function only
/// performs the mapping to a Hamming radius.
pub fn group(
    files: &[FileRecord],
    similarity: f64,
    cancel: &AtomicBool,
) -> Result<(Vec<SimilarGroup>, u64)> {
    let candidate_records: Vec<&FileRecord> = files
        .iter()
        .filter(|f| is_candidate_image(&f.path))
        .collect();

    let mut candidates = Vec::with_capacity(candidate_records.len());
    let mut errors = 0u64;

    for record in candidate_records {
        if cancel.load(Ordering::SeqCst) {
            break;
        }
        match compute(&record.path) {
            Ok(hash) => candidates.push(Candidate {
                record: record.clone(),
                hash,
            }),
            Err(_) => errors += 1,
        }
    }

    if candidates.is_empty() {
        return Ok((Vec::new(), errors));
    }

    let radius = similarity_to_radius(similarity);
    let items: Vec<(usize, PerceptualHash)> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (i, c.hash))
        .collect();
    let tree = MetricTree::build(items);

    let mut uf = UnionFind::new(candidates.len());
    for (i, candidate) in candidates.iter().enumerate() {
        if cancel.load(Ordering::SeqCst) {
            break;
        }
        for neighbor in tree.query_radius(candidate.hash, radius) {
            if neighbor != i {
                uf.union(i, neighbor);
            }
        }
    }

    let clusters = uf.clusters();
    let mut groups = Vec::new();
    for (cluster_id, indices) in clusters.into_iter().enumerate() {
        if indices.len() < 2 {
            continue;
        }
        let members: Vec<FileRecord> = indices.iter().map(|&i| candidates[i].record.clone()).collect();
        let representative_size = members[0].size;
        groups.push(SimilarGroup {
            key: GroupKey::SimilarImage {
                cluster_id: cluster_id as u64,
                representative_size,
            },
            members,
        });
    }

    Ok((groups, errors))
}
