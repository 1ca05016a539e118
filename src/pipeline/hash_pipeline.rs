//! Bounded parallel hash executor: quick pass (64 KiB partial hash) then
//! full pass (whole-file hash), each preceded by a size/partial-hash
//! repartition that discards singletons (spec §4.5).

#![cfg(feature = "sqlite")]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use crossbeam_channel as channel;

use crate::core::errors::{ErrorKind, Result};
use crate::core::hash::{classify_io_error, full_hash, partial_hash};
use crate::store::fingerprint::{FingerprintStore, FullHashWrite, PartialHashWrite};
use crate::store::model::FileRecord;

/// Executor tuning (spec §4.5 "Executor discipline").
#[derive(Debug, Clone, Copy)]
pub struct HashPipelineConfig {
    pub pool_size: usize,
}

impl HashPipelineConfig {
    #[must_use]
    pub fn new(max_workers: usize) -> Self {
        let cpu = std::thread::available_parallelism().map_or(4, std::num::NonZero::get);
        Self {
            pool_size: max_workers.min(cpu).max(1),
        }
    }
}

/// Per-file error counters, funneled from per-task faults (spec §4.5, §7 —
/// stage-level code never raises on a per-file fault).
#[derive(Debug, Default)]
pub struct HashTelemetry {
    pub files_hashed: AtomicU64,
    pub files_skipped_error: AtomicU64,
    pub files_skipped_locked: AtomicU64,
    pub errors_total: AtomicU64,
}

impl HashTelemetry {
    fn record_error(&self, kind: ErrorKind) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
        if matches!(kind, ErrorKind::Locked) {
            self.files_skipped_locked.fetch_add(1, Ordering::Relaxed);
        } else {
            self.files_skipped_error.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// A file that survived both hash passes.
#[derive(Debug, Clone)]
pub struct HashedFile {
    pub record: FileRecord,
    pub partial_hash: String,
    pub full_hash: String,
}

/// Run the two-pass hash pipeline over pre-collected, pre-filtered files.
/// Never re-stats — the `(size, mtime)` witnesses were captured by the
/// walker.
pub fn run(
    files: &[FileRecord],
    store: &FingerprintStore,
    cancel: &AtomicBool,
    config: HashPipelineConfig,
) -> Result<(Vec<HashedFile>, Arc<HashTelemetry>)> {
    let telemetry = Arc::new(HashTelemetry::default());

    // Quick pass: partition by exact size, singletons discarded.
    let size_groups = partition_by(files, |f| f.size);
    let quick_candidates: Vec<FileRecord> = size_groups
        .into_values()
        .filter(|g| g.len() >= 2)
        .flatten()
        .collect();

    if cancel.load(Ordering::SeqCst) {
        return Ok((Vec::new(), telemetry));
    }

    let partial_results = run_pool(&quick_candidates, store, cancel, config, &telemetry, Pass::Partial);

    if cancel.load(Ordering::SeqCst) {
        return Ok((Vec::new(), telemetry));
    }

    // Repartition by (size, partial_hash); singletons discarded.
    let partial_groups = partition_by(&partial_results, |f| (f.record.size, f.hash.clone()));
    let full_candidates: Vec<FileRecord> = partial_groups
        .into_values()
        .filter(|g| g.len() >= 2)
        .flatten()
        .map(|h| h.record)
        .collect();

    if cancel.load(Ordering::SeqCst) {
        return Ok((Vec::new(), telemetry));
    }

    let full_results = run_pool(&full_candidates, store, cancel, config, &telemetry, Pass::Full);

    // Merge partial+full hash for surviving files.
    let partial_by_path: HashMap<PathBuf, String> = partial_results
        .into_iter()
        .map(|h| (h.record.path.clone(), h.hash))
        .collect();

    let hashed: Vec<HashedFile> = full_results
        .into_iter()
        .filter_map(|h| {
            partial_by_path
                .get(&h.record.path)
                .cloned()
                .map(|partial_hash| HashedFile {
                    record: h.record,
                    partial_hash,
                    full_hash: h.hash,
                })
        })
        .collect();

    Ok((hashed, telemetry))
}

/// Full-hash every file unconditionally, with no size/singleton discard —
/// for callers that need a hash per file regardless of the dedup
/// partitioning above (e.g. folder-duplicate manifests). Cache-backed like
/// the two-pass pipeline, so files already hashed by `run` cost nothing
/// extra here.
pub fn full_hash_all(
    files: &[FileRecord],
    store: &FingerprintStore,
    cancel: &AtomicBool,
    config: HashPipelineConfig,
) -> (Vec<(FileRecord, String)>, Arc<HashTelemetry>) {
    let telemetry = Arc::new(HashTelemetry::default());
    let results = run_pool(files, store, cancel, config, &telemetry, Pass::Full);
    (results.into_iter().map(|r| (r.record, r.hash)).collect(), telemetry)
}

fn partition_by<T: Clone, K: std::hash::Hash + Eq>(
    items: &[T],
    key_fn: impl Fn(&T) -> K,
) -> HashMap<K, Vec<T>> {
    let mut groups: HashMap<K, Vec<T>> = HashMap::new();
    for item in items {
        groups.entry(key_fn(item)).or_default().push(item.clone());
    }
    groups
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Pass {
    Partial,
    Full,
}

/// One task's successful outcome: `hash` is the partial hash during the
/// quick pass, the full hash during the full pass.
struct PassResult {
    record: FileRecord,
    hash: String,
}

fn run_pool(
    candidates: &[FileRecord],
    store: &FingerprintStore,
    cancel: &AtomicBool,
    config: HashPipelineConfig,
    telemetry: &HashTelemetry,
    pass: Pass,
) -> Vec<PassResult> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let queue_cap = (4 * config.pool_size).max(1);
    let (work_tx, work_rx) = channel::bounded::<FileRecord>(queue_cap);
    let (result_tx, result_rx) = channel::unbounded::<PassResult>();

    thread::scope(|scope| {
        for _ in 0..config.pool_size.max(1) {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(|| {
                for record in work_rx.iter() {
                    if cancel.load(Ordering::SeqCst) {
                        continue;
                    }
                    if let Some(hash) = hash_one(&record, store, pass, telemetry) {
                        let _ = result_tx.send(PassResult { record, hash });
                    }
                }
            });
        }
        drop(result_tx);

        // Producer: blocks on the bounded queue (load-shedding per spec §5).
        for record in candidates {
            if cancel.load(Ordering::SeqCst) {
                break;
            }
            if work_tx.send(record.clone()).is_err() {
                break;
            }
        }
        drop(work_tx);
    });

    result_rx.iter().collect()
}

/// Hash a single file for `pass`, consulting the fingerprint cache first
/// (a hit short-circuits computation and still refreshes `last_seen`) and
/// writing back through the store on a successful computation.
fn hash_one(
    record: &FileRecord,
    store: &FingerprintStore,
    pass: Pass,
    telemetry: &HashTelemetry,
) -> Option<String> {
    if let Ok(Some(cached)) = store.lookup(&record.path, record.size, record.mtime) {
        let hit = match pass {
            Pass::Partial => cached.partial_hash,
            Pass::Full => cached.full_hash,
        };
        if let Some(hash) = hit {
            telemetry.files_hashed.fetch_add(1, Ordering::Relaxed);
            return Some(hash);
        }
    }

    let computed = match pass {
        Pass::Partial => partial_hash(&record.path),
        Pass::Full => full_hash(&record.path),
    };

    match computed {
        Ok(digest) => {
            let hash = digest.to_hex();
            let write_result = match pass {
                Pass::Partial => store.put_partial(&PartialHashWrite {
                    path: record.path.clone(),
                    size: record.size,
                    mtime: record.mtime,
                    hash: digest,
                }),
                Pass::Full => store.put_full(&FullHashWrite {
                    path: record.path.clone(),
                    size: record.size,
                    mtime: record.mtime,
                    hash: digest,
                }),
            };
            if write_result.is_err() {
                telemetry.record_error(ErrorKind::StoreCorrupt);
                return None;
            }
            telemetry.files_hashed.fetch_add(1, Ordering::Relaxed);
            Some(hash)
        }
        Err(err) => {
            telemetry.record_error(err.kind());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn record(path: &std::path::Path, size: u64, mtime: i64) -> FileRecord {
        let meta = std::fs::metadata(path).unwrap();
        #[cfg(unix)]
        let (device_id, inode) = {
            use std::os::unix::fs::MetadataExt;
            (meta.dev(), meta.ino())
        };
        #[cfg(not(unix))]
        let (device_id, inode) = {
            let _ = &meta;
            (0, 0)
        };
        FileRecord {
            path: path.to_path_buf(),
            size,
            mtime,
            device_id,
            inode,
        }
    }

    #[test]
    fn config_pool_size_is_at_least_one() {
        let c = HashPipelineConfig::new(0);
        assert!(c.pool_size >= 1);
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn duplicate_content_survives_both_passes() {
        use std::io::Write;

        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a.txt");
        let b = tmp.path().join("b.txt");
        let c = tmp.path().join("c.txt");
        std::fs::write(&a, b"hello").unwrap();
        std::fs::write(&b, b"hello").unwrap();
        std::fs::write(&c, b"world!").unwrap();

        let meta_a = std::fs::metadata(&a).unwrap();
        let mtime = |m: &std::fs::Metadata| {
            #[cfg(unix)]
            {
                use std::os::unix::fs::MetadataExt;
                m.mtime()
            }
            #[cfg(not(unix))]
            {
                0
            }
        };

        let files = vec![
            record(&a, 5, mtime(&meta_a)),
            record(&b, 5, mtime(&std::fs::metadata(&b).unwrap())),
            record(&c, 6, mtime(&std::fs::metadata(&c).unwrap())),
        ];

        let store = FingerprintStore::open(&tmp.path().join("fp.db")).unwrap();
        let cancel = AtomicBool::new(false);
        let config = HashPipelineConfig::new(2);

        let (hashed, telemetry) = run(&files, &store, &cancel, config).unwrap();
        assert_eq!(hashed.len(), 2);
        assert_eq!(telemetry.errors_total.load(Ordering::Relaxed), 0);
        let paths: Vec<_> = hashed.iter().map(|h| h.record.path.clone()).collect();
        assert!(paths.contains(&a));
        assert!(paths.contains(&b));
        assert!(!paths.contains(&c));
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn cache_hit_short_circuits_recompute() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a.txt");
        let b = tmp.path().join("b.txt");
        std::fs::write(&a, b"same").unwrap();
        std::fs::write(&b, b"same").unwrap();

        let mtime = |p: &std::path::Path| {
            let m = std::fs::metadata(p).unwrap();
            #[cfg(unix)]
            {
                use std::os::unix::fs::MetadataExt;
                m.mtime()
            }
            #[cfg(not(unix))]
            {
                0
            }
        };

        let files = vec![record(&a, 4, mtime(&a)), record(&b, 4, mtime(&b))];
        let store = FingerprintStore::open(&tmp.path().join("fp.db")).unwrap();
        let cancel = AtomicBool::new(false);
        let config = HashPipelineConfig::new(2);

        let (first, _) = run(&files, &store, &cancel, config).unwrap();
        assert_eq!(first.len(), 2);

        let (second, _) = run(&files, &store, &cancel, config).unwrap();
        assert_eq!(second.len(), 2);
    }
}
