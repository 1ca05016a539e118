//! Orchestrator: drives stage sequencing, cancellation checkpoints,
//! progress throttling, and the session status/stage state machine
//! (spec §4.9–§4.10).

#![cfg(feature = "sqlite")]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::core::config::Config;
use crate::core::errors::{DsError, Result};
use crate::folder_dup::{self, FolderDupInput};
use crate::pipeline::group_builder::{self, Group};
use crate::pipeline::hash_pipeline::{self, HashPipelineConfig, HashedFile};
use crate::scanner::filter::FilterEngine;
use crate::scanner::protected_roots::ProtectedRoots;
use crate::scanner::walker::{DirectoryWalker, WalkerConfig};
use crate::store::fingerprint::FingerprintStore;
use crate::store::model::{FileRecord, GroupKey, SessionStatus, Stage};
use crate::store::session::{HashRow, SessionStore};

#[cfg(feature = "images")]
use crate::image::grouper;

/// Minimum spacing between UI progress emissions (spec §6).
const UI_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Result handed back on a `finished` completion signal.
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub session_id: String,
    pub scan_status: SessionStatus,
    pub groups: Vec<(GroupKey, Vec<String>)>,
    pub metrics: ScanMetrics,
    pub warnings: Vec<String>,
    pub config_hash: String,
}

/// Metrics surfaced in the export `meta` block (spec §6).
#[derive(Debug, Clone, Default)]
pub struct ScanMetrics {
    pub files_scanned: u64,
    pub files_hashed: u64,
    pub files_skipped_error: u64,
    pub files_skipped_locked: u64,
    pub errors_total: u64,
    /// Delta classification against `config.baseline_session` (spec §4.9),
    /// zero when no baseline is configured.
    pub files_new: u64,
    pub files_changed: u64,
    pub files_revalidated: u64,
}

/// One of exactly one completion signal (spec §4.9, §6).
#[derive(Debug, Clone)]
pub enum Completion {
    Finished(SessionResult),
    Cancelled,
    Failed(String),
}

/// Progress/stage callbacks, throttled per spec §6/§9.
pub trait Callbacks: Send + Sync {
    fn on_progress(&self, percent: f64, message: &str);
    fn on_stage_change(&self, stage: Stage);
}

/// A no-op callback set for headless/test invocations.
pub struct NullCallbacks;
impl Callbacks for NullCallbacks {
    fn on_progress(&self, _percent: f64, _message: &str) {}
    fn on_stage_change(&self, _stage: Stage) {}
}

/// Shared, thread-safe cancellation handle. Cloning shares the same flag.
#[derive(Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn inner(&self) -> &AtomicBool {
        &self.0
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

struct ProgressThrottle {
    last: std::sync::Mutex<Option<Instant>>,
}

impl ProgressThrottle {
    fn new() -> Self {
        Self {
            last: std::sync::Mutex::new(None),
        }
    }

    fn emit(&self, callbacks: &dyn Callbacks, percent: f64, message: &str) {
        let mut last = self.last.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Instant::now();
        if last.is_none_or(|prev| now.duration_since(prev) >= UI_PROGRESS_INTERVAL) {
            *last = Some(now);
            callbacks.on_progress(percent, message);
        }
    }
}

/// Top-level entry point: `run(config, callbacks) -> SessionResult` (spec §6).
pub fn run(
    config: &Config,
    fingerprint_store: &FingerprintStore,
    session_store: &SessionStore,
    callbacks: &dyn Callbacks,
    cancel: &CancelToken,
) -> Result<Completion> {
    config.validate()?;

    let config_hash = config.config_hash();
    let session_id = new_session_id();
    let config_json = serde_json::to_string(config)?;

    let resumed = if config.incremental_rescan {
        session_store.find_resumable(&config_hash)?
    } else {
        None
    };

    let (session_id, resume_files, resume_hashed) = if let Some(existing) = resumed {
        info!(session = %existing.id, "resuming paused session");
        session_store.set_status(&existing.id, SessionStatus::Running)?;
        let files = session_store.load_files(&existing.id)?;
        let hashed = if existing.stage.rank() >= Stage::FullHash.rank() {
            Some(load_persisted_hashes(session_store, &existing.id, &files)?)
        } else {
            None
        };
        (existing.id, Some(files), hashed)
    } else {
        session_store.create_session(&session_id, &config_json, &config_hash)?;
        (session_id, None, None)
    };

    let progress = ProgressThrottle::new();
    let mut warnings = Vec::new();
    let mut metrics = ScanMetrics::default();

    macro_rules! checkpoint {
        ($stage:expr) => {
            if cancel.is_cancelled() {
                session_store.set_stage(&session_id, $stage)?;
                session_store.set_status(&session_id, SessionStatus::Paused)?;
                return Ok(Completion::Cancelled);
            }
        };
    }

    if cancel.is_cancelled() {
        session_store.set_status(&session_id, SessionStatus::Paused)?;
        return Ok(Completion::Cancelled);
    }

    // --- collect ---
    callbacks.on_stage_change(Stage::Collect);
    session_store.set_stage(&session_id, Stage::Collect)?;
    progress.emit(callbacks, 0.0, "collecting files");

    let files = if let Some(files) = resume_files {
        files
    } else {
        let protected_roots = if config.protect_system {
            ProtectedRoots::new()
        } else {
            ProtectedRoots::empty()
        };
        let walker_config = WalkerConfig {
            root_paths: config.roots.clone(),
            max_depth: usize::MAX,
            follow_symlinks: config.follow_symlinks,
            cross_devices: false,
            parallelism: config.max_workers,
            excluded_paths: std::collections::HashSet::new(),
            protect_system: config.protect_system,
        };
        let walker = DirectoryWalker::new(walker_config, protected_roots);
        let (entries, telemetry, protected_hits) = walker.walk()?;

        for root in &protected_hits {
            warn!(root = %root.display(), "root is protected, yielding zero entries");
            warnings.push(format!("protected_root:{}", root.display()));
        }
        metrics.errors_total += telemetry.io_errors.load(Ordering::Relaxed);

        let filter = FilterEngine::new(
            config.min_size,
            &config.extensions,
            &config.include_patterns,
            &config.exclude_patterns,
            config.skip_hidden,
        )?;

        let records: Vec<FileRecord> = entries
            .into_iter()
            .filter(|e| filter.accepts(e))
            .map(|e| FileRecord {
                path: e.path,
                size: e.metadata.size_bytes,
                mtime: e.metadata.modified_secs,
                device_id: e.metadata.device_id,
                inode: e.metadata.inode,
            })
            .collect();

        session_store.write_files(&session_id, &records)?;
        records
    };

    metrics.files_scanned = files.len() as u64;

    if let Some(baseline_id) = &config.baseline_session {
        classify_against_baseline(session_store, baseline_id, &files, &mut metrics, &mut warnings)?;
    }

    checkpoint!(Stage::Collect);

    // --- quick_hash / full_hash ---
    let mut content_groups: Vec<Group> = Vec::new();
    if config.mode != crate::core::config::GroupMode::NameOnly {
        callbacks.on_stage_change(Stage::QuickHash);
        session_store.set_stage(&session_id, Stage::QuickHash)?;
        progress.emit(callbacks, 20.0, "quick hash");
        checkpoint!(Stage::QuickHash);

        callbacks.on_stage_change(Stage::FullHash);
        session_store.set_stage(&session_id, Stage::FullHash)?;
        progress.emit(callbacks, 40.0, "full hash");

        let hashed = if let Some(hashed) = resume_hashed {
            info!(session = %session_id, "replaying hashes from persisted session state");
            hashed
        } else {
            let pipeline_config = HashPipelineConfig::new(config.max_workers);
            let (hashed, telemetry) =
                hash_pipeline::run(&files, fingerprint_store, cancel.inner(), pipeline_config)?;

            metrics.files_hashed += telemetry.files_hashed.load(Ordering::Relaxed);
            metrics.files_skipped_error += telemetry.files_skipped_error.load(Ordering::Relaxed);
            metrics.files_skipped_locked += telemetry.files_skipped_locked.load(Ordering::Relaxed);
            metrics.errors_total += telemetry.errors_total.load(Ordering::Relaxed);

            persist_hashes(session_store, &session_id, &hashed)?;
            hashed
        };

        checkpoint!(Stage::FullHash);

        content_groups = group_builder::build_content_groups(&hashed, config.mode, config.byte_verify)?;
    } else {
        content_groups = group_builder::build_name_only_groups(&files);
    }

    // --- group ---
    callbacks.on_stage_change(Stage::Group);
    session_store.set_stage(&session_id, Stage::Group)?;
    progress.emit(callbacks, 60.0, "grouping");
    checkpoint!(Stage::Group);

    let mut all_groups: Vec<(GroupKey, Vec<String>)> = content_groups
        .into_iter()
        .map(|g| (g.key, g.members.into_iter().map(|m| m.path.to_string_lossy().to_string()).collect()))
        .collect();

    // Results must be non-empty once a session is paused at-or-past `group`
    // (spec §3), so every subsequent stage flushes its additions before its
    // own cancellation checkpoint can return early.
    session_store.write_results(&session_id, &render_results(&all_groups))?;

    // --- folder_dup ---
    if config.detect_folder_dup {
        callbacks.on_stage_change(Stage::FolderDup);
        session_store.set_stage(&session_id, Stage::FolderDup)?;
        progress.emit(callbacks, 75.0, "folder duplicates");
        checkpoint!(Stage::FolderDup);

        // Folder-duplicate manifests need every file's full hash regardless
        // of `config.mode`/byte-verify splitting, not just the files that
        // survived content-group dedup (which discards singletons). This
        // reuses the fingerprint cache, so files already hashed above cost
        // nothing extra here.
        let pipeline_config = HashPipelineConfig::new(config.max_workers);
        let (full_hashes, telemetry) =
            hash_pipeline::full_hash_all(&files, fingerprint_store, cancel.inner(), pipeline_config);
        metrics.files_hashed += telemetry.files_hashed.load(Ordering::Relaxed);
        metrics.files_skipped_error += telemetry.files_skipped_error.load(Ordering::Relaxed);
        metrics.files_skipped_locked += telemetry.files_skipped_locked.load(Ordering::Relaxed);
        metrics.errors_total += telemetry.errors_total.load(Ordering::Relaxed);

        let inputs: Vec<FolderDupInput> = full_hashes
            .into_iter()
            .map(|(record, full_hash)| FolderDupInput {
                path: record.path,
                size: record.size,
                full_hash,
            })
            .collect();

        let folder_groups = folder_dup::detect(&inputs, config.folder_dup_recursive);
        for g in folder_groups {
            let paths = g.directories.iter().map(|d| d.to_string_lossy().to_string()).collect();
            all_groups.push((g.key, paths));
        }

        session_store.write_results(&session_id, &render_results(&all_groups))?;
    }

    // --- similar_image ---
    #[cfg(feature = "images")]
    if config.similar_image || config.mixed_mode {
        callbacks.on_stage_change(Stage::SimilarImage);
        session_store.set_stage(&session_id, Stage::SimilarImage)?;
        progress.emit(callbacks, 88.0, "similar images");
        checkpoint!(Stage::SimilarImage);

        let (similar_groups, image_errors) = grouper::group(&files, config.similarity, cancel.inner())?;
        metrics.errors_total += image_errors;
        for g in similar_groups {
            let paths = g.members.iter().map(|m| m.path.to_string_lossy().to_string()).collect();
            all_groups.push((g.key, paths));
        }

        session_store.write_results(&session_id, &render_results(&all_groups))?;
    }

    // --- finalize ---
    callbacks.on_stage_change(Stage::Finalize);
    session_store.set_stage(&session_id, Stage::Finalize)?;
    progress.emit(callbacks, 100.0, "finalizing");

    session_store.write_results(&session_id, &render_results(&all_groups))?;

    let status = if config.strict_mode && metrics.errors_total > config.strict_max_errors {
        warnings.push("strict_mode_threshold_exceeded".to_string());
        SessionStatus::Partial
    } else {
        SessionStatus::Completed
    };
    session_store.set_status(&session_id, status)?;

    Ok(Completion::Finished(SessionResult {
        session_id,
        scan_status: status,
        groups: all_groups,
        metrics,
        warnings,
        config_hash,
    }))
}

fn new_session_id() -> String {
    use std::sync::atomic::AtomicU64 as Counter;
    static COUNTER: Counter = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    format!("sess-{pid:x}-{n:x}")
}

/// Report an uncaught stage failure: mark the session `failed` and return
/// the `failed` completion signal (spec §4.9, §7).
pub fn fail_session(session_store: &SessionStore, session_id: &str, err: &DsError) -> Result<Completion> {
    session_store.set_status(session_id, SessionStatus::Failed)?;
    Ok(Completion::Failed(err.to_string()))
}

/// Flatten `group_key -> members` into the `(rendered_key, path)` rows the
/// session store persists.
fn render_results(groups: &[(GroupKey, Vec<String>)]) -> Vec<(String, String)> {
    groups
        .iter()
        .flat_map(|(key, paths)| {
            let rendered = key.render();
            paths.iter().map(move |p| (rendered.clone(), p.clone()))
        })
        .collect()
}

/// Persist every hashed file's partial and full hash into `session_hashes`,
/// so a later resume can replay this stage instead of recomputing (spec
/// §4.9).
fn persist_hashes(session_store: &SessionStore, session_id: &str, hashed: &[HashedFile]) -> Result<()> {
    let mut rows = Vec::with_capacity(hashed.len() * 2);
    for h in hashed {
        let path = h.record.path.to_string_lossy().to_string();
        rows.push(HashRow {
            path: path.clone(),
            hash_type: "partial",
            hash: h.partial_hash.clone(),
        });
        rows.push(HashRow {
            path,
            hash_type: "full",
            hash: h.full_hash.clone(),
        });
    }
    session_store.write_hashes(session_id, &rows)
}

/// Reconstruct the hash-pipeline's `HashedFile` output from `session_hashes`,
/// joined against the session's persisted file list, for a resume that has
/// already passed `full_hash`.
fn load_persisted_hashes(
    session_store: &SessionStore,
    session_id: &str,
    files: &[FileRecord],
) -> Result<Vec<HashedFile>> {
    let full_rows = session_store.load_hashes(session_id, "full")?;
    let partial_by_path: HashMap<String, String> =
        session_store.load_hashes(session_id, "partial")?.into_iter().collect();
    let record_by_path: HashMap<String, FileRecord> = files
        .iter()
        .map(|f| (f.path.to_string_lossy().to_string(), f.clone()))
        .collect();

    Ok(full_rows
        .into_iter()
        .filter_map(|(path, full_hash)| {
            let record = record_by_path.get(&path)?.clone();
            let partial_hash = partial_by_path.get(&path)?.clone();
            Some(HashedFile {
                record,
                partial_hash,
                full_hash,
            })
        })
        .collect())
}

/// Classify `files` against a prior `completed` session's file list into
/// `new`/`changed`/`revalidated` counts (spec §4.9: "Only completed sessions
/// may serve as incremental baselines for delta classification").
fn classify_against_baseline(
    session_store: &SessionStore,
    baseline_id: &str,
    files: &[FileRecord],
    metrics: &mut ScanMetrics,
    warnings: &mut Vec<String>,
) -> Result<()> {
    let Some(baseline) = session_store.get(baseline_id)? else {
        warnings.push(format!("baseline_session_not_found:{baseline_id}"));
        return Ok(());
    };
    if baseline.status != SessionStatus::Completed {
        warnings.push(format!("baseline_session_not_completed:{baseline_id}"));
        return Ok(());
    }

    let baseline_by_path: HashMap<String, (u64, i64)> = session_store
        .load_files(baseline_id)?
        .into_iter()
        .map(|f| (f.path.to_string_lossy().to_string(), (f.size, f.mtime)))
        .collect();

    for f in files {
        let path = f.path.to_string_lossy().to_string();
        match baseline_by_path.get(&path) {
            None => metrics.files_new += 1,
            Some((size, mtime)) if *size == f.size && *mtime == f.mtime => metrics.files_revalidated += 1,
            Some(_) => metrics.files_changed += 1,
        }
    }
    Ok(())
}
