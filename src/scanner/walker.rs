//! Parallel recursive directory walker.
//!
//! Discovers files under one or more root paths using a bounded worker pool.
//! Symlink cycles are broken by tracking `(device, inode)` of every directory
//! on the current descent path; protected system roots are consulted before
//! descent so their subtrees are never read.

#![allow(missing_docs)]
#![allow(clippy::cast_possible_truncation)]

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, SystemTime};

use crossbeam_channel as channel;

use crate::core::errors::{DsError, Result};
use crate::scanner::protected_roots::ProtectedRoots;

/// Walker configuration.
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    pub root_paths: Vec<PathBuf>,
    pub max_depth: usize,
    pub follow_symlinks: bool,
    pub cross_devices: bool,
    pub parallelism: usize,
    pub excluded_paths: HashSet<PathBuf>,
    pub protect_system: bool,
}

/// Metadata collected for a discovered file (mirrors spec's `FileRecord`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMetadata {
    pub size_bytes: u64,
    pub modified_secs: i64,
    pub is_dir: bool,
    pub inode: u64,
    pub device_id: u64,
}

/// A single file discovered during a walk.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    pub path: PathBuf,
    pub metadata: EntryMetadata,
    pub depth: usize,
}

/// Per-walk telemetry: entries that could not be read due to I/O faults.
/// Never aborts the walk; counted and capped-sampled (spec §4.1).
#[derive(Debug, Default)]
pub struct WalkTelemetry {
    pub io_errors: AtomicU64,
    pub sample_paths: parking_lot::Mutex<Vec<PathBuf>>,
}

const TELEMETRY_SAMPLE_CAP: usize = 32;

impl WalkTelemetry {
    fn record_error(&self, path: &Path) {
        self.io_errors.fetch_add(1, Ordering::Relaxed);
        let mut sample = self.sample_paths.lock();
        if sample.len() < TELEMETRY_SAMPLE_CAP {
            sample.push(path.to_path_buf());
        }
    }
}

/// (directory, depth, root_device_id, ancestor (device, inode) identities on the
/// current descent path — used to break symlink cycles when following symlinks).
type WorkItem = (PathBuf, usize, u64, Arc<Vec<(u64, u64)>>);

/// Parallel directory walker with root-protection and symlink-cycle safety.
pub struct DirectoryWalker {
    config: WalkerConfig,
    protected_roots: ProtectedRoots,
}

impl DirectoryWalker {
    #[must_use]
    pub fn new(config: WalkerConfig, protected_roots: ProtectedRoots) -> Self {
        Self {
            config,
            protected_roots,
        }
    }

    /// Walk all configured roots, returning discovered files and telemetry.
    ///
    /// Root paths identified as protected yield zero entries for that root;
    /// the caller is expected to record a warning for each such root.
    pub fn walk(&self) -> Result<(Vec<WalkEntry>, Arc<WalkTelemetry>, Vec<PathBuf>)> {
        let parallelism = self.config.parallelism.max(1);
        let telemetry = Arc::new(WalkTelemetry::default());
        let mut protected_root_hits = Vec::new();

        let (work_tx, work_rx) = channel::bounded::<WorkItem>(1024);
        let (result_tx, result_rx) = channel::unbounded::<WalkEntry>();
        let in_flight = Arc::new(AtomicUsize::new(0));

        for root in &self.config.root_paths {
            if self.config.protect_system && self.protected_roots.is_protected(root) {
                protected_root_hits.push(root.clone());
                continue;
            }

            let meta = match metadata_for_path(root, self.config.follow_symlinks) {
                Ok(m) => m,
                Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
                    telemetry.record_error(root);
                    continue;
                }
                Err(err) => return Err(DsError::io(root, err)),
            };
            if !meta.is_dir() {
                continue;
            }
            let dev = device_id(&meta);
            in_flight.fetch_add(1, Ordering::SeqCst);
            let _ = work_tx.send((root.clone(), 0, dev, Arc::new(Vec::new())));
        }

        let workers: Vec<_> = (0..parallelism)
            .map(|_| {
                let work_rx = work_rx.clone();
                let work_tx = work_tx.clone();
                let result_tx = result_tx.clone();
                let in_flight = Arc::clone(&in_flight);
                let config = self.config.clone();
                let protected_roots = self.protected_roots.clone();
                let telemetry = Arc::clone(&telemetry);

                thread::spawn(move || {
                    walker_thread(
                        &work_rx,
                        &work_tx,
                        &result_tx,
                        &in_flight,
                        &config,
                        &protected_roots,
                        &telemetry,
                    );
                })
            })
            .collect();

        drop(work_tx);
        drop(result_tx);

        let entries: Vec<WalkEntry> = result_rx.iter().collect();

        for handle in workers {
            let _ = handle.join();
        }

        Ok((entries, telemetry, protected_root_hits))
    }
}

#[allow(clippy::too_many_arguments)]
fn walker_thread(
    work_rx: &channel::Receiver<WorkItem>,
    work_tx: &channel::Sender<WorkItem>,
    result_tx: &channel::Sender<WalkEntry>,
    in_flight: &AtomicUsize,
    config: &WalkerConfig,
    protected_roots: &ProtectedRoots,
    telemetry: &WalkTelemetry,
) {
    loop {
        match work_rx.recv_timeout(Duration::from_millis(50)) {
            Ok((dir_path, depth, root_dev, ancestors)) => {
                process_directory(
                    &dir_path,
                    depth,
                    root_dev,
                    &ancestors,
                    work_tx,
                    result_tx,
                    in_flight,
                    config,
                    protected_roots,
                    telemetry,
                );
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            Err(channel::RecvTimeoutError::Timeout) => {
                if in_flight.load(Ordering::SeqCst) == 0 {
                    return;
                }
            }
            Err(channel::RecvTimeoutError::Disconnected) => return,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn process_directory(
    dir_path: &Path,
    depth: usize,
    root_dev: u64,
    ancestors: &Arc<Vec<(u64, u64)>>,
    work_tx: &channel::Sender<WorkItem>,
    result_tx: &channel::Sender<WalkEntry>,
    in_flight: &AtomicUsize,
    config: &WalkerConfig,
    protected_roots: &ProtectedRoots,
    telemetry: &WalkTelemetry,
) {
    if config.excluded_paths.contains(dir_path) {
        return;
    }
    if config.protect_system && protected_roots.is_protected(dir_path) {
        return;
    }

    let entries = match fs::read_dir(dir_path) {
        Ok(entries) => entries,
        Err(err) if matches!(err.kind(), ErrorKind::PermissionDenied | ErrorKind::NotFound) => {
            telemetry.record_error(dir_path);
            return;
        }
        Err(_) => {
            telemetry.record_error(dir_path);
            return;
        }
    };

    if depth >= config.max_depth {
        return;
    }

    for entry_result in entries {
        let Ok(entry) = entry_result else {
            continue;
        };
        let child_path = entry.path();

        let Ok(meta) = metadata_for_path(&child_path, config.follow_symlinks) else {
            telemetry.record_error(&child_path);
            continue;
        };

        if !config.follow_symlinks && meta.file_type().is_symlink() {
            continue;
        }

        if meta.is_dir() {
            let child_dev = device_id(&meta);
            if !config.cross_devices && child_dev != root_dev {
                continue;
            }
            if config.excluded_paths.contains(&child_path) {
                continue;
            }
            if config.protect_system && protected_roots.is_protected(&child_path) {
                continue;
            }

            if config.follow_symlinks {
                let ident = (child_dev, inode_of(&meta));
                if ancestors.contains(&ident) {
                    // Cycle: this directory is already on the descent path.
                    continue;
                }
                let mut next = (**ancestors).clone();
                next.push(ident);
                in_flight.fetch_add(1, Ordering::SeqCst);
                if work_tx
                    .send((child_path, depth + 1, root_dev, Arc::new(next)))
                    .is_err()
                {
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            } else {
                in_flight.fetch_add(1, Ordering::SeqCst);
                if work_tx
                    .send((child_path, depth + 1, root_dev, Arc::clone(ancestors)))
                    .is_err()
                {
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            }
        } else if meta.is_file() {
            let _ = result_tx.send(WalkEntry {
                path: child_path,
                metadata: entry_metadata(&meta),
                depth: depth + 1,
            });
        }
    }
}

fn entry_metadata(meta: &fs::Metadata) -> EntryMetadata {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        EntryMetadata {
            size_bytes: meta.len(),
            modified_secs: meta.mtime(),
            is_dir: meta.is_dir(),
            inode: meta.ino(),
            device_id: meta.dev(),
        }
    }
    #[cfg(not(unix))]
    {
        let modified_secs = meta
            .modified()
            .ok()
            .and_then(|m| m.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs() as i64);
        EntryMetadata {
            size_bytes: meta.len(),
            modified_secs,
            is_dir: meta.is_dir(),
            inode: 0,
            device_id: 0,
        }
    }
}

fn metadata_for_path(path: &Path, follow_symlinks: bool) -> std::io::Result<fs::Metadata> {
    if follow_symlinks {
        fs::metadata(path)
    } else {
        fs::symlink_metadata(path)
    }
}

fn device_id(meta: &fs::Metadata) -> u64 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        meta.dev()
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        0
    }
}

fn inode_of(meta: &fs::Metadata) -> u64 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        meta.ino()
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        0
    }
}
