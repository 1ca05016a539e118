//! Persistent fingerprint cache: `path -> (size, mtime, partial_hash,
//! full_hash, last_seen)`, keyed by canonical absolute path (spec §4.3).

#![cfg(feature = "sqlite")]

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rusqlite::{Connection, params};

use crate::core::errors::Result;
use crate::core::hash::Digest128;
use crate::store::schema::open_connection;

/// A cached fingerprint: partial and/or full hash, valid only against the
/// `(size, mtime)` witness it was stored with (spec §3 invariant).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub partial_hash: Option<String>,
    pub full_hash: Option<String>,
}

/// One row to upsert in a batch write (spec §4.3: writers batch `put_*`
/// calls into bounded groups of <= 500 rows per transaction).
#[derive(Debug, Clone)]
pub struct PartialHashWrite {
    pub path: PathBuf,
    pub size: u64,
    pub mtime: i64,
    pub hash: Digest128,
}

#[derive(Debug, Clone)]
pub struct FullHashWrite {
    pub path: PathBuf,
    pub size: u64,
    pub mtime: i64,
    pub hash: Digest128,
}

/// Maximum rows per batched transaction (spec §4.3).
pub const MAX_BATCH_ROWS: usize = 500;

/// Transactional persistent fingerprint cache shared across worker threads.
///
/// Each thread that touches the store opens its own `rusqlite::Connection`
/// (SQLite connections are not `Sync`); handles are tracked only as `Weak`
/// references so the store itself never keeps a thread's connection alive
/// past that thread's lifetime, and `close_all` can deterministically flush
/// every handle that is still live (spec §9 "global state" / §4.3
/// concurrency note).
pub struct FingerprintStore {
    db_path: PathBuf,
    registry: Mutex<Vec<Weak<Mutex<Connection>>>>,
}

thread_local! {
    static TLS_CONN: RefCell<Option<Arc<Mutex<Connection>>>> = const { RefCell::new(None) };
}

impl FingerprintStore {
    /// Open (creating if needed) the fingerprint store at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        // Eagerly validate the path/schema on the opening thread.
        drop(open_connection(db_path)?);
        Ok(Self {
            db_path: db_path.to_path_buf(),
            registry: Mutex::new(Vec::new()),
        })
    }

    fn handle(&self) -> Result<Arc<Mutex<Connection>>> {
        if let Some(existing) = TLS_CONN.with(|c| c.borrow().clone()) {
            return Ok(existing);
        }
        let conn = open_connection(&self.db_path)?;
        let arc = Arc::new(Mutex::new(conn));
        self.registry.lock().push(Arc::downgrade(&arc));
        TLS_CONN.with(|c| *c.borrow_mut() = Some(Arc::clone(&arc)));
        Ok(arc)
    }

    /// Returns the stored fingerprint only if its `(size, mtime)` witness
    /// matches the live file's; refreshes `last_seen` on a hit.
    pub fn lookup(&self, path: &Path, size: u64, mtime: i64) -> Result<Option<Fingerprint>> {
        let handle = self.handle()?;
        let conn = handle.lock();
        let path_str = path.to_string_lossy();
        let row: Option<(i64, i64, Option<String>, Option<String>)> = conn
            .query_row(
                "SELECT size, mtime, partial_hash, full_hash FROM fingerprints WHERE path = ?1",
                params![path_str],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .ok();

        let Some((stored_size, stored_mtime, partial, full)) = row else {
            return Ok(None);
        };

        if stored_size != size as i64 || stored_mtime != mtime {
            return Ok(None);
        }

        conn.execute(
            "UPDATE fingerprints SET last_seen = ?1 WHERE path = ?2",
            params![now_secs(), path_str],
        )?;

        Ok(Some(Fingerprint {
            partial_hash: partial,
            full_hash: full,
        }))
    }

    /// Idempotent upsert of a partial hash for a single path.
    pub fn put_partial(&self, write: &PartialHashWrite) -> Result<()> {
        self.put_partial_batch(std::slice::from_ref(write))
    }

    /// Idempotent upsert of a full hash for a single path.
    pub fn put_full(&self, write: &FullHashWrite) -> Result<()> {
        self.put_full_batch(std::slice::from_ref(write))
    }

    /// Batched partial-hash upsert, chunked to `MAX_BATCH_ROWS` per
    /// transaction.
    pub fn put_partial_batch(&self, writes: &[PartialHashWrite]) -> Result<()> {
        let handle = self.handle()?;
        let mut conn = handle.lock();
        for chunk in writes.chunks(MAX_BATCH_ROWS) {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO fingerprints (path, size, mtime, partial_hash, last_seen)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(path) DO UPDATE SET
                        size = excluded.size,
                        mtime = excluded.mtime,
                        partial_hash = excluded.partial_hash,
                        last_seen = excluded.last_seen",
                )?;
                let now = now_secs();
                for w in chunk {
                    stmt.execute(params![
                        w.path.to_string_lossy(),
                        w.size as i64,
                        w.mtime,
                        w.hash.to_hex(),
                        now,
                    ])?;
                }
            }
            tx.commit()?;
        }
        Ok(())
    }

    /// Batched full-hash upsert, chunked to `MAX_BATCH_ROWS` per
    /// transaction.
    pub fn put_full_batch(&self, writes: &[FullHashWrite]) -> Result<()> {
        let handle = self.handle()?;
        let mut conn = handle.lock();
        for chunk in writes.chunks(MAX_BATCH_ROWS) {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO fingerprints (path, size, mtime, full_hash, last_seen)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(path) DO UPDATE SET
                        size = excluded.size,
                        mtime = excluded.mtime,
                        full_hash = excluded.full_hash,
                        last_seen = excluded.last_seen",
                )?;
                let now = now_secs();
                for w in chunk {
                    stmt.execute(params![
                        w.path.to_string_lossy(),
                        w.size as i64,
                        w.mtime,
                        w.hash.to_hex(),
                        now,
                    ])?;
                }
            }
            tx.commit()?;
        }
        Ok(())
    }

    /// Delete rows whose `last_seen` is older than `age_days` (spec §3
    /// Lifecycle retention policy).
    pub fn sweep(&self, age_days: u64) -> Result<usize> {
        let handle = self.handle()?;
        let conn = handle.lock();
        let cutoff = now_secs() - (age_days as i64) * 86_400;
        let deleted = conn.execute(
            "DELETE FROM fingerprints WHERE last_seen < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }

    /// Flush every still-live per-thread handle (WAL checkpoint) and clear
    /// the registry. Handles owned by threads that have already exited are
    /// naturally absent (their `Weak` no longer upgrades), so this call is
    /// deterministic: every handle reachable at the time of the call is
    /// checkpointed exactly once.
    pub fn close_all(&self) -> Result<()> {
        let mut registry = self.registry.lock();
        for weak in registry.drain(..) {
            if let Some(arc) = weak.upgrade() {
                let conn = arc.lock();
                let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
            }
        }
        Ok(())
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(store: &FingerprintStore, path: &str, size: u64, mtime: i64, hash: &str) {
        let mut digest = [0u8; 16];
        digest[..hash.len().min(16)].copy_from_slice(&hash.as_bytes()[..hash.len().min(16)]);
        store
            .put_full(&FullHashWrite {
                path: PathBuf::from(path),
                size,
                mtime,
                hash: Digest128(digest),
            })
            .unwrap();
    }

    #[test]
    fn lookup_miss_on_nonexistent_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = FingerprintStore::open(&dir.path().join("fp.db")).unwrap();
        assert!(store.lookup(Path::new("/x"), 10, 1).unwrap().is_none());
    }

    #[test]
    fn lookup_hit_when_witness_matches() {
        let dir = tempfile::tempdir().unwrap();
        let store = FingerprintStore::open(&dir.path().join("fp.db")).unwrap();
        write(&store, "/a", 10, 100, "abcd");
        let fp = store.lookup(Path::new("/a"), 10, 100).unwrap().unwrap();
        assert!(fp.full_hash.is_some());
    }

    #[test]
    fn lookup_miss_when_size_changed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FingerprintStore::open(&dir.path().join("fp.db")).unwrap();
        write(&store, "/a", 10, 100, "abcd");
        assert!(store.lookup(Path::new("/a"), 11, 100).unwrap().is_none());
    }

    #[test]
    fn lookup_miss_when_mtime_changed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FingerprintStore::open(&dir.path().join("fp.db")).unwrap();
        write(&store, "/a", 10, 100, "abcd");
        assert!(store.lookup(Path::new("/a"), 10, 101).unwrap().is_none());
    }

    #[test]
    fn put_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FingerprintStore::open(&dir.path().join("fp.db")).unwrap();
        write(&store, "/a", 10, 100, "abcd");
        write(&store, "/a", 10, 100, "abcd");
        let fp = store.lookup(Path::new("/a"), 10, 100).unwrap().unwrap();
        assert!(fp.full_hash.is_some());
    }

    #[test]
    fn sweep_deletes_stale_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = FingerprintStore::open(&dir.path().join("fp.db")).unwrap();
        write(&store, "/a", 10, 100, "abcd");
        // Backdate last_seen far in the past directly.
        {
            let handle = store.handle().unwrap();
            let conn = handle.lock();
            conn.execute("UPDATE fingerprints SET last_seen = 0", [])
                .unwrap();
        }
        let deleted = store.sweep(1).unwrap();
        assert_eq!(deleted, 1);
        assert!(store.lookup(Path::new("/a"), 10, 100).unwrap().is_none());
    }

    #[test]
    fn batch_write_chunks_large_batches() {
        let dir = tempfile::tempdir().unwrap();
        let store = FingerprintStore::open(&dir.path().join("fp.db")).unwrap();
        let writes: Vec<PartialHashWrite> = (0..1200)
            .map(|i| PartialHashWrite {
                path: PathBuf::from(format!("/f{i}")),
                size: 1,
                mtime: 1,
                hash: Digest128([0u8; 16]),
            })
            .collect();
        store.put_partial_batch(&writes).unwrap();
        let fp = store.lookup(Path::new("/f999"), 1, 1).unwrap().unwrap();
        assert!(fp.partial_hash.is_some());
    }

    #[test]
    fn close_all_checkpoints_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FingerprintStore::open(&dir.path().join("fp.db")).unwrap();
        write(&store, "/a", 10, 100, "abcd");
        store.close_all().unwrap();
    }
}
