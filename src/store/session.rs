//! Session store: per-run persisted state shared over the same substrate as
//! the fingerprint store (spec §4.4).

#![cfg(feature = "sqlite")]

use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use crate::core::errors::{DsError, Result};
use crate::store::model::{FileRecord, SessionStatus, Stage};
use crate::store::schema::open_connection;

/// Minimum spacing between DB progress writes (spec §4.4, independent of
/// the UI's own 100 ms throttle).
const DB_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Maximum rows batched into a single `session_hashes` transaction.
const MAX_BATCH_ROWS: usize = 500;

/// Summary row for `sessions` listing/lookup.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: String,
    pub status: SessionStatus,
    pub stage: Stage,
    pub config_hash: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One `(session, path, hash_type)` hash row to persist.
#[derive(Debug, Clone)]
pub struct HashRow {
    pub path: String,
    pub hash_type: &'static str,
    pub hash: String,
}

/// Session store. A single connection guarded by a mutex: session writes
/// are comparatively low-frequency and always serialized through the
/// orchestrator thread, unlike the fingerprint store's hot worker path.
pub struct SessionStore {
    conn: Mutex<Connection>,
    last_progress_write: Mutex<Option<Instant>>,
}

impl SessionStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = open_connection(db_path)?;
        Ok(Self {
            conn: Mutex::new(conn),
            last_progress_write: Mutex::new(None),
        })
    }

    /// Create a new `running` session row.
    pub fn create_session(&self, id: &str, config_json: &str, config_hash: &str) -> Result<()> {
        let conn = self.conn.lock();
        let now = now_secs();
        conn.execute(
            "INSERT INTO sessions (id, status, stage, config_json, config_hash, progress_percent, progress_message, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, '', ?6, ?6)",
            params![
                id,
                SessionStatus::Running.as_str(),
                Stage::Collect.as_str(),
                config_json,
                config_hash,
                now,
            ],
        )?;
        Ok(())
    }

    /// Record the files discovered during `collect`. A session's files set
    /// is fixed once written (spec §3 invariant) — callers must only call
    /// this once per session.
    pub fn write_files(&self, session_id: &str, files: &[FileRecord]) -> Result<()> {
        let mut conn = self.conn.lock();
        for chunk in files.chunks(MAX_BATCH_ROWS) {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR REPLACE INTO session_files (session_id, path, size, mtime, device_id, inode)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for f in chunk {
                    stmt.execute(params![
                        session_id,
                        f.path.to_string_lossy(),
                        f.size as i64,
                        f.mtime,
                        f.device_id as i64,
                        f.inode as i64,
                    ])?;
                }
            }
            tx.commit()?;
        }
        Ok(())
    }

    /// Load the files set persisted for a session (used on resume).
    pub fn load_files(&self, session_id: &str) -> Result<Vec<FileRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT path, size, mtime, device_id, inode FROM session_files WHERE session_id = ?1",
        )?;
        let rows = stmt.query_map(params![session_id], |r| {
            let path: String = r.get(0)?;
            Ok(FileRecord {
                path: path.into(),
                size: r.get::<_, i64>(1)? as u64,
                mtime: r.get(2)?,
                device_id: r.get::<_, i64>(3)? as u64,
                inode: r.get::<_, i64>(4)? as u64,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(DsError::from)
    }

    /// Batched, deduplicated write of hash rows: at most one row per
    /// `(session, path, hash_type)` survives within a single call, matching
    /// the "written at most once per batch" contract (spec §4.4).
    pub fn write_hashes(&self, session_id: &str, rows: &[HashRow]) -> Result<()> {
        let mut dedup: std::collections::HashMap<(&str, &str), &HashRow> =
            std::collections::HashMap::new();
        for row in rows {
            dedup.insert((row.path.as_str(), row.hash_type), row);
        }
        let deduped: Vec<&HashRow> = dedup.into_values().collect();

        let mut conn = self.conn.lock();
        for chunk in deduped.chunks(MAX_BATCH_ROWS) {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR REPLACE INTO session_hashes (session_id, path, hash_type, hash)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for row in chunk {
                    stmt.execute(params![session_id, row.path, row.hash_type, row.hash])?;
                }
            }
            tx.commit()?;
        }
        Ok(())
    }

    /// Load all hashes of a given type persisted for a session (used on
    /// resume to skip already-completed work).
    pub fn load_hashes(&self, session_id: &str, hash_type: &str) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT path, hash FROM session_hashes WHERE session_id = ?1 AND hash_type = ?2",
        )?;
        let rows = stmt.query_map(params![session_id, hash_type], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(DsError::from)
    }

    /// Persist the final grouping result: `group_key -> paths`.
    pub fn write_results(&self, session_id: &str, results: &[(String, String)]) -> Result<()> {
        let mut conn = self.conn.lock();
        conn.execute(
            "DELETE FROM session_results WHERE session_id = ?1",
            params![session_id],
        )?;
        for chunk in results.chunks(MAX_BATCH_ROWS) {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR REPLACE INTO session_results (session_id, group_key, path) VALUES (?1, ?2, ?3)",
                )?;
                for (group_key, path) in chunk {
                    stmt.execute(params![session_id, group_key, path])?;
                }
            }
            tx.commit()?;
        }
        Ok(())
    }

    pub fn load_results(&self, session_id: &str) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT group_key, path FROM session_results WHERE session_id = ?1",
        )?;
        let rows = stmt.query_map(params![session_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(DsError::from)
    }

    /// Update `selected` dispositions driven by an external UI.
    pub fn set_selected(&self, session_id: &str, path: &str, selected: bool) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO session_selected (session_id, path, selected) VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id, path) DO UPDATE SET selected = excluded.selected",
            params![session_id, path, i64::from(selected)],
        )?;
        Ok(())
    }

    /// Transition stage, unconditionally (no throttling — stage changes are
    /// rare compared to progress updates).
    pub fn set_stage(&self, session_id: &str, stage: Stage) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE sessions SET stage = ?1, updated_at = ?2 WHERE id = ?3",
            params![stage.as_str(), now_secs(), session_id],
        )?;
        Ok(())
    }

    /// Transition status, unconditionally.
    pub fn set_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE sessions SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now_secs(), session_id],
        )?;
        Ok(())
    }

    /// Write progress, throttled to at most one DB write per 500 ms
    /// (spec §4.4), independent of the UI's own throttle. Returns whether
    /// the write actually happened.
    pub fn write_progress_throttled(
        &self,
        session_id: &str,
        percent: f64,
        message: &str,
    ) -> Result<bool> {
        {
            let mut last = self.last_progress_write.lock();
            let now = Instant::now();
            if let Some(prev) = *last
                && now.duration_since(prev) < DB_PROGRESS_INTERVAL
            {
                return Ok(false);
            }
            *last = Some(now);
        }
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE sessions SET progress_percent = ?1, progress_message = ?2, updated_at = ?3 WHERE id = ?4",
            params![percent, message, now_secs(), session_id],
        )?;
        Ok(true)
    }

    pub fn get(&self, session_id: &str) -> Result<Option<SessionSummary>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, status, stage, config_hash, created_at, updated_at FROM sessions WHERE id = ?1",
                params![session_id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, i64>(4)?,
                        r.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.map(|(id, status, stage, config_hash, created_at, updated_at)| SessionSummary {
            id,
            status: status.parse().unwrap_or(SessionStatus::Failed),
            stage: stage.parse().unwrap_or(Stage::Collect),
            config_hash,
            created_at,
            updated_at,
        }))
    }

    /// Find a `paused` session matching `config_hash`, for resume.
    pub fn find_resumable(&self, config_hash: &str) -> Result<Option<SessionSummary>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, status, stage, config_hash, created_at, updated_at FROM sessions
                 WHERE status = 'paused' AND config_hash = ?1 ORDER BY updated_at DESC LIMIT 1",
                params![config_hash],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, i64>(4)?,
                        r.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.map(|(id, status, stage, config_hash, created_at, updated_at)| SessionSummary {
            id,
            status: status.parse().unwrap_or(SessionStatus::Failed),
            stage: stage.parse().unwrap_or(Stage::Collect),
            config_hash,
            created_at,
            updated_at,
        }))
    }

    /// Garbage-collect all but the `keep_latest` most-recently-updated
    /// sessions (spec §3 Lifecycle).
    pub fn gc_sessions(&self, keep_latest: usize) -> Result<usize> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id FROM sessions ORDER BY updated_at DESC")?;
        let ids: Vec<String> = stmt
            .query_map([], |r| r.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let stale: HashSet<&String> = ids.iter().skip(keep_latest).collect();
        let mut deleted = 0usize;
        for id in stale {
            conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
            conn.execute("DELETE FROM session_files WHERE session_id = ?1", params![id])?;
            conn.execute("DELETE FROM session_hashes WHERE session_id = ?1", params![id])?;
            conn.execute("DELETE FROM session_results WHERE session_id = ?1", params![id])?;
            conn.execute("DELETE FROM session_selected WHERE session_id = ?1", params![id])?;
            deleted += 1;
        }
        Ok(deleted)
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

    fn file(path: &str) -> FileRecord {
        FileRecord {
            path: path.into(),
            size: 10,
            mtime: 100,
            device_id: 1,
            inode: 1,
        }
    }

    #[test]
    fn create_and_load_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(&dir.path().join("s.db")).unwrap();
        store.create_session("sess-1", "{}", "hash1").unwrap();
        let summary = store.get("sess-1").unwrap().unwrap();
        assert_eq!(summary.status, SessionStatus::Running);
        assert_eq!(summary.stage, Stage::Collect);
    }

    #[test]
    fn files_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(&dir.path().join("s.db")).unwrap();
        store.create_session("sess-1", "{}", "hash1").unwrap();
        store.write_files("sess-1", &[file("/a"), file("/b")]).unwrap();
        let loaded = store.load_files("sess-1").unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn write_hashes_dedups_within_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(&dir.path().join("s.db")).unwrap();
        store.create_session("sess-1", "{}", "hash1").unwrap();
        store
            .write_hashes(
                "sess-1",
                &[
                    HashRow { path: "/a".into(), hash_type: "partial", hash: "x".into() },
                    HashRow { path: "/a".into(), hash_type: "partial", hash: "y".into() },
                ],
            )
            .unwrap();
        let loaded = store.load_hashes("sess-1", "partial").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].1, "y");
    }

    #[test]
    fn progress_write_is_throttled() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(&dir.path().join("s.db")).unwrap();
        store.create_session("sess-1", "{}", "hash1").unwrap();
        assert!(store.write_progress_throttled("sess-1", 10.0, "a").unwrap());
        assert!(!store.write_progress_throttled("sess-1", 20.0, "b").unwrap());
    }

    #[test]
    fn stage_and_status_transitions_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(&dir.path().join("s.db")).unwrap();
        store.create_session("sess-1", "{}", "hash1").unwrap();
        store.set_stage("sess-1", Stage::FullHash).unwrap();
        store.set_status("sess-1", SessionStatus::Paused).unwrap();
        let summary = store.get("sess-1").unwrap().unwrap();
        assert_eq!(summary.stage, Stage::FullHash);
        assert_eq!(summary.status, SessionStatus::Paused);
    }

    #[test]
    fn find_resumable_matches_paused_and_config_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(&dir.path().join("s.db")).unwrap();
        store.create_session("sess-1", "{}", "hash1").unwrap();
        store.set_status("sess-1", SessionStatus::Paused).unwrap();
        let found = store.find_resumable("hash1").unwrap().unwrap();
        assert_eq!(found.id, "sess-1");
        assert!(store.find_resumable("other-hash").unwrap().is_none());
    }

    #[test]
    fn gc_keeps_only_latest_n() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(&dir.path().join("s.db")).unwrap();
        for i in 0..5 {
            store.create_session(&format!("sess-{i}"), "{}", "hash1").unwrap();
        }
        let deleted = store.gc_sessions(2).unwrap();
        assert_eq!(deleted, 3);
    }
}
