//! Shared SQLite substrate for the fingerprint store and session store
//! (spec §4.3–§4.4): WAL mode, `synchronous=NORMAL`, schema-versioned,
//! refuses unknown major versions (spec §6 "Persisted state layout").

#![cfg(feature = "sqlite")]

use std::path::Path;

use rusqlite::Connection;

use crate::core::errors::{DsError, Result};

/// Current schema major version. Loaders refuse to open a store whose
/// stored major version differs.
pub const SCHEMA_MAJOR_VERSION: i64 = 1;

/// Open (or create) the shared database at `path`, applying PRAGMAs and the
/// full schema, and checking/recording the schema version row.
pub fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|source| DsError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let conn = Connection::open(path)?;
    apply_pragmas(&conn)?;
    apply_schema(&conn)?;
    check_schema_version(&conn)?;
    Ok(conn)
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -8000;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS fingerprints (
            path TEXT PRIMARY KEY,
            size INTEGER NOT NULL,
            mtime INTEGER NOT NULL,
            partial_hash TEXT,
            full_hash TEXT,
            last_seen INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_fingerprints_last_seen ON fingerprints(last_seen);

        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            stage TEXT NOT NULL,
            config_json TEXT NOT NULL,
            config_hash TEXT NOT NULL,
            progress_percent REAL NOT NULL DEFAULT 0,
            progress_message TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
        CREATE INDEX IF NOT EXISTS idx_sessions_config_hash ON sessions(config_hash);

        CREATE TABLE IF NOT EXISTS session_files (
            session_id TEXT NOT NULL,
            path TEXT NOT NULL,
            size INTEGER NOT NULL,
            mtime INTEGER NOT NULL,
            device_id INTEGER NOT NULL,
            inode INTEGER NOT NULL,
            PRIMARY KEY (session_id, path)
        );

        CREATE TABLE IF NOT EXISTS session_hashes (
            session_id TEXT NOT NULL,
            path TEXT NOT NULL,
            hash_type TEXT NOT NULL,
            hash TEXT NOT NULL,
            PRIMARY KEY (session_id, path, hash_type)
        );

        CREATE TABLE IF NOT EXISTS session_results (
            session_id TEXT NOT NULL,
            group_key TEXT NOT NULL,
            path TEXT NOT NULL,
            PRIMARY KEY (session_id, group_key, path)
        );

        CREATE TABLE IF NOT EXISTS session_selected (
            session_id TEXT NOT NULL,
            path TEXT NOT NULL,
            selected INTEGER NOT NULL,
            PRIMARY KEY (session_id, path)
        );

        CREATE TABLE IF NOT EXISTS scheduled_jobs (
            id TEXT PRIMARY KEY,
            config_json TEXT NOT NULL,
            cron TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS scheduled_runs (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            session_id TEXT,
            started_at INTEGER NOT NULL
        );",
    )?;
    Ok(())
}

fn check_schema_version(conn: &Connection) -> Result<()> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_meta WHERE key = 'schema_major_version'",
            [],
            |row| row.get(0),
        )
        .ok();

    match existing {
        None => {
            conn.execute(
                "INSERT INTO schema_meta (key, value) VALUES ('schema_major_version', ?1)",
                [SCHEMA_MAJOR_VERSION.to_string()],
            )?;
            Ok(())
        }
        Some(v) => {
            let stored: i64 = v.parse().map_err(|_| DsError::StoreCorrupt {
                details: format!("schema_major_version row is not an integer: {v:?}"),
            })?;
            if stored != SCHEMA_MAJOR_VERSION {
                return Err(DsError::StoreCorrupt {
                    details: format!(
                        "unsupported schema major version {stored}, expected {SCHEMA_MAJOR_VERSION}"
                    ),
                });
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_and_records_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_connection(&dir.path().join("store.db")).unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |r| r.get(0))
            .unwrap();
        assert!(mode.eq_ignore_ascii_case("wal"));
    }

    #[test]
    fn reopen_with_same_version_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        drop(open_connection(&path).unwrap());
        assert!(open_connection(&path).is_ok());
    }

    #[test]
    fn refuses_mismatched_major_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let conn = open_connection(&path).unwrap();
            conn.execute(
                "UPDATE schema_meta SET value = '999' WHERE key = 'schema_major_version'",
                [],
            )
            .unwrap();
        }
        let err = open_connection(&path).unwrap_err();
        assert_eq!(err.code(), "DS-3001");
    }
}
