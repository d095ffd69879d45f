use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use tracing::debug;

use crate::errors::{AppError, AppResult};

pub const DEFAULT_DATABASE_PATH: &str = "/var/lib/facevote/facevote.db";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared SQLite connection used by the registry and the vote ledger.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        debug!(path = %path.display(), "opening database");
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal_mode = %mode, "database journal mode");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> AppResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> AppResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS identities (
                cohort TEXT NOT NULL,
                identity_id TEXT NOT NULL,
                display_name TEXT NOT NULL,
                embedding TEXT NOT NULL,
                enrollment_image TEXT,
                enrolled_at TEXT NOT NULL,
                PRIMARY KEY (cohort, identity_id)
            );
            CREATE TABLE IF NOT EXISTS voters (
                voter_id TEXT PRIMARY KEY,
                has_voted INTEGER NOT NULL DEFAULT 0 CHECK (has_voted IN (0, 1))
            );
            CREATE TABLE IF NOT EXISTS votes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                voter_id TEXT NOT NULL UNIQUE REFERENCES voters(voter_id),
                candidate_id TEXT NOT NULL,
                cast_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_votes_candidate ON votes(candidate_id);
            CREATE TABLE IF NOT EXISTS recognitions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cohort TEXT NOT NULL,
                identity_id TEXT NOT NULL,
                confidence REAL NOT NULL,
                strategy TEXT NOT NULL,
                recognized_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS vote_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                voter_digest TEXT NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('accepted', 'rejected')),
                reason TEXT,
                recorded_at TEXT NOT NULL
            );
            CREATE TRIGGER IF NOT EXISTS vote_events_no_update
            BEFORE UPDATE ON vote_events
            BEGIN
                SELECT RAISE(ABORT, 'vote_events is append-only');
            END;
            CREATE TRIGGER IF NOT EXISTS vote_events_no_delete
            BEFORE DELETE ON vote_events
            BEGIN
                SELECT RAISE(ABORT, 'vote_events is append-only');
            END;",
        )
    }

    pub fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::StorageUnavailable("connection lock poisoned".into()))
    }
}

pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn schema_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.lock().unwrap();
        Database::init_schema(&conn).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('identities', 'voters', 'votes', 'recognitions', 'vote_events')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 5);
    }

    #[test]
    fn vote_events_reject_update_and_delete() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.lock().unwrap();
        conn.execute(
            "INSERT INTO vote_events (voter_digest, kind, recorded_at)
             VALUES ('abc', 'accepted', '2024-01-01T00:00:00.000Z')",
            [],
        )
        .unwrap();

        let update = conn
            .execute("UPDATE vote_events SET kind = 'rejected'", [])
            .unwrap_err();
        assert!(is_constraint_violation(&update));
        let delete = conn.execute("DELETE FROM vote_events", []).unwrap_err();
        assert!(is_constraint_violation(&delete));

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM vote_events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn open_creates_parent_directory() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state").join("facevote.db");
        Database::open(&path).unwrap();
        assert!(path.exists());
    }
}
