//! SQLite schema DDL and version stamp.

use rusqlite::Connection;

use crate::errors::{FlakyError, FlakyResult};

/// Layout version stamped into `repo_meta`. A database stamped with a newer
/// version was written by a newer build and is refused.
pub const SCHEMA_VERSION: i32 = 1;

/// Core DDL, replayable on an initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS repo_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS fingerprints (
        root_file TEXT PRIMARY KEY,
        fingerprint TEXT NOT NULL,
        dependency_count INTEGER NOT NULL,
        updated_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS identities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        root_file TEXT NOT NULL,
        test_name TEXT NOT NULL,
        fingerprint TEXT,
        epoch INTEGER NOT NULL DEFAULT 0,
        UNIQUE(root_file, test_name)
    );",
    "CREATE TABLE IF NOT EXISTS outcomes (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        identity_id INTEGER NOT NULL REFERENCES identities(id),
        epoch INTEGER NOT NULL,
        timestamp_ms INTEGER NOT NULL,
        outcome TEXT NOT NULL CHECK (outcome IN ('pass', 'fail')),
        error_signature TEXT,
        fingerprint TEXT
    );",
    "CREATE TABLE IF NOT EXISTS usage (
        account_id TEXT NOT NULL,
        period TEXT NOT NULL,
        kind TEXT NOT NULL CHECK (kind IN ('analysis', 'pr')),
        used INTEGER NOT NULL DEFAULT 0,
        quota INTEGER NOT NULL,
        PRIMARY KEY(account_id, period, kind)
    );",
    "CREATE TABLE IF NOT EXISTS identity_fingerprints (
        identity_id INTEGER NOT NULL REFERENCES identities(id),
        fingerprint TEXT NOT NULL,
        epoch INTEGER NOT NULL,
        PRIMARY KEY(identity_id, fingerprint)
    );",
    "CREATE INDEX IF NOT EXISTS idx_outcomes_identity_epoch ON outcomes(identity_id, epoch, timestamp_ms);",
    "CREATE INDEX IF NOT EXISTS idx_outcomes_signature ON outcomes(identity_id, error_signature);",
];

/// Stamp a fresh database with [`SCHEMA_VERSION`], or check that an existing
/// one is not newer than this build understands.
pub fn check_schema_version(conn: &Connection) -> FlakyResult<()> {
    match get_schema_version(conn) {
        0 => set_schema_version(conn, SCHEMA_VERSION),
        v if v > SCHEMA_VERSION => Err(FlakyError::Store(format!(
            "database schema version {v} is newer than supported version {SCHEMA_VERSION}"
        ))),
        _ => Ok(()),
    }
}

/// Returns 0 when the key is absent or unparseable.
pub(crate) fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row(
        "SELECT value FROM repo_meta WHERE key = 'schema_version';",
        [],
        |row| row.get::<_, String>(0),
    )
    .ok()
    .and_then(|v| v.parse::<i32>().ok())
    .unwrap_or(0)
}

fn set_schema_version(conn: &Connection, version: i32) -> FlakyResult<()> {
    conn.execute(
        "INSERT INTO repo_meta(key, value) \
         VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        rusqlite::params![version.to_string()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        for stmt in SCHEMA_STATEMENTS {
            conn.execute_batch(stmt).unwrap();
        }
        conn
    }

    #[test]
    fn test_fresh_database_is_stamped() {
        let conn = fresh();
        assert_eq!(get_schema_version(&conn), 0);
        check_schema_version(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
        // Replaying is a no-op.
        check_schema_version(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_database_is_refused() {
        let conn = fresh();
        set_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();
        let err = check_schema_version(&conn).unwrap_err();
        assert!(err.to_string().contains("newer than supported"));
    }
}
