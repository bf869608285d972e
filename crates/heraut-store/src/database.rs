//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.  Federation components share
//! one handle as a [`SharedDatabase`]; every helper is a short synchronous
//! call, so the mutex is never held across an `.await`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

/// Database handle shared between handlers, the actor cache and fan-out.
pub type SharedDatabase = Arc<Mutex<Database>>;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the default instance database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/heraut/heraut.db`
    /// - macOS:   `~/Library/Application Support/org.heraut.heraut/heraut.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\heraut\heraut\data\heraut.db`
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("org", "heraut", "heraut").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("heraut.db");

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Open a private in-memory database (tests and throwaway instances).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Wrap this handle for sharing between federation components.
    pub fn into_shared(self) -> SharedDatabase {
        Arc::new(Mutex::new(self))
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return a mutable reference to the underlying connection (transactions).
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Run `f` in one transaction. Every helper `f` calls through this handle
    /// commits together, or not at all when `f` fails.
    pub fn in_transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(self)?;
        tx.commit()?;
        Ok(value)
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

/// Parse an RFC-3339 column inside a row mapper.
pub(crate) fn parse_timestamp(
    idx: usize,
    raw: &str,
) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Decode a JSON object column inside a row mapper.
pub(crate) fn parse_json_map(
    idx: usize,
    raw: &str,
) -> rusqlite::Result<heraut_shared::Attributes> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().is_some());
        drop(db);

        // Reopening runs migrations again without failing.
        Database::open_at(&path).expect("should reopen");
    }

    #[test]
    fn failed_transaction_leaves_no_rows() {
        let db = Database::open_in_memory().unwrap();
        let count = |db: &Database| -> i64 {
            db.conn()
                .query_row("SELECT COUNT(*) FROM home_streams", [], |row| row.get(0))
                .unwrap()
        };

        let result: Result<()> = db.in_transaction(|db| {
            db.conn().execute(
                "INSERT INTO home_streams (account_id, status_id, inserted_at)
                 VALUES ('a', 's', '2024-01-01T00:00:00Z')",
                [],
            )?;
            Err(StoreError::NotFound)
        });
        assert!(matches!(result, Err(StoreError::NotFound)));
        assert_eq!(count(&db), 0);

        db.in_transaction(|db| {
            db.conn().execute(
                "INSERT INTO home_streams (account_id, status_id, inserted_at)
                 VALUES ('a', 's', '2024-01-01T00:00:00Z')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        assert_eq!(count(&db), 1);
    }

    #[test]
    fn open_in_memory_has_schema() {
        let db = Database::open_in_memory().unwrap();
        let count: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'actor_cache'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
