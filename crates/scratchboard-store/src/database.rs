//! SQLite-backed key/value storage.
//!
//! The [`SqliteBackend`] owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation. The connection sits behind
//! a mutex so one backend can be shared by every context of an origin.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};

use crate::backend::KvBackend;
use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`] holding the `kv` table.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteBackend {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/scratchboard/scratchboard.db`
    /// - macOS:   `~/Library/Application Support/com.scratchboard.scratchboard/scratchboard.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\scratchboard\scratchboard\data\scratchboard.db`
    pub fn new() -> Result<Self> {
        let project_dirs = ProjectDirs::from("com", "scratchboard", "scratchboard")
            .ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("scratchboard.db");

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory database. Nothing survives the handle.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&conn)?)
    }
}

impl KvBackend for SqliteBackend {
    fn read(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
        })
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value, updated_at)
                 VALUES (?1, ?2, strftime('%s', 'now'))
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = excluded.updated_at",
                params![key, value],
            )
        })?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.with_conn(|conn| conn.execute("DELETE FROM kv WHERE key = ?1", params![key]))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = SqliteBackend::open_at(&path).expect("should open");
        assert_eq!(db.path(), Some(path.as_path()));

        db.write("positions", "[]").unwrap();
        db.write("positions", "[1]").unwrap();
        assert_eq!(db.read("positions").unwrap().as_deref(), Some("[1]"));
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let db = SqliteBackend::open_at(&path).unwrap();
            db.write("scratch-session", "{}").unwrap();
        }

        let db = SqliteBackend::open_at(&path).unwrap();
        assert_eq!(db.read("scratch-session").unwrap().as_deref(), Some("{}"));

        db.delete("scratch-session").unwrap();
        assert_eq!(db.read("scratch-session").unwrap(), None);
    }

    #[test]
    fn in_memory_has_no_path() {
        let db = SqliteBackend::open_in_memory().unwrap();
        assert!(db.path().is_none());
        assert_eq!(db.read("missing").unwrap(), None);
    }
}
