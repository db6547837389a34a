//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.
//!
//! Note: SQLCipher (encrypted SQLite) requires OpenSSL at build time. With the
//! default `sqlite-plain` feature the file is plain SQLite; message content
//! only leaves the device sealed inside envelopes.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/causerie/causerie.db`
    /// - macOS:   `~/Library/Application Support/com.causerie.causerie/causerie.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\causerie\causerie\data\causerie.db`
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("com", "causerie", "causerie").ok_or(StoreError::NoDataDir)?;

        Self::open_in_dir(project_dirs.data_dir())
    }

    /// Open (or create) `causerie.db` inside `data_dir`, creating the
    /// directory if needed.
    pub fn open_in_dir(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("causerie.db");

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Recommended SQLite settings.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Open a private in-memory database. Nothing survives the handle.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn
            .path()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }
}
