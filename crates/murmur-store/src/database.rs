//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.
//!
//! Note: SQLCipher (encrypted SQLite) requires OpenSSL at build time. Without
//! the `sqlcipher` feature the file itself is plain SQLite and confidentiality
//! comes from the application-layer sealing done in [`crate::keystore`].

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
    /// Open (or create) the default key database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/murmur/keys.db`
    /// - macOS:   `~/Library/Application Support/com.murmur.murmur/keys.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\murmur\murmur\data\keys.db`
    pub fn new(db_key: &[u8; 32]) -> Result<Self> {
        Self::open_at(&Self::default_path()?, db_key)
    }

    /// Platform default location of the key database.
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("com", "murmur", "murmur").ok_or(StoreError::NoDataDir)?;
        Ok(project_dirs.data_dir().join("keys.db"))
    }

    /// Open (or create) a database at an explicit path.
    ///
    /// With the `sqlcipher` feature `db_key` keys the whole file; otherwise
    /// it is unused here and callers seal values themselves.
    pub fn open_at(path: &Path, db_key: &[u8; 32]) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "opening key database");

        let conn = Connection::open(path)?;
        Self::configure(conn, db_key)
    }

    /// In-memory database, for tests and throwaway sessions.
    pub fn open_in_memory(db_key: &[u8; 32]) -> Result<Self> {
        Self::configure(Connection::open_in_memory()?, db_key)
    }

    fn configure(conn: Connection, db_key: &[u8; 32]) -> Result<Self> {
        if cfg!(feature = "sqlcipher") {
            conn.pragma_update(None, "key", format!("x'{}'", hex::encode(db_key)))?;
        }

        // Recommended SQLite settings.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        // Run schema migrations.
        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return a mutable reference to the underlying connection.
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}
