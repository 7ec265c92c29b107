//! CRUD operations on the `secrets` table.
//!
//! Rows hold already-sealed bytes; this layer never sees plaintext keys.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;

/// Metadata of one stored secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretEntry {
    pub account: String,
    pub created_at: DateTime<Utc>,
}

impl Database {
    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Store `sealed` under `(service, account)`, replacing any previous
    /// value. Delete and insert run in one transaction.
    pub fn replace_secret(&mut self, service: &str, account: &str, sealed: &[u8]) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "DELETE FROM secrets WHERE service = ?1 AND account = ?2",
            params![service, account],
        )?;
        tx.execute(
            "INSERT INTO secrets (service, account, sealed, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![service, account, sealed, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch the sealed bytes for `(service, account)`, if present.
    pub fn get_secret(&self, service: &str, account: &str) -> Result<Option<Vec<u8>>> {
        let sealed = self
            .conn()
            .query_row(
                "SELECT sealed FROM secrets WHERE service = ?1 AND account = ?2",
                params![service, account],
                |row| row.get(0),
            )
            .optional()?;
        Ok(sealed)
    }

    /// List accounts stored under a service, oldest first.
    pub fn list_secrets(&self, service: &str) -> Result<Vec<SecretEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT account, created_at
             FROM secrets
             WHERE service = ?1
             ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map(params![service], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (account, created_str) = row?;
            let created_at = DateTime::parse_from_rfc3339(&created_str)?.with_timezone(&Utc);
            entries.push(SecretEntry {
                account,
                created_at,
            });
        }
        Ok(entries)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a secret. Returns `true` if a row was deleted.
    pub fn delete_secret(&self, service: &str, account: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM secrets WHERE service = ?1 AND account = ?2",
            params![service, account],
        )?;
        Ok(affected > 0)
    }
}
