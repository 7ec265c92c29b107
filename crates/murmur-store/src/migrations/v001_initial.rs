//! v001 -- Initial schema creation.
//!
//! Creates the `secrets` table holding sealed key material, keyed by a
//! service namespace plus an account (for chat keys: the chat id).

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS secrets (
    service    TEXT NOT NULL,                 -- namespace, e.g. murmur.chat-key
    account    TEXT NOT NULL,                 -- chat id
    sealed     BLOB NOT NULL,                 -- nonce || ciphertext || tag
    created_at TEXT NOT NULL,                 -- ISO-8601 / RFC-3339

    PRIMARY KEY (service, account)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
