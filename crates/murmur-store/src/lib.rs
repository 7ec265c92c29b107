//! # murmur-store
//!
//! Local confidential storage for chat keys, backed by SQLite (SQLCipher
//! with the `sqlcipher` feature).
//!
//! Every secret is additionally sealed with XChaCha20-Poly1305 under a
//! device wrapping key before it touches disk, so a plain SQLite build still
//! keeps key material confidential at rest. Chat keys never leave the
//! device; there is no server copy.

pub mod database;
pub mod error;
pub mod keystore;
pub mod migrations;
pub mod secrets;

pub use database::Database;
pub use error::StoreError;
pub use keystore::{MemoryKeyStore, SecureKeyStore, SqliteKeyStore};
