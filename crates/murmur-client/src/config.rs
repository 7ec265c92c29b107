//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so the simulator runs with zero
//! configuration.

use std::path::PathBuf;
use std::time::Duration;

use murmur_shared::crypto;
use murmur_store::{Database, SqliteKeyStore, StoreError};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// SQLite database holding chat keys.
    /// Env: `MURMUR_KEYSTORE_PATH`
    /// Default: platform data dir, `keys.db`
    pub keystore_path: Option<PathBuf>,

    /// How often chats that are not open are checked for overdue
    /// self-destruct sweeps.
    /// Env: `MURMUR_RETENTION_POLL_SECS`
    /// Default: `60`
    pub retention_poll_interval: Duration,

    /// Service namespace for entries in the key store.
    /// Env: `MURMUR_KEY_SERVICE`
    /// Default: `murmur.chat-key`
    pub key_service: String,

    /// Device secret (hex, 64 chars) from which the key database and the
    /// wrapping key for stored chat keys are derived.
    /// Env: `MURMUR_DEVICE_SECRET`
    /// Default: all-zeros (development only).
    pub device_secret: [u8; 32],
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            keystore_path: None,
            retention_poll_interval: Duration::from_secs(60),
            key_service: "murmur.chat-key".to_string(),
            device_secret: [0u8; 32],
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("MURMUR_KEYSTORE_PATH") {
            if !path.is_empty() {
                config.keystore_path = Some(PathBuf::from(path));
            }
        }

        if let Ok(val) = std::env::var("MURMUR_RETENTION_POLL_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => {
                    config.retention_poll_interval = Duration::from_secs(secs);
                }
                _ => {
                    tracing::warn!(
                        value = %val,
                        "Invalid MURMUR_RETENTION_POLL_SECS, using default"
                    );
                }
            }
        }

        if let Ok(service) = std::env::var("MURMUR_KEY_SERVICE") {
            if !service.is_empty() {
                config.key_service = service;
            }
        }

        match std::env::var("MURMUR_DEVICE_SECRET") {
            Ok(secret) => match parse_device_secret(&secret) {
                Ok(bytes) => config.device_secret = bytes,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid MURMUR_DEVICE_SECRET, using default (dev-only)"
                    );
                }
            },
            Err(_) => {
                tracing::warn!("MURMUR_DEVICE_SECRET not set, using default (dev-only)");
            }
        }

        config
    }

    /// Open the on-disk key store described by this configuration.
    pub fn open_key_store(&self) -> Result<SqliteKeyStore, StoreError> {
        let path = match &self.keystore_path {
            Some(path) => path.clone(),
            None => Database::default_path()?,
        };
        let db = Database::open_at(&path, &crypto::derive_database_key(&self.device_secret))?;
        tracing::info!(path = %path.display(), service = %self.key_service, "key store opened");
        Ok(SqliteKeyStore::new(db, self.key_service.clone(), &self.device_secret))
    }
}

/// Parse a 64-character hex string into a 32-byte secret.
fn parse_device_secret(value: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(value.trim()).map_err(|e| e.to_string())?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("expected 32 bytes, got {}", b.len()))
}
