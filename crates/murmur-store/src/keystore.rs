//! Confidential key-value store for chat keys.
//!
//! [`SecureKeyStore`] is the seam the client depends on. It mirrors a
//! platform keychain: raw bytes keyed by an account string, add by
//! overwrite, query one, delete. Calls are async because a platform store
//! may block on user authentication.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use murmur_shared::crypto::{self, SymmetricKey};

use crate::database::Database;
use crate::error::{Result, StoreError};

#[async_trait]
pub trait SecureKeyStore: Send + Sync {
    /// Load the secret stored under `account`. `Ok(None)` means "no entry";
    /// an unreachable or corrupt store is an error, never `None`.
    async fn load(&self, account: &str) -> Result<Option<Vec<u8>>>;

    /// Store `secret` under `account`, replacing any previous value.
    async fn save(&self, account: &str, secret: &[u8]) -> Result<()>;

    /// Remove the entry. Returns `true` if one existed.
    async fn delete(&self, account: &str) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

/// Key store persisted in the local SQLite database. Values are sealed with
/// XChaCha20-Poly1305 under a wrapping key derived from a device secret.
pub struct SqliteKeyStore {
    db: Mutex<Database>,
    service: String,
    wrap_key: SymmetricKey,
}

impl SqliteKeyStore {
    pub fn new(db: Database, service: impl Into<String>, device_secret: &[u8]) -> Self {
        Self {
            db: Mutex::new(db),
            service: service.into(),
            wrap_key: crypto::derive_wrapping_key(device_secret),
        }
    }

    /// Accounts currently stored under this store's service.
    pub fn accounts(&self) -> Result<Vec<String>> {
        let db = self.lock()?;
        Ok(db
            .list_secrets(&self.service)?
            .into_iter()
            .map(|entry| entry.account)
            .collect())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }
}

#[async_trait]
impl SecureKeyStore for SqliteKeyStore {
    async fn load(&self, account: &str) -> Result<Option<Vec<u8>>> {
        let sealed = self.lock()?.get_secret(&self.service, account)?;
        let Some(sealed) = sealed else {
            return Ok(None);
        };

        let secret = crypto::decrypt(&self.wrap_key, &sealed).map_err(|_| {
            tracing::error!(service = %self.service, account, "stored secret failed to unseal");
            StoreError::Corrupt {
                account: account.to_string(),
            }
        })?;
        Ok(Some(secret))
    }

    async fn save(&self, account: &str, secret: &[u8]) -> Result<()> {
        let sealed = crypto::encrypt(&self.wrap_key, secret)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        self.lock()?.replace_secret(&self.service, account, &sealed)?;
        tracing::debug!(service = %self.service, account, "secret stored");
        Ok(())
    }

    async fn delete(&self, account: &str) -> Result<bool> {
        self.lock()?.delete_secret(&self.service, account)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryKeyStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }
}

#[async_trait]
impl SecureKeyStore for MemoryKeyStore {
    async fn load(&self, account: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.get(account).cloned())
    }

    async fn save(&self, account: &str, secret: &[u8]) -> Result<()> {
        self.lock()?.insert(account.to_string(), secret.to_vec());
        Ok(())
    }

    async fn delete(&self, account: &str) -> Result<bool> {
        Ok(self.lock()?.remove(account).is_some())
    }
}
