//! Per-chat key management.
//!
//! Keys are derived from the chat id, so every participant arrives at the
//! same bytes without an exchange. The local [`SecureKeyStore`] still holds
//! a copy: a device that cannot persist the key does not use it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use murmur_shared::crypto::{self, ChatKey};
use murmur_shared::types::ChatId;
use murmur_store::{SecureKeyStore, StoreError};
use tracing::{debug, error, info, warn};

use crate::error::{ClientError, Result};

pub struct ChatKeyring {
    store: Arc<dyn SecureKeyStore>,
    cache: Mutex<HashMap<ChatId, ChatKey>>,
    // One gate per chat so two first-opens cannot race on the store.
    // Dropped once the key is cached.
    gates: tokio::sync::Mutex<HashMap<ChatId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ChatKeyring {
    pub fn new(store: Arc<dyn SecureKeyStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
            gates: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Return the chat's key, loading it from the store or deriving and
    /// persisting it on first use.
    pub async fn load_or_create(&self, chat: &ChatId) -> Result<ChatKey> {
        if let Some(key) = self.cached(chat) {
            return Ok(key);
        }

        let gate = self.gate(chat).await;
        let _guard = gate.lock().await;

        // Another caller may have finished while we waited
        if let Some(key) = self.cached(chat) {
            return Ok(key);
        }

        let key = self.load_or_derive(chat).await?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(chat.clone(), key.clone());
        }
        // Waiters already hold their clone and will find the cache
        self.gates.lock().await.remove(chat);
        Ok(key)
    }

    /// Drop the key from memory and from the store. Returns `true` if the
    /// store held an entry.
    pub async fn forget(&self, chat: &ChatId) -> Result<bool> {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(chat);
        }
        self.gates.lock().await.remove(chat);
        let existed = self
            .store
            .delete(chat.as_str())
            .await
            .map_err(|source| key_unavailable(chat, source))?;
        info!(chat = %chat, existed, "chat key forgotten");
        Ok(existed)
    }

    pub fn is_cached(&self, chat: &ChatId) -> bool {
        self.cached(chat).is_some()
    }

    fn cached(&self, chat: &ChatId) -> Option<ChatKey> {
        self.cache.lock().ok()?.get(chat).cloned()
    }

    async fn gate(&self, chat: &ChatId) -> Arc<tokio::sync::Mutex<()>> {
        self.gates
            .lock()
            .await
            .entry(chat.clone())
            .or_default()
            .clone()
    }

    async fn load_or_derive(&self, chat: &ChatId) -> Result<ChatKey> {
        let derived = crypto::derive_chat_key(chat);

        let stored = self
            .store
            .load(chat.as_str())
            .await
            .map_err(|source| key_unavailable(chat, source))?;

        match stored {
            Some(bytes) => {
                let key = ChatKey::from_bytes(&bytes).map_err(|_| {
                    key_unavailable(
                        chat,
                        StoreError::Corrupt {
                            account: chat.to_string(),
                        },
                    )
                })?;
                if key == derived {
                    debug!(chat = %chat, fingerprint = %key.fingerprint(), "chat key loaded");
                    return Ok(key);
                }
                // Random per-device keys from older installs cannot be shared
                warn!(
                    chat = %chat,
                    stored = %key.fingerprint(),
                    derived = %derived.fingerprint(),
                    "stored chat key differs from derived key, replacing"
                );
                self.persist(chat, &derived).await?;
            }
            None => {
                self.persist(chat, &derived).await?;
                info!(chat = %chat, fingerprint = %derived.fingerprint(), "chat key created");
            }
        }

        Ok(derived)
    }

    async fn persist(&self, chat: &ChatId, key: &ChatKey) -> Result<()> {
        self.store
            .save(chat.as_str(), key.as_bytes())
            .await
            .map_err(|source| key_unavailable(chat, source))
    }
}

fn key_unavailable(chat: &ChatId, source: StoreError) -> ClientError {
    error!(chat = %chat, error = %source, "key store failure");
    ClientError::KeyUnavailable {
        chat: chat.clone(),
        source,
    }
}
