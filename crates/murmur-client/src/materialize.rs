//! Decrypted, ordered view of a chat's message collection.
//!
//! Incremental changes may arrive in any order. The view is keyed by
//! `(timestamp, message id)` so iteration is always chronological, and a
//! record is decrypted once unless its ciphertext changes.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use murmur_shared::crypto::ChatKey;
use murmur_shared::protocol::{MessageBody, MessageRecord};
use murmur_shared::types::{ChatId, MessageId, UserId};
use tracing::{debug, warn};

use crate::remote::{Document, DocumentChange};

/// A message as presented to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub display_name: String,
    pub body: MessageBody,
    pub receiver_ids: Vec<UserId>,
    pub read: bool,
    pub timestamp: DateTime<Utc>,
}

/// Published state of a message subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSnapshot {
    /// Non-decreasing timestamp order.
    pub messages: Vec<ChatMessage>,
    /// Records currently hidden because they failed to decode or decrypt.
    pub rejected: usize,
}

type OrderKey = (DateTime<Utc>, MessageId);

struct Entry {
    ciphertext: String,
    is_audio: bool,
    message: ChatMessage,
}

pub struct MaterializedLog {
    chat: ChatId,
    key: ChatKey,
    entries: BTreeMap<OrderKey, Entry>,
    index: HashMap<String, OrderKey>,
    rejected: HashSet<String>,
}

impl MaterializedLog {
    pub fn new(chat: ChatId, key: ChatKey) -> Self {
        Self {
            chat,
            key,
            entries: BTreeMap::new(),
            index: HashMap::new(),
            rejected: HashSet::new(),
        }
    }

    pub fn apply(&mut self, change: DocumentChange) {
        match change {
            DocumentChange::Upserted(doc) => self.upsert(doc),
            DocumentChange::Removed(id) => {
                self.remove(&id);
                self.rejected.remove(&id);
            }
        }
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.entries.values().map(|e| e.message.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }

    pub fn snapshot(&self) -> LogSnapshot {
        LogSnapshot {
            messages: self.messages(),
            rejected: self.rejected_count(),
        }
    }

    fn upsert(&mut self, doc: Document) {
        let record = match MessageRecord::decode(&doc.id, &doc.fields) {
            Ok(record) => record,
            Err(e) => {
                warn!(chat = %self.chat, doc = %doc.id, error = %e, "dropping malformed message record");
                self.reject(doc.id);
                return;
            }
        };

        let previous = self.remove(&doc.id);
        let body = match previous {
            Some(entry) if entry.ciphertext == record.ciphertext && entry.is_audio == record.is_audio => {
                entry.message.body
            }
            _ => match MessageBody::open(&self.key, &record.ciphertext, record.is_audio) {
                Ok(body) => body,
                Err(e) => {
                    warn!(chat = %self.chat, message = %record.message_id, error = %e, "dropping undecryptable message");
                    self.reject(doc.id);
                    return;
                }
            },
        };

        let order = (record.timestamp, record.message_id);
        self.rejected.remove(&doc.id);
        self.index.insert(doc.id, order);
        self.entries.insert(
            order,
            Entry {
                ciphertext: record.ciphertext,
                is_audio: record.is_audio,
                message: ChatMessage {
                    id: record.message_id,
                    sender_id: record.sender_id,
                    display_name: record.display_name,
                    body,
                    receiver_ids: record.receiver_ids,
                    read: record.receiver_read,
                    timestamp: record.timestamp,
                },
            },
        );
        debug!(chat = %self.chat, message = %record.message_id, total = self.entries.len(), "message materialized");
    }

    fn remove(&mut self, doc_id: &str) -> Option<Entry> {
        let order = self.index.remove(doc_id)?;
        self.entries.remove(&order)
    }

    fn reject(&mut self, doc_id: String) {
        self.remove(&doc_id);
        self.rejected.insert(doc_id);
    }
}
