//! Chat records: bootstrap, lookup, chat list, removal.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use murmur_shared::error::IdentityError;
use murmur_shared::protocol::{fields, ChatRecord, ChatSummary};
use murmur_shared::types::{ChatId, UserId};
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::feed::Feed;
use crate::remote::{self, DocumentChange, DocumentStore, Query, WriteBatch};

/// Chats a user participates in, most recently active first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatList {
    pub chats: Vec<ChatSummary>,
    /// Chat documents that failed to decode.
    pub rejected: usize,
}

pub type ChatListFeed = Feed<ChatList>;

#[derive(Clone)]
pub struct ChatDirectory {
    remote: Arc<dyn DocumentStore>,
}

impl ChatDirectory {
    pub fn new(remote: Arc<dyn DocumentStore>) -> Self {
        Self { remote }
    }

    /// Compute the chat id for `me` plus `others` and create the chat record
    /// if it does not exist yet.
    pub async fn ensure_chat(&self, me: &UserId, others: &[UserId]) -> Result<ChatId> {
        if others.iter().any(|other| other == me) {
            return Err(IdentityError::SelfChat.into());
        }

        let participants: Vec<UserId> = std::iter::once(me)
            .chain(others)
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if participants.len() < 2 {
            return Err(IdentityError::SelfChat.into());
        }

        let chat = ChatId::from_participants(&participants)?;
        let path = remote::chat_doc(&chat);

        if self.remote.get(&path).await?.is_some() {
            debug!(chat = %chat, "chat exists");
            return Ok(chat);
        }

        let record = ChatRecord::new_fields(&chat, &participants, remote::server_timestamp());
        self.remote.set(&path, record).await?;
        info!(chat = %chat, participants = participants.len(), "chat created");
        Ok(chat)
    }

    pub async fn get_chat(&self, chat: &ChatId) -> Result<ChatRecord> {
        let path = remote::chat_doc(chat);
        let doc = self
            .remote
            .get(&path)
            .await?
            .ok_or_else(|| ClientError::ChatNotFound(chat.clone()))?;

        ChatRecord::decode(&doc.id, &doc.fields).map_err(|source| ClientError::Decode {
            path: path.to_string(),
            source,
        })
    }

    /// Live chat list for `user`. Malformed chat records are counted, not
    /// shown.
    pub async fn watch_chats_for_user(&self, user: &UserId) -> Result<ChatListFeed> {
        let query = Query::all().where_array_contains(fields::PARTICIPANTS, json!(user));
        let mut watch = self.remote.watch_collection(&remote::chats(), &query).await?;

        let (tx, rx) = watch::channel(ChatList::default());
        let user = user.clone();

        let task = tokio::spawn(async move {
            let mut chats: BTreeMap<String, ChatRecord> = BTreeMap::new();
            let mut rejected: HashSet<String> = HashSet::new();

            while let Some(batch) = watch.recv().await {
                let changes = match batch {
                    Ok(changes) => changes,
                    Err(e) => {
                        warn!(user = %user, error = %e, "chat list watch error");
                        continue;
                    }
                };

                for change in changes {
                    match change {
                        DocumentChange::Upserted(doc) => {
                            match ChatRecord::decode(&doc.id, &doc.fields) {
                                Ok(record) => {
                                    rejected.remove(&doc.id);
                                    chats.insert(doc.id, record);
                                }
                                Err(e) => {
                                    warn!(chat = %doc.id, error = %e, "dropping malformed chat record");
                                    chats.remove(&doc.id);
                                    rejected.insert(doc.id);
                                }
                            }
                        }
                        DocumentChange::Removed(id) => {
                            chats.remove(&id);
                            rejected.remove(&id);
                        }
                    }
                }

                let mut list: Vec<ChatSummary> = chats.values().cloned().collect();
                list.sort_by(|a, b| {
                    b.timestamp
                        .cmp(&a.timestamp)
                        .then_with(|| a.chat_id.cmp(&b.chat_id))
                });
                tx.send_replace(ChatList {
                    chats: list,
                    rejected: rejected.len(),
                });
            }
        });

        Ok(Feed::new(rx, task))
    }

    /// Remove the chat record and its whole message log in one batch.
    /// Returns the number of messages deleted.
    pub async fn delete_chat(&self, chat: &ChatId) -> Result<usize> {
        let messages = self
            .remote
            .query(&remote::messages(chat), &Query::all())
            .await?;
        let count = messages.len();

        let batch = messages
            .into_iter()
            .fold(WriteBatch::new(), |batch, doc| {
                batch.delete(remote::messages(chat).doc(doc.id))
            })
            .delete(remote::chat_doc(chat));
        self.remote.commit(batch).await?;

        info!(chat = %chat, messages = count, "chat deleted");
        Ok(count)
    }
}
