//! Encrypted per-chat message log.
//!
//! Messages live at `chats/{chatID}/messages/{messageID}`. Content is sealed
//! with the chat key before it leaves the device; the parent chat record
//! carries a ciphertext preview of the latest message.

use std::sync::Arc;

use futures::future::join_all;
use murmur_shared::crypto::ChatKey;
use murmur_shared::protocol::{fields, LastMessage, MessageBody, MessageRecord};
use murmur_shared::types::{ChatId, MessageId, UserId};
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::directory::ChatDirectory;
use crate::error::{ClientError, Result};
use crate::feed::Feed;
use crate::materialize::{ChatMessage, LogSnapshot, MaterializedLog};
use crate::remote::{self, DocumentStore, FieldUpdate, Query, WriteBatch};
use crate::retention::RetentionScheduler;

pub type MessageFeed = Feed<LogSnapshot>;

/// The local user as seen by other participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: UserId,
    pub display_name: String,
}

impl Participant {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            display_name: display_name.into(),
        }
    }
}

/// Outcome of [`MessageLog::mark_read`]. Failed receipts are not retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadReceiptReport {
    pub marked: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct MessageLog {
    remote: Arc<dyn DocumentStore>,
    directory: ChatDirectory,
    retention: RetentionScheduler,
}

impl MessageLog {
    pub fn new(
        remote: Arc<dyn DocumentStore>,
        directory: ChatDirectory,
        retention: RetentionScheduler,
    ) -> Self {
        Self {
            remote,
            directory,
            retention,
        }
    }

    /// Seal `body`, append it to the log and update the chat preview in one
    /// batch. Owes a retention sweep afterwards if the chat has one set.
    pub async fn send(
        &self,
        chat: &ChatId,
        key: &ChatKey,
        from: &Participant,
        recipients: &[UserId],
        body: MessageBody,
    ) -> Result<MessageId> {
        let record = self.directory.get_chat(chat).await?;
        if let Some(outsider) = std::iter::once(&from.id)
            .chain(recipients)
            .find(|user| !record.is_participant(user))
        {
            return Err(ClientError::NotParticipant {
                chat: chat.clone(),
                user: outsider.clone(),
            });
        }

        let ciphertext = body.seal(key)?;
        let id = MessageId::new();
        let timestamp = remote::server_timestamp();

        let message = MessageRecord::new_fields(
            id,
            &ciphertext,
            &from.id,
            &from.display_name,
            recipients,
            body.is_audio(),
            timestamp.clone(),
        );
        let preview = LastMessage {
            sender_id: from.id.clone(),
            ciphertext,
            is_audio: body.is_audio(),
        };

        let batch = WriteBatch::new()
            .set(remote::message_doc(chat, &id), message)
            .update(
                remote::chat_doc(chat),
                vec![
                    FieldUpdate::set(fields::LAST_MESSAGE, preview.to_value()),
                    FieldUpdate::set(fields::TIMESTAMP, timestamp),
                ],
            );
        self.remote.commit(batch).await?;

        info!(
            chat = %chat,
            message = %id,
            audio = body.is_audio(),
            recipients = recipients.len(),
            "message sent"
        );

        if record.retention_seconds > 0 {
            // The message is already stored; a missed sweep is caught later
            if let Err(e) = self.retention.schedule(chat, record.retention_seconds).await {
                warn!(chat = %chat, error = %e, "failed to schedule retention sweep");
            }
        }

        Ok(id)
    }

    pub async fn send_text(
        &self,
        chat: &ChatId,
        key: &ChatKey,
        from: &Participant,
        recipients: &[UserId],
        text: &str,
    ) -> Result<MessageId> {
        self.send(chat, key, from, recipients, MessageBody::Text(text.to_string()))
            .await
    }

    pub async fn send_voice_note(
        &self,
        chat: &ChatId,
        key: &ChatKey,
        from: &Participant,
        recipients: &[UserId],
        audio: &[u8],
    ) -> Result<MessageId> {
        self.send(chat, key, from, recipients, MessageBody::VoiceNote(audio.to_vec()))
            .await
    }

    /// Live decrypted view of the chat's messages. Records that fail to
    /// decode or decrypt are counted in [`LogSnapshot::rejected`] and never
    /// end the subscription.
    pub async fn subscribe(&self, chat: &ChatId, key: ChatKey) -> Result<MessageFeed> {
        let query = Query::all().order_by(fields::TIMESTAMP);
        let mut watch = self
            .remote
            .watch_collection(&remote::messages(chat), &query)
            .await?;

        let (tx, rx) = watch::channel(LogSnapshot::default());
        let mut log = MaterializedLog::new(chat.clone(), key);
        let chat = chat.clone();

        let task = tokio::spawn(async move {
            while let Some(batch) = watch.recv().await {
                match batch {
                    Ok(changes) => {
                        for change in changes {
                            log.apply(change);
                        }
                        tx.send_replace(log.snapshot());
                    }
                    Err(e) => warn!(chat = %chat, error = %e, "message watch error"),
                }
            }
            debug!(chat = %chat, "message watch ended");
        });

        Ok(Feed::new(rx, task))
    }

    /// Flag every unread message addressed to `reader` as read. Best
    /// effort: individual failures are logged and counted.
    pub async fn mark_read(&self, chat: &ChatId, reader: &UserId) -> Result<ReadReceiptReport> {
        let messages = remote::messages(chat);
        let query = Query::all()
            .where_array_contains(fields::RECEIVER_IDS, json!(reader))
            .where_eq(fields::RECEIVER_READ, json!(false));
        let unread = self.remote.query(&messages, &query).await?;

        let results = join_all(unread.iter().map(|doc| {
            let path = messages.doc(doc.id.as_str());
            let remote = self.remote.clone();
            async move {
                remote
                    .update(&path, vec![FieldUpdate::set(fields::RECEIVER_READ, json!(true))])
                    .await
            }
        }))
        .await;

        let mut report = ReadReceiptReport::default();
        for result in results {
            match result {
                Ok(()) => report.marked += 1,
                Err(e) => {
                    warn!(chat = %chat, error = %e, "read receipt failed");
                    report.failed += 1;
                }
            }
        }

        if report.marked > 0 || report.failed > 0 {
            debug!(chat = %chat, marked = report.marked, failed = report.failed, "read receipts");
        }
        Ok(report)
    }

    /// Delete one message. Only its author may do so; anyone else is
    /// refused before the remote store is contacted.
    pub async fn delete_message(
        &self,
        chat: &ChatId,
        message: &ChatMessage,
        requester: &UserId,
    ) -> Result<()> {
        if &message.sender_id != requester {
            warn!(chat = %chat, message = %message.id, requester = %requester, "refusing to delete another user's message");
            return Err(ClientError::NotMessageAuthor {
                message_id: message.id,
                author: message.sender_id.clone(),
                requester: requester.clone(),
            });
        }

        self.remote
            .delete(&remote::message_doc(chat, &message.id))
            .await?;
        info!(chat = %chat, message = %message.id, "message deleted");
        Ok(())
    }

    pub async fn set_retention(&self, chat: &ChatId, seconds: u32) -> Result<()> {
        self.retention.configure(chat, seconds).await
    }
}
