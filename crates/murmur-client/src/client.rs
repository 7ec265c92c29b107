//! Entry point for UI controllers: one [`ChatClient`] per signed-in user,
//! one [`ChatSession`] per open chat view.

use std::sync::Arc;
use std::time::Duration;

use murmur_shared::crypto::ChatKey;
use murmur_shared::types::{ChatId, MessageId, UserId};
use murmur_store::SecureKeyStore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::directory::{ChatDirectory, ChatListFeed};
use crate::error::Result;
use crate::keys::ChatKeyring;
use crate::materialize::ChatMessage;
use crate::message_log::{MessageFeed, MessageLog, Participant, ReadReceiptReport};
use crate::remote::DocumentStore;
use crate::retention::RetentionScheduler;
use crate::typing::{TypingFeed, TypingPresence};

pub struct ChatClient {
    me: Participant,
    keyring: ChatKeyring,
    directory: ChatDirectory,
    log: MessageLog,
    typing: TypingPresence,
    retention: RetentionScheduler,
}

impl ChatClient {
    pub fn new(
        me: Participant,
        remote: Arc<dyn DocumentStore>,
        keys: Arc<dyn SecureKeyStore>,
    ) -> Self {
        let directory = ChatDirectory::new(remote.clone());
        let retention = RetentionScheduler::new(remote.clone(), directory.clone());
        let log = MessageLog::new(remote.clone(), directory.clone(), retention.clone());

        Self {
            me,
            keyring: ChatKeyring::new(keys),
            directory,
            log,
            typing: TypingPresence::new(remote),
            retention,
        }
    }

    pub fn me(&self) -> &Participant {
        &self.me
    }

    pub fn directory(&self) -> &ChatDirectory {
        &self.directory
    }

    pub fn keyring(&self) -> &ChatKeyring {
        &self.keyring
    }

    pub fn retention(&self) -> &RetentionScheduler {
        &self.retention
    }

    /// Bootstrap the chat with `others`, load its key, catch up on any owed
    /// self-destruct sweep, mark incoming messages read and attach the
    /// message and typing subscriptions.
    pub async fn open_chat(&self, others: &[UserId]) -> Result<ChatSession> {
        let chat = self.directory.ensure_chat(&self.me.id, others).await?;
        let key = self.keyring.load_or_create(&chat).await?;

        if let Err(e) = self.retention.rearm(&chat).await {
            warn!(chat = %chat, error = %e, "could not restore retention timer");
        }

        let record = self.directory.get_chat(&chat).await?;
        let recipients = record.recipients_of(&self.me.id);

        let messages = self.log.subscribe(&chat, key.clone()).await?;
        let typing_feed = self.typing.observe(&chat, &self.me.id).await?;

        let session = ChatSession {
            chat,
            key,
            me: self.me.clone(),
            recipients,
            log: self.log.clone(),
            typing: self.typing.clone(),
            messages,
            typing_feed,
        };

        if let Err(e) = session.mark_read().await {
            warn!(chat = %session.chat, error = %e, "marking messages read failed");
        }

        info!(chat = %session.chat, user = %self.me.id.short(), "chat opened");
        Ok(session)
    }

    /// Live list of the user's chats.
    pub async fn chats(&self) -> Result<ChatListFeed> {
        self.directory.watch_chats_for_user(&self.me.id).await
    }

    /// Delete a chat with its messages and forget its key.
    pub async fn delete_chat(&self, chat: &ChatId) -> Result<usize> {
        self.retention.cancel(chat);
        let deleted = self.directory.delete_chat(chat).await?;
        self.keyring.forget(chat).await?;
        Ok(deleted)
    }

    /// Background sweep of overdue chats that are not open.
    pub fn spawn_retention_poller(&self, interval: Duration) -> JoinHandle<()> {
        self.retention.spawn_periodic(self.me.id.clone(), interval)
    }
}

/// An open chat view. Dropping it tears down both subscriptions;
/// [`ChatSession::close`] also clears the user's typing flag.
pub struct ChatSession {
    chat: ChatId,
    key: ChatKey,
    me: Participant,
    recipients: Vec<UserId>,
    log: MessageLog,
    typing: TypingPresence,
    messages: MessageFeed,
    typing_feed: TypingFeed,
}

impl ChatSession {
    pub fn chat_id(&self) -> &ChatId {
        &self.chat
    }

    pub fn recipients(&self) -> &[UserId] {
        &self.recipients
    }

    pub fn messages(&mut self) -> &mut MessageFeed {
        &mut self.messages
    }

    pub fn typing(&mut self) -> &mut TypingFeed {
        &mut self.typing_feed
    }

    pub async fn send_text(&self, text: &str) -> Result<MessageId> {
        self.log
            .send_text(&self.chat, &self.key, &self.me, &self.recipients, text)
            .await
    }

    pub async fn send_voice_note(&self, audio: &[u8]) -> Result<MessageId> {
        self.log
            .send_voice_note(&self.chat, &self.key, &self.me, &self.recipients, audio)
            .await
    }

    pub async fn set_typing(&self, is_typing: bool) -> Result<()> {
        self.typing
            .set_typing(&self.chat, &self.me.id, is_typing)
            .await
    }

    pub async fn delete(&self, message: &ChatMessage) -> Result<()> {
        self.log
            .delete_message(&self.chat, message, &self.me.id)
            .await
    }

    pub async fn set_retention(&self, seconds: u32) -> Result<()> {
        self.log.set_retention(&self.chat, seconds).await
    }

    pub async fn mark_read(&self) -> Result<ReadReceiptReport> {
        self.log.mark_read(&self.chat, &self.me.id).await
    }

    /// Clear the typing flag and release both subscriptions.
    pub async fn close(self) {
        if let Err(e) = self.set_typing(false).await {
            warn!(chat = %self.chat, error = %e, "failed to clear typing flag");
        }
        let ChatSession {
            chat,
            messages,
            typing_feed,
            ..
        } = self;
        messages.close().await;
        typing_feed.close().await;
        info!(chat = %chat, "chat closed");
    }
}
