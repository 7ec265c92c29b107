use std::collections::BTreeSet;
use std::sync::Arc;

use murmur_shared::protocol::{fields, ChatRecord};
use murmur_shared::types::{ChatId, UserId};
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::Result;
use crate::feed::Feed;
use crate::remote::{self, DocumentStore, FieldUpdate};

/// Other participants currently typing.
pub type TypingFeed = Feed<BTreeSet<UserId>>;

/// Typing indicator stored as a set on the chat record. Entries have no
/// expiry: a client that dies while typing stays listed until it clears
/// itself.
#[derive(Clone)]
pub struct TypingPresence {
    remote: Arc<dyn DocumentStore>,
}

impl TypingPresence {
    pub fn new(remote: Arc<dyn DocumentStore>) -> Self {
        Self { remote }
    }

    pub async fn set_typing(&self, chat: &ChatId, user: &UserId, is_typing: bool) -> Result<()> {
        let update = if is_typing {
            FieldUpdate::array_union(fields::IS_TYPING, vec![json!(user)])
        } else {
            FieldUpdate::array_remove(fields::IS_TYPING, vec![json!(user)])
        };
        self.remote
            .update(&remote::chat_doc(chat), vec![update])
            .await?;
        debug!(chat = %chat, user = %user, is_typing, "typing state updated");
        Ok(())
    }

    /// Watch the typing set of `chat`, excluding `me`. Only changes to the
    /// visible set are published.
    pub async fn observe(&self, chat: &ChatId, me: &UserId) -> Result<TypingFeed> {
        let mut watch = self.remote.watch_document(&remote::chat_doc(chat)).await?;
        let (tx, rx) = watch::channel(BTreeSet::new());
        let chat = chat.clone();
        let me = me.clone();

        let task = tokio::spawn(async move {
            while let Some(event) = watch.recv().await {
                let typing: BTreeSet<UserId> = match event {
                    Ok(Some(doc)) => match ChatRecord::decode(&doc.id, &doc.fields) {
                        Ok(record) => record.typing.into_iter().filter(|u| u != &me).collect(),
                        Err(e) => {
                            warn!(chat = %chat, error = %e, "malformed chat record in typing watch");
                            continue;
                        }
                    },
                    Ok(None) => BTreeSet::new(),
                    Err(e) => {
                        warn!(chat = %chat, error = %e, "typing watch error");
                        continue;
                    }
                };

                tx.send_if_modified(|current| {
                    if *current == typing {
                        return false;
                    }
                    *current = typing;
                    true
                });
            }
        });

        Ok(Feed::new(rx, task))
    }
}
