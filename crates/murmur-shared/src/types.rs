use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::CHAT_ID_SEPARATOR;
use crate::error::IdentityError;

// User identity = opaque account id issued by the auth backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Conversation identifier: participant ids sorted ascending, joined with `_`.
///
/// Identical participant sets always produce the same id regardless of the
/// order in which they were supplied, so looking a chat up is idempotent and
/// needs no central "create chat" step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ChatId(pub String);

impl ChatId {
    /// Compute the chat id for a participant set.
    ///
    /// Duplicates collapse. Fails if any id is empty or contains the
    /// separator, since either would let two different sets collide.
    pub fn from_participants<'a, I>(participants: I) -> Result<Self, IdentityError>
    where
        I: IntoIterator<Item = &'a UserId>,
    {
        let mut sorted = BTreeSet::new();
        for user in participants {
            if user.0.is_empty() {
                return Err(IdentityError::EmptyUserId);
            }
            if user.0.contains(CHAT_ID_SEPARATOR) {
                return Err(IdentityError::SeparatorInUserId(user.0.clone()));
            }
            sorted.insert(user.as_str());
        }

        let mut id = String::new();
        for (i, user) in sorted.into_iter().enumerate() {
            if i > 0 {
                id.push(CHAT_ID_SEPARATOR);
            }
            id.push_str(user);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-generated message id, also used as the remote document key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    pub fn to_doc_id(&self) -> String {
        self.0.to_string()
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
