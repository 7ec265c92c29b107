use murmur_shared::error::{CryptoError, DecodeError, IdentityError};
use murmur_shared::types::{ChatId, MessageId, UserId};
use murmur_store::StoreError;
use thiserror::Error;

/// Failures reported by a [`DocumentStore`](crate::remote::DocumentStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    #[error("Write rejected: {0}")]
    Rejected(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Error, Debug)]
pub enum ClientError {
    /// The confidential key store could not be read or written. Fatal for
    /// the chat session: nothing is sent or shown without a persisted key.
    #[error("Chat key unavailable for {chat}: {source}")]
    KeyUnavailable {
        chat: ChatId,
        #[source]
        source: StoreError,
    },

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Malformed document at {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: DecodeError,
    },

    #[error("Chat not found: {0}")]
    ChatNotFound(ChatId),

    #[error("{user} is not a participant of {chat}")]
    NotParticipant { chat: ChatId, user: UserId },

    /// Only the author may delete a message. Checked before any remote call.
    #[error("{requester} may not delete message {message_id} authored by {author}")]
    NotMessageAuthor {
        message_id: MessageId,
        author: UserId,
        requester: UserId,
    },
}

pub type Result<T> = std::result::Result<T, ClientError>;
