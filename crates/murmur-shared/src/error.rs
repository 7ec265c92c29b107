use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Ciphertext is not valid base64")]
    InvalidEncoding,

    #[error("Decrypted payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Plaintext too large: {size} bytes (max {max})")]
    PlaintextTooLarge { size: usize, max: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("A chat needs at least one participant other than yourself")]
    SelfChat,

    #[error("Participant id must not be empty")]
    EmptyUserId,

    #[error("Participant id must not contain the chat id separator: {0}")]
    SeparatorInUserId(String),
}

/// A remote document did not match the expected record shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Missing field `{0}`")]
    MissingField(&'static str),

    #[error("Field `{field}` has the wrong shape: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Legacy single-recipient record (`receiverID`) is not supported")]
    LegacyRecipientShape,

    #[error("Document id `{doc_id}` does not match stored `{field}` value `{value}`")]
    IdMismatch {
        doc_id: String,
        field: &'static str,
        value: String,
    },
}
