//! Remote document schema for chat and message records.
//!
//! Remote documents arrive as loosely typed JSON maps. Every read goes
//! through an explicit `decode` step that either yields a typed record or a
//! [`DecodeError`] naming the offending field, so malformed documents can be
//! counted instead of silently skipped.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use crate::crypto::{self, ChatKey};
use crate::error::{CryptoError, DecodeError};
use crate::types::{ChatId, MessageId, UserId};

/// Field map of a remote document.
pub type Fields = Map<String, Value>;

/// Field names as they appear in the remote store.
pub mod fields {
    pub const MESSAGE_ID: &str = "messageID";
    pub const MESSAGE: &str = "message";
    pub const SENDER_ID: &str = "senderID";
    pub const DISPLAY_NAME: &str = "displayName";
    pub const RECEIVER_IDS: &str = "receiverIDs";
    pub const LEGACY_RECEIVER_ID: &str = "receiverID";
    pub const RECEIVER_READ: &str = "receiverReadMessage";
    pub const TIMESTAMP: &str = "timestamp";
    pub const IS_AUDIO: &str = "isAudio";

    pub const CHAT_ID: &str = "chatID";
    pub const RETENTION_SECONDS: &str = "deleteMessagesAfterSeconds";
    pub const RETENTION_DEADLINE: &str = "deleteMessagesAt";
    pub const RETENTION_QUEUE: &str = "pendingDeletionsAt";
    pub const LAST_MESSAGE: &str = "lastMessage";
    pub const LAST_MESSAGE_TEXT: &str = "lastMessage.message";
    pub const PARTICIPANTS: &str = "participants";
    pub const IS_TYPING: &str = "isTyping";
}

/// Canonical timestamp encoding: RFC 3339, nanoseconds, `Z` suffix.
/// Fixed width, so lexicographic order equals chronological order.
pub fn encode_timestamp(ts: DateTime<Utc>) -> Value {
    Value::String(ts.to_rfc3339_opts(SecondsFormat::Nanos, true))
}

// ---------------------------------------------------------------------------
// Message body
// ---------------------------------------------------------------------------

/// Decrypted message content. The `isAudio` flag on the record selects
/// which variant the ciphertext opens into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    VoiceNote(Vec<u8>),
}

impl MessageBody {
    pub fn is_audio(&self) -> bool {
        matches!(self, Self::VoiceNote(_))
    }

    /// Seal into the value stored in the `message` field.
    pub fn seal(&self, key: &ChatKey) -> Result<String, CryptoError> {
        match self {
            Self::Text(text) => crypto::seal_text(key, text),
            Self::VoiceNote(audio) => crypto::seal_voice_note(key, audio),
        }
    }

    pub fn open(key: &ChatKey, ciphertext: &str, is_audio: bool) -> Result<Self, CryptoError> {
        if is_audio {
            crypto::open_voice_note(key, ciphertext).map(Self::VoiceNote)
        } else {
            crypto::open_text(key, ciphertext).map(Self::Text)
        }
    }

    /// Short human-readable form for chat lists and logs.
    pub fn summary(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::VoiceNote(audio) => format!("[voice note, {} bytes]", audio.len()),
        }
    }
}

// ---------------------------------------------------------------------------
// Message record
// ---------------------------------------------------------------------------

/// A message document as stored below `chats/{chatID}/messages/{messageID}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub message_id: MessageId,
    /// `base64(nonce || ciphertext || tag)`
    pub ciphertext: String,
    pub sender_id: UserId,
    /// Denormalized at send time, not re-validated on read.
    pub display_name: String,
    pub receiver_ids: Vec<UserId>,
    pub receiver_read: bool,
    /// Assigned by the server.
    pub timestamp: DateTime<Utc>,
    pub is_audio: bool,
}

impl MessageRecord {
    /// Fields for a new message document. The caller supplies the timestamp
    /// value, normally the store's server-timestamp sentinel.
    pub fn new_fields(
        message_id: MessageId,
        ciphertext: &str,
        sender_id: &UserId,
        display_name: &str,
        receiver_ids: &[UserId],
        is_audio: bool,
        timestamp: Value,
    ) -> Fields {
        let mut map = Fields::new();
        map.insert(fields::MESSAGE_ID.into(), json!(message_id.to_doc_id()));
        map.insert(fields::MESSAGE.into(), json!(ciphertext));
        map.insert(fields::SENDER_ID.into(), json!(sender_id));
        map.insert(fields::DISPLAY_NAME.into(), json!(display_name));
        map.insert(fields::RECEIVER_IDS.into(), json!(receiver_ids));
        map.insert(fields::RECEIVER_READ.into(), json!(false));
        map.insert(fields::TIMESTAMP.into(), timestamp);
        map.insert(fields::IS_AUDIO.into(), json!(is_audio));
        map
    }

    pub fn decode(doc_id: &str, map: &Fields) -> Result<Self, DecodeError> {
        let id_str = get_str(map, fields::MESSAGE_ID)?;
        if id_str != doc_id {
            return Err(DecodeError::IdMismatch {
                doc_id: doc_id.to_string(),
                field: fields::MESSAGE_ID,
                value: id_str.to_string(),
            });
        }
        let message_id = MessageId::parse(id_str).map_err(|e| DecodeError::InvalidField {
            field: fields::MESSAGE_ID,
            reason: e.to_string(),
        })?;

        let receiver_ids = match map.get(fields::RECEIVER_IDS) {
            Some(_) => get_user_list(map, fields::RECEIVER_IDS)?,
            None if map.contains_key(fields::LEGACY_RECEIVER_ID) => {
                return Err(DecodeError::LegacyRecipientShape)
            }
            None => return Err(DecodeError::MissingField(fields::RECEIVER_IDS)),
        };

        Ok(Self {
            message_id,
            ciphertext: get_str(map, fields::MESSAGE)?.to_string(),
            sender_id: UserId::new(get_str(map, fields::SENDER_ID)?),
            display_name: get_str(map, fields::DISPLAY_NAME)?.to_string(),
            receiver_ids,
            receiver_read: get_bool(map, fields::RECEIVER_READ)?,
            timestamp: get_timestamp(map, fields::TIMESTAMP)?,
            is_audio: get_bool(map, fields::IS_AUDIO)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Chat record
// ---------------------------------------------------------------------------

/// Denormalized copy of the most recent message. `message` is always
/// ciphertext; an empty string means "no preview".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastMessage {
    pub sender_id: UserId,
    pub ciphertext: String,
    pub is_audio: bool,
}

impl LastMessage {
    pub fn to_value(&self) -> Value {
        preview_value(self.sender_id.as_str(), &self.ciphertext, self.is_audio)
    }

    pub fn open(&self, key: &ChatKey) -> Result<MessageBody, CryptoError> {
        MessageBody::open(key, &self.ciphertext, self.is_audio)
    }

    fn decode(value: &Value) -> Result<Option<Self>, DecodeError> {
        match value {
            // Bootstrap shape of older chat records
            Value::String(s) if s.is_empty() => Ok(None),
            Value::Null => Ok(None),
            Value::Object(map) => {
                let ciphertext = get_str(map, fields::MESSAGE)?;
                if ciphertext.is_empty() {
                    return Ok(None);
                }
                Ok(Some(Self {
                    sender_id: UserId::new(get_str(map, fields::SENDER_ID)?),
                    ciphertext: ciphertext.to_string(),
                    is_audio: get_bool(map, fields::IS_AUDIO)?,
                }))
            }
            other => Err(DecodeError::InvalidField {
                field: fields::LAST_MESSAGE,
                reason: format!("expected object, got {other}"),
            }),
        }
    }
}

/// The parent chat document at `chats/{chatID}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRecord {
    pub chat_id: ChatId,
    /// 0 = self-destruct disabled.
    pub retention_seconds: u32,
    /// Earliest owed self-destruct sweep, if any.
    pub retention_deadline: Option<DateTime<Utc>>,
    /// Every owed sweep, ascending, `retention_deadline` included.
    pub owed_sweeps: Vec<DateTime<Utc>>,
    pub last_message: Option<LastMessage>,
    pub participants: Vec<UserId>,
    pub typing: Vec<UserId>,
    pub timestamp: DateTime<Utc>,
}

impl ChatRecord {
    /// Fields for a freshly bootstrapped chat: empty preview, nobody typing,
    /// retention disabled.
    pub fn new_fields(chat_id: &ChatId, participants: &[UserId], timestamp: Value) -> Fields {
        let empty_preview = preview_value("", "", false);

        let mut map = Fields::new();
        map.insert(fields::CHAT_ID.into(), json!(chat_id));
        map.insert(fields::RETENTION_SECONDS.into(), json!(0));
        map.insert(fields::RETENTION_DEADLINE.into(), Value::Null);
        map.insert(fields::RETENTION_QUEUE.into(), json!([]));
        map.insert(fields::LAST_MESSAGE.into(), empty_preview);
        map.insert(fields::PARTICIPANTS.into(), json!(participants));
        map.insert(fields::IS_TYPING.into(), json!([]));
        map.insert(fields::TIMESTAMP.into(), timestamp);
        map
    }

    pub fn is_participant(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }

    /// Everyone except `sender`.
    pub fn recipients_of(&self, sender: &UserId) -> Vec<UserId> {
        self.participants
            .iter()
            .filter(|p| *p != sender)
            .cloned()
            .collect()
    }

    /// The latest owed sweep that is due at `now`. Sweeping for it settles
    /// every earlier one too.
    pub fn due_through(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.owed_sweeps.iter().rev().find(|at| **at <= now).copied()
    }

    /// Decrypted last-message preview. `None` when the chat is empty or the
    /// preview was blanked by a retention sweep.
    pub fn preview(&self, key: &ChatKey) -> Result<Option<MessageBody>, CryptoError> {
        self.last_message.as_ref().map(|last| last.open(key)).transpose()
    }

    pub fn decode(doc_id: &str, map: &Fields) -> Result<Self, DecodeError> {
        let chat_id = get_str(map, fields::CHAT_ID)?;
        if chat_id != doc_id {
            return Err(DecodeError::IdMismatch {
                doc_id: doc_id.to_string(),
                field: fields::CHAT_ID,
                value: chat_id.to_string(),
            });
        }

        let retention = map
            .get(fields::RETENTION_SECONDS)
            .ok_or(DecodeError::MissingField(fields::RETENTION_SECONDS))?;
        let retention_seconds = retention
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| DecodeError::InvalidField {
                field: fields::RETENTION_SECONDS,
                reason: format!("expected non-negative integer, got {retention}"),
            })?;

        let retention_deadline = match map.get(fields::RETENTION_DEADLINE) {
            None | Some(Value::Null) => None,
            Some(_) => Some(get_timestamp(map, fields::RETENTION_DEADLINE)?),
        };
        let mut owed_sweeps = match map.get(fields::RETENTION_QUEUE) {
            None | Some(Value::Null) => Vec::new(),
            Some(_) => get_timestamp_list(map, fields::RETENTION_QUEUE)?,
        };
        owed_sweeps.extend(retention_deadline);
        owed_sweeps.sort();
        owed_sweeps.dedup();

        let last_message = match map.get(fields::LAST_MESSAGE) {
            Some(value) => LastMessage::decode(value)?,
            None => None,
        };

        Ok(Self {
            chat_id: ChatId(chat_id.to_string()),
            retention_seconds,
            retention_deadline,
            owed_sweeps,
            last_message,
            participants: get_user_list(map, fields::PARTICIPANTS)?,
            typing: match map.get(fields::IS_TYPING) {
                Some(_) => get_user_list(map, fields::IS_TYPING)?,
                None => Vec::new(),
            },
            timestamp: get_timestamp(map, fields::TIMESTAMP)?,
        })
    }
}

/// The chat record as shown in chat lists.
pub type ChatSummary = ChatRecord;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn preview_value(sender_id: &str, ciphertext: &str, is_audio: bool) -> Value {
    let mut map = Fields::new();
    map.insert(fields::SENDER_ID.into(), json!(sender_id));
    map.insert(fields::MESSAGE.into(), json!(ciphertext));
    map.insert(fields::IS_AUDIO.into(), json!(is_audio));
    Value::Object(map)
}

fn get_str<'a>(map: &'a Fields, field: &'static str) -> Result<&'a str, DecodeError> {
    match map.get(field) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(DecodeError::InvalidField {
            field,
            reason: format!("expected string, got {other}"),
        }),
        None => Err(DecodeError::MissingField(field)),
    }
}

fn get_bool(map: &Fields, field: &'static str) -> Result<bool, DecodeError> {
    match map.get(field) {
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(DecodeError::InvalidField {
            field,
            reason: format!("expected bool, got {other}"),
        }),
        None => Err(DecodeError::MissingField(field)),
    }
}

fn get_user_list(map: &Fields, field: &'static str) -> Result<Vec<UserId>, DecodeError> {
    let Some(value) = map.get(field) else {
        return Err(DecodeError::MissingField(field));
    };
    let Value::Array(items) = value else {
        return Err(DecodeError::InvalidField {
            field,
            reason: format!("expected list, got {value}"),
        });
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(UserId::new(s.as_str())),
            other => Err(DecodeError::InvalidField {
                field,
                reason: format!("expected string element, got {other}"),
            }),
        })
        .collect()
}

fn get_timestamp(map: &Fields, field: &'static str) -> Result<DateTime<Utc>, DecodeError> {
    let raw = get_str(map, field)?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DecodeError::InvalidField {
            field,
            reason: e.to_string(),
        })
}

fn get_timestamp_list(map: &Fields, field: &'static str) -> Result<Vec<DateTime<Utc>>, DecodeError> {
    let Some(Value::Array(items)) = map.get(field) else {
        return Err(DecodeError::InvalidField {
            field,
            reason: "expected list of timestamps".into(),
        });
    };
    items
        .iter()
        .map(|item| {
            let raw = item.as_str().ok_or_else(|| DecodeError::InvalidField {
                field,
                reason: format!("expected string element, got {item}"),
            })?;
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| DecodeError::InvalidField {
                    field,
                    reason: e.to_string(),
                })
        })
        .collect()
}
