//! Remote document store seam.
//!
//! The backend is a hierarchical collection/document store with real-time
//! subscriptions. The client consumes exactly the surface of
//! [`DocumentStore`]; [`MemoryDocumentStore`] is the in-process
//! implementation used by tests and the simulator.

pub mod memory;

use async_trait::async_trait;
use murmur_shared::constants::{CHATS_COLLECTION, MESSAGES_COLLECTION};
use murmur_shared::protocol::Fields;
use murmur_shared::types::{ChatId, MessageId};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::RemoteError;

pub use memory::MemoryDocumentStore;

/// Placeholder the store replaces with its own commit time.
pub fn server_timestamp() -> Value {
    json!({ ".sv": "timestamp" })
}

pub fn is_server_timestamp(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|map| map.get(".sv"))
        .and_then(Value::as_str)
        == Some("timestamp")
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn root(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn doc(&self, id: impl Into<String>) -> DocumentPath {
        DocumentPath {
            collection: self.clone(),
            id: id.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath {
    collection: CollectionPath,
    id: String,
}

impl DocumentPath {
    pub fn collection(&self) -> &CollectionPath {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sub-collection below this document.
    pub fn sub(&self, name: &str) -> CollectionPath {
        CollectionPath(format!("{}/{}/{}", self.collection, self.id, name))
    }
}

impl std::fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// `chats`
pub fn chats() -> CollectionPath {
    CollectionPath::root(CHATS_COLLECTION)
}

/// `chats/{chatID}`
pub fn chat_doc(chat: &ChatId) -> DocumentPath {
    chats().doc(chat.as_str())
}

/// `chats/{chatID}/messages`
pub fn messages(chat: &ChatId) -> CollectionPath {
    chat_doc(chat).sub(MESSAGES_COLLECTION)
}

/// `chats/{chatID}/messages/{messageID}`
pub fn message_doc(chat: &ChatId, id: &MessageId) -> DocumentPath {
    messages(chat).doc(id.to_doc_id())
}

// ---------------------------------------------------------------------------
// Documents and queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Equals(String, Value),
    ArrayContains(String, Value),
    LessOrEqual(String, Value),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    /// Ascending order on this field; documents lacking it are excluded.
    pub order_by: Option<String>,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn where_eq(mut self, field: &str, value: Value) -> Self {
        self.filters.push(Filter::Equals(field.to_string(), value));
        self
    }

    pub fn where_array_contains(mut self, field: &str, value: Value) -> Self {
        self.filters
            .push(Filter::ArrayContains(field.to_string(), value));
        self
    }

    pub fn where_lte(mut self, field: &str, value: Value) -> Self {
        self.filters
            .push(Filter::LessOrEqual(field.to_string(), value));
        self
    }

    pub fn order_by(mut self, field: &str) -> Self {
        self.order_by = Some(field.to_string());
        self
    }
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    /// Replace the value. `field` may be a dotted path into nested maps.
    Set(Value),
    ArrayUnion(Vec<Value>),
    ArrayRemove(Vec<Value>),
    Increment(i64),
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub field: String,
    pub op: FieldOp,
}

impl FieldUpdate {
    pub fn set(field: &str, value: Value) -> Self {
        Self {
            field: field.to_string(),
            op: FieldOp::Set(value),
        }
    }

    pub fn array_union(field: &str, values: Vec<Value>) -> Self {
        Self {
            field: field.to_string(),
            op: FieldOp::ArrayUnion(values),
        }
    }

    pub fn array_remove(field: &str, values: Vec<Value>) -> Self {
        Self {
            field: field.to_string(),
            op: FieldOp::ArrayRemove(values),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set { path: DocumentPath, fields: Fields },
    Update { path: DocumentPath, updates: Vec<FieldUpdate> },
    Delete { path: DocumentPath },
}

/// Writes applied all-or-nothing by [`DocumentStore::commit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: DocumentPath, fields: Fields) -> Self {
        self.ops.push(WriteOp::Set { path, fields });
        self
    }

    pub fn update(mut self, path: DocumentPath, updates: Vec<FieldUpdate>) -> Self {
        self.ops.push(WriteOp::Update { path, updates });
        self
    }

    pub fn delete(mut self, path: DocumentPath) -> Self {
        self.ops.push(WriteOp::Delete { path });
        self
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentChange {
    /// Added, or modified in a way that keeps it inside the query.
    Upserted(Document),
    /// Deleted, or no longer matching the query.
    Removed(String),
}

/// First item is the full initial snapshot (as upserts), later items are
/// incremental. Dropping the receiver ends the subscription.
pub type CollectionWatch = mpsc::UnboundedReceiver<Result<Vec<DocumentChange>, RemoteError>>;

/// Current document state on every change; `None` while it does not exist.
pub type DocumentWatch = mpsc::UnboundedReceiver<Result<Option<Document>, RemoteError>>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, RemoteError>;

    async fn query(
        &self,
        collection: &CollectionPath,
        query: &Query,
    ) -> Result<Vec<Document>, RemoteError>;

    async fn set(&self, path: &DocumentPath, fields: Fields) -> Result<(), RemoteError>;

    /// Fails with [`RemoteError::NotFound`] if the document does not exist.
    async fn update(
        &self,
        path: &DocumentPath,
        updates: Vec<FieldUpdate>,
    ) -> Result<(), RemoteError>;

    async fn delete(&self, path: &DocumentPath) -> Result<(), RemoteError>;

    async fn commit(&self, batch: WriteBatch) -> Result<(), RemoteError>;

    async fn watch_collection(
        &self,
        collection: &CollectionPath,
        query: &Query,
    ) -> Result<CollectionWatch, RemoteError>;

    async fn watch_document(&self, path: &DocumentPath) -> Result<DocumentWatch, RemoteError>;
}
