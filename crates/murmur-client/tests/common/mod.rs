#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use murmur_client::remote::{
    CollectionPath, CollectionWatch, Document, DocumentPath, DocumentStore, DocumentWatch,
    FieldUpdate, MemoryDocumentStore, Query, WriteBatch,
};
use murmur_client::{ChatClient, Participant, RemoteError};
use murmur_shared::protocol::Fields;
use murmur_store::error::Result as StoreResult;
use murmur_store::{MemoryKeyStore, SecureKeyStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Query,
    Set,
    Update,
    Delete,
    Commit,
    Watch,
}

/// Wraps the in-memory store, counts calls per operation and fails the
/// operations or documents it is told to.
pub struct FlakyStore {
    inner: Arc<MemoryDocumentStore>,
    calls: Mutex<HashMap<Op, usize>>,
    failing_ops: Mutex<HashSet<Op>>,
    failing_docs: Mutex<HashSet<String>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryDocumentStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: Mutex::new(HashMap::new()),
            failing_ops: Mutex::new(HashSet::new()),
            failing_docs: Mutex::new(HashSet::new()),
        })
    }

    pub fn calls(&self, op: Op) -> usize {
        self.calls.lock().unwrap().get(&op).copied().unwrap_or(0)
    }

    pub fn fail_op(&self, op: Op) {
        self.failing_ops.lock().unwrap().insert(op);
    }

    /// Fail updates and deletes targeting a document id.
    pub fn fail_document(&self, id: &str) {
        self.failing_docs.lock().unwrap().insert(id.to_string());
    }

    fn enter(&self, op: Op, doc: Option<&DocumentPath>) -> Result<(), RemoteError> {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;
        if self.failing_ops.lock().unwrap().contains(&op) {
            return Err(RemoteError::Unavailable(format!("injected {op:?} failure")));
        }
        if let Some(path) = doc {
            if self.failing_docs.lock().unwrap().contains(path.id()) {
                return Err(RemoteError::Rejected(format!("injected failure for {path}")));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, RemoteError> {
        self.enter(Op::Get, None)?;
        self.inner.get(path).await
    }

    async fn query(
        &self,
        collection: &CollectionPath,
        query: &Query,
    ) -> Result<Vec<Document>, RemoteError> {
        self.enter(Op::Query, None)?;
        self.inner.query(collection, query).await
    }

    async fn set(&self, path: &DocumentPath, fields: Fields) -> Result<(), RemoteError> {
        self.enter(Op::Set, None)?;
        self.inner.set(path, fields).await
    }

    async fn update(
        &self,
        path: &DocumentPath,
        updates: Vec<FieldUpdate>,
    ) -> Result<(), RemoteError> {
        self.enter(Op::Update, Some(path))?;
        self.inner.update(path, updates).await
    }

    async fn delete(&self, path: &DocumentPath) -> Result<(), RemoteError> {
        self.enter(Op::Delete, Some(path))?;
        self.inner.delete(path).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), RemoteError> {
        self.enter(Op::Commit, None)?;
        self.inner.commit(batch).await
    }

    async fn watch_collection(
        &self,
        collection: &CollectionPath,
        query: &Query,
    ) -> Result<CollectionWatch, RemoteError> {
        self.enter(Op::Watch, None)?;
        self.inner.watch_collection(collection, query).await
    }

    async fn watch_document(&self, path: &DocumentPath) -> Result<DocumentWatch, RemoteError> {
        self.enter(Op::Watch, None)?;
        self.inner.watch_document(path).await
    }
}

/// Key store whose platform backend is locked.
pub struct LockedKeyStore;

#[async_trait]
impl SecureKeyStore for LockedKeyStore {
    async fn load(&self, _account: &str) -> StoreResult<Option<Vec<u8>>> {
        Err(StoreError::Unavailable("device locked".into()))
    }

    async fn save(&self, _account: &str, _secret: &[u8]) -> StoreResult<()> {
        Err(StoreError::Unavailable("device locked".into()))
    }

    async fn delete(&self, _account: &str) -> StoreResult<bool> {
        Err(StoreError::Unavailable("device locked".into()))
    }
}

pub fn client(id: &str, remote: Arc<dyn DocumentStore>) -> ChatClient {
    let name = format!("{}{}", id[..1].to_uppercase(), &id[1..]);
    ChatClient::new(
        Participant::new(id, name),
        remote,
        Arc::new(MemoryKeyStore::new()),
    )
}
