//! In-process [`DocumentStore`].
//!
//! Behaves like the hosted backend as far as the client can observe:
//! server timestamps are assigned at commit and strictly increase, batches
//! apply all-or-nothing, updates on missing documents fail, dotted field
//! paths address nested maps, and watches push an initial snapshot followed
//! by per-document changes.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use murmur_shared::protocol::{encode_timestamp, Fields};
use serde_json::Value;
use tokio::sync::mpsc;

use super::{
    is_server_timestamp, CollectionPath, CollectionWatch, Document, DocumentChange,
    DocumentPath, DocumentStore, DocumentWatch, FieldOp, FieldUpdate, Filter, Query, WriteBatch,
    WriteOp,
};
use crate::error::RemoteError;

type CollectionSender = mpsc::UnboundedSender<Result<Vec<DocumentChange>, RemoteError>>;
type DocumentSender = mpsc::UnboundedSender<Result<Option<Document>, RemoteError>>;

struct CollectionWatcher {
    collection: CollectionPath,
    query: Query,
    visible: HashSet<String>,
    tx: CollectionSender,
}

struct DocumentWatcher {
    path: DocumentPath,
    tx: DocumentSender,
}

#[derive(Default)]
struct State {
    collections: HashMap<CollectionPath, BTreeMap<String, Fields>>,
    collection_watchers: Vec<CollectionWatcher>,
    document_watchers: Vec<DocumentWatcher>,
    last_timestamp: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    state: Mutex<State>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of open subscriptions. Closed receivers are pruned first.
    pub fn active_watches(&self) -> usize {
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        state.prune_closed();
        state.collection_watchers.len() + state.document_watchers.len()
    }

    /// Number of documents currently in a collection.
    pub fn document_count(&self, collection: &CollectionPath) -> usize {
        self.state
            .lock()
            .map(|state| state.collections.get(collection).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, RemoteError> {
        self.state
            .lock()
            .map_err(|e| RemoteError::Unavailable(format!("lock poisoned: {e}")))
    }

    fn apply(&self, ops: Vec<WriteOp>) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        let commit_ts = state.next_timestamp();
        let staged = state.stage(ops, &commit_ts)?;
        state.write(staged);
        Ok(())
    }
}

impl State {
    fn next_timestamp(&mut self) -> Value {
        let mut now = Utc::now();
        if let Some(last) = self.last_timestamp {
            if now <= last {
                now = last + chrono::Duration::nanoseconds(1);
            }
        }
        self.last_timestamp = Some(now);
        encode_timestamp(now)
    }

    fn get(&self, path: &DocumentPath) -> Option<&Fields> {
        self.collections.get(path.collection())?.get(path.id())
    }

    /// Compute the post-commit value of every touched document without
    /// mutating anything, so a failing op leaves the store untouched.
    fn stage(
        &self,
        ops: Vec<WriteOp>,
        commit_ts: &Value,
    ) -> Result<BTreeMap<DocumentPath, Option<Fields>>, RemoteError> {
        let mut overlay: BTreeMap<DocumentPath, Option<Fields>> = BTreeMap::new();

        for op in ops {
            match op {
                WriteOp::Set { path, fields } => {
                    overlay.insert(path, Some(resolve_fields(fields, commit_ts)));
                }
                WriteOp::Update { path, updates } => {
                    let current = match overlay.get(&path) {
                        Some(staged) => staged.clone(),
                        None => self.get(&path).cloned(),
                    };
                    let Some(mut fields) = current else {
                        return Err(RemoteError::NotFound(path.to_string()));
                    };
                    for update in updates {
                        apply_field_update(&mut fields, update, commit_ts)?;
                    }
                    overlay.insert(path, Some(fields));
                }
                WriteOp::Delete { path } => {
                    overlay.insert(path, None);
                }
            }
        }

        Ok(overlay)
    }

    fn write(&mut self, staged: BTreeMap<DocumentPath, Option<Fields>>) {
        for (path, value) in staged {
            match value {
                Some(fields) => {
                    self.collections
                        .entry(path.collection().clone())
                        .or_default()
                        .insert(path.id().to_string(), fields);
                }
                None => {
                    if let Some(docs) = self.collections.get_mut(path.collection()) {
                        docs.remove(path.id());
                    }
                }
            }
            self.notify(&path);
        }
    }

    fn run_query(&self, collection: &CollectionPath, query: &Query) -> Vec<Document> {
        let Some(docs) = self.collections.get(collection) else {
            return Vec::new();
        };

        let mut matched: Vec<Document> = docs
            .iter()
            .filter(|(_, fields)| matches_query(query, fields))
            .map(|(id, fields)| Document {
                id: id.clone(),
                fields: fields.clone(),
            })
            .collect();

        if let Some(order_field) = &query.order_by {
            matched.sort_by(|a, b| {
                let ka = lookup(&a.fields, order_field);
                let kb = lookup(&b.fields, order_field);
                let primary = match (ka, kb) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                    _ => Ordering::Equal,
                };
                primary.then_with(|| a.id.cmp(&b.id))
            });
        }

        matched
    }

    fn notify(&mut self, path: &DocumentPath) {
        let State {
            collections,
            collection_watchers,
            document_watchers,
            ..
        } = self;

        let current = collections
            .get(path.collection())
            .and_then(|docs| docs.get(path.id()));

        for watcher in collection_watchers
            .iter_mut()
            .filter(|w| &w.collection == path.collection())
        {
            let change = match current {
                Some(fields) if matches_query(&watcher.query, fields) => {
                    watcher.visible.insert(path.id().to_string());
                    DocumentChange::Upserted(Document {
                        id: path.id().to_string(),
                        fields: fields.clone(),
                    })
                }
                _ => {
                    if !watcher.visible.remove(path.id()) {
                        continue;
                    }
                    DocumentChange::Removed(path.id().to_string())
                }
            };
            // A failed send means the receiver is gone; pruned below.
            let _ = watcher.tx.send(Ok(vec![change]));
        }

        for watcher in document_watchers.iter().filter(|w| &w.path == path) {
            let doc = current.map(|fields| Document {
                id: path.id().to_string(),
                fields: fields.clone(),
            });
            let _ = watcher.tx.send(Ok(doc));
        }

        self.prune_closed();
    }

    fn prune_closed(&mut self) {
        self.collection_watchers.retain(|w| !w.tx.is_closed());
        self.document_watchers.retain(|w| !w.tx.is_closed());
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, RemoteError> {
        let state = self.lock()?;
        Ok(state.get(path).map(|fields| Document {
            id: path.id().to_string(),
            fields: fields.clone(),
        }))
    }

    async fn query(
        &self,
        collection: &CollectionPath,
        query: &Query,
    ) -> Result<Vec<Document>, RemoteError> {
        Ok(self.lock()?.run_query(collection, query))
    }

    async fn set(&self, path: &DocumentPath, fields: Fields) -> Result<(), RemoteError> {
        self.apply(vec![WriteOp::Set {
            path: path.clone(),
            fields,
        }])
    }

    async fn update(
        &self,
        path: &DocumentPath,
        updates: Vec<FieldUpdate>,
    ) -> Result<(), RemoteError> {
        self.apply(vec![WriteOp::Update {
            path: path.clone(),
            updates,
        }])
    }

    async fn delete(&self, path: &DocumentPath) -> Result<(), RemoteError> {
        self.apply(vec![WriteOp::Delete { path: path.clone() }])
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), RemoteError> {
        self.apply(batch.ops)
    }

    async fn watch_collection(
        &self,
        collection: &CollectionPath,
        query: &Query,
    ) -> Result<CollectionWatch, RemoteError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock()?;

        let initial = state.run_query(collection, query);
        let visible = initial.iter().map(|doc| doc.id.clone()).collect();
        let snapshot = initial.into_iter().map(DocumentChange::Upserted).collect();
        // Receiver is still in scope, cannot fail
        let _ = tx.send(Ok(snapshot));

        state.collection_watchers.push(CollectionWatcher {
            collection: collection.clone(),
            query: query.clone(),
            visible,
            tx,
        });
        Ok(rx)
    }

    async fn watch_document(&self, path: &DocumentPath) -> Result<DocumentWatch, RemoteError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock()?;

        let current = state.get(path).map(|fields| Document {
            id: path.id().to_string(),
            fields: fields.clone(),
        });
        let _ = tx.send(Ok(current));

        state.document_watchers.push(DocumentWatcher {
            path: path.clone(),
            tx,
        });
        Ok(rx)
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn resolve(value: Value, commit_ts: &Value) -> Value {
    if is_server_timestamp(&value) {
        commit_ts.clone()
    } else {
        value
    }
}

fn resolve_fields(fields: Fields, commit_ts: &Value) -> Fields {
    fields
        .into_iter()
        .map(|(k, v)| (k, resolve(v, commit_ts)))
        .collect()
}

/// Walk a dotted path, creating missing intermediate maps, and return the
/// parent map plus the final segment. A null or empty-string intermediate
/// (blanked legacy previews) is replaced by a map; any other scalar is an
/// error.
fn field_slot<'a, 'p>(
    fields: &'a mut Fields,
    path: &'p str,
) -> Result<(&'a mut Fields, &'p str), RemoteError> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = segments.pop().unwrap_or_default();
    if last.is_empty() || segments.iter().any(|s| s.is_empty()) {
        return Err(RemoteError::InvalidArgument(format!(
            "invalid field path `{path}`"
        )));
    }

    let mut current = fields;
    for segment in segments {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Fields::new()));
        if slot.is_null() || slot.as_str() == Some("") {
            *slot = Value::Object(Fields::new());
        }
        current = match slot {
            Value::Object(map) => map,
            other => {
                return Err(RemoteError::InvalidArgument(format!(
                    "field `{segment}` is not a map: {other}"
                )))
            }
        };
    }
    Ok((current, last))
}

fn apply_field_update(
    fields: &mut Fields,
    update: FieldUpdate,
    commit_ts: &Value,
) -> Result<(), RemoteError> {
    let (parent, key) = field_slot(fields, &update.field)?;

    match update.op {
        FieldOp::Set(value) => {
            parent.insert(key.to_string(), resolve(value, commit_ts));
        }
        FieldOp::Delete => {
            parent.remove(key);
        }
        FieldOp::ArrayUnion(values) => {
            let slot = parent
                .entry(key.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            let Value::Array(items) = slot else {
                return Err(RemoteError::InvalidArgument(format!(
                    "array union on non-array field `{}`",
                    update.field
                )));
            };
            for value in values {
                if !items.contains(&value) {
                    items.push(value);
                }
            }
        }
        FieldOp::ArrayRemove(values) => {
            let slot = parent
                .entry(key.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            let Value::Array(items) = slot else {
                return Err(RemoteError::InvalidArgument(format!(
                    "array remove on non-array field `{}`",
                    update.field
                )));
            };
            items.retain(|item| !values.contains(item));
        }
        FieldOp::Increment(delta) => {
            let current = match parent.get(key) {
                None => 0,
                Some(value) => value.as_i64().ok_or_else(|| {
                    RemoteError::InvalidArgument(format!(
                        "increment on non-integer field `{}`",
                        update.field
                    ))
                })?,
            };
            parent.insert(key.to_string(), Value::from(current.saturating_add(delta)));
        }
    }
    Ok(())
}

fn lookup<'a>(fields: &'a Fields, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut value = fields.get(segments.next()?)?;
    for segment in segments {
        value = value.as_object()?.get(segment)?;
    }
    Some(value)
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn matches_query(query: &Query, fields: &Fields) -> bool {
    let filters_pass = query.filters.iter().all(|filter| match filter {
        Filter::Equals(field, expected) => lookup(fields, field) == Some(expected),
        Filter::ArrayContains(field, expected) => lookup(fields, field)
            .and_then(Value::as_array)
            .is_some_and(|items| items.contains(expected)),
        Filter::LessOrEqual(field, bound) => lookup(fields, field)
            .and_then(|value| compare_values(value, bound))
            .is_some_and(|ord| ord != Ordering::Greater),
    });

    let ordered_field_present = query
        .order_by
        .as_ref()
        .map_or(true, |field| lookup(fields, field).is_some());

    filters_pass && ordered_field_present
}
