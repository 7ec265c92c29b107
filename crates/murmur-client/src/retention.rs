//! Self-destructing messages.
//!
//! A chat with `deleteMessagesAfterSeconds = N > 0` owes a full sweep of
//! its message collection N seconds after each send or retention change.
//! Each request arms an in-process one-shot timer. Every owed deadline is
//! also written to the chat record's `pendingDeletionsAt` list, with the
//! earliest mirrored to `deleteMessagesAt`, so a restarted device can catch
//! up via [`RetentionScheduler::rearm`] or the periodic
//! [`RetentionScheduler::sweep_due`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use murmur_shared::protocol::{encode_timestamp, fields, ChatRecord};
use murmur_shared::types::{ChatId, UserId};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::directory::ChatDirectory;
use crate::error::Result;
use crate::remote::{self, DocumentStore, FieldUpdate, Query};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RearmOutcome {
    /// Retention disabled or nothing owed.
    Idle,
    /// The deadline had already passed; the sweep ran immediately.
    SweptOverdue(SweepReport),
    /// Timers are armed for every stored deadline; holds the earliest.
    Armed(DateTime<Utc>),
}

struct PendingSweep {
    deadline: DateTime<Utc>,
    handle: JoinHandle<()>,
}

struct Inner {
    remote: Arc<dyn DocumentStore>,
    directory: ChatDirectory,
    pending: Mutex<HashMap<ChatId, Vec<PendingSweep>>>,
}

#[derive(Clone)]
pub struct RetentionScheduler {
    inner: Arc<Inner>,
}

impl RetentionScheduler {
    pub fn new(remote: Arc<dyn DocumentStore>, directory: ChatDirectory) -> Self {
        Self {
            inner: Arc::new(Inner {
                remote,
                directory,
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Set the chat's retention. `0` disables it and cancels pending sweeps.
    pub async fn configure(&self, chat: &ChatId, seconds: u32) -> Result<()> {
        let path = remote::chat_doc(chat);

        if seconds == 0 {
            let cancelled = self.cancel(chat);
            self.inner
                .remote
                .update(
                    &path,
                    vec![
                        FieldUpdate::set(fields::RETENTION_SECONDS, json!(0)),
                        FieldUpdate::set(fields::RETENTION_DEADLINE, Value::Null),
                        FieldUpdate::set(fields::RETENTION_QUEUE, json!([])),
                    ],
                )
                .await?;
            info!(chat = %chat, cancelled, "self-destruct disabled");
            return Ok(());
        }

        self.inner
            .remote
            .update(
                &path,
                vec![FieldUpdate::set(fields::RETENTION_SECONDS, json!(seconds))],
            )
            .await?;
        info!(chat = %chat, seconds, "self-destruct enabled");
        self.schedule(chat, seconds).await?;
        Ok(())
    }

    /// Owe a sweep `seconds` from now. Returns the new deadline.
    pub async fn schedule(&self, chat: &ChatId, seconds: u32) -> Result<DateTime<Utc>> {
        let deadline = Utc::now() + chrono::Duration::seconds(i64::from(seconds));
        let record = self.inner.directory.get_chat(chat).await?;

        let earliest = record
            .retention_deadline
            .map_or(deadline, |existing| existing.min(deadline));
        // Union with what was decoded so legacy single-deadline records
        // gain the list form.
        let owed: Vec<Value> = record
            .owed_sweeps
            .iter()
            .copied()
            .chain([deadline])
            .map(encode_timestamp)
            .collect();
        self.inner
            .remote
            .update(
                &remote::chat_doc(chat),
                vec![
                    FieldUpdate::array_union(fields::RETENTION_QUEUE, owed),
                    FieldUpdate::set(fields::RETENTION_DEADLINE, encode_timestamp(earliest)),
                ],
            )
            .await?;

        self.arm(chat, deadline, Duration::from_secs(u64::from(seconds)));
        debug!(chat = %chat, %deadline, "sweep scheduled");
        Ok(deadline)
    }

    /// Abort in-process timers for `chat`. Returns how many were pending.
    pub fn cancel(&self, chat: &ChatId) -> usize {
        let Ok(mut pending) = self.inner.pending.lock() else {
            return 0;
        };
        let Some(sweeps) = pending.remove(chat) else {
            return 0;
        };
        let mut cancelled = 0;
        for sweep in sweeps {
            if !sweep.handle.is_finished() {
                cancelled += 1;
            }
            sweep.handle.abort();
        }
        cancelled
    }

    /// Timers armed and not yet fired for `chat`.
    pub fn pending_count(&self, chat: &ChatId) -> usize {
        self.inner
            .pending
            .lock()
            .map(|pending| {
                pending.get(chat).map_or(0, |sweeps| {
                    sweeps.iter().filter(|s| !s.handle.is_finished()).count()
                })
            })
            .unwrap_or(0)
    }

    /// Restore the timers for a chat from its stored deadlines. Overdue
    /// ones are settled by a single sweep, the rest are armed. Called when
    /// a chat is opened.
    pub async fn rearm(&self, chat: &ChatId) -> Result<RearmOutcome> {
        let record = self.inner.directory.get_chat(chat).await?;
        if record.owed_sweeps.is_empty() {
            return Ok(RearmOutcome::Idle);
        }

        let now = Utc::now();
        let mut swept = None;
        if let Some(due) = record.due_through(now) {
            info!(chat = %chat, %due, "overdue sweep, running now");
            swept = Some(self.sweep(chat, due).await?);
        }

        let mut earliest = None;
        for &deadline in record.owed_sweeps.iter().filter(|at| **at > now) {
            earliest.get_or_insert(deadline);
            if !self.has_pending_at(chat, deadline) {
                let delay = (deadline - now).to_std().unwrap_or_default();
                self.arm(chat, deadline, delay);
                debug!(chat = %chat, %deadline, "sweep re-armed");
            }
        }

        Ok(match (swept, earliest) {
            (Some(report), _) => RearmOutcome::SweptOverdue(report),
            (None, Some(deadline)) => RearmOutcome::Armed(deadline),
            (None, None) => RearmOutcome::Idle,
        })
    }

    /// Delete every message currently in the chat and blank the preview.
    /// Owed deadlines up to `fired_for` are settled; `deleteMessagesAt`
    /// moves to the next one still owed, if any.
    pub async fn sweep(&self, chat: &ChatId, fired_for: DateTime<Utc>) -> Result<SweepReport> {
        let messages = remote::messages(chat);
        let docs = self.inner.remote.query(&messages, &Query::all()).await?;

        let results = join_all(docs.iter().map(|doc| {
            let path = messages.doc(doc.id.as_str());
            let remote = self.inner.remote.clone();
            async move { remote.delete(&path).await }
        }))
        .await;

        let mut report = SweepReport::default();
        for result in results {
            match result {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    warn!(chat = %chat, error = %e, "sweep failed to delete a message");
                    report.failed += 1;
                }
            }
        }

        let record = self.inner.directory.get_chat(chat).await?;
        let (settled, still_owed): (Vec<&DateTime<Utc>>, Vec<&DateTime<Utc>>) = record
            .owed_sweeps
            .iter()
            .partition(|at| **at <= fired_for);
        let next = still_owed.first().map_or(Value::Null, |at| encode_timestamp(**at));
        let updates = vec![
            FieldUpdate::set(fields::LAST_MESSAGE_TEXT, json!("")),
            FieldUpdate::array_remove(
                fields::RETENTION_QUEUE,
                settled.into_iter().map(|at| encode_timestamp(*at)).collect(),
            ),
            FieldUpdate::set(fields::RETENTION_DEADLINE, next),
        ];
        self.inner
            .remote
            .update(&remote::chat_doc(chat), updates)
            .await?;

        info!(chat = %chat, deleted = report.deleted, failed = report.failed, "retention sweep done");
        Ok(report)
    }

    /// Sweep every chat of `user` whose stored deadline has passed.
    /// A chat whose sweep fails is logged and skipped.
    pub async fn sweep_due(&self, user: &UserId) -> Result<Vec<(ChatId, SweepReport)>> {
        let now = Utc::now();
        let query = Query::all()
            .where_array_contains(fields::PARTICIPANTS, json!(user))
            .where_lte(fields::RETENTION_DEADLINE, encode_timestamp(now));
        let docs = self.inner.remote.query(&remote::chats(), &query).await?;

        let mut swept = Vec::new();
        for doc in docs {
            let record = match ChatRecord::decode(&doc.id, &doc.fields) {
                Ok(record) => record,
                Err(e) => {
                    warn!(chat = %doc.id, error = %e, "skipping malformed chat record");
                    continue;
                }
            };
            let Some(due) = record.due_through(now) else {
                continue;
            };
            match self.sweep(&record.chat_id, due).await {
                Ok(report) => swept.push((record.chat_id, report)),
                Err(e) => warn!(chat = %record.chat_id, error = %e, "overdue sweep failed"),
            }
        }
        Ok(swept)
    }

    /// Run [`sweep_due`](Self::sweep_due) every `interval` until aborted.
    pub fn spawn_periodic(&self, user: UserId, interval: Duration) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match scheduler.sweep_due(&user).await {
                    Ok(swept) if !swept.is_empty() => {
                        info!(user = %user, chats = swept.len(), "periodic retention sweep");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(user = %user, error = %e, "periodic retention sweep failed"),
                }
            }
        })
    }

    fn arm(&self, chat: &ChatId, deadline: DateTime<Utc>, delay: Duration) {
        let scheduler = self.clone();
        let target = chat.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = scheduler.sweep(&target, deadline).await {
                warn!(chat = %target, error = %e, "scheduled sweep failed");
            }
        });

        if let Ok(mut pending) = self.inner.pending.lock() {
            let sweeps = pending.entry(chat.clone()).or_default();
            sweeps.retain(|sweep| !sweep.handle.is_finished());
            sweeps.push(PendingSweep { deadline, handle });
        }
    }

    fn has_pending_at(&self, chat: &ChatId, deadline: DateTime<Utc>) -> bool {
        self.inner
            .pending
            .lock()
            .map(|pending| {
                pending.get(chat).is_some_and(|sweeps| {
                    sweeps
                        .iter()
                        .any(|s| s.deadline == deadline && !s.handle.is_finished())
                })
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use murmur_shared::protocol::MessageRecord;

    use super::*;
    use crate::remote::MemoryDocumentStore;

    async fn setup() -> (Arc<MemoryDocumentStore>, RetentionScheduler, ChatId) {
        let store = MemoryDocumentStore::shared();
        let directory = ChatDirectory::new(store.clone());
        let chat = directory
            .ensure_chat(&UserId::from("alice"), &[UserId::from("bob")])
            .await
            .unwrap();
        (store.clone(), RetentionScheduler::new(store, directory), chat)
    }

    async fn put_message(store: &MemoryDocumentStore, chat: &ChatId) {
        let id = murmur_shared::types::MessageId::new();
        store
            .set(
                &remote::message_doc(chat, &id),
                MessageRecord::new_fields(
                    id,
                    "c2VhbGVk",
                    &UserId::from("alice"),
                    "Alice",
                    &[UserId::from("bob")],
                    false,
                    remote::server_timestamp(),
                ),
            )
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_cancels_pending_sweeps() {
        let (store, scheduler, chat) = setup().await;
        put_message(&store, &chat).await;

        scheduler.configure(&chat, 5).await.unwrap();
        assert_eq!(scheduler.pending_count(&chat), 1);

        scheduler.configure(&chat, 0).await.unwrap();
        assert_eq!(scheduler.pending_count(&chat), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.document_count(&remote::messages(&chat)), 1);

        let record = ChatDirectory::new(store).get_chat(&chat).await.unwrap();
        assert_eq!(record.retention_seconds, 0);
        assert_eq!(record.retention_deadline, None);
    }

    #[tokio::test]
    async fn overdue_deadline_sweeps_on_rearm() {
        let (store, scheduler, chat) = setup().await;
        put_message(&store, &chat).await;
        put_message(&store, &chat).await;

        let past = Utc::now() - chrono::Duration::seconds(30);
        store
            .update(
                &remote::chat_doc(&chat),
                vec![FieldUpdate::set(fields::RETENTION_DEADLINE, encode_timestamp(past))],
            )
            .await
            .unwrap();

        let outcome = scheduler.rearm(&chat).await.unwrap();
        assert_eq!(
            outcome,
            RearmOutcome::SweptOverdue(SweepReport {
                deleted: 2,
                failed: 0
            })
        );
        assert_eq!(store.document_count(&remote::messages(&chat)), 0);
        assert_eq!(scheduler.rearm(&chat).await.unwrap(), RearmOutcome::Idle);
    }

    #[tokio::test]
    async fn sweep_keeps_later_deadline() {
        let (store, scheduler, chat) = setup().await;
        let later = Utc::now() + chrono::Duration::hours(1);
        store
            .update(
                &remote::chat_doc(&chat),
                vec![FieldUpdate::set(fields::RETENTION_DEADLINE, encode_timestamp(later))],
            )
            .await
            .unwrap();

        scheduler.sweep(&chat, Utc::now()).await.unwrap();

        let record = ChatDirectory::new(store).get_chat(&chat).await.unwrap();
        assert_eq!(record.retention_deadline, Some(later));
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_does_not_double_arm() {
        let (_store, scheduler, chat) = setup().await;
        scheduler.configure(&chat, 60).await.unwrap();

        assert!(matches!(scheduler.rearm(&chat).await.unwrap(), RearmOutcome::Armed(_)));
        assert_eq!(scheduler.pending_count(&chat), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_keeps_every_owed_sweep() {
        let (store, scheduler, chat) = setup().await;
        put_message(&store, &chat).await;

        let first = scheduler.schedule(&chat, 1).await.unwrap();
        let second = scheduler.schedule(&chat, 30).await.unwrap();

        // Process exit: in-memory timers are gone, the record is not.
        scheduler.cancel(&chat);
        let restarted = RetentionScheduler::new(store.clone(), ChatDirectory::new(store.clone()));

        assert_eq!(restarted.rearm(&chat).await.unwrap(), RearmOutcome::Armed(first));
        assert_eq!(restarted.pending_count(&chat), 2);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.document_count(&remote::messages(&chat)), 0);

        let record = ChatDirectory::new(store).get_chat(&chat).await.unwrap();
        assert_eq!(record.retention_deadline, Some(second));
        assert_eq!(record.owed_sweeps, vec![second]);
    }

    #[tokio::test]
    async fn sweep_due_only_touches_overdue_chats() {
        let (store, scheduler, chat) = setup().await;
        let directory = ChatDirectory::new(store.clone());
        let other = directory
            .ensure_chat(&UserId::from("alice"), &[UserId::from("carol")])
            .await
            .unwrap();
        put_message(&store, &chat).await;
        put_message(&store, &other).await;

        let past = Utc::now() - chrono::Duration::seconds(1);
        let future = Utc::now() + chrono::Duration::hours(1);
        for (target, at) in [(&chat, past), (&other, future)] {
            store
                .update(
                    &remote::chat_doc(target),
                    vec![FieldUpdate::set(fields::RETENTION_DEADLINE, encode_timestamp(at))],
                )
                .await
                .unwrap();
        }

        let swept = scheduler.sweep_due(&UserId::from("alice")).await.unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].0, chat);
        assert_eq!(store.document_count(&remote::messages(&other)), 1);
    }
}
