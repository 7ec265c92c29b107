mod common;

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use common::{client, FlakyStore, LockedKeyStore, Op};
use murmur_client::remote::{self, DocumentStore, FieldUpdate, MemoryDocumentStore, Query};
use murmur_client::{ChatClient, ClientError, Participant};
use murmur_shared::crypto;
use murmur_shared::protocol::{encode_timestamp, fields, ChatRecord, MessageBody};
use murmur_shared::types::{ChatId, UserId};
use serde_json::json;

fn bob() -> UserId {
    UserId::from("bob")
}

fn alice() -> UserId {
    UserId::from("alice")
}

#[tokio::test]
async fn hello_is_ciphertext_at_rest_and_plaintext_for_bob() {
    let store = MemoryDocumentStore::shared();
    let alice_client = client("alice", store.clone());
    let bob_client = client("bob", store.clone());

    let alice_chat = alice_client.open_chat(&[bob()]).await.unwrap();
    let mut bob_chat = bob_client.open_chat(&[alice()]).await.unwrap();

    let id = alice_chat.send_text("hello").await.unwrap();

    let raw = store
        .get(&remote::message_doc(alice_chat.chat_id(), &id))
        .await
        .unwrap()
        .unwrap();
    let stored = raw.fields[fields::MESSAGE].as_str().unwrap();
    assert_ne!(stored, "hello");
    assert!(BASE64.decode(stored).is_ok());
    assert_eq!(raw.fields[fields::RECEIVER_IDS], json!(["bob"]));

    let chat = store
        .get(&remote::chat_doc(alice_chat.chat_id()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(chat.fields[fields::LAST_MESSAGE][fields::MESSAGE], json!(stored));

    let snapshot = bob_chat
        .messages()
        .wait_for(|log| !log.messages.is_empty())
        .await
        .unwrap();
    assert_eq!(snapshot.messages[0].body, MessageBody::Text("hello".into()));
    assert_eq!(snapshot.messages[0].display_name, "Alice");
    assert_eq!(snapshot.rejected, 0);
}

#[tokio::test]
async fn voice_note_round_trips() {
    let store = MemoryDocumentStore::shared();
    let alice_chat = client("alice", store.clone()).open_chat(&[bob()]).await.unwrap();
    let mut bob_chat = client("bob", store.clone()).open_chat(&[alice()]).await.unwrap();

    let audio: Vec<u8> = (0..=255).collect();
    let id = alice_chat.send_voice_note(&audio).await.unwrap();

    let raw = store
        .get(&remote::message_doc(alice_chat.chat_id(), &id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(raw.fields[fields::IS_AUDIO], json!(true));

    let snapshot = bob_chat
        .messages()
        .wait_for(|log| !log.messages.is_empty())
        .await
        .unwrap();
    assert_eq!(snapshot.messages[0].body, MessageBody::VoiceNote(audio));
}

#[tokio::test(start_paused = true)]
async fn retention_sweeps_every_message_after_delay() {
    let store = MemoryDocumentStore::shared();
    let alice_chat = client("alice", store.clone()).open_chat(&[bob()]).await.unwrap();
    let chat = alice_chat.chat_id().clone();

    store
        .update(
            &remote::chat_doc(&chat),
            vec![FieldUpdate::set(fields::RETENTION_SECONDS, json!(5))],
        )
        .await
        .unwrap();

    alice_chat.send_text("first").await.unwrap();
    alice_chat.send_text("second").await.unwrap();

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(store.document_count(&remote::messages(&chat)), 2);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(store.document_count(&remote::messages(&chat)), 0);

    let record = store.get(&remote::chat_doc(&chat)).await.unwrap().unwrap();
    assert_eq!(record.fields[fields::LAST_MESSAGE][fields::MESSAGE], json!(""));
    assert_eq!(record.fields[fields::RETENTION_DEADLINE], json!(null));
}

#[tokio::test(start_paused = true)]
async fn enabling_retention_from_the_session_sweeps_later() {
    let store = MemoryDocumentStore::shared();
    let alice_chat = client("alice", store.clone()).open_chat(&[bob()]).await.unwrap();
    let chat = alice_chat.chat_id().clone();

    alice_chat.set_retention(5).await.unwrap();
    alice_chat.send_text("gone soon").await.unwrap();
    alice_chat.send_voice_note(&[1, 2, 3]).await.unwrap();

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(store.document_count(&remote::messages(&chat)), 2);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(store.document_count(&remote::messages(&chat)), 0);

    let record = chat_record(&store, &chat).await;
    assert_eq!(record.retention_seconds, 5);
    assert!(record.owed_sweeps.is_empty());
}

#[tokio::test]
async fn overdue_sweep_pass_skips_a_failing_chat() {
    let memory = MemoryDocumentStore::shared();
    let flaky = FlakyStore::new(memory.clone());
    let alice_client = client("alice", flaky.clone());

    let with_bob = alice_client.open_chat(&[bob()]).await.unwrap();
    let with_carol = alice_client
        .open_chat(&[UserId::from("carol")])
        .await
        .unwrap();
    with_bob.send_text("one").await.unwrap();
    with_carol.send_text("two").await.unwrap();

    let past = chrono::Utc::now() - chrono::Duration::seconds(1);
    for chat in [with_bob.chat_id(), with_carol.chat_id()] {
        memory
            .update(
                &remote::chat_doc(chat),
                vec![FieldUpdate::set(fields::RETENTION_DEADLINE, encode_timestamp(past))],
            )
            .await
            .unwrap();
    }
    flaky.fail_document(with_bob.chat_id().as_str());

    let swept = alice_client.retention().sweep_due(&alice()).await.unwrap();
    assert_eq!(swept.len(), 1);
    assert_eq!(&swept[0].0, with_carol.chat_id());
    assert_eq!(memory.document_count(&remote::messages(with_carol.chat_id())), 0);
}

async fn chat_record(store: &MemoryDocumentStore, chat: &ChatId) -> ChatRecord {
    let doc = store.get(&remote::chat_doc(chat)).await.unwrap().unwrap();
    ChatRecord::decode(&doc.id, &doc.fields).unwrap()
}

#[tokio::test]
async fn deleting_someone_elses_message_never_reaches_the_store() {
    let memory = MemoryDocumentStore::shared();
    let flaky = FlakyStore::new(memory.clone());
    let alice_client = client("alice", flaky.clone());
    let bob_client = client("bob", memory.clone());

    let mut alice_chat = alice_client.open_chat(&[bob()]).await.unwrap();
    let bob_chat = bob_client.open_chat(&[alice()]).await.unwrap();
    bob_chat.send_text("mine").await.unwrap();

    let snapshot = alice_chat
        .messages()
        .wait_for(|log| !log.messages.is_empty())
        .await
        .unwrap();
    let message = &snapshot.messages[0];

    let err = alice_chat.delete(message).await.unwrap_err();
    assert!(matches!(err, ClientError::NotMessageAuthor { .. }));
    assert_eq!(flaky.calls(Op::Delete), 0);
    assert_eq!(memory.document_count(&remote::messages(alice_chat.chat_id())), 1);

    // The author may
    bob_chat.delete(message).await.unwrap();
    assert_eq!(memory.document_count(&remote::messages(alice_chat.chat_id())), 0);
}

#[tokio::test]
async fn chat_key_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = murmur_client::ClientConfig {
        keystore_path: Some(dir.path().join("keys.db")),
        ..Default::default()
    };
    let store = MemoryDocumentStore::shared();

    let first = ChatClient::new(
        Participant::new("alice", "Alice"),
        store.clone(),
        Arc::new(config.open_key_store().unwrap()),
    );
    let session = first.open_chat(&[bob()]).await.unwrap();
    let chat = session.chat_id().clone();
    let key = first.keyring().load_or_create(&chat).await.unwrap();
    session.close().await;
    drop(first);

    let keys = config.open_key_store().unwrap();
    assert_eq!(keys.accounts().unwrap(), vec![chat.to_string()]);

    let second = ChatClient::new(Participant::new("alice", "Alice"), store, Arc::new(keys));
    let reloaded = second.keyring().load_or_create(&chat).await.unwrap();
    assert_eq!(reloaded.as_bytes(), key.as_bytes());
    assert_eq!(reloaded, crypto::derive_chat_key(&chat));
}

#[tokio::test]
async fn truncated_record_is_dropped_from_the_view() {
    let store = MemoryDocumentStore::shared();
    let alice_chat = client("alice", store.clone()).open_chat(&[bob()]).await.unwrap();
    let chat = alice_chat.chat_id().clone();

    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(alice_chat.send_text(&format!("message {i}")).await.unwrap());
    }

    let victim = remote::message_doc(&chat, &ids[2]);
    let doc = store.get(&victim).await.unwrap().unwrap();
    let mut sealed = BASE64
        .decode(doc.fields[fields::MESSAGE].as_str().unwrap())
        .unwrap();
    sealed.pop();
    store
        .update(
            &victim,
            vec![FieldUpdate::set(fields::MESSAGE, json!(BASE64.encode(sealed)))],
        )
        .await
        .unwrap();

    let mut bob_chat = client("bob", store.clone()).open_chat(&[alice()]).await.unwrap();
    let snapshot = bob_chat
        .messages()
        .wait_for(|log| log.messages.len() + log.rejected == 5)
        .await
        .unwrap();

    let texts: Vec<String> = snapshot.messages.iter().map(|m| m.body.summary()).collect();
    assert_eq!(texts, ["message 0", "message 1", "message 3", "message 4"]);
    assert_eq!(snapshot.rejected, 1);
    assert!(bob_chat.messages().is_running());
}

#[tokio::test]
async fn locked_key_store_blocks_the_session() {
    let store = MemoryDocumentStore::shared();
    let alice_client = ChatClient::new(
        Participant::new("alice", "Alice"),
        store.clone(),
        Arc::new(LockedKeyStore),
    );

    let err = alice_client.open_chat(&[bob()]).await.err().unwrap();
    assert!(matches!(err, ClientError::KeyUnavailable { .. }));
    assert_eq!(store.active_watches(), 0);
}

#[tokio::test]
async fn read_receipts_are_best_effort() {
    let memory = MemoryDocumentStore::shared();
    let alice_chat = client("alice", memory.clone()).open_chat(&[bob()]).await.unwrap();

    let mut ids = Vec::new();
    for text in ["one", "two", "three"] {
        ids.push(alice_chat.send_text(text).await.unwrap());
    }

    let flaky = FlakyStore::new(memory.clone());
    flaky.fail_document(&ids[1].to_doc_id());
    let bob_chat = client("bob", flaky.clone()).open_chat(&[alice()]).await.unwrap();

    // Opening already tried; the remaining unread one keeps failing
    let report = bob_chat.mark_read().await.unwrap();
    assert_eq!((report.marked, report.failed), (0, 1));

    let unread = memory
        .query(
            &remote::messages(bob_chat.chat_id()),
            &Query::all().where_eq(fields::RECEIVER_READ, json!(false)),
        )
        .await
        .unwrap();
    assert_eq!(unread.len(), 1);
    assert_eq!(unread[0].id, ids[1].to_doc_id());
}

#[tokio::test]
async fn failed_send_writes_nothing() {
    let memory = MemoryDocumentStore::shared();
    let flaky = FlakyStore::new(memory.clone());
    let alice_chat = client("alice", flaky.clone()).open_chat(&[bob()]).await.unwrap();

    flaky.fail_op(Op::Commit);
    let err = alice_chat.send_text("lost").await.unwrap_err();
    assert!(matches!(err, ClientError::Remote(_)));

    assert_eq!(memory.document_count(&remote::messages(alice_chat.chat_id())), 0);
    let chat = memory
        .get(&remote::chat_doc(alice_chat.chat_id()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(chat.fields[fields::LAST_MESSAGE][fields::MESSAGE], json!(""));
}

#[tokio::test]
async fn closing_sessions_releases_subscriptions() {
    let store = MemoryDocumentStore::shared();
    let alice_client = client("alice", store.clone());

    for _ in 0..10 {
        let session = alice_client.open_chat(&[bob()]).await.unwrap();
        assert_eq!(store.active_watches(), 2);
        session.close().await;
    }
    assert_eq!(store.active_watches(), 0);
}

#[tokio::test]
async fn group_chat_addresses_every_other_participant() {
    let store = MemoryDocumentStore::shared();
    let carol = UserId::from("carol");
    let alice_chat = client("alice", store.clone())
        .open_chat(&[carol.clone(), bob()])
        .await
        .unwrap();
    assert_eq!(alice_chat.chat_id().as_str(), "alice_bob_carol");
    assert_eq!(alice_chat.recipients(), &[bob(), carol.clone()]);

    alice_chat.send_text("hi all").await.unwrap();

    for reader in [bob(), carol] {
        let others: Vec<UserId> = [alice(), bob(), UserId::from("carol")]
            .into_iter()
            .filter(|u| u != &reader)
            .collect();
        let mut session = client(reader.as_str(), store.clone())
            .open_chat(&others)
            .await
            .unwrap();
        let snapshot = session
            .messages()
            .wait_for(|log| !log.messages.is_empty())
            .await
            .unwrap();
        assert_eq!(snapshot.messages[0].body, MessageBody::Text("hi all".into()));
    }
}

#[tokio::test]
async fn typing_is_visible_to_the_other_side_only() {
    let store = MemoryDocumentStore::shared();
    let mut alice_chat = client("alice", store.clone()).open_chat(&[bob()]).await.unwrap();
    let mut bob_chat = client("bob", store.clone()).open_chat(&[alice()]).await.unwrap();

    alice_chat.set_typing(true).await.unwrap();
    let seen = bob_chat
        .typing()
        .wait_for(|set| set.contains(&alice()))
        .await
        .unwrap();
    assert_eq!(seen.len(), 1);
    assert!(alice_chat.typing().current().is_empty());

    alice_chat.close().await;
    let seen = bob_chat.typing().wait_for(|set| set.is_empty()).await.unwrap();
    assert!(seen.is_empty());
}

#[tokio::test]
async fn chat_list_shows_preview_and_deletion() {
    let store = MemoryDocumentStore::shared();
    let alice_client = client("alice", store.clone());
    let session = alice_client.open_chat(&[bob()]).await.unwrap();
    session.send_text("latest").await.unwrap();

    let mut chats = alice_client.chats().await.unwrap();
    let list = chats
        .wait_for(|list| list.chats.iter().any(|c| c.last_message.is_some()))
        .await
        .unwrap();
    let key = alice_client
        .keyring()
        .load_or_create(session.chat_id())
        .await
        .unwrap();
    assert_eq!(
        list.chats[0].preview(&key).unwrap(),
        Some(MessageBody::Text("latest".into()))
    );

    let chat = session.chat_id().clone();
    session.close().await;
    assert_eq!(alice_client.delete_chat(&chat).await.unwrap(), 1);
    let list = chats.wait_for(|list| list.chats.is_empty()).await.unwrap();
    assert_eq!(list.rejected, 0);
    assert!(!alice_client.keyring().is_cached(&chat));
}
