//! Scripted two-device conversation against the in-memory document store.
//!
//! Alice's key store is the on-disk SQLite store from `ClientConfig`, Bob's
//! is in memory. Run with `RUST_LOG=debug` for per-record detail.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use murmur_client::remote::MemoryDocumentStore;
use murmur_client::{init_tracing, ChatClient, ClientConfig, Participant};
use murmur_shared::constants::APP_NAME;
use murmur_shared::protocol::MessageBody;
use murmur_store::MemoryKeyStore;
use tracing::info;

const RETENTION_SECS: u32 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = ClientConfig::from_env();
    info!(app = APP_NAME, poll = ?config.retention_poll_interval, "Starting simulator");

    let remote = MemoryDocumentStore::shared();
    let alice_keys = Arc::new(config.open_key_store().context("opening key store")?);

    let alice = ChatClient::new(
        Participant::new("alice", "Alice"),
        remote.clone(),
        alice_keys,
    );
    let bob = ChatClient::new(
        Participant::new("bob", "Bob"),
        remote.clone(),
        Arc::new(MemoryKeyStore::new()),
    );
    let poller = bob.spawn_retention_poller(config.retention_poll_interval);

    let mut alice_chat = alice.open_chat(&[bob.me().id.clone()]).await?;
    let mut bob_chat = bob.open_chat(&[alice.me().id.clone()]).await?;
    info!(chat = %alice_chat.chat_id(), "both devices attached");

    alice_chat.set_typing(true).await?;
    let typing = bob_chat
        .typing()
        .wait_for(|set| !set.is_empty())
        .await
        .context("typing feed stopped")?;
    info!(?typing, "bob sees typing");
    alice_chat.set_typing(false).await?;

    alice_chat.send_text("hello from alice").await?;
    alice_chat.send_voice_note(&[0x52, 0x49, 0x46, 0x46]).await?;

    let snapshot = bob_chat
        .messages()
        .wait_for(|log| log.messages.len() == 2)
        .await
        .context("message feed stopped")?;
    for message in &snapshot.messages {
        info!(from = %message.display_name, body = %message.body.summary(), "bob received");
    }
    match &snapshot.messages[0].body {
        MessageBody::Text(text) if text == "hello from alice" => {}
        other => bail!("unexpected first message: {other:?}"),
    }

    let receipts = bob_chat.mark_read().await?;
    info!(marked = receipts.marked, "bob marked messages read");

    let reply = bob_chat.send_text("hi alice").await?;
    let latest = alice_chat
        .messages()
        .wait_for(|log| log.messages.iter().any(|m| m.id == reply))
        .await
        .context("message feed stopped")?;
    let own = latest
        .messages
        .iter()
        .find(|m| m.id == reply)
        .context("reply missing")?;
    if alice_chat.delete(own).await.is_ok() {
        bail!("alice deleted bob's message");
    }
    info!("alice was refused deleting bob's message");

    alice_chat.set_retention(RETENTION_SECS).await?;
    alice_chat.send_text("this will self-destruct").await?;
    let swept = tokio::time::timeout(
        Duration::from_secs(u64::from(RETENTION_SECS) + 3),
        bob_chat.messages().wait_for(|log| log.messages.is_empty()),
    )
    .await
    .context("retention sweep did not run")?;
    if swept.is_none() {
        bail!("message feed stopped");
    }
    info!("retention sweep cleared the chat");

    let chats = bob.directory().get_chat(bob_chat.chat_id()).await?;
    info!(preview = ?chats.last_message, "chat record after sweep");

    alice_chat.close().await;
    bob_chat.close().await;
    poller.abort();
    info!(open_watches = remote.active_watches(), "simulation finished");
    Ok(())
}
