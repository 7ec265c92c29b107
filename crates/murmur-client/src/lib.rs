//! # murmur-client
//!
//! End-to-end encrypted chat messaging on top of a real-time document store.
//! Message content is sealed on the device under a per-chat key; the remote
//! store only ever sees ciphertext.

pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod feed;
pub mod keys;
pub mod materialize;
pub mod message_log;
pub mod remote;
pub mod retention;
pub mod typing;

use tracing_subscriber::{fmt, EnvFilter};

pub use client::{ChatClient, ChatSession};
pub use config::ClientConfig;
pub use error::{ClientError, RemoteError};
pub use message_log::Participant;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("murmur_client=debug,murmur_store=info,murmur_shared=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
