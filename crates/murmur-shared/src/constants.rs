/// Application name
pub const APP_NAME: &str = "Murmur";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Maximum plaintext size accepted for a single message (1 MiB).
/// Voice notes are base64-expanded before encryption, so this bounds
/// roughly 750 KiB of raw audio.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Separator placed between sorted participant ids in a chat id
pub const CHAT_ID_SEPARATOR: char = '_';

/// Top-level collection holding chat records
pub const CHATS_COLLECTION: &str = "chats";

/// Sub-collection (below a chat record) holding message records
pub const MESSAGES_COLLECTION: &str = "messages";

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_CHAT_KEY: &str = "murmur-chat-key-v1";
pub const KDF_CONTEXT_KEYSTORE_WRAP: &str = "murmur-keystore-wrap-v1";
pub const KDF_CONTEXT_DATABASE_KEY: &str = "murmur-database-key-v1";
