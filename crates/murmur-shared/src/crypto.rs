use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::constants::{
    KDF_CONTEXT_CHAT_KEY, KDF_CONTEXT_DATABASE_KEY, KDF_CONTEXT_KEYSTORE_WRAP, MAX_MESSAGE_SIZE, NONCE_SIZE,
    SYMMETRIC_KEY_SIZE, TAG_SIZE,
};
use crate::error::CryptoError;
use crate::types::ChatId;

pub type SymmetricKey = [u8; SYMMETRIC_KEY_SIZE];

/// 256-bit symmetric key protecting one chat's message content.
#[derive(Clone, PartialEq, Eq)]
pub struct ChatKey(SymmetricKey);

impl ChatKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: SymmetricKey = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength(bytes.len()))?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &SymmetricKey {
        &self.0
    }

    /// Short BLAKE3 fingerprint, safe to log.
    pub fn fingerprint(&self) -> String {
        hex::encode(&blake3::hash(&self.0).as_bytes()[..4])
    }
}

impl From<SymmetricKey> for ChatKey {
    fn from(key: SymmetricKey) -> Self {
        Self(key)
    }
}

// Never print key material
impl std::fmt::Debug for ChatKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChatKey({})", self.fingerprint())
    }
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

// Returns nonce || ciphertext || tag (24 bytes nonce prepended)
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

// BLAKE3 KDF with domain separation. Every participant who knows the chat id
// computes the same key offline, no exchange round trip needed.
pub fn derive_chat_key(chat_id: &ChatId) -> ChatKey {
    ChatKey(blake3::derive_key(KDF_CONTEXT_CHAT_KEY, chat_id.as_bytes()))
}

/// Key used by the local keystore to seal secrets at rest.
pub fn derive_wrapping_key(device_secret: &[u8]) -> SymmetricKey {
    blake3::derive_key(KDF_CONTEXT_KEYSTORE_WRAP, device_secret)
}

/// SQLCipher key for the local key database.
pub fn derive_database_key(device_secret: &[u8]) -> SymmetricKey {
    blake3::derive_key(KDF_CONTEXT_DATABASE_KEY, device_secret)
}

/// Encrypt a text message into the storage representation
/// `base64(nonce || ciphertext || tag)`.
pub fn seal_text(key: &ChatKey, plaintext: &str) -> Result<String, CryptoError> {
    if plaintext.len() > MAX_MESSAGE_SIZE {
        return Err(CryptoError::PlaintextTooLarge {
            size: plaintext.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    let sealed = encrypt(key.as_bytes(), plaintext.as_bytes())?;
    Ok(BASE64.encode(sealed))
}

/// Inverse of [`seal_text`]. Fails closed on bad base64, truncation,
/// tampering, a wrong key, or a payload that is not UTF-8.
pub fn open_text(key: &ChatKey, field: &str) -> Result<String, CryptoError> {
    let sealed = BASE64
        .decode(field.as_bytes())
        .map_err(|_| CryptoError::InvalidEncoding)?;
    let plaintext = decrypt(key.as_bytes(), &sealed)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
}

/// Voice notes carry an extra base64 layer: the base64 of the raw audio is
/// the plaintext, giving `base64(encrypt(base64(audio)))` at rest.
pub fn seal_voice_note(key: &ChatKey, audio: &[u8]) -> Result<String, CryptoError> {
    seal_text(key, &BASE64.encode(audio))
}

pub fn open_voice_note(key: &ChatKey, field: &str) -> Result<Vec<u8>, CryptoError> {
    let inner = open_text(key, field)?;
    BASE64
        .decode(inner.as_bytes())
        .map_err(|_| CryptoError::InvalidEncoding)
}
