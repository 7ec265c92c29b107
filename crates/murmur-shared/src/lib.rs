//! # murmur-shared
//!
//! Types and cryptography shared by every Murmur crate: identifier newtypes,
//! the per-chat key derivation, the message cipher and the schema of the
//! records kept in the remote document store.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod types;
