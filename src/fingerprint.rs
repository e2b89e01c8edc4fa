//! Content addressing for chunks.
//!
//! A chunk's identity is derived from what it says, not from when or how it
//! was produced: re-chunking the same messages yields the same
//! [`fingerprint`] and the same [`chunk_id`], so repeated runs never create
//! duplicates, and any change to the rendered text produces a new identity.
//!
//! Digests are truncated SHA-256 hex strings. They are used for identity
//! and change detection only, never for security.

use sha2::{Digest, Sha256};

/// Length (hex chars) of a content fingerprint.
pub const FINGERPRINT_LEN: usize = 16;

/// Length (hex chars) of a chunk id.
pub const CHUNK_ID_LEN: usize = 20;

/// Fingerprint of a chunk's rendered text.
pub fn fingerprint(content: &str) -> String {
    let mut digest = sha256_hex(content.as_bytes());
    digest.truncate(FINGERPRINT_LEN);
    digest
}

/// Stable chunk id for a fingerprint within one conversation.
///
/// Identical text in two different conversations gets two different ids.
pub fn chunk_id(conversation_id: &str, fingerprint: &str) -> String {
    let mut digest = sha256_hex(format!("{}:{}", conversation_id, fingerprint).as_bytes());
    digest.truncate(CHUNK_ID_LEN);
    digest
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
