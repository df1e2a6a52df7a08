// src/utils/serialization.rs
// ============================================================================
// CANONICAL SERIALIZATION AND DIGESTS
// ============================================================================
// Block hashes, transaction hashes, and parameter hashes must all be computed
// over a canonical encoding so that two semantically identical values always
// hash identically. The canonical form here is JSON with object keys sorted
// at every nesting level; `serde_json::Value` keeps object members in a
// BTreeMap, so a round-trip through `Value` yields sorted keys.
// ============================================================================

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Serialization errors.
#[derive(Error, Debug)]
pub enum SerializeError {
    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a value as canonical JSON (sorted object keys).
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String, SerializeError> {
    let value = serde_json::to_value(value)?;
    Ok(value.to_string())
}

/// SHA-256 digest as a lowercase hex string.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// SHA-256 digest of a value's canonical encoding.
///
/// Bare strings hash their raw bytes rather than the JSON-quoted form, so a
/// digest of a hex model hash computed here compares equal to the same digest
/// computed over the string by the ledger's transaction hashing.
pub fn canonical_digest<T: Serialize>(value: &T) -> Result<String, SerializeError> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(sha256_hex(s.as_bytes())),
        other => Ok(sha256_hex(other.to_string().as_bytes())),
    }
}
