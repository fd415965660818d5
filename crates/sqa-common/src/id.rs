//! Content hashes for deduplicating event definitions.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of SHA-256 bytes kept in a content hash (32 hex chars).
pub const CONTENT_HASH_BYTES: usize = 16;

/// Stable identifier of an event definition.
///
/// Computed from the serialized event content only, so the same statement
/// shape from the same call site always maps to the same hash across
/// processes and restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash arbitrary bytes.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        ContentHash(hex::encode(&digest[..CONTENT_HASH_BYTES]))
    }

    /// Parse a hash token read back from a shard.
    ///
    /// Shards may come from other producers, so any non-empty token without
    /// whitespace or the `|` field separator is accepted.
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() || s.contains('|') || s.chars().any(char::is_whitespace) {
            return None;
        }
        Some(ContentHash(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
