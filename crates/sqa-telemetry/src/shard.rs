//! Shard line codec.
//!
//! Definitions shard: `<hash>|<json-event>\n`
//! Usage shard:       `<unix-epoch-seconds>|<hash>\n`

use serde_json::Value;
use sqa_common::ContentHash;
use thiserror::Error;

use crate::{Record, DEFINITIONS_SUFFIX, USAGE_SUFFIX};

/// A shard line that cannot be decoded.
#[derive(Error, Debug)]
pub enum ShardLineError {
    #[error("missing '|' separator")]
    MissingSeparator,

    #[error("invalid hash '{0}'")]
    InvalidHash(String),

    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("definition is not a JSON object")]
    NotAnObject,
}

/// `<name>_definitions.log`
pub fn definitions_file_name(name: &str) -> String {
    format!("{}{}", name, DEFINITIONS_SUFFIX)
}

/// `<name>.log`
pub fn usage_file_name(name: &str) -> String {
    format!("{}{}", name, USAGE_SUFFIX)
}

/// One decoded definitions shard line.
#[derive(Debug, Clone, PartialEq)]
pub struct DefinitionLine {
    pub hash: ContentHash,
    pub record: Record,
}

impl DefinitionLine {
    /// Encode with an already serialized record (no trailing newline).
    pub fn format(hash: &ContentHash, json: &str) -> String {
        format!("{}|{}", hash, json)
    }

    /// Decode a line; surrounding whitespace is ignored.
    pub fn parse(line: &str) -> Result<Self, ShardLineError> {
        let (hash, json) = line
            .trim()
            .split_once('|')
            .ok_or(ShardLineError::MissingSeparator)?;
        let hash =
            ContentHash::parse(hash).ok_or_else(|| ShardLineError::InvalidHash(hash.to_string()))?;
        match serde_json::from_str::<Value>(json)? {
            Value::Object(record) => Ok(Self { hash, record }),
            _ => Err(ShardLineError::NotAnObject),
        }
    }
}

/// One decoded usage shard line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageLine {
    pub timestamp: i64,
    pub hash: ContentHash,
}

impl UsageLine {
    pub fn format(timestamp: i64, hash: &ContentHash) -> String {
        format!("{}|{}", timestamp, hash)
    }

    pub fn parse(line: &str) -> Result<Self, ShardLineError> {
        let (ts, hash) = line
            .trim()
            .split_once('|')
            .ok_or(ShardLineError::MissingSeparator)?;
        let timestamp = ts
            .parse::<i64>()
            .map_err(|_| ShardLineError::InvalidTimestamp(ts.to_string()))?;
        let hash =
            ContentHash::parse(hash).ok_or_else(|| ShardLineError::InvalidHash(hash.to_string()))?;
        Ok(Self { timestamp, hash })
    }
}
