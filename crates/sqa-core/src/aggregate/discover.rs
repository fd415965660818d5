//! Shard discovery by file name.
//!
//! Definitions shards are `<topic>_definitions.log*`, usage shards are
//! `<topic>.log*` (rotated or per-process suffixes allowed).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use sqa_telemetry::{DEFINITIONS_SUFFIX, USAGE_SUFFIX};

use super::AggregateError;

/// One shard file and the topic it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Shard {
    pub topic: String,
    pub path: PathBuf,
}

impl Shard {
    pub fn new(topic: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            topic: topic.into(),
            path: path.into(),
        }
    }
}

/// Every definitions shard directly under `log_dir`, sorted by path.
pub fn definition_shards(log_dir: &Path) -> Result<Vec<Shard>, AggregateError> {
    let mut shards = Vec::new();
    for (name, path) in list_files(log_dir)? {
        if let Some(idx) = name.find(DEFINITIONS_SUFFIX) {
            if idx > 0 {
                shards.push(Shard::new(&name[..idx], path));
            }
        }
    }
    Ok(shards)
}

/// Usage shards under `log_dir` for the given topics, sorted by path.
pub fn usage_shards(
    log_dir: &Path,
    topics: &BTreeSet<String>,
) -> Result<Vec<Shard>, AggregateError> {
    let mut shards = Vec::new();
    for (name, path) in list_files(log_dir)? {
        let Some(idx) = name.find(USAGE_SUFFIX) else {
            continue;
        };
        let topic = &name[..idx];
        if topics.contains(topic) {
            shards.push(Shard::new(topic, path));
        }
    }
    Ok(shards)
}

fn list_files(dir: &Path) -> Result<Vec<(String, PathBuf)>, AggregateError> {
    let entries = std::fs::read_dir(dir).map_err(|e| AggregateError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| AggregateError::io(dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => files.push((name, path)),
            Err(name) => tracing::debug!(name = ?name, "skipping non UTF-8 file name"),
        }
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}
