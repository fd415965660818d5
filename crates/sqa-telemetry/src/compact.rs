//! Content-addressed sink.
//!
//! Each record is hashed over its serialized content. The first occurrence of
//! a hash within the sink's lifetime appends `hash|json` to the definitions
//! shard; every occurrence appends `timestamp|hash` to the usage shard.
//!
//! The set of already written hashes is plain owned state: the sink is only
//! ever driven by the single background writer thread.

use std::collections::HashSet;
use std::fs::File;
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use sqa_common::ContentHash;

use crate::sink::open_append;
use crate::{
    definitions_file_name, usage_file_name, DefinitionLine, LogSink, Record, SinkError, UsageLine,
};

struct Shard {
    path: PathBuf,
    out: Option<LineWriter<File>>,
}

impl Shard {
    fn open(path: PathBuf) -> Result<Self, SinkError> {
        let out = open_append(&path)?;
        Ok(Self {
            path,
            out: Some(out),
        })
    }

    fn write_line(&mut self, line: &str) -> Result<(), SinkError> {
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| SinkError::Closed(self.path.display().to_string()))?;
        writeln!(out, "{}", line).map_err(|e| SinkError::io(&self.path, e))
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        if let Some(out) = self.out.as_mut() {
            out.flush().map_err(|e| SinkError::io(&self.path, e))?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.flush()?;
        self.out = None;
        Ok(())
    }
}

/// Writes `<root>/<name>_definitions.log` and `<root>/<name>.log`.
pub struct CompactSink {
    definitions: Shard,
    usage: Shard,
    logged: HashSet<ContentHash>,
}

impl CompactSink {
    pub fn open(root: &Path, name: &str) -> Result<Self, SinkError> {
        let definitions = Shard::open(root.join(definitions_file_name(name)))?;
        let usage = Shard::open(root.join(usage_file_name(name)))?;
        tracing::debug!(
            definitions = %definitions.path.display(),
            usage = %usage.path.display(),
            "opened content-addressed sink"
        );
        Ok(Self {
            definitions,
            usage,
            logged: HashSet::new(),
        })
    }

    pub fn definitions_path(&self) -> &Path {
        &self.definitions.path
    }

    pub fn usage_path(&self) -> &Path {
        &self.usage.path
    }

    /// Number of distinct definitions written by this sink.
    pub fn definitions_written(&self) -> usize {
        self.logged.len()
    }

    /// Log a record occurrence at an explicit unix timestamp.
    pub fn log_at(&mut self, record: &Record, timestamp: i64) -> Result<ContentHash, SinkError> {
        let json = serde_json::to_string(record)?;
        let hash = ContentHash::of_bytes(json.as_bytes());

        if !self.logged.contains(&hash) {
            self.definitions
                .write_line(&DefinitionLine::format(&hash, &json))?;
            tracing::debug!(hash = %hash, "new definition");
            self.logged.insert(hash.clone());
        }

        self.usage.write_line(&UsageLine::format(timestamp, &hash))?;
        Ok(hash)
    }
}

impl LogSink for CompactSink {
    fn log(&mut self, record: &Record) -> Result<(), SinkError> {
        self.log_at(record, Utc::now().timestamp()).map(|_| ())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.definitions.flush()?;
        self.usage.flush()
    }

    fn close(&mut self) -> Result<(), SinkError> {
        let definitions = self.definitions.close();
        let usage = self.usage.close();
        definitions.and(usage)
    }
}
