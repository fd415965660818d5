//! Log sink trait and sink selection.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::LineWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use sqa_common::Event;
use sqa_redact::RedactionPipeline;
use thiserror::Error;

use crate::{CompactSink, JsonSink, RedactedSink};

/// A serialized event: a JSON object with deterministic (sorted) key order.
pub type Record = Map<String, Value>;

/// Errors from sink operations.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Sink already closed: {0}")]
    Closed(String),
}

impl SinkError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SinkError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Destination for one analyzer's events.
///
/// Sinks are driven exclusively by the background writer thread: first
/// [`filter_event`](LogSink::filter_event), then [`log`](LogSink::log).
pub trait LogSink: Send {
    /// Turn a captured event into the record to persist.
    fn filter_event(&self, event: Event) -> Record {
        event_record(event)
    }

    /// Persist one record.
    fn log(&mut self, record: &Record) -> Result<(), SinkError>;

    /// Push buffered output to the OS.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Flush and release output handles. Further writes fail.
    fn close(&mut self) -> Result<(), SinkError>;
}

/// Open `path` for appending, creating it if needed. Output is line buffered.
pub(crate) fn open_append(path: &Path) -> Result<LineWriter<File>, SinkError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| SinkError::io(path, e))?;
    Ok(LineWriter::new(file))
}

/// Default record layout: context fields plus the raw call list.
///
/// A context key named `calls` is replaced by the call list.
pub fn event_record(event: Event) -> Record {
    let (_, calls, context) = event.into_parts();
    let mut record = context.into_map();
    let calls = serde_json::to_value(calls).unwrap_or(Value::Array(Vec::new()));
    record.insert("calls".to_string(), calls);
    record
}

/// Everything a sink needs to open its outputs.
#[derive(Debug, Clone)]
pub struct SinkOptions {
    /// Directory holding the shard files.
    pub root: PathBuf,
    /// Analyzer name, used as the file prefix.
    pub name: String,
    /// Structural redaction shared by redacting sinks.
    pub redaction: Arc<RedactionPipeline>,
}

/// Opens sinks for user-defined sink types.
pub trait SinkFactory: Send + Sync {
    fn open(&self, options: &SinkOptions) -> Result<Box<dyn LogSink>, SinkError>;
}

/// Which sink an analyzer writes to.
#[derive(Clone, Default)]
pub enum SinkKind {
    /// One JSON line per event, no deduplication.
    Json,
    /// Content-addressed definitions plus usage lines.
    Compact,
    /// Redact and flatten, then content-address.
    #[default]
    Redacted,
    /// User-provided sink.
    Custom(Arc<dyn SinkFactory>),
}

impl SinkKind {
    pub fn open(&self, options: &SinkOptions) -> Result<Box<dyn LogSink>, SinkError> {
        Ok(match self {
            SinkKind::Json => Box::new(JsonSink::open(&options.root, &options.name)?),
            SinkKind::Compact => Box::new(CompactSink::open(&options.root, &options.name)?),
            SinkKind::Redacted => Box::new(RedactedSink::open(
                &options.root,
                &options.name,
                Arc::clone(&options.redaction),
            )?),
            SinkKind::Custom(factory) => factory.open(options)?,
        })
    }

    /// Parse a built-in sink name.
    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(SinkKind::Json),
            "compact" => Some(SinkKind::Compact),
            "redacted" => Some(SinkKind::Redacted),
            _ => None,
        }
    }
}

impl fmt::Debug for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkKind::Json => write!(f, "Json"),
            SinkKind::Compact => write!(f, "Compact"),
            SinkKind::Redacted => write!(f, "Redacted"),
            SinkKind::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}
