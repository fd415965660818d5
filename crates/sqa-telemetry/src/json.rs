//! Plain JSON-lines sink.

use std::fs::File;
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};

use crate::sink::open_append;
use crate::{usage_file_name, LogSink, Record, SinkError};

/// Writes every record as one JSON line to `<root>/<name>.log`.
pub struct JsonSink {
    path: PathBuf,
    out: Option<LineWriter<File>>,
}

impl JsonSink {
    pub fn open(root: &Path, name: &str) -> Result<Self, SinkError> {
        let path = root.join(usage_file_name(name));
        let out = open_append(&path)?;
        tracing::debug!(path = %path.display(), "opened json sink");
        Ok(Self {
            path,
            out: Some(out),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for JsonSink {
    fn log(&mut self, record: &Record) -> Result<(), SinkError> {
        let json = serde_json::to_string(record)?;
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| SinkError::Closed(self.path.display().to_string()))?;
        writeln!(out, "{}", json).map_err(|e| SinkError::io(&self.path, e))
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
