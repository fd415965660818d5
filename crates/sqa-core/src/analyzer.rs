//! Analyzer registry entries and the table matcher.
//!
//! The table matcher is a lexical prefilter, not a parser: it only looks at
//! the leading clause of a statement. A watched table referenced only inside
//! a subquery or a later clause is not seen.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use sqa_redact::RedactionPipeline;
use sqa_telemetry::{LogSink, SinkError, SinkKind, SinkOptions};

use crate::config::ConfigError;

static ANALYZER_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"\A[A-Za-z0-9_]+\z").unwrap());

static MUTATING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\A\s*(?:INSERT|UPDATE|DELETE)\b").unwrap());

static SELECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\A\s*SELECT\b").unwrap());

/// Whether the statement writes (`INSERT`, `UPDATE` or `DELETE`).
pub fn is_mutating(sql: &str) -> bool {
    MUTATING.is_match(sql)
}

/// Whether the statement is a `SELECT`.
pub fn is_select(sql: &str) -> bool {
    SELECT.is_match(sql)
}

/// Check an analyzer name against `[A-Za-z0-9_]+`.
pub fn validate_name(name: &str) -> Result<(), ConfigError> {
    if ANALYZER_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ConfigError::InvalidAnalyzerName(name.to_string()))
    }
}

/// Matches statements whose leading clause touches one of a set of tables.
///
/// Recognized leading clauses, case-insensitive, after optional whitespace:
/// `SELECT|DELETE ... FROM|JOIN <table>` and `INSERT INTO|UPDATE <table>`,
/// with the table name optionally back-tick quoted.
#[derive(Debug, Clone)]
pub struct TableMatcher {
    pattern: Regex,
}

impl TableMatcher {
    pub fn new<S: AsRef<str>>(tables: &[S]) -> Result<Self, regex::Error> {
        let names = tables
            .iter()
            .map(|t| regex::escape(t.as_ref()))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = format!(
            r"\A\s*(?:(?:SELECT|DELETE)\b.*\b(?:FROM|JOIN)|INSERT\s+INTO|UPDATE)\s+`?(?:{})(?:`|\b)",
            names
        );
        let pattern = RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .dot_matches_new_line(true)
            .build()?;
        Ok(Self { pattern })
    }

    pub fn is_match(&self, sql: &str) -> bool {
        self.pattern.is_match(sql)
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

/// Declarative analyzer registration.
#[derive(Debug, Clone)]
pub struct AnalyzerSpec {
    pub name: String,
    pub tables: Vec<String>,
    pub sink: SinkKind,
}

impl AnalyzerSpec {
    pub fn new<I, S>(name: impl Into<String>, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            tables: tables.into_iter().map(Into::into).collect(),
            sink: SinkKind::default(),
        }
    }

    pub fn with_sink(mut self, sink: SinkKind) -> Self {
        self.sink = sink;
        self
    }
}

/// A registered analyzer: name, table matcher and its open sink.
///
/// The sink is only driven by the background writer; the mutex exists so a
/// respawned writer thread can pick the sink up where the previous one left.
pub struct Analyzer {
    name: String,
    matcher: TableMatcher,
    sink: Mutex<Box<dyn LogSink>>,
}

impl Analyzer {
    /// Validate `spec` and open its sink under `root`.
    pub fn open(
        spec: &AnalyzerSpec,
        root: &Path,
        redaction: &Arc<RedactionPipeline>,
    ) -> Result<Self, ConfigError> {
        validate_name(&spec.name)?;
        if spec.tables.is_empty() {
            return Err(ConfigError::EmptyTables(spec.name.clone()));
        }
        let matcher =
            TableMatcher::new(spec.tables.as_slice()).map_err(|e| ConfigError::TablePattern {
                name: spec.name.clone(),
                source: e,
            })?;

        let options = SinkOptions {
            root: root.to_path_buf(),
            name: spec.name.clone(),
            redaction: Arc::clone(redaction),
        };
        let sink = spec.sink.open(&options).map_err(|e| ConfigError::Sink {
            name: spec.name.clone(),
            source: e,
        })?;

        tracing::debug!(
            analyzer = %spec.name,
            tables = ?spec.tables,
            sink = ?spec.sink,
            "registered analyzer"
        );

        Ok(Self {
            name: spec.name.clone(),
            matcher,
            sink: Mutex::new(sink),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matcher(&self) -> &TableMatcher {
        &self.matcher
    }

    pub fn matches(&self, sql: &str) -> bool {
        self.matcher.is_match(sql)
    }

    /// Run `f` with exclusive access to the sink.
    pub(crate) fn with_sink<R>(&self, f: impl FnOnce(&mut dyn LogSink) -> R) -> R {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        f(sink.as_mut())
    }

    pub(crate) fn close(&self) -> Result<(), SinkError> {
        self.with_sink(|sink| sink.close())
    }
}

impl fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analyzer")
            .field("name", &self.name)
            .field("matcher", &self.matcher.as_str())
            .finish_non_exhaustive()
    }
}
