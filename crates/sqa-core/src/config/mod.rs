//! Analyzer configuration.
//!
//! A [`Configuration`] is assembled once through [`ConfigurationBuilder`],
//! validated in [`ConfigurationBuilder::build`], and is immutable afterwards.
//! Every component receives it by reference (usually as `Arc<Configuration>`).
//!
//! The declarative TOML form lives in [`file`].

pub mod file;

pub use file::{AnalyzerEntry, ConfigFile};

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sqa_redact::{
    BacktraceFilter, CallerRedactor, RedactionError, RedactionPipeline, RedactorSpec, SqlRedactor,
    DEFAULT_AMBIGUOUS_LINES,
};
use sqa_telemetry::SinkError;
use thiserror::Error;

use crate::analyzer::{Analyzer, AnalyzerSpec};

/// Errors raised while assembling a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid analyzer name '{0}': must match [A-Za-z0-9_]+")]
    InvalidAnalyzerName(String),

    #[error("Analyzer '{0}' must watch at least one table")]
    EmptyTables(String),

    #[error("Analyzer '{0}' registered twice")]
    DuplicateAnalyzer(String),

    #[error("Invalid table pattern for analyzer '{name}': {source}")]
    TablePattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("logger_root_path is required")]
    MissingRootPath,

    #[error("Logger root path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Sample rate must be within [0, 1], got {0}")]
    InvalidSampleRate(f64),

    #[error("Unknown sink '{sink}' for analyzer '{name}'")]
    UnknownSink { name: String, sink: String },

    #[error(transparent)]
    Redaction(#[from] RedactionError),

    #[error("Failed to open sink for analyzer '{name}': {source}")]
    Sink {
        name: String,
        #[source]
        source: SinkError,
    },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Per-analyzer sampling decision, keyed by analyzer name.
pub type SamplePredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Secondary SQL redaction run by the background writer on each call.
pub type SqlHook = Arc<dyn Fn(String) -> String + Send + Sync>;

/// Caller frame filter run by the background writer on each call.
pub type BacktraceHook = Arc<dyn Fn(Vec<String>) -> Vec<String> + Send + Sync>;

/// Validated, immutable configuration.
pub struct Configuration {
    logger_root_path: PathBuf,
    should_log_sample: SamplePredicate,
    complex_sql_redactor: SqlHook,
    backtrace_filter: BacktraceHook,
    redaction: Arc<RedactionPipeline>,
    consolidate_transactions: bool,
    analyzers: Vec<Analyzer>,
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::new()
    }

    pub fn logger_root_path(&self) -> &Path {
        &self.logger_root_path
    }

    /// Whether `analyzer` samples the next query (or transaction).
    pub fn should_log_sample(&self, analyzer: &str) -> bool {
        (self.should_log_sample)(analyzer)
    }

    pub fn complex_sql_redact(&self, sql: String) -> String {
        (self.complex_sql_redactor)(sql)
    }

    pub fn filter_backtrace(&self, frames: Vec<String>) -> Vec<String> {
        (self.backtrace_filter)(frames)
    }

    pub fn redaction(&self) -> &Arc<RedactionPipeline> {
        &self.redaction
    }

    pub fn consolidate_transactions(&self) -> bool {
        self.consolidate_transactions
    }

    /// Registered analyzers, in registration order.
    pub fn analyzers(&self) -> &[Analyzer] {
        &self.analyzers
    }

    pub fn analyzer(&self, name: &str) -> Option<&Analyzer> {
        self.analyzers.iter().find(|a| a.name() == name)
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("logger_root_path", &self.logger_root_path)
            .field("consolidate_transactions", &self.consolidate_transactions)
            .field(
                "analyzers",
                &self.analyzers.iter().map(Analyzer::name).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

enum Sampling {
    Never,
    Rate(f64),
    Predicate(SamplePredicate),
}

/// Builder for [`Configuration`].
pub struct ConfigurationBuilder {
    logger_root_path: Option<PathBuf>,
    sampling: Sampling,
    complex_sql_redactor: Option<SqlHook>,
    backtrace_filter: Option<BacktraceHook>,
    sql_redactors: Vec<RedactorSpec>,
    backtrace_redactors: Vec<RedactorSpec>,
    ambiguous_tracers: Vec<String>,
    ambiguous_backtrace_lines: usize,
    consolidate_transactions: bool,
    analyzers: Vec<AnalyzerSpec>,
}

impl Default for ConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationBuilder {
    pub fn new() -> Self {
        Self {
            logger_root_path: None,
            sampling: Sampling::Never,
            complex_sql_redactor: None,
            backtrace_filter: None,
            sql_redactors: Vec::new(),
            backtrace_redactors: Vec::new(),
            ambiguous_tracers: Vec::new(),
            ambiguous_backtrace_lines: DEFAULT_AMBIGUOUS_LINES,
            consolidate_transactions: true,
            analyzers: Vec::new(),
        }
    }

    /// Directory receiving every analyzer's shard files.
    pub fn logger_root_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.logger_root_path = Some(path.into());
        self
    }

    /// Sampling predicate, called with the analyzer name.
    pub fn log_sample<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.sampling = Sampling::Predicate(Arc::new(predicate));
        self
    }

    /// Sample each query (or transaction) with probability `rate`.
    pub fn sample_rate(mut self, rate: f64) -> Self {
        self.sampling = Sampling::Rate(rate);
        self
    }

    pub fn complex_sql_redactor<F>(mut self, hook: F) -> Self
    where
        F: Fn(String) -> String + Send + Sync + 'static,
    {
        self.complex_sql_redactor = Some(Arc::new(hook));
        self
    }

    /// Replace the caller frame filter entirely.
    pub fn backtrace_filter<F>(mut self, hook: F) -> Self
    where
        F: Fn(Vec<String>) -> Vec<String> + Send + Sync + 'static,
    {
        self.backtrace_filter = Some(Arc::new(hook));
        self
    }

    /// Use a path filter as the caller frame filter.
    pub fn path_filter(self, filter: BacktraceFilter) -> Self {
        self.backtrace_filter(move |frames| filter.filter(&frames))
    }

    pub fn add_sql_redactors(mut self, rules: impl IntoIterator<Item = RedactorSpec>) -> Self {
        self.sql_redactors.extend(rules);
        self
    }

    pub fn add_backtrace_redactors(
        mut self,
        rules: impl IntoIterator<Item = RedactorSpec>,
    ) -> Self {
        self.backtrace_redactors.extend(rules);
        self
    }

    pub fn add_ambiguous_tracers<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ambiguous_tracers
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Frames kept when the top frame is ambiguous. Must be greater than one.
    pub fn ambiguous_backtrace_lines(mut self, lines: usize) -> Self {
        self.ambiguous_backtrace_lines = lines;
        self
    }

    pub fn consolidate_transactions(mut self, enabled: bool) -> Self {
        self.consolidate_transactions = enabled;
        self
    }

    pub fn add_analyzer(mut self, spec: AnalyzerSpec) -> Self {
        self.analyzers.push(spec);
        self
    }

    /// Validate every option, compile patterns and open the sinks.
    pub fn build(self) -> Result<Configuration, ConfigError> {
        let root = self.logger_root_path.ok_or(ConfigError::MissingRootPath)?;
        if !root.is_dir() {
            return Err(ConfigError::NotADirectory(root));
        }

        let should_log_sample: SamplePredicate = match self.sampling {
            Sampling::Never => Arc::new(|_: &str| false),
            Sampling::Rate(rate) => {
                if !(0.0..=1.0).contains(&rate) {
                    return Err(ConfigError::InvalidSampleRate(rate));
                }
                Arc::new(move |_: &str| rand::random::<f64>() < rate)
            }
            Sampling::Predicate(predicate) => predicate,
        };

        let sql = SqlRedactor::from_specs(&self.sql_redactors)?;
        let caller = CallerRedactor::from_specs(
            &self.backtrace_redactors,
            &self.ambiguous_tracers,
            self.ambiguous_backtrace_lines,
        )?;
        let redaction = Arc::new(RedactionPipeline::new(sql, caller));

        let backtrace_filter = self.backtrace_filter.unwrap_or_else(|| {
            let filter = BacktraceFilter::for_current_dir();
            Arc::new(move |frames: Vec<String>| filter.filter(&frames))
        });

        let mut seen = HashSet::new();
        let mut analyzers = Vec::with_capacity(self.analyzers.len());
        for spec in &self.analyzers {
            if !seen.insert(spec.name.clone()) {
                return Err(ConfigError::DuplicateAnalyzer(spec.name.clone()));
            }
            analyzers.push(Analyzer::open(spec, &root, &redaction)?);
        }
        if analyzers.is_empty() {
            tracing::warn!("no analyzers registered; nothing will be captured");
        }

        Ok(Configuration {
            logger_root_path: root,
            should_log_sample,
            complex_sql_redactor: self
                .complex_sql_redactor
                .unwrap_or_else(|| Arc::new(|sql: String| sql)),
            backtrace_filter,
            redaction,
            consolidate_transactions: self.consolidate_transactions,
            analyzers,
        })
    }
}
