//! Offline aggregation of content-addressed shards.
//!
//! Two passes over a log directory:
//! 1. definitions shards build a per-topic map `hash -> definition`
//!    (last write wins, definitions sharing a hash are identical anyway);
//! 2. usage shards add occurrence counts and the latest call time to the
//!    matching definitions. Usage without a definition is skipped with a
//!    warning; it is expected when a process was killed between writes.
//!
//! Each topic is then written to `<dest>/<topic>_<YYYY-MM-DD>.log` as a
//! single JSON object keyed by hash.

pub mod discover;
mod pool;

pub use discover::{definition_shards, usage_shards, Shard};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqa_common::ContentHash;
use sqa_telemetry::{DefinitionLine, Record, ShardLineError, UsageLine};
use thiserror::Error;

/// Default number of shard workers.
pub const DEFAULT_CONCURRENCY: usize = 6;

#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: {source}")]
    MalformedLine {
        path: PathBuf,
        line: usize,
        #[source]
        source: ShardLineError,
    },

    #[error("Failed to write report {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cannot find any definition shards in '{}'", .0.display())]
    NoDefinitionShards(PathBuf),

    #[error("A shard worker panicked")]
    WorkerPanicked,
}

impl AggregateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AggregateError::Io {
            path: path.into(),
            source,
        }
    }
}

/// One merged report entry: the stored definition plus usage statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportEntry {
    #[serde(flatten)]
    pub definition: Record,
    pub count: u64,
    pub last_called: Option<DateTime<Utc>>,
}

impl ReportEntry {
    fn new(definition: Record) -> Self {
        Self {
            definition,
            count: 0,
            last_called: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UsageStats {
    count: u64,
    last_called: DateTime<Utc>,
}

/// A written report file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub topic: String,
    pub path: PathBuf,
    pub queries: usize,
}

/// Merges shards into per-topic reports.
#[derive(Debug)]
pub struct Aggregator {
    concurrency: usize,
    topics: BTreeMap<String, BTreeMap<ContentHash, ReportEntry>>,
    orphans: u64,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl Aggregator {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            topics: BTreeMap::new(),
            orphans: 0,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Load definitions shards. Returns the number of distinct definitions
    /// added or replaced.
    pub fn run_definitions(&mut self, shards: Vec<Shard>) -> Result<usize, AggregateError> {
        tracing::info!(shards = shards.len(), workers = self.concurrency, "merging definitions");

        let partials = pool::run(
            self.concurrency,
            shards,
            |defs: &mut HashMap<ContentHash, Record>, line| {
                let DefinitionLine { hash, record } = DefinitionLine::parse(line)?;
                defs.insert(hash, record);
                Ok(())
            },
        )?;

        let mut merged = 0;
        for partial in partials {
            for (topic, defs) in partial {
                let entries = self.topics.entry(topic).or_default();
                for (hash, record) in defs {
                    merged += 1;
                    match entries.get_mut(&hash) {
                        Some(entry) => entry.definition = record,
                        None => {
                            entries.insert(hash, ReportEntry::new(record));
                        }
                    }
                }
            }
        }
        Ok(merged)
    }

    /// Load usage shards into the already loaded definitions. Returns the
    /// number of usage lines merged (orphans excluded).
    pub fn run_usage(&mut self, shards: Vec<Shard>) -> Result<u64, AggregateError> {
        tracing::info!(shards = shards.len(), workers = self.concurrency, "merging usage");

        let partials = pool::run(
            self.concurrency,
            shards,
            |usage: &mut HashMap<ContentHash, UsageStats>, line| {
                let UsageLine { timestamp, hash } = UsageLine::parse(line)?;
                let called = DateTime::from_timestamp(timestamp, 0)
                    .ok_or_else(|| ShardLineError::InvalidTimestamp(timestamp.to_string()))?;
                usage
                    .entry(hash)
                    .and_modify(|s| {
                        s.count += 1;
                        s.last_called = s.last_called.max(called);
                    })
                    .or_insert(UsageStats {
                        count: 1,
                        last_called: called,
                    });
                Ok(())
            },
        )?;

        let mut merged = 0;
        for partial in partials {
            for (topic, usage) in partial {
                let mut entries = self.topics.get_mut(&topic);
                for (hash, stats) in usage {
                    match entries.as_deref_mut().and_then(|e| e.get_mut(&hash)) {
                        Some(entry) => {
                            entry.count += stats.count;
                            entry.last_called = entry.last_called.max(Some(stats.last_called));
                            merged += stats.count;
                        }
                        None => {
                            tracing::warn!(
                                topic = %topic,
                                hash = %hash,
                                occurrences = stats.count,
                                "usage found for hash with no definition"
                            );
                            self.orphans += stats.count;
                        }
                    }
                }
            }
        }
        Ok(merged)
    }

    /// Usage lines skipped because their hash had no definition.
    pub fn orphan_records(&self) -> u64 {
        self.orphans
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.keys().map(String::as_str)
    }

    pub fn report(&self, topic: &str) -> Option<&BTreeMap<ContentHash, ReportEntry>> {
        self.topics.get(topic)
    }

    /// Write one `<topic>_<date>.log` per topic into `dest_dir`.
    pub fn dump(&self, dest_dir: &Path, date: NaiveDate) -> Result<Vec<Report>, AggregateError> {
        let mut reports = Vec::with_capacity(self.topics.len());
        for (topic, entries) in &self.topics {
            let path = dest_dir.join(report_file_name(topic, date));
            tracing::info!(path = %path.display(), queries = entries.len(), "writing report");

            let file = File::create(&path).map_err(|e| AggregateError::io(&path, e))?;
            let mut out = BufWriter::new(file);
            serde_json::to_writer(&mut out, entries).map_err(|e| AggregateError::Json {
                path: path.clone(),
                source: e,
            })?;
            out.flush().map_err(|e| AggregateError::io(&path, e))?;

            reports.push(Report {
                topic: topic.clone(),
                path,
                queries: entries.len(),
            });
        }
        Ok(reports)
    }
}

/// `<topic>_<YYYY-MM-DD>.log`
pub fn report_file_name(topic: &str, date: NaiveDate) -> String {
    format!("{}_{}.log", topic, date.format("%Y-%m-%d"))
}

/// What a full directory run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateSummary {
    pub definition_shards: usize,
    pub usage_shards: usize,
    pub usage_records: u64,
    pub orphan_records: u64,
    pub reports: Vec<Report>,
}

/// Discover shards in `log_dir`, merge them and write reports to `dest_dir`.
pub fn aggregate_dir(
    log_dir: &Path,
    dest_dir: &Path,
    concurrency: usize,
    date: NaiveDate,
) -> Result<AggregateSummary, AggregateError> {
    let definitions = definition_shards(log_dir)?;
    if definitions.is_empty() {
        return Err(AggregateError::NoDefinitionShards(log_dir.to_path_buf()));
    }
    let topics: BTreeSet<String> = definitions.iter().map(|s| s.topic.clone()).collect();
    let usage = usage_shards(log_dir, &topics)?;

    let definition_count = definitions.len();
    let usage_count = usage.len();

    let mut aggregator = Aggregator::new(concurrency);
    aggregator.run_definitions(definitions)?;
    let usage_records = aggregator.run_usage(usage)?;
    let reports = aggregator.dump(dest_dir, date)?;

    Ok(AggregateSummary {
        definition_shards: definition_count,
        usage_shards: usage_count,
        usage_records,
        orphan_records: aggregator.orphan_records(),
        reports,
    })
}
