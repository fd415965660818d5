//! SQL analyzer core.
//!
//! Samples statements issued by a database client, keeps the ones touching
//! watched tables, and persists them through a background writer into
//! content-addressed shards. The [`aggregate`] module merges those shards
//! offline into per-topic usage reports.
//!
//! Host integration code drives a [`ConnectionCapture`] per connection
//! through the [`QueryObserver`] hooks.

pub mod aggregate;
pub mod analyzer;
pub mod capture;
pub mod config;
pub mod exit_codes;
pub mod logging;
pub mod runtime;
pub mod writer;

pub use aggregate::{AggregateError, AggregateSummary, Aggregator, ReportEntry};
pub use analyzer::{Analyzer, AnalyzerSpec, TableMatcher};
pub use capture::{CaptureDecision, ConnectionCapture, QueryObserver, TransactionState};
pub use config::{ConfigError, ConfigFile, Configuration, ConfigurationBuilder};
pub use exit_codes::ExitCode;
pub use runtime::SqlAnalyzer;
pub use writer::{BackgroundWriter, WriterError};
