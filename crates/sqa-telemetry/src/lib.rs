//! SQL analyzer log sinks.
//!
//! This crate provides:
//! - The [`LogSink`] trait the background writer drives (filter, then write)
//! - A plain JSON-lines sink
//! - The content-addressed sink writing definition and usage shards
//! - The redacting sink that flattens events before content addressing
//! - The shard line codec shared with the offline aggregator

pub mod compact;
pub mod json;
pub mod redacted;
pub mod shard;
pub mod sink;

pub use compact::CompactSink;
pub use json::JsonSink;
pub use redacted::RedactedSink;
pub use shard::{
    definitions_file_name, usage_file_name, DefinitionLine, ShardLineError, UsageLine,
};
pub use sink::{event_record, LogSink, Record, SinkError, SinkFactory, SinkKind, SinkOptions};

/// Suffix of definition shard file names: `<name>_definitions.log`.
pub const DEFINITIONS_SUFFIX: &str = "_definitions.log";

/// Suffix of usage shard file names: `<name>.log`.
pub const USAGE_SUFFIX: &str = ".log";
