//! Redaction rules for captured SQL statements.
//!
//! This crate turns raw SQL text and call stacks into values that are safe to
//! persist and stable enough to deduplicate:
//!
//! - **SQL rules**: an ordered list of regex substitutions that strip literals
//!   (`IN (...)` lists, comparisons, `VALUES` tuples, `BETWEEN`, `LIKE`,
//!   `LIMIT`/`OFFSET`, insert column lists).
//! - **Caller rules**: picks the informative frames of a call stack
//!   (expanding past "ambiguous tracer" frames) and scrubs generated names.
//! - **Backtrace filter**: drops frames under dependency/library roots and
//!   rewrites frames under the application root to relative paths.
//! - **Byte repair**: invalid UTF-8 is replaced before any regex runs.
//!
//! # Example
//!
//! ```
//! use sqa_redact::{RedactionPipeline, SqlRedactor, CallerRedactor};
//!
//! let pipeline = RedactionPipeline::new(SqlRedactor::default(), CallerRedactor::default());
//! let sql = pipeline.redact_sql("SELECT * FROM users WHERE id = 1234");
//! assert_eq!(sql, "SELECT * FROM users WHERE id = '[REDACTED]'");
//! ```

pub mod backtrace;
pub mod caller;
pub mod engine;
pub mod error;
pub mod redactor;
pub mod sql;

pub use backtrace::BacktraceFilter;
pub use caller::{CallerRedactor, DEFAULT_AMBIGUOUS_LINES};
pub use engine::RedactionPipeline;
pub use error::{RedactionError, Result};
pub use redactor::{Redactor, RedactorSpec};
pub use sql::{repair_utf8, SqlRedactor, REDACTED};
