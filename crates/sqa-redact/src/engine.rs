//! Structural redaction pipeline.
//!
//! Bundles the SQL rule list and the caller rule list so sinks can share one
//! immutable, cheaply cloneable value.

use crate::{CallerRedactor, SqlRedactor};

/// SQL + caller redaction applied by redacting sinks.
#[derive(Debug, Clone, Default)]
pub struct RedactionPipeline {
    sql: SqlRedactor,
    caller: CallerRedactor,
}

impl RedactionPipeline {
    pub fn new(sql: SqlRedactor, caller: CallerRedactor) -> Self {
        Self { sql, caller }
    }

    /// Apply the SQL rules.
    pub fn redact_sql(&self, sql: &str) -> String {
        self.sql.redact(sql)
    }

    /// Select and redact the caller frames.
    pub fn redact_caller(&self, frames: &[String]) -> String {
        self.caller.redact(frames)
    }

    pub fn sql(&self) -> &SqlRedactor {
        &self.sql
    }

    pub fn caller(&self) -> &CallerRedactor {
        &self.caller
    }
}
