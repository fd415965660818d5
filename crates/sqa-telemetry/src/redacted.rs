//! Redacting content-addressed sink.
//!
//! Before content addressing, each call's SQL and caller frames go through
//! the structural redaction pipeline and the event is flattened to a single
//! `sql` string and a single `caller` string.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use sqa_common::Event;
use sqa_redact::RedactionPipeline;

use crate::{CompactSink, LogSink, Record, SinkError};

/// Separator between statements of a multi-call event.
pub const SQL_SEPARATOR: &str = "; ";
/// Separator between callers of a multi-call event.
pub const CALLER_SEPARATOR: &str = ";; ";

pub struct RedactedSink {
    inner: CompactSink,
    redaction: Arc<RedactionPipeline>,
}

impl RedactedSink {
    pub fn open(
        root: &Path,
        name: &str,
        redaction: Arc<RedactionPipeline>,
    ) -> Result<Self, SinkError> {
        Ok(Self {
            inner: CompactSink::open(root, name)?,
            redaction,
        })
    }
}

impl LogSink for RedactedSink {
    /// Redact each call, drop calls that became identical, then flatten.
    ///
    /// A single remaining call is unwrapped as-is; several are joined with
    /// `"; "` and terminated with `;`. Callers are joined with `";; "`,
    /// skipping calls without a caller (transaction markers). Context keys
    /// `sql` and `caller` are replaced by the flattened values.
    fn filter_event(&self, event: Event) -> Record {
        let (_, calls, context) = event.into_parts();

        let mut redacted: Vec<(String, String)> = Vec::with_capacity(calls.len());
        for call in &calls {
            let pair = (
                self.redaction.redact_sql(&call.sql),
                self.redaction.redact_caller(&call.caller),
            );
            if !redacted.contains(&pair) {
                redacted.push(pair);
            }
        }

        let sql = match redacted.as_slice() {
            [] => String::new(),
            [(only, _)] => only.clone(),
            many => {
                let joined = many
                    .iter()
                    .map(|(sql, _)| sql.as_str())
                    .collect::<Vec<_>>()
                    .join(SQL_SEPARATOR);
                format!("{};", joined)
            }
        };

        let caller = redacted
            .iter()
            .map(|(_, caller)| caller.as_str())
            .filter(|caller| !caller.is_empty())
            .collect::<Vec<_>>()
            .join(CALLER_SEPARATOR);

        let mut record = context.into_map();
        record.insert("sql".to_string(), Value::String(sql));
        record.insert("caller".to_string(), Value::String(caller));
        record
    }

    fn log(&mut self, record: &Record) -> Result<(), SinkError> {
        self.inner.log(record)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.inner.flush()
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqa_common::{CallRecord, EventContext, SYNTHETIC_BEGIN, SYNTHETIC_COMMIT};
    use sqa_redact::{CallerRedactor, RedactorSpec, SqlRedactor};
    use tempfile::TempDir;

    fn sink(dir: &TempDir) -> RedactedSink {
        let caller = CallerRedactor::from_specs(
            &[RedactorSpec {
                pattern: "erb_erb_[0-9]+_[0-9]+".to_string(),
                replacement: String::new(),
                case_insensitive: false,
            }],
            &["ambiguous".to_string()],
            3,
        )
        .unwrap();
        let pipeline = RedactionPipeline::new(SqlRedactor::default(), caller);
        RedactedSink::open(dir.path(), "foo", Arc::new(pipeline)).unwrap()
    }

    fn call(sql: &str, caller: &[&str]) -> CallRecord {
        CallRecord::new(sql, caller.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_single_call_unwrapped() {
        let dir = TempDir::new().unwrap();
        let record = sink(&dir).filter_event(Event::new(
            "foo",
            vec![call("SELECT * FROM foo WHERE id = 1234", &["app.rs:1"])],
            EventContext::new(),
        ));
        assert_eq!(record["sql"], Value::from("SELECT * FROM foo WHERE id = '[REDACTED]'"));
        assert_eq!(record["caller"], Value::from("app.rs:1"));
    }

    #[test]
    fn test_ambiguous_caller() {
        let dir = TempDir::new().unwrap();
        let record = sink(&dir).filter_event(Event::new(
            "foo",
            vec![call("", &["ambiguous", "foo", "bar"])],
            EventContext::new(),
        ));
        assert_eq!(record["caller"], Value::from("ambiguous, foo, bar"));
    }

    #[test]
    fn test_caller_redactors() {
        let dir = TempDir::new().unwrap();
        let record = sink(&dir).filter_event(Event::new(
            "foo",
            vec![call("", &["foo-bar-erb_erb_1_5"])],
            EventContext::new(),
        ));
        assert_eq!(record["caller"], Value::from("foo-bar-"));
    }

    #[test]
    fn test_transaction_flattened_and_deduplicated() {
        let dir = TempDir::new().unwrap();
        let record = sink(&dir).filter_event(Event::new(
            "foo",
            vec![
                CallRecord::synthetic(SYNTHETIC_BEGIN),
                call("SELECT * FROM foo WHERE id = 4321", &["a.rs:1"]),
                call("SELECT * FROM foo WHERE s = 'blah'", &["a.rs:2"]),
                call("SELECT * FROM foo WHERE s = 'bloo'", &["a.rs:2"]),
                CallRecord::synthetic(SYNTHETIC_COMMIT),
            ],
            EventContext::new().with("tag", "checkout"),
        ));

        assert_eq!(
            record["sql"],
            Value::from(
                "BEGIN; SELECT * FROM foo WHERE id = '[REDACTED]'; \
                 SELECT * FROM foo WHERE s = '[REDACTED]'; COMMIT;"
            )
        );
        assert_eq!(record["caller"], Value::from("a.rs:1;; a.rs:2"));
        assert_eq!(record["tag"], Value::from("checkout"));
    }

    #[test]
    fn test_reserved_context_keys_replaced() {
        let dir = TempDir::new().unwrap();
        let record = sink(&dir).filter_event(Event::new(
            "foo",
            vec![call("SELECT * FROM foo WHERE id = 1", &["app.rs:9"])],
            EventContext::new()
                .with("sql", "from context")
                .with("caller", "from context")
                .with("tag", "kept"),
        ));
        assert_eq!(record["sql"], Value::from("SELECT * FROM foo WHERE id = '[REDACTED]'"));
        assert_eq!(record["caller"], Value::from("app.rs:9"));
        assert_eq!(record["tag"], Value::from("kept"));
    }
}
