//! Per-connection capture state machine.
//!
//! The host integration owns one [`ConnectionCapture`] per database
//! connection and calls the [`QueryObserver`] hooks around every statement
//! and transaction boundary. Nothing here performs I/O: matched events are
//! handed to the background writer.
//!
//! Outside a transaction each statement is sampled and matched on its own.
//! Inside a transaction every statement is buffered; sampling is decided once
//! at the outermost `begin`, and what to keep is decided at the outermost
//! `commit`/`rollback`.
//!
//! Delivery is at-most-once: statements buffered in a transaction that never
//! ends (process exit, connection dropped mid-transaction) are discarded.

use std::sync::Arc;

use sqa_common::{
    CallRecord, Event, EventContext, SYNTHETIC_BEGIN, SYNTHETIC_COMMIT, SYNTHETIC_ROLLBACK,
};
use sqa_redact::repair_utf8;

use crate::analyzer::{is_mutating, is_select};
use crate::SqlAnalyzer;

/// What `on_execute` did with a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureDecision {
    /// Not sampled or not matched by any analyzer.
    Skipped,
    /// Appended to the open transaction buffer.
    Buffered,
    /// Queued as a single-call event for this many analyzers.
    Enqueued(usize),
}

/// Hooks a database client integration calls.
pub trait QueryObserver {
    fn on_execute(
        &mut self,
        sql: &[u8],
        caller: Vec<String>,
        context: &EventContext,
    ) -> CaptureDecision;

    fn on_begin_transaction(&mut self);

    /// Returns the number of events queued by this call.
    fn on_commit(&mut self) -> usize;

    /// Returns the number of events queued by this call.
    fn on_rollback(&mut self) -> usize;
}

/// Calls issued inside the outermost open transaction.
#[derive(Debug)]
struct TransactionBuffer {
    calls: Vec<CallRecord>,
    /// Sampling decision per analyzer, in registration order.
    sampled: Vec<bool>,
    context: Option<EventContext>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    InTransaction { depth: usize },
}

pub struct ConnectionCapture {
    analyzer: Arc<SqlAnalyzer>,
    depth: usize,
    buffer: Option<TransactionBuffer>,
}

impl ConnectionCapture {
    pub fn new(analyzer: Arc<SqlAnalyzer>) -> Self {
        Self {
            analyzer,
            depth: 0,
            buffer: None,
        }
    }

    pub fn state(&self) -> TransactionState {
        if self.buffer.is_some() {
            TransactionState::InTransaction { depth: self.depth }
        } else {
            TransactionState::Idle
        }
    }

    /// Number of statements buffered in the open transaction.
    pub fn buffered(&self) -> usize {
        self.buffer.as_ref().map_or(0, |b| b.calls.len())
    }

    fn execute_idle(
        &self,
        sql: &[u8],
        caller: Vec<String>,
        context: &EventContext,
    ) -> CaptureDecision {
        let config = self.analyzer.config();
        let mut text: Option<String> = None;
        let mut enqueued = 0;

        for analyzer in config.analyzers() {
            if !config.should_log_sample(analyzer.name()) {
                continue;
            }
            let sql = text.get_or_insert_with(|| repair_utf8(sql).into_owned());
            if !analyzer.matches(sql) {
                continue;
            }
            self.analyzer.writer().enqueue(Event::new(
                analyzer.name(),
                vec![CallRecord::new(sql.clone(), caller.clone())],
                context.clone(),
            ));
            enqueued += 1;
        }

        if enqueued == 0 {
            CaptureDecision::Skipped
        } else {
            CaptureDecision::Enqueued(enqueued)
        }
    }

    fn end_transaction(&mut self, marker: &str) -> usize {
        if self.depth == 0 {
            tracing::debug!(marker, "transaction end without begin ignored");
            return 0;
        }
        self.depth -= 1;
        if self.depth > 0 {
            return 0;
        }
        match self.buffer.take() {
            Some(buffer) => self.flush(buffer, marker),
            None => 0,
        }
    }

    fn flush(&self, buffer: TransactionBuffer, marker: &str) -> usize {
        let config = self.analyzer.config();
        if !buffer.sampled.iter().any(|s| *s) {
            return 0;
        }

        let calls = collapse_repeated_selects(buffer.calls);
        let context = buffer.context.unwrap_or_default();
        let mut enqueued = 0;

        for (analyzer, sampled) in config.analyzers().iter().zip(&buffer.sampled) {
            if !sampled {
                continue;
            }
            let selected: Vec<&CallRecord> = calls
                .iter()
                .filter(|call| analyzer.matches(&call.sql) || is_mutating(&call.sql))
                .collect();
            if selected.is_empty() {
                continue;
            }

            let mut event_calls = Vec::with_capacity(selected.len() + 2);
            event_calls.push(CallRecord::synthetic(SYNTHETIC_BEGIN));
            event_calls.extend(selected.into_iter().cloned());
            event_calls.push(CallRecord::synthetic(marker));

            self.analyzer
                .writer()
                .enqueue(Event::new(analyzer.name(), event_calls, context.clone()));
            enqueued += 1;
        }

        enqueued
    }
}

impl QueryObserver for ConnectionCapture {
    fn on_execute(
        &mut self,
        sql: &[u8],
        caller: Vec<String>,
        context: &EventContext,
    ) -> CaptureDecision {
        match self.buffer.as_mut() {
            Some(buffer) => {
                buffer
                    .calls
                    .push(CallRecord::new(repair_utf8(sql).into_owned(), caller));
                if buffer.context.is_none() {
                    buffer.context = Some(context.clone());
                }
                CaptureDecision::Buffered
            }
            None => self.execute_idle(sql, caller, context),
        }
    }

    fn on_begin_transaction(&mut self) {
        let config = self.analyzer.config();
        if !config.consolidate_transactions() {
            return;
        }
        self.depth += 1;
        if self.depth == 1 {
            self.buffer = Some(TransactionBuffer {
                calls: Vec::new(),
                sampled: config
                    .analyzers()
                    .iter()
                    .map(|a| config.should_log_sample(a.name()))
                    .collect(),
                context: None,
            });
        }
    }

    fn on_commit(&mut self) -> usize {
        self.end_transaction(SYNTHETIC_COMMIT)
    }

    fn on_rollback(&mut self) -> usize {
        self.end_transaction(SYNTHETIC_ROLLBACK)
    }
}

/// Drop a `SELECT` that repeats the statement right before it verbatim.
fn collapse_repeated_selects(calls: Vec<CallRecord>) -> Vec<CallRecord> {
    let mut out: Vec<CallRecord> = Vec::with_capacity(calls.len());
    for call in calls {
        let repeated = out
            .last()
            .is_some_and(|prev| prev.sql == call.sql && is_select(&call.sql));
        if !repeated {
            out.push(call);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::AnalyzerSpec;
    use crate::config::Configuration;
    use sqa_telemetry::SinkKind;
    use std::time::Duration;
    use tempfile::TempDir;

    fn install(dir: &TempDir, consolidate: bool) -> Arc<SqlAnalyzer> {
        let config = Configuration::builder()
            .logger_root_path(dir.path())
            .log_sample(|_| true)
            .consolidate_transactions(consolidate)
            .backtrace_filter(|frames| frames)
            .add_analyzer(
                AnalyzerSpec::new("watched", ["matching_table"]).with_sink(SinkKind::Json),
            )
            .build()
            .unwrap();
        SqlAnalyzer::install(config)
    }

    fn frames() -> Vec<String> {
        vec!["app.rs:1".to_string()]
    }

    fn lines(dir: &TempDir, analyzer: &Arc<SqlAnalyzer>) -> Vec<serde_json::Value> {
        assert!(analyzer.writer().wait_for_drain(Duration::from_secs(5)));
        std::fs::read_to_string(dir.path().join("watched.log"))
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_idle_statement_matched_and_skipped() {
        let dir = TempDir::new().unwrap();
        let analyzer = install(&dir, true);
        let mut conn = analyzer.connection();
        let ctx = EventContext::new();

        assert_eq!(
            conn.on_execute(b"SELECT * FROM matching_table", frames(), &ctx),
            CaptureDecision::Enqueued(1)
        );
        assert_eq!(
            conn.on_execute(b"SELECT * FROM other", frames(), &ctx),
            CaptureDecision::Skipped
        );
        assert_eq!(lines(&dir, &analyzer).len(), 1);
    }

    #[test]
    fn test_nested_transactions_share_buffer() {
        let dir = TempDir::new().unwrap();
        let analyzer = install(&dir, true);
        let mut conn = analyzer.connection();
        let ctx = EventContext::new();

        conn.on_begin_transaction();
        conn.on_execute(b"SELECT * FROM matching_table WHERE id = 1", frames(), &ctx);
        conn.on_begin_transaction();
        assert_eq!(conn.state(), TransactionState::InTransaction { depth: 2 });
        assert_eq!(
            conn.on_execute(b"SELECT * FROM matching_table WHERE id = 2", frames(), &ctx),
            CaptureDecision::Buffered
        );
        assert_eq!(conn.on_commit(), 0);
        assert_eq!(conn.buffered(), 2);
        assert_eq!(conn.on_commit(), 1);
        assert_eq!(conn.state(), TransactionState::Idle);

        let records = lines(&dir, &analyzer);
        assert_eq!(records.len(), 1);
        let sqls: Vec<&str> = records[0]["calls"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["sql"].as_str().unwrap())
            .collect();
        assert_eq!(
            sqls,
            vec![
                "BEGIN",
                "SELECT * FROM matching_table WHERE id = 1",
                "SELECT * FROM matching_table WHERE id = 2",
                "COMMIT",
            ]
        );
    }

    #[test]
    fn test_rollback_marker() {
        let dir = TempDir::new().unwrap();
        let analyzer = install(&dir, true);
        let mut conn = analyzer.connection();

        conn.on_begin_transaction();
        conn.on_execute(b"UPDATE matching_table SET a = 1", frames(), &EventContext::new());
        assert_eq!(conn.on_rollback(), 1);

        let records = lines(&dir, &analyzer);
        assert_eq!(records[0]["calls"][2]["sql"], "ROLLBACK");
        assert_eq!(records[0]["calls"][2]["caller"], serde_json::json!([]));
    }

    #[test]
    fn test_unmatched_transaction_dropped() {
        let dir = TempDir::new().unwrap();
        let analyzer = install(&dir, true);
        let mut conn = analyzer.connection();

        conn.on_begin_transaction();
        conn.on_execute(b"SELECT * FROM other", frames(), &EventContext::new());
        assert_eq!(conn.on_commit(), 0);
        assert!(lines(&dir, &analyzer).is_empty());
    }

    #[test]
    fn test_repeated_selects_collapsed() {
        let dir = TempDir::new().unwrap();
        let analyzer = install(&dir, true);
        let mut conn = analyzer.connection();
        let ctx = EventContext::new();

        conn.on_begin_transaction();
        for _ in 0..3 {
            conn.on_execute(b"SELECT * FROM matching_table WHERE id = 7", frames(), &ctx);
        }
        conn.on_execute(b"INSERT INTO matching_table (a) VALUES (1)", frames(), &ctx);
        conn.on_execute(b"INSERT INTO matching_table (a) VALUES (1)", frames(), &ctx);
        conn.on_commit();

        let records = lines(&dir, &analyzer);
        // BEGIN, one SELECT, both INSERTs, COMMIT
        assert_eq!(records[0]["calls"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn test_context_from_first_statement() {
        let dir = TempDir::new().unwrap();
        let analyzer = install(&dir, true);
        let mut conn = analyzer.connection();

        conn.on_begin_transaction();
        conn.on_execute(
            b"SELECT * FROM matching_table",
            frames(),
            &EventContext::new().with("tag", "first"),
        );
        conn.on_execute(
            b"SELECT * FROM matching_table WHERE id = 1",
            frames(),
            &EventContext::new().with("tag", "second"),
        );
        conn.on_commit();

        assert_eq!(lines(&dir, &analyzer)[0]["tag"], "first");
    }

    #[test]
    fn test_consolidation_disabled() {
        let dir = TempDir::new().unwrap();
        let analyzer = install(&dir, false);
        let mut conn = analyzer.connection();
        let ctx = EventContext::new();

        conn.on_begin_transaction();
        assert_eq!(conn.state(), TransactionState::Idle);
        assert_eq!(
            conn.on_execute(b"SELECT * FROM matching_table", frames(), &ctx),
            CaptureDecision::Enqueued(1)
        );
        assert_eq!(conn.on_commit(), 0);
        assert_eq!(lines(&dir, &analyzer).len(), 1);
    }

    #[test]
    fn test_unbalanced_commit_ignored() {
        let dir = TempDir::new().unwrap();
        let analyzer = install(&dir, true);
        let mut conn = analyzer.connection();
        assert_eq!(conn.on_commit(), 0);
        assert_eq!(conn.on_rollback(), 0);
        assert_eq!(conn.state(), TransactionState::Idle);
    }

    #[test]
    fn test_invalid_bytes_repaired() {
        let dir = TempDir::new().unwrap();
        let analyzer = install(&dir, true);
        let mut conn = analyzer.connection();

        let decision = conn.on_execute(
            b"SELECT * FROM matching_table WHERE name = '\xff\xfe'",
            frames(),
            &EventContext::new(),
        );
        assert_eq!(decision, CaptureDecision::Enqueued(1));
        let records = lines(&dir, &analyzer);
        assert!(records[0]["calls"][0]["sql"]
            .as_str()
            .unwrap()
            .contains('\u{FFFD}'));
    }

    #[test]
    fn test_collapse_only_adjacent_selects() {
        let calls = vec![
            CallRecord::new("SELECT 1", Vec::new()),
            CallRecord::new("SELECT 1", Vec::new()),
            CallRecord::new("SELECT 2", Vec::new()),
            CallRecord::new("SELECT 1", Vec::new()),
            CallRecord::new("DELETE FROM t", Vec::new()),
            CallRecord::new("DELETE FROM t", Vec::new()),
        ];
        let sqls: Vec<String> = collapse_repeated_selects(calls)
            .into_iter()
            .map(|c| c.sql)
            .collect();
        assert_eq!(
            sqls,
            vec!["SELECT 1", "SELECT 2", "SELECT 1", "DELETE FROM t", "DELETE FROM t"]
        );
    }
}
