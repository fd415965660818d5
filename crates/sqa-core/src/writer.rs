//! Single-consumer background writer.
//!
//! Producers hand finished events to [`BackgroundWriter::enqueue`], which
//! only pushes onto an unbounded channel. One consumer thread drains the
//! channel and performs all sink I/O.
//!
//! The consumer is started lazily on the first enqueue. If it dies (sink
//! error or panic in a user hook) it is restarted by the next enqueue; the
//! channel outlives the thread, so events queued in between are kept.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use sqa_common::{CallRecord, Event};
use sqa_telemetry::SinkError;
use thiserror::Error;

use crate::config::Configuration;

const DRAIN_POLL: Duration = Duration::from_millis(5);

/// Failure while persisting one event. Ends the current consumer.
#[derive(Error, Debug)]
pub enum WriterError {
    #[error("No analyzer named '{0}'")]
    UnknownAnalyzer(String),

    #[error("Sink error for analyzer '{analyzer}': {source}")]
    Sink {
        analyzer: String,
        #[source]
        source: SinkError,
    },

    #[error("Consumer panicked: {0}")]
    Panicked(String),
}

pub struct BackgroundWriter {
    config: Arc<Configuration>,
    tx: Sender<Event>,
    rx: Arc<Mutex<Receiver<Event>>>,
    consumer: RwLock<Option<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
    starts: AtomicUsize,
}

impl BackgroundWriter {
    pub fn new(config: Arc<Configuration>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            config,
            tx,
            rx: Arc::new(Mutex::new(rx)),
            consumer: RwLock::new(None),
            pending: Arc::new(AtomicUsize::new(0)),
            starts: AtomicUsize::new(0),
        }
    }

    /// Queue an event for the consumer. Never blocks on I/O.
    pub fn enqueue(&self, event: Event) {
        self.ensure_consumer();
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(event).is_err() {
            // Receiver is owned by `self`, so this only happens mid-drop.
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Events enqueued but not yet fully processed.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// How many consumer threads have been started so far.
    pub fn consumer_starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn is_consumer_alive(&self) -> bool {
        let guard = self.consumer.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Wait until every enqueued event has been processed.
    ///
    /// Returns `false` if `timeout` elapsed first. A dead consumer is
    /// restarted when work is still pending.
    pub fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.pending() == 0 {
                return true;
            }
            self.ensure_consumer();
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(DRAIN_POLL);
        }
    }

    fn ensure_consumer(&self) {
        if self.is_consumer_alive() {
            return;
        }

        let mut guard = self.consumer.write().unwrap_or_else(PoisonError::into_inner);
        // Another producer may have started it while we waited for the lock.
        if guard.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let config = Arc::clone(&self.config);
        let rx = Arc::clone(&self.rx);
        let pending = Arc::clone(&self.pending);
        let spawned = thread::Builder::new()
            .name("sqa-writer".to_string())
            .spawn(move || consume(&config, &rx, &pending));

        match spawned {
            Ok(handle) => {
                self.starts.fetch_add(1, Ordering::SeqCst);
                *guard = Some(handle);
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to start background writer");
            }
        }
    }
}

impl fmt::Debug for BackgroundWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundWriter")
            .field("pending", &self.pending())
            .field("consumer_alive", &self.is_consumer_alive())
            .field("consumer_starts", &self.consumer_starts())
            .finish_non_exhaustive()
    }
}

fn consume(config: &Configuration, rx: &Mutex<Receiver<Event>>, pending: &AtomicUsize) {
    tracing::info!(
        pid = std::process::id(),
        thread = ?thread::current().id(),
        "starting background query writer"
    );

    loop {
        let event = {
            let rx = rx.lock().unwrap_or_else(PoisonError::into_inner);
            match rx.recv() {
                Ok(event) => event,
                Err(_) => return,
            }
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| process_event(config, event)))
            .unwrap_or_else(|payload| Err(WriterError::Panicked(panic_message(&*payload))));
        pending.fetch_sub(1, Ordering::SeqCst);

        if let Err(err) = result {
            tracing::warn!(error = %err, "background writer failed; consumer stopped");
            return;
        }
    }
}

/// Filter callers, run the secondary SQL hook, then hand off to the sink.
pub(crate) fn process_event(config: &Configuration, event: Event) -> Result<(), WriterError> {
    let analyzer = config
        .analyzer(event.analyzer())
        .ok_or_else(|| WriterError::UnknownAnalyzer(event.analyzer().to_string()))?;

    let event = event.map_calls(|call| CallRecord {
        caller: config.filter_backtrace(call.caller),
        sql: config.complex_sql_redact(call.sql),
    });
    let calls = event.calls().len();

    analyzer
        .with_sink(|sink| {
            let record = sink.filter_event(event);
            sink.log(&record)
        })
        .map_err(|source| WriterError::Sink {
            analyzer: analyzer.name().to_string(),
            source,
        })?;

    tracing::debug!(analyzer = analyzer.name(), calls, "event written");
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::AnalyzerSpec;
    use sqa_common::EventContext;
    use sqa_telemetry::{LogSink, Record, SinkFactory, SinkKind, SinkOptions};
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Collected {
        records: Mutex<Vec<Record>>,
        fail_next: AtomicBool,
    }

    struct CollectingSink(Arc<Collected>);

    impl LogSink for CollectingSink {
        fn log(&mut self, record: &Record) -> Result<(), SinkError> {
            if self.0.fail_next.swap(false, Ordering::SeqCst) {
                return Err(SinkError::Closed("collector".into()));
            }
            self.0.records.lock().unwrap().push(record.clone());
            Ok(())
        }

        fn close(&mut self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    struct Collector(Arc<Collected>);

    impl SinkFactory for Collector {
        fn open(&self, _: &SinkOptions) -> Result<Box<dyn LogSink>, SinkError> {
            Ok(Box::new(CollectingSink(Arc::clone(&self.0))))
        }
    }

    fn setup(dir: &TempDir) -> (Arc<Configuration>, Arc<Collected>) {
        let collected = Arc::new(Collected::default());
        let config = Configuration::builder()
            .logger_root_path(dir.path())
            .backtrace_filter(|frames| frames.into_iter().filter(|f| !f.contains("deps")).collect())
            .complex_sql_redactor(|sql| sql.replace("secret", "xxx"))
            .add_analyzer(
                AnalyzerSpec::new("users", ["users"])
                    .with_sink(SinkKind::Custom(Arc::new(Collector(Arc::clone(&collected))))),
            )
            .build()
            .unwrap();
        (Arc::new(config), collected)
    }

    fn event(sql: &str) -> Event {
        Event::new(
            "users",
            vec![CallRecord::new(sql, vec!["deps/pool.rs:1".into(), "app.rs:9".into()])],
            EventContext::new(),
        )
    }

    #[test]
    fn test_consumer_started_lazily() {
        let dir = TempDir::new().unwrap();
        let (config, _) = setup(&dir);
        let writer = BackgroundWriter::new(config);
        assert!(!writer.is_consumer_alive());
        assert_eq!(writer.consumer_starts(), 0);

        writer.enqueue(event("SELECT 1"));
        assert!(writer.wait_for_drain(Duration::from_secs(5)));
        assert_eq!(writer.consumer_starts(), 1);
    }

    #[test]
    fn test_hooks_applied_in_order() {
        let dir = TempDir::new().unwrap();
        let (config, collected) = setup(&dir);
        let writer = BackgroundWriter::new(config);

        writer.enqueue(event("SELECT secret FROM users"));
        writer.enqueue(event("SELECT 2 FROM users"));
        assert!(writer.wait_for_drain(Duration::from_secs(5)));

        let records = collected.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["calls"][0]["sql"], "SELECT xxx FROM users");
        assert_eq!(records[0]["calls"][0]["caller"], serde_json::json!(["app.rs:9"]));
        assert_eq!(records[1]["calls"][0]["sql"], "SELECT 2 FROM users");
    }

    #[test]
    fn test_consumer_respawned_after_failure() {
        let dir = TempDir::new().unwrap();
        let (config, collected) = setup(&dir);
        let writer = BackgroundWriter::new(config);

        collected.fail_next.store(true, Ordering::SeqCst);
        writer.enqueue(event("SELECT 1"));
        // The failing event is consumed; the consumer exits afterwards.
        let deadline = Instant::now() + Duration::from_secs(5);
        while writer.is_consumer_alive() && Instant::now() < deadline {
            thread::sleep(DRAIN_POLL);
        }
        assert!(!writer.is_consumer_alive());

        writer.enqueue(event("SELECT 2"));
        assert!(writer.wait_for_drain(Duration::from_secs(5)));
        assert_eq!(writer.consumer_starts(), 2);

        let records = collected.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["calls"][0]["sql"], "SELECT 2");
    }

    #[test]
    fn test_panicking_hook_is_isolated() {
        let dir = TempDir::new().unwrap();
        let config = Configuration::builder()
            .logger_root_path(dir.path())
            .complex_sql_redactor(|sql| {
                if sql.contains("boom") {
                    panic!("hook failed");
                }
                sql
            })
            .add_analyzer(AnalyzerSpec::new("users", ["users"]).with_sink(SinkKind::Json))
            .build()
            .unwrap();
        let writer = BackgroundWriter::new(Arc::new(config));

        writer.enqueue(event("SELECT boom"));
        assert!(writer.wait_for_drain(Duration::from_secs(5)));
        writer.enqueue(event("SELECT fine"));
        assert!(writer.wait_for_drain(Duration::from_secs(5)));

        let content = std::fs::read_to_string(dir.path().join("users.log")).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("SELECT fine"));
    }

    #[test]
    fn test_unknown_analyzer() {
        let dir = TempDir::new().unwrap();
        let (config, _) = setup(&dir);
        let err = process_event(
            &config,
            Event::new("ghost", Vec::new(), EventContext::new()),
        )
        .unwrap_err();
        assert!(matches!(err, WriterError::UnknownAnalyzer(name) if name == "ghost"));
    }

    #[test]
    fn test_concurrent_producers_single_consumer() {
        let dir = TempDir::new().unwrap();
        let (config, collected) = setup(&dir);
        let writer = Arc::new(BackgroundWriter::new(config));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let writer = Arc::clone(&writer);
                thread::spawn(move || {
                    for j in 0..25 {
                        writer.enqueue(event(&format!("SELECT {} FROM users -- {}", j, i)));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert!(writer.wait_for_drain(Duration::from_secs(10)));
        assert_eq!(writer.consumer_starts(), 1);
        let records = collected.records.lock().unwrap();
        assert_eq!(records.len(), 200);

        // Per-producer order is preserved.
        for i in 0..8 {
            let suffix = format!("-- {}", i);
            let seq: Vec<String> = records
                .iter()
                .filter_map(|r| r["calls"][0]["sql"].as_str())
                .filter(|sql| sql.ends_with(&suffix))
                .map(str::to_string)
                .collect();
            let expected: Vec<String> = (0..25)
                .map(|j| format!("SELECT {} FROM users {}", j, suffix))
                .collect();
            assert_eq!(seq, expected);
        }
    }
}
