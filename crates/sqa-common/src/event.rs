//! Captured calls and events.
//!
//! An [`Event`] is built once per flush on the capture path and handed to the
//! background writer. It is never mutated afterwards; the writer derives a new
//! event through [`Event::map_calls`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// SQL text of the synthetic call opening a consolidated transaction.
pub const SYNTHETIC_BEGIN: &str = "BEGIN";
/// SQL text of the synthetic call closing a committed transaction.
pub const SYNTHETIC_COMMIT: &str = "COMMIT";
/// SQL text of the synthetic call closing a rolled back transaction.
pub const SYNTHETIC_ROLLBACK: &str = "ROLLBACK";

/// One executed statement and the call stack that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallRecord {
    pub sql: String,
    /// Caller frames, innermost first.
    pub caller: Vec<String>,
}

impl CallRecord {
    pub fn new(sql: impl Into<String>, caller: Vec<String>) -> Self {
        Self {
            sql: sql.into(),
            caller,
        }
    }

    /// A call with no caller frames, used for `BEGIN`/`COMMIT`/`ROLLBACK` markers.
    pub fn synthetic(sql: &str) -> Self {
        Self::new(sql, Vec::new())
    }
}

/// Opaque per-call metadata (request path, tag, ...).
///
/// The capture path never inspects it; it is forwarded into the event and
/// flattened into the serialized definition next to `sql` and `caller`.
///
/// The keys `sql`, `caller` and `calls` are reserved: sinks write their own
/// fields under those names, replacing a context value with the same key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventContext(Map<String, Value>);

impl EventContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field. Values that fail to serialize are dropped.
    pub fn with(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.0.insert(key.into(), v);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for EventContext {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Ordered calls destined for one analyzer's sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    analyzer: String,
    calls: Vec<CallRecord>,
    context: EventContext,
}

impl Event {
    pub fn new(analyzer: impl Into<String>, calls: Vec<CallRecord>, context: EventContext) -> Self {
        Self {
            analyzer: analyzer.into(),
            calls,
            context,
        }
    }

    /// Name of the analyzer whose sink receives this event.
    pub fn analyzer(&self) -> &str {
        &self.analyzer
    }

    pub fn calls(&self) -> &[CallRecord] {
        &self.calls
    }

    pub fn context(&self) -> &EventContext {
        &self.context
    }

    /// Build a new event with every call transformed by `f`, preserving order.
    pub fn map_calls<F>(self, f: F) -> Event
    where
        F: FnMut(CallRecord) -> CallRecord,
    {
        Event {
            analyzer: self.analyzer,
            calls: self.calls.into_iter().map(f).collect(),
            context: self.context,
        }
    }

    pub fn into_parts(self) -> (String, Vec<CallRecord>, EventContext) {
        (self.analyzer, self.calls, self.context)
    }
}
