//! SQL analyzer common types.
//!
//! This crate provides the data model shared by the capture path, the
//! background writer, the log sinks and the offline aggregator:
//! - Captured calls and the events built from them
//! - Opaque per-call context forwarded unchanged into events
//! - Content hashes used to deduplicate event definitions

pub mod event;
pub mod id;

pub use event::{
    CallRecord, Event, EventContext, SYNTHETIC_BEGIN, SYNTHETIC_COMMIT, SYNTHETIC_ROLLBACK,
};
pub use id::ContentHash;
