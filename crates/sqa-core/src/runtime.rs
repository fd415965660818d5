//! The installed analyzer: configuration plus its background writer.

use std::sync::Arc;
use std::time::Duration;

use crate::capture::ConnectionCapture;
use crate::config::Configuration;
use crate::writer::BackgroundWriter;

/// Entry point for host integrations.
///
/// ```no_run
/// use sqa_core::{AnalyzerSpec, Configuration, QueryObserver, SqlAnalyzer};
/// use sqa_common::EventContext;
///
/// let config = Configuration::builder()
///     .logger_root_path("/var/log/sqa")
///     .sample_rate(0.01)
///     .add_analyzer(AnalyzerSpec::new("users", ["users"]))
///     .build()?;
/// let analyzer = SqlAnalyzer::install(config);
///
/// let mut conn = analyzer.connection();
/// conn.on_execute(b"SELECT * FROM users WHERE id = 1", vec![], &EventContext::new());
/// # Ok::<(), sqa_core::ConfigError>(())
/// ```
#[derive(Debug)]
pub struct SqlAnalyzer {
    config: Arc<Configuration>,
    writer: BackgroundWriter,
}

impl SqlAnalyzer {
    pub fn install(config: Configuration) -> Arc<Self> {
        let config = Arc::new(config);
        tracing::info!(
            root = %config.logger_root_path().display(),
            analyzers = config.analyzers().len(),
            consolidate = config.consolidate_transactions(),
            "sql analyzer installed"
        );
        Arc::new(Self {
            writer: BackgroundWriter::new(Arc::clone(&config)),
            config,
        })
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn writer(&self) -> &BackgroundWriter {
        &self.writer
    }

    /// Capture state for one database connection.
    pub fn connection(self: &Arc<Self>) -> ConnectionCapture {
        ConnectionCapture::new(Arc::clone(self))
    }

    /// Drain the queue (up to `timeout`) and close every sink.
    ///
    /// Returns whether the queue drained in time. Events enqueued after
    /// shutdown fail in the sink and are dropped.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let drained = self.writer.wait_for_drain(timeout);
        if !drained {
            tracing::warn!(
                pending = self.writer.pending(),
                "shutdown timed out with events still queued"
            );
        }
        for analyzer in self.config.analyzers() {
            if let Err(e) = analyzer.close() {
                tracing::warn!(analyzer = analyzer.name(), error = %e, "failed to close sink");
            }
        }
        drained
    }
}
