//! Structured logging for the analyzer and the aggregation CLI.
//!
//! All diagnostics go to stderr, either human-readable or as JSON lines.
//! Captured query records never pass through this layer; they go to the
//! analyzers' sinks.

pub mod config;

pub use config::{LogConfig, LogFormat, LogLevel};

use std::io::IsTerminal;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global subscriber.
///
/// The filter comes from the resolved `config` only; `RUST_LOG` has
/// already been folded into it with lower precedence than `SQA_LOG` and
/// the CLI flags.
///
/// Returns `false` when a subscriber was already installed (the host
/// application owns logging in that case).
pub fn init_logging(config: &LogConfig) -> bool {
    let filter = EnvFilter::new(config.filter_directive());

    match config.format {
        LogFormat::Human => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(std::io::stderr().is_terminal());

            if config.timestamps {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer)
                    .try_init()
                    .is_ok()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer.without_time())
                    .try_init()
                    .is_ok()
            }
        }
        LogFormat::Jsonl => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(false),
            )
            .try_init()
            .is_ok(),
    }
}
