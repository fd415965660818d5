//! sqa-aggregate - merge SQL analyzer shards into daily usage reports.
//!
//! Reads `<topic>_definitions.log*` and `<topic>.log*` shards from
//! `--log-dir` and writes `<topic>_<YYYY-MM-DD>.log` reports to
//! `--dest-dir`. Reports are listed on stdout; diagnostics go to stderr.

use std::path::PathBuf;

use clap::Parser;
use sqa_core::aggregate::{aggregate_dir, DEFAULT_CONCURRENCY};
use sqa_core::exit_codes::ExitCode;
use sqa_core::logging::{init_logging, LogConfig, LogFormat, LogLevel};

/// Merge SQL analyzer shards into per-topic usage reports
#[derive(Parser, Debug)]
#[command(name = "sqa-aggregate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory containing definition and usage shards
    #[arg(long, value_name = "DIR", value_parser = existing_dir)]
    log_dir: PathBuf,

    /// Directory receiving the merged reports
    #[arg(long, value_name = "DIR", value_parser = existing_dir)]
    dest_dir: PathBuf,

    /// Number of shard workers
    #[arg(
        short = 'c',
        long,
        value_name = "N",
        default_value_t = DEFAULT_CONCURRENCY as u64,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    concurrency: u64,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    /// Log format (human, jsonl)
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Only log errors
    #[arg(short, long, conflicts_with = "log_level")]
    quiet: bool,
}

fn existing_dir(s: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if path.is_dir() {
        Ok(path)
    } else {
        Err(format!("directory does not exist: {}", s))
    }
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let level = if cli.quiet {
        Some(LogLevel::Error)
    } else {
        cli.log_level
    };
    init_logging(&LogConfig::from_env(level, cli.log_format));

    let concurrency = usize::try_from(cli.concurrency).unwrap_or(usize::MAX);
    let today = chrono::Local::now().date_naive();

    match aggregate_dir(&cli.log_dir, &cli.dest_dir, concurrency, today) {
        Ok(summary) => {
            for report in &summary.reports {
                println!(
                    "Wrote '{}' ({} queries)",
                    report.path.display(),
                    report.queries
                );
            }
            if summary.orphan_records > 0 {
                tracing::warn!(
                    orphans = summary.orphan_records,
                    "skipped usage records without a definition"
                );
            }
            tracing::info!(
                definition_shards = summary.definition_shards,
                usage_shards = summary.usage_shards,
                usage_records = summary.usage_records,
                "aggregation complete"
            );
            ExitCode::Clean.into()
        }
        Err(err) => {
            let code = ExitCode::from(&err);
            eprintln!("error: {}", err);
            tracing::debug!(code = %code, "aggregation failed");
            code.into()
        }
    }
}
