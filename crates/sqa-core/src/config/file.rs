//! TOML configuration file.
//!
//! ```toml
//! logger_root_path = "/var/log/sqa"
//! sample_rate = 0.05
//! ambiguous_tracers = ["src/middleware/"]
//!
//! [[analyzers]]
//! name = "users"
//! tables = ["users", "permissions"]
//! sink = "redacted"
//!
//! [[backtrace_redactors]]
//! pattern = "tmpl_[0-9]+"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sqa_redact::{BacktraceFilter, RedactorSpec};
use sqa_telemetry::SinkKind;

use super::{ConfigError, ConfigurationBuilder};
use crate::analyzer::AnalyzerSpec;

/// One `[[analyzers]]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerEntry {
    pub name: String,
    pub tables: Vec<String>,
    /// `json`, `compact` or `redacted` (default).
    #[serde(default)]
    pub sink: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub logger_root_path: Option<PathBuf>,
    pub sample_rate: Option<f64>,
    pub ambiguous_backtrace_lines: Option<usize>,
    pub consolidate_transactions: Option<bool>,
    /// Root for relative caller frames; defaults to the working directory.
    pub app_root: Option<PathBuf>,
    /// Extra library roots whose frames are dropped.
    #[serde(default)]
    pub library_paths: Vec<String>,
    #[serde(default)]
    pub ambiguous_tracers: Vec<String>,
    #[serde(default)]
    pub sql_redactors: Vec<RedactorSpec>,
    #[serde(default)]
    pub backtrace_redactors: Vec<RedactorSpec>,
    #[serde(default)]
    pub analyzers: Vec<AnalyzerEntry>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content, path)
    }

    /// Parse TOML text; `origin` is only used in error messages.
    pub fn parse(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            source: e,
        })
    }

    /// Translate into a builder. Semantic validation happens in `build()`.
    pub fn into_builder(self) -> Result<ConfigurationBuilder, ConfigError> {
        let mut builder = ConfigurationBuilder::new()
            .add_sql_redactors(self.sql_redactors)
            .add_backtrace_redactors(self.backtrace_redactors)
            .add_ambiguous_tracers(self.ambiguous_tracers);

        if let Some(root) = self.logger_root_path {
            builder = builder.logger_root_path(root);
        }
        if let Some(rate) = self.sample_rate {
            builder = builder.sample_rate(rate);
        }
        if let Some(lines) = self.ambiguous_backtrace_lines {
            builder = builder.ambiguous_backtrace_lines(lines);
        }
        if let Some(enabled) = self.consolidate_transactions {
            builder = builder.consolidate_transactions(enabled);
        }

        if self.app_root.is_some() || !self.library_paths.is_empty() {
            let mut filter = match &self.app_root {
                Some(root) => BacktraceFilter::new(root),
                None => BacktraceFilter::for_current_dir(),
            };
            for path in self.library_paths {
                filter.add_library_path(path);
            }
            builder = builder.path_filter(filter);
        }

        for entry in self.analyzers {
            let sink = match entry.sink.as_deref() {
                None => SinkKind::default(),
                Some(name) => SinkKind::parse_str(name).ok_or_else(|| ConfigError::UnknownSink {
                    name: entry.name.clone(),
                    sink: name.to_string(),
                })?,
            };
            builder = builder.add_analyzer(AnalyzerSpec::new(entry.name, entry.tables).with_sink(sink));
        }

        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_full_file() {
        let file = ConfigFile::parse(
            r#"
            logger_root_path = "/tmp"
            sample_rate = 0.5
            ambiguous_backtrace_lines = 4
            consolidate_transactions = false
            ambiguous_tracers = ["middleware"]

            [[analyzers]]
            name = "users"
            tables = ["users", "permissions"]

            [[analyzers]]
            name = "billing"
            tables = ["invoices"]
            sink = "json"

            [[sql_redactors]]
            pattern = "secret_\\w+"
            replacement = "secret_X"
            "#,
            Path::new("inline.toml"),
        )
        .unwrap();

        assert_eq!(file.sample_rate, Some(0.5));
        assert_eq!(file.analyzers.len(), 2);
        assert_eq!(file.analyzers[1].sink.as_deref(), Some("json"));
        assert_eq!(file.sql_redactors[0].replacement, "secret_X");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = ConfigFile::parse("sampel_rate = 1.0", Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { path, .. } if path == Path::new("bad.toml")));
    }

    #[test]
    fn test_unknown_sink_rejected() {
        let file = ConfigFile {
            analyzers: vec![AnalyzerEntry {
                name: "users".into(),
                tables: vec!["users".into()],
                sink: Some("parquet".into()),
            }],
            ..Default::default()
        };
        assert!(matches!(
            file.into_builder(),
            Err(ConfigError::UnknownSink { sink, .. }) if sink == "parquet"
        ));
    }

    #[test]
    fn test_load_and_build() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sqa.toml");
        std::fs::write(
            &path,
            format!(
                "logger_root_path = {:?}\nsample_rate = 1.0\n\n[[analyzers]]\nname = \"users\"\ntables = [\"users\"]\n",
                dir.path().display().to_string()
            ),
        )
        .unwrap();

        let config = ConfigFile::load(&path)
            .unwrap()
            .into_builder()
            .unwrap()
            .build()
            .unwrap();
        assert!(config.should_log_sample("users"));
        assert!(config.analyzer("users").is_some());
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigFile::load(Path::new("/nonexistent/sqa.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/sqa.toml"));
    }

    #[test]
    fn test_invalid_analyzer_name_from_file() {
        let dir = TempDir::new().unwrap();
        let file = ConfigFile {
            logger_root_path: Some(dir.path().to_path_buf()),
            analyzers: vec![AnalyzerEntry {
                name: "bad-name".into(),
                tables: vec!["users".into()],
                sink: None,
            }],
            ..Default::default()
        };
        let err = file.into_builder().unwrap().build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAnalyzerName(_)));
    }
}
