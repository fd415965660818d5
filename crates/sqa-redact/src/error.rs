//! Error types for the redaction rules.

use thiserror::Error;

/// Result type for redaction operations.
pub type Result<T> = std::result::Result<T, RedactionError>;

/// Errors raised while building redaction rules.
///
/// Applying rules never fails; only configuration does.
#[derive(Error, Debug)]
pub enum RedactionError {
    /// Failed to compile a regex pattern.
    #[error("pattern error in '{pattern}': {source}")]
    PatternError {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A rule setting is out of range.
    #[error("invalid redaction setting: {0}")]
    InvalidSetting(String),
}

impl RedactionError {
    pub(crate) fn pattern(pattern: &str, source: regex::Error) -> Self {
        RedactionError::PatternError {
            pattern: pattern.to_string(),
            source,
        }
    }
}
