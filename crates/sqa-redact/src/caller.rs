//! Caller frame selection and redaction.
//!
//! By default only the top-most frame is kept. When that frame matches an
//! "ambiguous tracer" pattern (generic middleware, query builders, template
//! evaluators) the true call site sits further down, so the first
//! `ambiguous_lines` frames are kept instead, joined with `", "`.

use crate::{RedactionError, Redactor, RedactorSpec, Result};
use regex::Regex;

/// Frames captured when the top frame is ambiguous.
pub const DEFAULT_AMBIGUOUS_LINES: usize = 3;

/// Caller rule list plus ambiguous-tracer expansion.
#[derive(Debug, Clone)]
pub struct CallerRedactor {
    rules: Vec<Redactor>,
    ambiguous_tracers: Vec<Regex>,
    ambiguous_lines: usize,
}

impl CallerRedactor {
    /// Build a caller redactor.
    ///
    /// `ambiguous_lines` must be greater than one, otherwise expansion would
    /// never capture more than the default single frame.
    pub fn new(
        rules: Vec<Redactor>,
        ambiguous_tracers: Vec<Regex>,
        ambiguous_lines: usize,
    ) -> Result<Self> {
        if ambiguous_lines <= 1 {
            return Err(RedactionError::InvalidSetting(format!(
                "ambiguous backtrace lines must be > 1, got {}",
                ambiguous_lines
            )));
        }
        Ok(Self {
            rules,
            ambiguous_tracers,
            ambiguous_lines,
        })
    }

    /// Build from declarative rule and tracer patterns.
    pub fn from_specs(
        rules: &[RedactorSpec],
        ambiguous_tracers: &[String],
        ambiguous_lines: usize,
    ) -> Result<Self> {
        let rules = rules
            .iter()
            .map(Redactor::from_spec)
            .collect::<Result<Vec<_>>>()?;
        let tracers = ambiguous_tracers
            .iter()
            .map(|p| Regex::new(p).map_err(|e| RedactionError::pattern(p, e)))
            .collect::<Result<Vec<_>>>()?;
        Self::new(rules, tracers, ambiguous_lines)
    }

    pub fn ambiguous_lines(&self) -> usize {
        self.ambiguous_lines
    }

    /// Whether `frame` hides the real call site.
    pub fn is_ambiguous(&self, frame: &str) -> bool {
        self.ambiguous_tracers.iter().any(|re| re.is_match(frame))
    }

    /// Select the informative frames and redact them into one caller string.
    ///
    /// Returns an empty string when no frames survived filtering.
    pub fn redact(&self, frames: &[String]) -> String {
        let Some(first) = frames.first() else {
            return String::new();
        };

        let mut caller = if self.is_ambiguous(first) {
            let end = self.ambiguous_lines.min(frames.len());
            frames[..end].join(", ")
        } else {
            first.clone()
        };

        for rule in &self.rules {
            caller = rule.apply(&caller);
        }
        caller
    }
}

impl Default for CallerRedactor {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            ambiguous_tracers: Vec::new(),
            ambiguous_lines: DEFAULT_AMBIGUOUS_LINES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_top_frame_only_by_default() {
        let redactor = CallerRedactor::default();
        assert_eq!(redactor.redact(&frames(&["a.rs:1", "b.rs:2"])), "a.rs:1");
    }

    #[test]
    fn test_ambiguous_expands() {
        let redactor =
            CallerRedactor::new(Vec::new(), vec![Regex::new("ambiguous").unwrap()], 3).unwrap();
        assert_eq!(
            redactor.redact(&frames(&["ambiguous", "foo", "bar", "baz"])),
            "ambiguous, foo, bar"
        );
    }

    #[test]
    fn test_ambiguous_shorter_stack() {
        let redactor =
            CallerRedactor::new(Vec::new(), vec![Regex::new("^mw").unwrap()], 5).unwrap();
        assert_eq!(redactor.redact(&frames(&["mw.rs:9", "app.rs:3"])), "mw.rs:9, app.rs:3");
    }

    #[test]
    fn test_frame_rules_apply() {
        let rule = Redactor::new("erb_erb_[0-9]+_[0-9]+", "").unwrap();
        let redactor = CallerRedactor::new(vec![rule], Vec::new(), 3).unwrap();
        assert_eq!(redactor.redact(&frames(&["foo-bar-erb_erb_1_5"])), "foo-bar-");
    }

    #[test]
    fn test_empty_frames() {
        assert_eq!(CallerRedactor::default().redact(&[]), "");
    }

    #[test]
    fn test_lines_must_exceed_one() {
        assert!(CallerRedactor::new(Vec::new(), Vec::new(), 1).is_err());
        assert!(CallerRedactor::new(Vec::new(), Vec::new(), 0).is_err());
    }

    #[test]
    fn test_from_specs_rejects_bad_tracer() {
        let err = CallerRedactor::from_specs(&[], &["(".to_string()], 3).unwrap_err();
        assert!(matches!(err, RedactionError::PatternError { .. }));
    }
}
