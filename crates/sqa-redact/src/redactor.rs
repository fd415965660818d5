//! A single find/replace rule.

use crate::{RedactionError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Declarative form of a rule, as read from configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactorSpec {
    /// Regex pattern to search for.
    pub pattern: String,

    /// Replacement text; `$1`/`${name}` refer to capture groups.
    #[serde(default)]
    pub replacement: String,

    /// Match case-insensitively.
    #[serde(default)]
    pub case_insensitive: bool,
}

/// Compiled find/replace rule applied to every match in a value.
#[derive(Debug, Clone)]
pub struct Redactor {
    search: Regex,
    replace: String,
}

impl Redactor {
    /// Compile a rule from a pattern and replacement.
    pub fn new(pattern: &str, replace: impl Into<String>) -> Result<Self> {
        let search = Regex::new(pattern).map_err(|e| RedactionError::pattern(pattern, e))?;
        Ok(Self::from_regex(search, replace))
    }

    /// Wrap an already compiled regex.
    pub fn from_regex(search: Regex, replace: impl Into<String>) -> Self {
        Self {
            search,
            replace: replace.into(),
        }
    }

    /// Compile a rule from its declarative form.
    pub fn from_spec(spec: &RedactorSpec) -> Result<Self> {
        if spec.case_insensitive {
            Self::new(&format!("(?i){}", spec.pattern), spec.replacement.clone())
        } else {
            Self::new(&spec.pattern, spec.replacement.clone())
        }
    }

    pub fn search(&self) -> &Regex {
        &self.search
    }

    pub fn replacement(&self) -> &str {
        &self.replace
    }

    /// Replace every match in `value`.
    pub fn apply(&self, value: &str) -> String {
        self.search.replace_all(value, self.replace.as_str()).into_owned()
    }
}
