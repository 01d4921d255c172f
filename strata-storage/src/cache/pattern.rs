//! Glob-like key patterns.
//!
//! `*` becomes `.*` and the result is anchored at both ends. Every other
//! character is handed to the regex engine unchanged, so `.`, `+`, `?` and
//! friends keep their regex meaning: `user.1` also matches `userX1`.

use regex::Regex;
use strata_core::PatternError;

/// A compiled key pattern.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    source: String,
    regex: Regex,
}

impl KeyPattern {
    /// Compile a pattern. Fails if the translated expression is not a valid regex.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let expr = format!("^{}$", pattern.replace('*', ".*"));
        let regex = Regex::new(&expr).map_err(|e| PatternError::Invalid {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Compile an optional pattern; `None` matches everything.
    pub fn compile_optional(pattern: Option<&str>) -> Result<Option<Self>, PatternError> {
        pattern.map(Self::compile).transpose()
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}
