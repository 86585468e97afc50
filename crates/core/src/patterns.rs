//! Glob patterns for remote file selection and target assignment.
//!
//! Patterns support `*` (any run of characters) and `?` (one character) and
//! must match the whole file name. Matching is case-sensitive.

use regex::Regex;

use crate::error::SyncError;

/// A compiled file-name glob.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    raw: String,
    regex: Regex,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self, SyncError> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return Err(SyncError::Configuration(
                "File pattern must not be empty".to_string(),
            ));
        }

        let mut expr = String::with_capacity(trimmed.len() + 8);
        expr.push('^');
        for ch in trimmed.chars() {
            match ch {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| {
            SyncError::Configuration(format!("Invalid file pattern '{trimmed}': {e}"))
        })?;

        Ok(Self {
            raw: trimmed.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, filename: &str) -> bool {
        self.regex.is_match(filename)
    }
}

/// Compile a list of raw patterns, failing on the first invalid one.
pub fn compile_all(patterns: &[String]) -> Result<Vec<GlobPattern>, SyncError> {
    patterns.iter().map(|p| GlobPattern::new(p)).collect()
}

/// Return the first pattern in `patterns` that matches `filename`.
pub fn first_match<'a>(patterns: &'a [GlobPattern], filename: &str) -> Option<&'a GlobPattern> {
    patterns.iter().find(|p| p.matches(filename))
}

/// Ordered `(pattern, target)` pairs. The first matching pattern wins; a
/// file matching no pattern belongs to no target.
#[derive(Debug, Clone, Default)]
pub struct TargetMatcher {
    rules: Vec<(GlobPattern, String)>,
}

impl TargetMatcher {
    pub fn new<'a, I>(rules: I) -> Result<Self, SyncError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let rules = rules
            .into_iter()
            .map(|(pattern, target)| Ok((GlobPattern::new(pattern)?, target.to_string())))
            .collect::<Result<Vec<_>, SyncError>>()?;
        Ok(Self { rules })
    }

    /// Target name for `filename`, if any pattern matches.
    pub fn target_for(&self, filename: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|(pattern, _)| pattern.matches(filename))
            .map(|(_, target)| target.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
