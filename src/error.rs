//! Error taxonomy for card compilation and realm tracking.
//!
//! Three failure classes, per the compiler contract:
//! - usage errors: malformed annotation or template-compilation calls,
//!   always fatal to that single compile, always source-located
//! - missing resources: absent card.json/parent/realm, fatal to the
//!   triggering operation (downgraded to a skip during full realm scans)
//! - internal consistency: cyclic adoption chains, schema-less chains,
//!   missing upstream identities - bugs that must fail loudly

use std::path::PathBuf;
use thiserror::Error;

/// Line/column position inside a parsed module, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    /// Compute line/column from a byte offset into `source`.
    pub fn from_offset(source: &str, offset: u32) -> Self {
        let offset = (offset as usize).min(source.len());
        let before = &source[..offset];
        let line = before.matches('\n').count() as u32 + 1;
        let column = before
            .rsplit_once('\n')
            .map_or(before.len(), |(_, tail)| tail.len()) as u32
            + 1;
        Self { line, column }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Card compiler and tracker errors.
#[derive(Debug, Error)]
pub enum CardError {
    /// Malformed annotation or template-compilation usage. Carries the
    /// position of the offending call so it can be shown directly.
    #[error("{message} at {location}")]
    Usage {
        message: String,
        location: SourceLocation,
    },

    /// A referenced card, file, or realm does not exist.
    #[error("{0}")]
    MissingResource(String),

    /// "Should not happen" states: these indicate a bug, never an
    /// expected runtime condition.
    #[error("internal consistency error: {0}")]
    InternalConsistency(String),

    /// The module source could not be parsed at all.
    #[error("failed to parse `{path}`: {detail}")]
    Parse { path: String, detail: String },

    #[error("IO error on `{0}`")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    #[error("file watcher error")]
    Watch(#[from] notify::Error),
}

impl CardError {
    /// Build a source-located usage error from a byte offset.
    pub fn usage(message: impl Into<String>, source: &str, offset: u32) -> Self {
        Self::Usage {
            message: message.into(),
            location: SourceLocation::from_offset(source, offset),
        }
    }

    pub fn missing(message: impl Into<String>) -> Self {
        Self::MissingResource(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalConsistency(message.into())
    }
}

pub type Result<T> = std::result::Result<T, CardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_from_offset() {
        let src = "line one\nline two\nline three";
        assert_eq!(
            SourceLocation::from_offset(src, 0),
            SourceLocation { line: 1, column: 1 }
        );
        // 'l' of "line two"
        assert_eq!(
            SourceLocation::from_offset(src, 9),
            SourceLocation { line: 2, column: 1 }
        );
        // 't' of "two"
        assert_eq!(
            SourceLocation::from_offset(src, 14),
            SourceLocation { line: 2, column: 6 }
        );
    }

    #[test]
    fn test_location_clamps_past_end() {
        let loc = SourceLocation::from_offset("ab", 99);
        assert_eq!(loc, SourceLocation { line: 1, column: 3 });
    }

    #[test]
    fn test_usage_error_display() {
        let err = CardError::usage("`contains` must be called", "x\nyz", 2);
        let display = format!("{err}");
        assert!(display.contains("must be called"));
        assert!(display.contains("2:1"));
    }
}
