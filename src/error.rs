//! Error types for feed processing
//!
//! Only structural failures live here. Data-quality problems found inside a
//! well-formed feed (missing fields, bad prices, duplicates) are never errors;
//! they are recorded as issues on the [`AnalysisResult`](crate::AnalysisResult).

use crate::selector::SelectorError;
use thiserror::Error;

/// Error raised while loading, parsing or emitting a feed
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("XML parse error at line {line}, column {column}: {message}")]
    Parse {
        line: u32,
        column: u32,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid selector: {0}")]
    Selector(#[from] SelectorError),

    #[error("Unknown feed format: {0}")]
    UnknownSpec(String),

    #[error("Failed to write output XML: {0}")]
    Emit(String),
}

impl FeedError {
    /// Check if this error is a well-formedness failure of the input XML
    pub fn is_parse_error(&self) -> bool {
        matches!(self, FeedError::Parse { .. })
    }
}

impl From<roxmltree::Error> for FeedError {
    fn from(err: roxmltree::Error) -> Self {
        let pos = err.pos();
        FeedError::Parse {
            line: pos.row,
            column: pos.col,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = FeedError::Parse {
            line: 3,
            column: 7,
            message: "unexpected end of stream".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "XML parse error at line 3, column 7: unexpected end of stream"
        );
        assert!(err.is_parse_error());
    }

    #[test]
    fn test_from_roxmltree_error() {
        let err: FeedError = roxmltree::Document::parse("<a><b></a>").unwrap_err().into();
        match err {
            FeedError::Parse { line, .. } => assert_eq!(line, 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_spec_display() {
        let err = FeedError::UnknownSpec("Nope".to_string());
        assert_eq!(err.to_string(), "Unknown feed format: Nope");
        assert!(!err.is_parse_error());
    }
}
