//! Output formatters for check results

mod json;
mod text;

pub use json::JsonFormatter;
pub use text::TextFormatter;

use crate::diagnostic::Diagnostic;
use crate::engine::{CheckResult, FeedReport};

/// Output formatter trait
pub trait OutputFormatter: Send + Sync {
    /// Format the entire check result
    fn format(&self, result: &CheckResult) -> String;

    /// Format one feed's report
    fn format_report(&self, report: &FeedReport) -> String;

    /// Format a single diagnostic
    fn format_diagnostic(&self, diagnostic: &Diagnostic) -> String;
}
