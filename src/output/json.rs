//! JSON output formatter

use super::OutputFormatter;
use crate::diagnostic::{Diagnostic, DuplicateIdGroup, DuplicateLinkGroup, Verdict};
use crate::engine::{CheckResult, FeedReport};
use serde::Serialize;
use std::collections::BTreeMap;

/// JSON formatter for machine-readable output
#[derive(Default)]
pub struct JsonFormatter {
    /// Pretty print with indentation
    pub pretty: bool,

    /// Include every extracted item record
    pub include_items: bool,
}

impl JsonFormatter {
    /// Create a new JSON formatter
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable pretty printing
    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }

    pub fn with_items(mut self) -> Self {
        self.include_items = true;
        self
    }

    fn render<T: Serialize>(&self, value: &T) -> String {
        if self.pretty {
            serde_json::to_string_pretty(value).unwrap_or_default()
        } else {
            serde_json::to_string(value).unwrap_or_default()
        }
    }

    fn report<'a>(&self, report: &'a FeedReport) -> JsonReport<'a> {
        let analysis = report.analysis.as_ref();
        JsonReport {
            file: report.file.display().to_string(),
            spec: analysis.map(|a| a.spec_name()),
            detection: analysis.map(|a| serde_json::to_value(&a.detection).unwrap_or_default()),
            total_items: analysis.map_or(0, |a| a.total_items),
            analyzed_items: analysis.map_or(0, |a| a.items.len()),
            verdicts: &report.verdicts,
            issues: analysis
                .map(|a| {
                    a.issues
                        .iter()
                        .map(|(kind, indices)| (kind.rule_id(), indices.as_slice()))
                        .collect()
                })
                .unwrap_or_default(),
            price_notes: analysis.map(|a| &a.price_notes),
            duplicate_ids: &report.duplicate_ids,
            duplicate_links: &report.duplicate_links,
            diagnostics: &report.diagnostics,
            items: if self.include_items {
                analysis.map(|a| serde_json::to_value(&a.items).unwrap_or_default())
            } else {
                None
            },
            duration_ms: report.duration.as_millis(),
        }
    }
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    reports: Vec<JsonReport<'a>>,
    summary: JsonSummary,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    file: String,
    spec: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detection: Option<serde_json::Value>,
    total_items: usize,
    analyzed_items: usize,
    verdicts: &'a [Verdict],
    issues: BTreeMap<&'static str, &'a [usize]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    price_notes: Option<&'a BTreeMap<usize, String>>,
    duplicate_ids: &'a [DuplicateIdGroup],
    duplicate_links: &'a [DuplicateLinkGroup],
    diagnostics: &'a [Diagnostic],
    #[serde(skip_serializing_if = "Option::is_none")]
    items: Option<serde_json::Value>,
    duration_ms: u128,
}

#[derive(Serialize)]
struct JsonSummary {
    files_processed: usize,
    files_with_errors: usize,
    files_with_warnings: usize,
    error_count: usize,
    warning_count: usize,
    duration_ms: u128,
}

impl OutputFormatter for JsonFormatter {
    fn format(&self, result: &CheckResult) -> String {
        let output = JsonOutput {
            reports: result.reports.iter().map(|r| self.report(r)).collect(),
            summary: JsonSummary {
                files_processed: result.files_processed,
                files_with_errors: result.files_with_errors,
                files_with_warnings: result.files_with_warnings,
                error_count: result.error_count,
                warning_count: result.warning_count,
                duration_ms: result.duration.as_millis(),
            },
        };
        self.render(&output)
    }

    fn format_report(&self, report: &FeedReport) -> String {
        self.render(&self.report(report))
    }

    fn format_diagnostic(&self, diagnostic: &Diagnostic) -> String {
        self.render(diagnostic)
    }
}
