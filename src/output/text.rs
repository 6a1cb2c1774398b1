//! Human-readable text output formatter

use super::OutputFormatter;
use crate::analysis::{AnalysisResult, IssueKind};
use crate::diagnostic::{Diagnostic, Severity, VerdictStatus};
use crate::engine::{CheckResult, FeedReport};
use colored::*;

/// Text formatter with optional color support
pub struct TextFormatter {
    /// Enable colored output
    pub colored: bool,

    /// List every diagnostic after the tables
    pub verbose: bool,

    /// Rows shown per issue table
    pub show_limit: usize,

    /// Show statistics
    pub show_stats: bool,
}

impl Default for TextFormatter {
    fn default() -> Self {
        Self {
            colored: true,
            verbose: false,
            show_limit: 20,
            show_stats: true,
        }
    }
}

impl TextFormatter {
    /// Create a new text formatter
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable colors
    pub fn without_color(mut self) -> Self {
        self.colored = false;
        self
    }

    pub fn with_limit(mut self, show_limit: usize) -> Self {
        self.show_limit = show_limit;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn severity_str(&self, severity: Severity) -> ColoredString {
        let s = format!("{}", severity);
        if !self.colored {
            return s.normal();
        }
        match severity {
            Severity::Error => s.red().bold(),
            Severity::Warning => s.yellow().bold(),
            Severity::Info => s.blue(),
        }
    }

    fn status_str(&self, status: VerdictStatus) -> ColoredString {
        let s = match status {
            VerdictStatus::Pass => "PASS",
            VerdictStatus::Warn => "WARN",
            VerdictStatus::Fail => "FAIL",
        };
        if !self.colored {
            return s.normal();
        }
        match status {
            VerdictStatus::Pass => s.green(),
            VerdictStatus::Warn => s.yellow().bold(),
            VerdictStatus::Fail => s.red().bold(),
        }
    }

    fn heading(&self, text: &str) -> String {
        if self.colored {
            text.bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn format_location(&self, diag: &Diagnostic) -> String {
        format!(
            "{}:{}:{}",
            diag.location.file.display(),
            diag.location.line,
            diag.location.column
        )
    }

    fn item_row(&self, analysis: &AnalysisResult, kind: IssueKind, index: usize) -> String {
        let Some(record) = analysis.item(index) else {
            return format!("    #{}\n", index);
        };
        let mut row = format!("    #{:<5} line {:<6}", index, record.line);
        if !record.id.is_empty() {
            row.push_str(&format!(" id '{}'", record.id));
        }
        match kind {
            IssueKind::MalformedUrl => row.push_str(&format!(" url '{}'", record.link_raw)),
            IssueKind::MalformedImageUrl => row.push_str(&format!(" image '{}'", record.image_raw)),
            IssueKind::InvalidPrice
            | IssueKind::InvalidPriceFormat
            | IssueKind::OverPrecisionPrice
            | IssueKind::MissingCurrency => {
                row.push_str(&format!(" price '{}'", record.price_raw));
                if let Some(note) = analysis.price_notes.get(&index) {
                    row.push_str(&format!(" ({})", note));
                }
            }
            _ => {
                if !record.link.is_empty() {
                    row.push_str(&format!(" {}", record.link));
                }
            }
        }
        row.push('\n');
        row
    }

    fn issue_tables(&self, analysis: &AnalysisResult) -> String {
        let mut output = String::new();
        for kind in IssueKind::ALL {
            let indices = analysis.indices(kind);
            if indices.is_empty() {
                continue;
            }
            output.push_str(&format!(
                "\n  {} [{}] ({})\n",
                self.heading(kind.title()),
                kind.rule_id(),
                indices.len()
            ));
            for &index in indices.iter().take(self.show_limit) {
                output.push_str(&self.item_row(analysis, kind, index));
            }
            if indices.len() > self.show_limit {
                output.push_str(&format!(
                    "    ... and {} more\n",
                    indices.len() - self.show_limit
                ));
            }
        }
        output
    }

    fn closest_table(&self, analysis: &AnalysisResult) -> String {
        let mut output = String::new();
        let closest = analysis.detection.closest();
        if closest.is_empty() {
            return output;
        }
        output.push_str(&format!("\n  {}\n", self.heading("Closest formats")));
        for candidate in closest {
            output.push_str(&format!("    {} ({:.2})\n", candidate.spec, candidate.score));
            for hint in &candidate.hints {
                output.push_str(&format!("      - {}\n", hint));
            }
        }
        output
    }

    fn duplicate_tables(&self, report: &FeedReport) -> String {
        let mut output = String::new();
        if !report.duplicate_ids.is_empty() {
            output.push_str(&format!(
                "\n  {} ({})\n",
                self.heading("Duplicate IDs"),
                report.duplicate_ids.len()
            ));
            for group in report.duplicate_ids.iter().take(self.show_limit) {
                output.push_str(&format!(
                    "    '{}' x{} at items {}\n",
                    group.id,
                    group.indices.len(),
                    join(&group.indices)
                ));
                for link in &group.example_links {
                    output.push_str(&format!("      {}\n", link));
                }
            }
        }
        if !report.duplicate_links.is_empty() {
            output.push_str(&format!(
                "\n  {} ({})\n",
                self.heading("Duplicate product URLs"),
                report.duplicate_links.len()
            ));
            for group in report.duplicate_links.iter().take(self.show_limit) {
                output.push_str(&format!(
                    "    {} at items {}\n",
                    group.link,
                    join(&group.indices)
                ));
                if !group.ids.is_empty() {
                    output.push_str(&format!("      ids: {}\n", group.ids.join(", ")));
                }
            }
        }
        output
    }
}

fn join(indices: &[usize]) -> String {
    indices
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{} {}", count, word)
    } else {
        format!("{} {}s", count, word)
    }
}

impl OutputFormatter for TextFormatter {
    fn format(&self, result: &CheckResult) -> String {
        let mut output = String::new();

        for report in &result.reports {
            output.push_str(&self.format_report(report));
            output.push('\n');
        }

        // Statistics
        if self.show_stats {
            output.push_str(&format!(
                "{} processed",
                plural(result.files_processed, "file")
            ));

            let mut counts = Vec::new();
            if result.error_count > 0 {
                let s = plural(result.error_count, "error");
                counts.push(if self.colored { s.red().to_string() } else { s });
            }
            if result.warning_count > 0 {
                let s = plural(result.warning_count, "warning");
                counts.push(if self.colored {
                    s.yellow().to_string()
                } else {
                    s
                });
            }

            if !counts.is_empty() {
                output.push_str(&format!(": {}", counts.join(", ")));
            }
            output.push('\n');

            output.push_str(&format!(
                "Finished in {:.2}s\n",
                result.duration.as_secs_f64()
            ));
        }

        output
    }

    fn format_report(&self, report: &FeedReport) -> String {
        let mut output = String::new();

        let file = report.file.display().to_string();
        if self.colored {
            output.push_str(&format!("{}\n", file.underline()));
        } else {
            output.push_str(&format!("{}\n", file));
        }

        if let Some(analysis) = &report.analysis {
            output.push_str(&format!("  Format: {}\n", self.heading(analysis.spec_name())));
            if analysis.items.len() < analysis.total_items {
                output.push_str(&format!(
                    "  Items: {} (analyzed {})\n",
                    analysis.total_items,
                    analysis.items.len()
                ));
            } else {
                output.push_str(&format!("  Items: {}\n", analysis.total_items));
            }
        }

        output.push('\n');
        for verdict in &report.verdicts {
            output.push_str(&format!(
                "  {}  {:<24} {}\n",
                self.status_str(verdict.status),
                verdict.check,
                verdict.detail
            ));
        }

        if let Some(analysis) = &report.analysis {
            output.push_str(&self.closest_table(analysis));
            output.push_str(&self.issue_tables(analysis));
        }
        output.push_str(&self.duplicate_tables(report));

        if self.verbose || report.analysis.is_none() {
            if !report.diagnostics.is_empty() {
                output.push('\n');
            }
            for diag in &report.diagnostics {
                output.push_str(&self.format_diagnostic(diag));
            }
        }

        output
    }

    fn format_diagnostic(&self, diag: &Diagnostic) -> String {
        let mut output = format!(
            "{}: {}[{}]: {}\n",
            self.format_location(diag),
            self.severity_str(diag.severity),
            if self.colored {
                diag.rule_id.cyan().to_string()
            } else {
                diag.rule_id.clone()
            },
            diag.message
        );

        for note in &diag.notes {
            output.push_str(&format!("   = note: {}\n", note));
        }

        if let Some(help) = &diag.help {
            output.push_str(&format!(
                "   = {}: {}\n",
                if self.colored {
                    "help".green().to_string()
                } else {
                    "help".to_string()
                },
                help
            ));
        }

        output
    }
}
