//! Diagnostics and verdicts derived from an analysis

use crate::analysis::{AnalysisResult, IssueKind};
use crate::tracker::group_pairs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Severity level for diagnostics
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message
    Info,
    /// Warning - feed is usable but degraded
    #[default]
    Warning,
    /// Error - feed would be rejected downstream
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" | "hint" | "note" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" | "err" => Ok(Severity::Error),
            _ => Err(()),
        }
    }
}

/// Where in a feed a diagnostic applies
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Location {
    /// Feed file path
    pub file: PathBuf,
    /// Line number (1-based), 0 when the diagnostic is feed-wide
    pub line: u32,
    /// Column number (1-based)
    pub column: u32,
    /// Item index within the feed
    pub item: Option<usize>,
}

impl Location {
    pub fn new(file: &Path, line: u32, column: u32) -> Self {
        Self {
            file: file.to_path_buf(),
            line,
            column,
            item: None,
        }
    }

    /// Location covering a whole feed
    pub fn feed(file: &Path) -> Self {
        Self::new(file, 0, 0)
    }

    pub fn with_item(mut self, index: usize) -> Self {
        self.item = Some(index);
        self
    }
}

/// One reported problem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Rule ID that triggered this diagnostic
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
    pub location: Location,
    pub help: Option<String>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(rule_id: &str, severity: Severity, message: &str, location: Location) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            severity,
            message: message.to_string(),
            location,
            help: None,
            notes: Vec::new(),
        }
    }

    pub fn with_help(mut self, help: &str) -> Self {
        self.help = Some(help.to_string());
        self
    }

    pub fn with_note(mut self, note: &str) -> Self {
        self.notes.push(note.to_string());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }
}

/// Outcome of one verdict row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    Pass,
    Warn,
    Fail,
}

/// A summary check shown at the top of a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub check: &'static str,
    pub status: VerdictStatus,
    pub detail: String,
}

impl Verdict {
    fn new(check: &'static str, failing: usize, severity: Severity, detail: String) -> Self {
        let status = match (failing, severity) {
            (0, _) => VerdictStatus::Pass,
            (_, Severity::Error) => VerdictStatus::Fail,
            _ => VerdictStatus::Warn,
        };
        Self {
            check,
            status,
            detail,
        }
    }
}

/// Summary checks for an analyzed feed
pub fn verdicts(result: &AnalysisResult) -> Vec<Verdict> {
    let mut rows = vec![Verdict {
        check: "XML syntax",
        status: VerdictStatus::Pass,
        detail: "well-formed".to_string(),
    }];

    if result.is_unknown() {
        rows.push(Verdict {
            check: "Format detected",
            status: VerdictStatus::Fail,
            detail: "no known format matched".to_string(),
        });
        return rows;
    }
    rows.push(Verdict {
        check: "Format detected",
        status: VerdictStatus::Pass,
        detail: result.spec_name().to_string(),
    });

    let missing = |kind| {
        let n = result.count(kind);
        (n, format!("missing: {}", n))
    };

    let (n, detail) = missing(IssueKind::MissingId);
    rows.push(Verdict::new("IDs present", n, Severity::Error, detail));

    let dup_ids = group_pairs(&result.duplicate_ids).len();
    rows.push(Verdict::new(
        "Duplicate IDs",
        dup_ids,
        Severity::Error,
        format!("duplicated: {}", dup_ids),
    ));

    let dup_links = group_pairs(&result.duplicate_links).len();
    rows.push(Verdict::new(
        "Duplicate product URLs",
        dup_links,
        Severity::Error,
        format!("duplicated: {}", dup_links),
    ));

    let (n, detail) = missing(IssueKind::MissingLink);
    rows.push(Verdict::new("Product URL present", n, Severity::Warning, detail));

    let (n, detail) = missing(IssueKind::MissingImage);
    rows.push(Verdict::new("Primary image present", n, Severity::Warning, detail));

    let (n, detail) = missing(IssueKind::MissingAvailability);
    rows.push(Verdict::new("Availability present", n, Severity::Warning, detail));

    if result.checks_price {
        let (n, detail) = missing(IssueKind::MissingPrice);
        rows.push(Verdict::new("Price present", n, Severity::Warning, detail));

        let invalid = result.price_notes.len();
        rows.push(Verdict::new(
            "Price valid",
            invalid,
            Severity::Warning,
            format!("invalid: {}", invalid),
        ));
    }

    let n = result.count(IssueKind::MalformedUrl);
    rows.push(Verdict::new(
        "Product URL valid",
        n,
        Severity::Warning,
        format!("malformed: {}", n),
    ));

    let n = result.count(IssueKind::MalformedImageUrl);
    rows.push(Verdict::new(
        "Image URL valid",
        n,
        Severity::Warning,
        format!("malformed: {}", n),
    ));

    rows
}

/// Items sharing one id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateIdGroup {
    pub id: String,
    pub indices: Vec<usize>,
    /// Up to three links of the colliding items
    pub example_links: Vec<String>,
}

/// Items sharing one product URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateLinkGroup {
    pub link: String,
    pub indices: Vec<usize>,
    /// Up to twelve ids of the colliding items
    pub ids: Vec<String>,
}

pub fn duplicate_id_groups(result: &AnalysisResult) -> Vec<DuplicateIdGroup> {
    group_pairs(&result.duplicate_ids)
        .into_iter()
        .map(|(id, indices)| {
            let mut example_links: Vec<String> = Vec::new();
            for link in indices
                .iter()
                .filter_map(|i| result.item(*i))
                .map(|r| r.link.clone())
                .filter(|l| !l.is_empty())
            {
                if example_links.len() == 3 {
                    break;
                }
                if !example_links.contains(&link) {
                    example_links.push(link);
                }
            }
            DuplicateIdGroup {
                id,
                indices,
                example_links,
            }
        })
        .collect()
}

pub fn duplicate_link_groups(result: &AnalysisResult) -> Vec<DuplicateLinkGroup> {
    group_pairs(&result.duplicate_links)
        .into_iter()
        .map(|(link, indices)| {
            let ids = indices
                .iter()
                .filter_map(|i| result.item(*i))
                .map(|r| r.id.clone())
                .filter(|id| !id.is_empty())
                .take(12)
                .collect();
            DuplicateLinkGroup { link, indices, ids }
        })
        .collect()
}

fn item_label(result: &AnalysisResult, index: usize) -> String {
    match result.item(index) {
        Some(record) if !record.id.is_empty() => format!("item {} (id '{}')", index, record.id),
        _ => format!("item {}", index),
    }
}

fn item_location(result: &AnalysisResult, file: &Path, index: usize) -> Location {
    let line = result.item(index).map_or(0, |r| r.line);
    Location::new(file, line, 1).with_item(index)
}

/// Diagnostics for every issue in an analysis
pub fn from_analysis(result: &AnalysisResult, file: &Path) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    if result.is_unknown() {
        let mut diag = Diagnostic::new(
            "unknown-format",
            Severity::Error,
            "Feed does not match any known format",
            Location::feed(file),
        );
        for candidate in result.detection.closest() {
            diag = diag.with_note(&format!(
                "closest: {} (score {:.2})",
                candidate.spec, candidate.score
            ));
            for hint in &candidate.hints {
                diag = diag.with_note(&format!("  {}", hint));
            }
        }
        diagnostics.push(diag);
        return diagnostics;
    }

    for (kind, indices) in &result.issues {
        for &index in indices {
            let mut message = format!("{}: {}", kind.title(), item_label(result, index));
            let record = result.item(index);
            match kind {
                IssueKind::MalformedUrl => {
                    if let Some(r) = record {
                        message.push_str(&format!(" '{}'", r.link_raw));
                    }
                }
                IssueKind::MalformedImageUrl => {
                    if let Some(r) = record {
                        message.push_str(&format!(" '{}'", r.image_raw));
                    }
                }
                IssueKind::InvalidPrice
                | IssueKind::InvalidPriceFormat
                | IssueKind::OverPrecisionPrice
                | IssueKind::MissingCurrency => {
                    if let Some(r) = record {
                        message.push_str(&format!(" '{}'", r.price_raw));
                    }
                }
                _ => {}
            }
            let mut diag = Diagnostic::new(
                kind.rule_id(),
                kind.severity(),
                &message,
                item_location(result, file, index),
            );
            if let Some(note) = result.price_notes.get(&index) {
                if matches!(
                    kind,
                    IssueKind::InvalidPrice
                        | IssueKind::InvalidPriceFormat
                        | IssueKind::OverPrecisionPrice
                        | IssueKind::MissingCurrency
                ) {
                    diag = diag.with_note(note);
                }
            }
            diagnostics.push(diag);
        }
    }

    for pair in &result.duplicate_ids {
        diagnostics.push(
            Diagnostic::new(
                "duplicate-id",
                Severity::Error,
                &format!(
                    "Duplicate ID '{}': item {} repeats item {}",
                    pair.value, pair.index, pair.first
                ),
                item_location(result, file, pair.index),
            )
            .with_help("Every product needs a unique ID"),
        );
    }

    for pair in &result.duplicate_links {
        diagnostics.push(
            Diagnostic::new(
                "duplicate-link",
                Severity::Error,
                &format!(
                    "Duplicate product URL '{}': item {} repeats item {}",
                    pair.value, pair.index, pair.first
                ),
                item_location(result, file, pair.index),
            )
            .with_help("Each product should point to its own page"),
        );
    }

    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{analyze, AnalyzeOptions};
    use crate::document::FeedDocument;
    use crate::registry::SpecRegistry;

    fn analyze_str(xml: &str) -> AnalysisResult {
        let doc = FeedDocument::parse(xml).unwrap();
        analyze(&doc, &SpecRegistry::builtin(), &AnalyzeOptions::default()).unwrap()
    }

    const DUPES: &str = "<SHOP>\
<SHOPITEM><ITEM_ID>1</ITEM_ID><URL>https://x.example/a</URL></SHOPITEM>\
<SHOPITEM><ITEM_ID>1</ITEM_ID><URL>https://x.example/b</URL></SHOPITEM>\
<SHOPITEM><ITEM_ID>2</ITEM_ID><URL>https://x.example/a</URL></SHOPITEM>\
<SHOPITEM><ITEM_ID>1</ITEM_ID><URL>https://x.example/c</URL></SHOPITEM>\
</SHOP>";

    #[test]
    fn test_severity_parse_and_display() {
        assert_eq!("warn".parse::<Severity>(), Ok(Severity::Warning));
        assert_eq!("ERROR".parse::<Severity>(), Ok(Severity::Error));
        assert!("bogus".parse::<Severity>().is_err());
        assert_eq!(Severity::Info.to_string(), "info");
        assert!(Severity::Error > Severity::Warning);
    }

    #[test]
    fn test_duplicate_groups() {
        let result = analyze_str(DUPES);
        let ids = duplicate_id_groups(&result);
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].id, "1");
        assert_eq!(ids[0].indices, vec![0, 1, 3]);
        assert_eq!(
            ids[0].example_links,
            vec![
                "https://x.example/a",
                "https://x.example/b",
                "https://x.example/c"
            ]
        );

        let links = duplicate_link_groups(&result);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].ids, vec!["1", "2"]);
    }

    #[test]
    fn test_verdicts() {
        let result = analyze_str(DUPES);
        let rows = verdicts(&result);
        let status = |check: &str| rows.iter().find(|r| r.check == check).map(|r| r.status);
        assert_eq!(status("XML syntax"), Some(VerdictStatus::Pass));
        assert_eq!(status("Format detected"), Some(VerdictStatus::Pass));
        assert_eq!(status("IDs present"), Some(VerdictStatus::Pass));
        assert_eq!(status("Duplicate IDs"), Some(VerdictStatus::Fail));
        assert_eq!(status("Duplicate product URLs"), Some(VerdictStatus::Fail));
        assert_eq!(status("Primary image present"), Some(VerdictStatus::Warn));
        assert_eq!(status("Price present"), Some(VerdictStatus::Warn));
    }

    #[test]
    fn test_unknown_verdict_and_diagnostic() {
        let result = analyze_str("<catalog><row><a>1</a></row></catalog>");
        let rows = verdicts(&result);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].status, VerdictStatus::Fail);

        let diags = from_analysis(&result, Path::new("feed.xml"));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].rule_id, "unknown-format");
        assert!(diags[0].notes.iter().any(|n| n.starts_with("closest: ")));
    }

    #[test]
    fn test_item_diagnostics() {
        let result = analyze_str(DUPES);
        let diags = from_analysis(&result, Path::new("feed.xml"));
        let dup_ids: Vec<&Diagnostic> = diags.iter().filter(|d| d.rule_id == "duplicate-id").collect();
        assert_eq!(dup_ids.len(), 2);
        assert!(dup_ids.iter().all(|d| d.is_error()));
        assert_eq!(dup_ids[0].location.item, Some(1));

        let missing_image = diags
            .iter()
            .filter(|d| d.rule_id == "missing-image")
            .count();
        assert_eq!(missing_image, 4);
        assert!(diags
            .iter()
            .filter(|d| d.rule_id == "missing-image")
            .all(|d| d.is_warning()));
    }
}
