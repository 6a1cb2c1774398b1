//! Feed checking engine

use crate::analysis::{analyze, AnalysisResult};
use crate::config::Config;
use crate::diagnostic::{
    duplicate_id_groups, duplicate_link_groups, from_analysis, verdicts, Diagnostic,
    DuplicateIdGroup, DuplicateLinkGroup, Location, Severity, Verdict, VerdictStatus,
};
use crate::document::FeedDocument;
use crate::emit::emit;
use crate::error::FeedError;
use crate::fixer::{FeedFixer, FixOutcome};
use crate::registry::SpecRegistry;
use log::{debug, info};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Everything reported for one feed file
#[derive(Debug, Clone, Serialize)]
pub struct FeedReport {
    pub file: PathBuf,
    /// Absent when the file could not be read or parsed
    pub analysis: Option<AnalysisResult>,
    pub verdicts: Vec<Verdict>,
    pub diagnostics: Vec<Diagnostic>,
    pub duplicate_ids: Vec<DuplicateIdGroup>,
    pub duplicate_links: Vec<DuplicateLinkGroup>,
    #[serde(skip)]
    pub duration: Duration,
}

impl FeedReport {
    fn failed(file: &Path, diagnostic: Diagnostic, check: &'static str) -> Self {
        Self {
            file: file.to_path_buf(),
            analysis: None,
            verdicts: vec![Verdict {
                check,
                status: VerdictStatus::Fail,
                detail: diagnostic.message.clone(),
            }],
            diagnostics: vec![diagnostic],
            duplicate_ids: Vec::new(),
            duplicate_links: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_warning()).count()
    }
}

/// Result of checking a set of files
#[derive(Debug, Default, Serialize)]
pub struct CheckResult {
    pub reports: Vec<FeedReport>,

    /// Files processed
    pub files_processed: usize,

    /// Files with errors
    pub files_with_errors: usize,

    /// Files with warnings
    pub files_with_warnings: usize,

    /// Total errors
    pub error_count: usize,

    /// Total warnings
    pub warning_count: usize,

    /// Processing duration
    #[serde(skip)]
    pub duration: Duration,
}

impl CheckResult {
    /// Check if there are any errors
    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    /// Check if there are any warnings
    pub fn has_warnings(&self) -> bool {
        self.warning_count > 0
    }

    /// Check if result is clean (no errors or warnings)
    pub fn is_clean(&self) -> bool {
        self.error_count == 0 && self.warning_count == 0
    }

    /// Get exit code (0 = success, 1 = warnings, 2 = errors)
    pub fn exit_code(&self) -> i32 {
        if self.error_count > 0 {
            2
        } else if self.warning_count > 0 {
            1
        } else {
            0
        }
    }

    /// Add one file's report to the totals
    pub fn push(&mut self, report: FeedReport) {
        let errors = report.error_count();
        let warnings = report.warning_count();
        self.files_processed += 1;
        self.error_count += errors;
        self.warning_count += warnings;
        if errors > 0 {
            self.files_with_errors += 1;
        }
        if warnings > 0 {
            self.files_with_warnings += 1;
        }
        self.reports.push(report);
    }

    /// Diagnostics of every report
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.reports.iter().flat_map(|r| r.diagnostics.iter())
    }
}

/// Output of one fixer run
#[derive(Debug)]
pub struct FixRun {
    pub outcome: FixOutcome,
    /// Serialized target document
    pub output: Vec<u8>,
    /// Entries written after the duplicate policy
    pub emitted: usize,
}

/// The feed checking engine
pub struct Engine {
    config: Config,
    registry: SpecRegistry,
    /// Skip detection and analyze every file as this spec
    forced_spec: Option<String>,
}

impl Engine {
    /// Create a new engine with configuration and a spec registry
    pub fn new(config: Config, registry: SpecRegistry) -> Self {
        Self {
            config,
            registry,
            forced_spec: None,
        }
    }

    /// Force a spec instead of detecting one
    pub fn with_spec(mut self, name: &str) -> Result<Self, FeedError> {
        if self.registry.get(name).is_none() {
            return Err(FeedError::UnknownSpec(name.to_string()));
        }
        self.forced_spec = Some(name.to_string());
        Ok(self)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &SpecRegistry {
        &self.registry
    }

    /// Check multiple files
    pub fn check(&self, files: &[PathBuf]) -> CheckResult {
        let start = Instant::now();

        let reports: Vec<FeedReport> = if self.config.engine.parallel && files.len() > 1 {
            let threads = if self.config.engine.jobs > 0 {
                self.config.engine.jobs
            } else {
                num_cpus::get()
            };
            match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
                Ok(pool) => pool.install(|| files.par_iter().map(|f| self.check_file(f)).collect()),
                Err(e) => {
                    debug!("Falling back to sequential checking: {}", e);
                    files.iter().map(|f| self.check_file(f)).collect()
                }
            }
        } else {
            files.iter().map(|f| self.check_file(f)).collect()
        };

        let mut combined = CheckResult::default();
        for report in reports {
            combined.push(report);
        }

        combined.duration = start.elapsed();
        combined
    }

    /// Check a single file
    pub fn check_file(&self, path: &Path) -> FeedReport {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                let diagnostic = Diagnostic::new(
                    "file-read-error",
                    Severity::Error,
                    &format!("Failed to read file: {}", e),
                    Location::feed(path),
                );
                return FeedReport::failed(path, diagnostic, "File readable");
            }
        };
        self.check_source(&content, path)
    }

    /// Check feed text already in memory
    pub fn check_source(&self, source: &str, path: &Path) -> FeedReport {
        let start = Instant::now();

        let doc = match FeedDocument::parse(source) {
            Ok(doc) => doc,
            Err(e) => {
                let location = match &e {
                    FeedError::Parse { line, column, .. } => Location::new(path, *line, *column),
                    _ => Location::feed(path),
                };
                let diagnostic = Diagnostic::new(
                    "parse-error",
                    Severity::Error,
                    &e.to_string(),
                    location,
                );
                let mut report = FeedReport::failed(path, diagnostic, "XML syntax");
                report.duration = start.elapsed();
                return report;
            }
        };

        let mut options = self.config.analyze_options();
        options.spec = self.forced_spec.clone();
        let analysis = match analyze(&doc, &self.registry, &options) {
            Ok(analysis) => analysis,
            Err(e) => {
                let diagnostic = Diagnostic::new(
                    "analysis-error",
                    Severity::Error,
                    &e.to_string(),
                    Location::feed(path),
                );
                return FeedReport::failed(path, diagnostic, "Format detected");
            }
        };

        let report = FeedReport {
            file: path.to_path_buf(),
            verdicts: verdicts(&analysis),
            diagnostics: from_analysis(&analysis, path),
            duplicate_ids: duplicate_id_groups(&analysis),
            duplicate_links: duplicate_link_groups(&analysis),
            duration: start.elapsed(),
            analysis: Some(analysis),
        };
        info!(
            "{}: {} item(s) as '{}' in {:.1?}",
            path.display(),
            report.analysis.as_ref().map_or(0, |a| a.total_items),
            report.analysis.as_ref().map_or("", |a| a.spec_name()),
            report.duration
        );
        report
    }

    /// Map a feed onto canonical fields and serialize it in the configured
    /// target vocabulary
    pub fn fix_source(&self, source: &str) -> Result<FixRun, FeedError> {
        let doc = FeedDocument::parse(source)?;
        let fixer = FeedFixer::new(&self.registry, self.config.fix_options());
        let outcome = fixer.fix(&doc);
        let entries = outcome.output();
        let output = emit(self.config.fixer.target, &entries, &self.config.channel())?;
        let emitted = entries.len();
        info!(
            "Mapped {} item(s), emitting {} as {}",
            outcome.entries.len(),
            emitted,
            self.config.fixer.target
        );
        Ok(FixRun {
            outcome,
            output,
            emitted,
        })
    }

    pub fn fix_file(&self, path: &Path) -> Result<FixRun, FeedError> {
        let content = std::fs::read_to_string(path)?;
        self.fix_source(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HEUREKA;

    const HEUREKA_FEED: &str = r#"<SHOP>
  <SHOPITEM><ITEM_ID>1</ITEM_ID><PRODUCTNAME>A</PRODUCTNAME><URL>https://x.example/a</URL><IMGURL>https://x.example/a.jpg</IMGURL><PRICE_VAT>10</PRICE_VAT><DELIVERY_DATE>0</DELIVERY_DATE></SHOPITEM>
  <SHOPITEM><ITEM_ID>2</ITEM_ID><PRODUCTNAME>B</PRODUCTNAME><URL>https://x.example/b</URL><IMGURL>https://x.example/b.jpg</IMGURL><PRICE_VAT>20</PRICE_VAT><DELIVERY_DATE>1</DELIVERY_DATE></SHOPITEM>
</SHOP>"#;

    fn engine() -> Engine {
        Engine::new(Config::default(), SpecRegistry::builtin())
    }

    #[test]
    fn test_check_result_exit_code() {
        let mut result = CheckResult::default();
        assert_eq!(result.exit_code(), 0);
        assert!(result.is_clean());

        result.warning_count = 1;
        assert_eq!(result.exit_code(), 1);

        result.error_count = 1;
        assert_eq!(result.exit_code(), 2);
    }

    #[test]
    fn test_clean_feed() {
        let report = engine().check_source(HEUREKA_FEED, Path::new("feed.xml"));
        let analysis = report.analysis.as_ref().unwrap();
        assert_eq!(analysis.spec_name(), HEUREKA);
        assert_eq!(analysis.total_items, 2);
        assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
        assert!(report
            .verdicts
            .iter()
            .all(|v| v.status == VerdictStatus::Pass));
    }

    #[test]
    fn test_parse_error_becomes_diagnostic() {
        let report = engine().check_source("<SHOP>\n<SHOPITEM>\n</SHOP>", Path::new("bad.xml"));
        assert!(report.analysis.is_none());
        assert_eq!(report.diagnostics.len(), 1);
        let diag = &report.diagnostics[0];
        assert_eq!(diag.rule_id, "parse-error");
        assert!(diag.is_error());
        assert!(diag.location.line > 0);
        assert_eq!(report.verdicts[0].status, VerdictStatus::Fail);
    }

    #[test]
    fn test_missing_file() {
        let result = engine().check(&[PathBuf::from("/nonexistent/feed.xml")]);
        assert_eq!(result.files_processed, 1);
        assert_eq!(result.files_with_errors, 1);
        assert_eq!(result.exit_code(), 2);
        let diag = result.diagnostics().next().unwrap();
        assert_eq!(diag.rule_id, "file-read-error");
    }

    #[test]
    fn test_parallel_check() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = Vec::new();
        for name in ["a.xml", "b.xml", "c.xml"] {
            let path = dir.path().join(name);
            std::fs::write(&path, HEUREKA_FEED).unwrap();
            files.push(path);
        }
        let result = engine().check(&files);
        assert_eq!(result.files_processed, 3);
        assert!(result.is_clean());
        let mut names: Vec<_> = result.reports.iter().map(|r| r.file.clone()).collect();
        names.sort();
        assert_eq!(names, files);
    }

    #[test]
    fn test_sampling_limit() {
        let mut config = Config::default();
        config.engine.max_items = Some(1);
        let report =
            Engine::new(config, SpecRegistry::builtin()).check_source(HEUREKA_FEED, Path::new("f"));
        let analysis = report.analysis.unwrap();
        assert_eq!(analysis.total_items, 2);
        assert_eq!(analysis.items.len(), 1);
    }

    #[test]
    fn test_forced_spec() {
        assert!(matches!(
            engine().with_spec("Nope"),
            Err(FeedError::UnknownSpec(_))
        ));
        let engine = engine().with_spec(HEUREKA).unwrap();
        let report = engine.check_source("<catalog><x/></catalog>", Path::new("f"));
        assert_eq!(report.analysis.unwrap().spec_name(), HEUREKA);
    }

    #[test]
    fn test_fix_source() {
        let run = engine().fix_source(HEUREKA_FEED).unwrap();
        assert_eq!(run.emitted, 2);
        let xml = String::from_utf8(run.output).unwrap();
        assert!(xml.contains("<g:id>1</g:id>"));
        assert!(xml.contains("<g:price>10.00 EUR</g:price>"));
        assert!(xml.contains("<g:availability>in stock</g:availability>"));

        assert!(engine().fix_source("<broken").unwrap_err().is_parse_error());
    }
}
