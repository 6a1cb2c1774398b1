//! Feedcheck - e-commerce product feed checker and fixer
//!
//! Detects which marketplace format an XML product feed follows, extracts
//! per-item fields and reports structural defects: missing fields,
//! duplicate ids and URLs, malformed URLs and malformed prices. The fixer
//! maps any feed onto the Google Merchant field set and re-emits it as
//! Google RSS or Heureka XML.
//!
//! # Architecture
//!
//! ```text
//! CLI/API -> Engine -> Detector -> SpecRegistry
//!                   -> FeedAnalyzer -> FieldReader -> Selector
//!                   -> FeedFixer -> emit
//! ```
//!
//! Formats are data. Each [`SpecDefinition`] declares selectors for item
//! elements and fields, a strict detection rule and a scoring signature.
//! Extra formats can be loaded from YAML or JSON:
//!
//! ```yaml
//! specs:
//!   - name: Shop Export
//!     priority: 90
//!     item_paths: [".//offer"]
//!     id_paths: ["./sku", "@id"]
//!     link_paths: ["./url"]
//!     required_fields: ["sku|id", "url"]
//!     detection:
//!       item_tag: offer
//! ```

pub mod analysis;
pub mod config;
pub mod detector;
pub mod diagnostic;
pub mod document;
pub mod emit;
pub mod engine;
pub mod error;
pub mod fixer;
pub mod output;
pub mod price;
pub mod reader;
pub mod registry;
pub mod selector;
pub mod tracker;
pub mod url;

// Re-export main types
pub use analysis::{analyze, AnalysisResult, AnalyzeOptions, FeedAnalyzer, IssueKind};
pub use config::{Config, ConfigError};
pub use detector::{Detection, Detector, ScoreWeights, SpecScore};
pub use diagnostic::{Diagnostic, Location, Severity, Verdict, VerdictStatus};
pub use document::FeedDocument;
pub use emit::{Channel, Target};
pub use engine::{CheckResult, Engine, FeedReport, FixRun};
pub use error::FeedError;
pub use fixer::{CanonicalEntry, CanonicalField, DuplicatePolicy, FeedFixer, FixOptions, FixOutcome};
pub use output::{JsonFormatter, OutputFormatter, TextFormatter};
pub use price::{check_price, extract_numeric, PricePolicy};
pub use reader::{FieldReader, ItemRecord};
pub use registry::{SpecDefinition, SpecRegistry};
pub use selector::{Selector, SelectorError};
pub use tracker::DuplicateTracker;
