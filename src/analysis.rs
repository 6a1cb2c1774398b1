//! Per-feed analysis
//!
//! [`FeedAnalyzer`] is an explicit accumulator: items are pushed one at a
//! time in document order and the frozen [`AnalysisResult`] is returned by
//! [`FeedAnalyzer::finish`]. No state is shared between analyses.

use crate::detector::{Detection, Detector, ScoreWeights};
use crate::diagnostic::Severity;
use crate::document::FeedDocument;
use crate::error::FeedError;
use crate::price::{check_price, PricePolicy, PriceProblem};
use crate::reader::{item_nodes, FieldReader, ItemRecord};
use crate::registry::{SpecDefinition, SpecRegistry};
use crate::tracker::{DuplicatePair, DuplicateTracker};
use crate::url::is_malformed;
use log::debug;
use roxmltree::Node;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Category of a per-item data-quality issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueKind {
    MissingId,
    MissingLink,
    MissingImage,
    MissingAvailability,
    MissingPrice,
    InvalidPrice,
    InvalidPriceFormat,
    OverPrecisionPrice,
    MissingCurrency,
    MalformedUrl,
    MalformedImageUrl,
}

impl IssueKind {
    pub const ALL: [IssueKind; 11] = [
        IssueKind::MissingId,
        IssueKind::MissingLink,
        IssueKind::MissingImage,
        IssueKind::MissingAvailability,
        IssueKind::MissingPrice,
        IssueKind::InvalidPrice,
        IssueKind::InvalidPriceFormat,
        IssueKind::OverPrecisionPrice,
        IssueKind::MissingCurrency,
        IssueKind::MalformedUrl,
        IssueKind::MalformedImageUrl,
    ];

    /// Rule identifier used in diagnostics
    pub fn rule_id(&self) -> &'static str {
        match self {
            IssueKind::MissingId => "missing-id",
            IssueKind::MissingLink => "missing-link",
            IssueKind::MissingImage => "missing-image",
            IssueKind::MissingAvailability => "missing-availability",
            IssueKind::MissingPrice => "missing-price",
            IssueKind::InvalidPrice => "invalid-price",
            IssueKind::InvalidPriceFormat => "invalid-price-format",
            IssueKind::OverPrecisionPrice => "over-precision-price",
            IssueKind::MissingCurrency => "missing-currency",
            IssueKind::MalformedUrl => "malformed-url",
            IssueKind::MalformedImageUrl => "malformed-image-url",
        }
    }

    /// Human-readable title for reports
    pub fn title(&self) -> &'static str {
        match self {
            IssueKind::MissingId => "Missing product ID",
            IssueKind::MissingLink => "Missing product URL",
            IssueKind::MissingImage => "Missing primary image",
            IssueKind::MissingAvailability => "Missing availability",
            IssueKind::MissingPrice => "Missing price",
            IssueKind::InvalidPrice => "Invalid price",
            IssueKind::InvalidPriceFormat => "Price format not accepted",
            IssueKind::OverPrecisionPrice => "Price has more decimals than allowed",
            IssueKind::MissingCurrency => "Price without currency",
            IssueKind::MalformedUrl => "Malformed product URL",
            IssueKind::MalformedImageUrl => "Malformed image URL",
        }
    }

    /// Missing ids block publication; everything else is a warning
    pub fn severity(&self) -> Severity {
        match self {
            IssueKind::MissingId => Severity::Error,
            _ => Severity::Warning,
        }
    }

    fn from_price_problem(problem: PriceProblem) -> Self {
        match problem {
            PriceProblem::NotNumeric | PriceProblem::NonPositive => IssueKind::InvalidPrice,
            PriceProblem::MissingCurrency => IssueKind::MissingCurrency,
            PriceProblem::InvalidFormat => IssueKind::InvalidPriceFormat,
            PriceProblem::OverPrecision => IssueKind::OverPrecisionPrice,
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rule_id())
    }
}

/// Everything learned about one feed
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub detection: Detection,
    /// Item elements found, before any sampling limit
    pub total_items: usize,
    pub items: Vec<ItemRecord>,
    /// Item indices per issue category, ascending
    pub issues: BTreeMap<IssueKind, Vec<usize>>,
    /// Reason text for each item with a price issue
    pub price_notes: BTreeMap<usize, String>,
    pub duplicate_ids: Vec<DuplicatePair>,
    pub duplicate_links: Vec<DuplicatePair>,
    /// Whether the detected spec carries prices at all
    pub checks_price: bool,
}

impl AnalysisResult {
    /// Result for a feed that matched no spec
    pub fn unrecognized(detection: Detection, total_items: usize) -> Self {
        Self {
            detection,
            total_items,
            items: Vec::new(),
            issues: BTreeMap::new(),
            price_notes: BTreeMap::new(),
            duplicate_ids: Vec::new(),
            duplicate_links: Vec::new(),
            checks_price: false,
        }
    }

    pub fn spec_name(&self) -> &str {
        self.detection.spec_name()
    }

    pub fn is_unknown(&self) -> bool {
        self.detection.is_unknown()
    }

    pub fn indices(&self, kind: IssueKind) -> &[usize] {
        self.issues.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count(&self, kind: IssueKind) -> usize {
        self.indices(kind).len()
    }

    pub fn item(&self, index: usize) -> Option<&ItemRecord> {
        self.items.get(index)
    }

    /// Number of items carrying at least one issue
    pub fn items_with_issues(&self) -> usize {
        let mut flagged: Vec<usize> = self.issues.values().flatten().copied().collect();
        flagged.extend(self.duplicate_ids.iter().map(|p| p.index));
        flagged.extend(self.duplicate_links.iter().map(|p| p.index));
        flagged.sort_unstable();
        flagged.dedup();
        flagged.len()
    }
}

/// Incremental per-item accumulator for one spec
pub struct FeedAnalyzer<'s> {
    reader: FieldReader<'s>,
    policy: PricePolicy,
    items: Vec<ItemRecord>,
    issues: BTreeMap<IssueKind, Vec<usize>>,
    price_notes: BTreeMap<usize, String>,
    ids: DuplicateTracker,
    links: DuplicateTracker,
}

impl<'s> FeedAnalyzer<'s> {
    pub fn new(spec: &'s SpecDefinition) -> Self {
        Self {
            reader: FieldReader::new(spec),
            policy: spec.price_policy.clone(),
            items: Vec::new(),
            issues: BTreeMap::new(),
            price_notes: BTreeMap::new(),
            ids: DuplicateTracker::new(),
            links: DuplicateTracker::new(),
        }
    }

    pub fn with_price_policy(mut self, policy: PricePolicy) -> Self {
        self.policy = policy;
        self
    }

    fn flag(&mut self, kind: IssueKind, index: usize) {
        self.issues.entry(kind).or_default().push(index);
    }

    /// Read one item, record its issues and return the record
    pub fn process(&mut self, item: Node) -> &ItemRecord {
        let index = self.items.len();
        let record = self.reader.read(item, index);

        if record.id.is_empty() {
            self.flag(IssueKind::MissingId, index);
        } else {
            self.ids.observe(index, &record.id);
        }

        if record.link.is_empty() {
            self.flag(IssueKind::MissingLink, index);
        } else {
            if is_malformed(&record.link_raw) {
                self.flag(IssueKind::MalformedUrl, index);
            }
            self.links.observe(index, &record.link);
        }

        if record.image.is_empty() {
            self.flag(IssueKind::MissingImage, index);
        } else if is_malformed(&record.image_raw) {
            self.flag(IssueKind::MalformedImageUrl, index);
        }

        if record.availability.is_empty() {
            self.flag(IssueKind::MissingAvailability, index);
        }

        if self.reader.spec().checks_price() {
            if record.price_raw.is_empty() {
                self.flag(IssueKind::MissingPrice, index);
            } else {
                let check = check_price(&record.price_raw, &self.policy);
                if !check.is_valid() {
                    let mut kinds: Vec<IssueKind> = check
                        .problems
                        .iter()
                        .map(|p| IssueKind::from_price_problem(*p))
                        .collect();
                    kinds.dedup();
                    for kind in kinds {
                        self.flag(kind, index);
                    }
                    self.price_notes.insert(index, check.reasons());
                }
            }
        }

        self.items.push(record);
        &self.items[index]
    }

    /// Freeze the accumulated state
    pub fn finish(self, detection: Detection, total_items: usize) -> AnalysisResult {
        AnalysisResult {
            detection,
            total_items: total_items.max(self.items.len()),
            checks_price: self.reader.spec().checks_price(),
            items: self.items,
            issues: self.issues,
            price_notes: self.price_notes,
            duplicate_ids: self.ids.into_pairs(),
            duplicate_links: self.links.into_pairs(),
        }
    }
}

/// Knobs for [`analyze`]
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    /// Process only the first N items
    pub max_items: Option<usize>,
    /// Skip detection and use this spec
    pub spec: Option<String>,
    pub weights: ScoreWeights,
    /// Overrides the spec's `max_decimals`
    pub max_decimals: Option<u8>,
}

/// Detect the feed's spec and analyze its items
pub fn analyze(
    doc: &FeedDocument,
    registry: &SpecRegistry,
    options: &AnalyzeOptions,
) -> Result<AnalysisResult, FeedError> {
    let detection = match &options.spec {
        Some(name) => {
            if registry.get(name).is_none() {
                return Err(FeedError::UnknownSpec(name.clone()));
            }
            Detection::Matched { spec: name.clone() }
        }
        None => Detector::new(registry)
            .with_weights(options.weights.clone())
            .detect(doc),
    };

    let Some(spec) = registry.get(detection.spec_name()) else {
        return Ok(AnalysisResult::unrecognized(detection, 0));
    };

    let nodes = item_nodes(doc, spec);
    let total = nodes.len();
    let limit = options.max_items.unwrap_or(total).min(total);
    debug!("{}: {} item(s), analyzing {}", spec.name, total, limit);

    let mut policy = spec.price_policy.clone();
    if let Some(max) = options.max_decimals {
        policy.max_decimals = max;
    }

    let mut analyzer = FeedAnalyzer::new(spec).with_price_policy(policy);
    for node in nodes.into_iter().take(limit) {
        analyzer.process(node);
    }
    Ok(analyzer.finish(detection, total))
}
