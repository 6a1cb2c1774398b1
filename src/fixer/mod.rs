//! Feed fixer
//!
//! Maps the items of any recognised (or best-guess) feed onto the canonical
//! Google Merchant field set, ready to be re-emitted by [`crate::emit`].
//!
//! Per item, values come from three layers applied in order:
//!
//! 1. the active spec's field readers
//! 2. the synonym table, applied to direct children and one nested level
//! 3. explicit user mappings (`tag -> field`)
//!
//! Tags nobody claims are reported with example values so a user can map
//! them on the next run.

pub mod canonical;

pub use canonical::{canonical_field, CanonicalField};

use crate::detector::{Detection, Detector, ScoreWeights};
use crate::document::{local_name, node_text, FeedDocument};
use crate::price::extract_numeric;
use crate::reader::{item_nodes, FieldReader};
use crate::registry::{SpecDefinition, SpecRegistry};
use crate::tracker::{DuplicatePair, DuplicateTracker};
use crate::url::encode_url;
use log::{debug, info};
use regex::Regex;
use roxmltree::Node;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::OnceLock;

/// Maximum example values kept per unmapped tag
const MAX_EXAMPLES: usize = 3;

/// One item expressed in canonical fields
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CanonicalEntry {
    pub fields: BTreeMap<CanonicalField, String>,
    pub additional_images: Vec<String>,
    /// The id was derived from the link
    pub id_synthesized: bool,
}

impl CanonicalEntry {
    /// Value of a scalar field, empty when unset
    pub fn get(&self, field: CanonicalField) -> &str {
        self.fields.get(&field).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, field: CanonicalField, value: String) {
        if value.is_empty() {
            return;
        }
        self.fields.insert(field, value);
    }

    fn set_if_empty(&mut self, field: CanonicalField, value: String) {
        if self.get(field).is_empty() {
            self.set(field, value);
        }
    }

    fn add_image(&mut self, url: &str) {
        let encoded = encode_url(url);
        if !encoded.is_empty() && !self.additional_images.contains(&encoded) {
            self.additional_images.push(encoded);
        }
    }

    /// Main image if unset, otherwise an additional image
    fn offer_image(&mut self, url: &str) {
        let encoded = encode_url(url);
        if self.get(CanonicalField::ImageLink).is_empty() {
            self.set(CanonicalField::ImageLink, encoded);
        } else if encoded != self.get(CanonicalField::ImageLink) {
            self.add_image(&encoded);
        }
    }

    fn push(&mut self, field: CanonicalField, value: &str, currency: &str) {
        if value.is_empty() {
            return;
        }
        match field {
            CanonicalField::AdditionalImageLink => self.add_image(value),
            CanonicalField::Link => self.set_if_empty(field, encode_url(value)),
            CanonicalField::ImageLink => self.offer_image(value),
            CanonicalField::Price => self.set_if_empty(field, normalize_price(value, currency)),
            _ => self.set_if_empty(field, value.to_string()),
        }
    }
}

/// What to do with later items repeating an id or link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    #[default]
    KeepFirst,
    KeepAll,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keep-first" | "first" => Ok(DuplicatePolicy::KeepFirst),
            "keep-all" | "all" => Ok(DuplicatePolicy::KeepAll),
            _ => Err(format!("unknown duplicate policy '{}'", s)),
        }
    }
}

/// Fixer settings
#[derive(Debug, Clone)]
pub struct FixOptions {
    /// Currency appended to prices that carry none
    pub default_currency: String,
    /// Explicit source tag -> field mappings, keys lowercased
    pub tag_map: BTreeMap<String, CanonicalField>,
    pub duplicates: DuplicatePolicy,
    /// Derive missing ids from links
    pub synthesize_ids: bool,
    pub weights: ScoreWeights,
}

impl Default for FixOptions {
    fn default() -> Self {
        Self {
            default_currency: "EUR".to_string(),
            tag_map: BTreeMap::new(),
            duplicates: DuplicatePolicy::KeepFirst,
            synthesize_ids: true,
            weights: ScoreWeights::default(),
        }
    }
}

/// Everything the fixer produced for one feed
#[derive(Debug, Clone, Serialize)]
pub struct FixOutcome {
    pub detection: Detection,
    /// Spec whose readers supplied the items, if any
    pub source_spec: Option<String>,
    /// Every mapped item, in document order
    pub entries: Vec<CanonicalEntry>,
    /// Unclaimed source tags with example values
    pub unmapped: BTreeMap<String, BTreeSet<String>>,
    pub duplicate_ids: Vec<DuplicatePair>,
    pub duplicate_links: Vec<DuplicatePair>,
    pub synthesized_ids: usize,
    /// Items without id even after synthesis; never emitted
    pub missing_ids: usize,
    pub policy: DuplicatePolicy,
}

impl FixOutcome {
    /// Entries to emit: items with an id, after the duplicate policy
    pub fn output(&self) -> Vec<&CanonicalEntry> {
        apply_duplicate_policy(&self.entries, self.policy)
    }
}

/// Drop entries without id and, under keep-first, any entry whose id or
/// link was already emitted
pub fn apply_duplicate_policy(
    entries: &[CanonicalEntry],
    policy: DuplicatePolicy,
) -> Vec<&CanonicalEntry> {
    let mut ids = BTreeSet::new();
    let mut links = BTreeSet::new();
    let mut out = Vec::new();
    for entry in entries {
        let id = entry.get(CanonicalField::Id);
        if id.is_empty() {
            continue;
        }
        let link = entry.get(CanonicalField::Link);
        if policy == DuplicatePolicy::KeepFirst
            && (ids.contains(id) || (!link.is_empty() && links.contains(link)))
        {
            continue;
        }
        ids.insert(id);
        if !link.is_empty() {
            links.insert(link);
        }
        out.push(entry);
    }
    out
}

fn is_urlish(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Source tag values of an item in first-seen order: direct children and
/// grandchildren, element text plus URL-valued attributes
pub fn collect_item_values(item: Node) -> Vec<(String, Vec<String>)> {
    fn add(bag: &mut Vec<(String, Vec<String>)>, tag: String, value: &str) {
        if value.is_empty() {
            return;
        }
        match bag.iter_mut().find(|(t, _)| *t == tag) {
            Some((_, values)) => values.push(value.to_string()),
            None => bag.push((tag, vec![value.to_string()])),
        }
    }

    fn visit(bag: &mut Vec<(String, Vec<String>)>, node: Node) {
        let tag = local_name(&node);
        add(bag, tag.clone(), node_text(&node));
        for attr in node.attributes() {
            if is_urlish(attr.value()) {
                add(bag, tag.clone(), attr.value());
            }
        }
    }

    let mut bag = Vec::new();
    for child in item.children().filter(|c| c.is_element()) {
        visit(&mut bag, child);
        for grandchild in child.children().filter(|c| c.is_element()) {
            visit(&mut bag, grandchild);
        }
    }
    bag
}

fn currency_code() -> &'static Regex {
    static CODE: OnceLock<Regex> = OnceLock::new();
    CODE.get_or_init(|| Regex::new(r"\b([A-Z]{3})\b").expect("currency pattern is valid"))
}

/// Normalize a price to `N.NN CUR`. The currency is an ISO code found in
/// the value, a recognised sign, or `default_currency`. Returns an empty
/// string when no number can be read.
pub fn normalize_price(value: &str, default_currency: &str) -> String {
    let Some(amount) = extract_numeric(value) else {
        return String::new();
    };
    let currency = currency_code()
        .captures(value)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .or_else(|| {
            value.chars().find_map(|c| match c {
                '€' => Some("EUR"),
                '$' => Some("USD"),
                '£' => Some("GBP"),
                '¥' => Some("JPY"),
                '₴' => Some("UAH"),
                '₺' => Some("TRY"),
                _ => None,
            })
        })
        .unwrap_or(default_currency);
    format!("{:.2} {}", amount, currency)
}

/// Stable id derived from an encoded link: first 16 hex digits of SHA-256
pub fn synthesize_id(link: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(link.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Lowercased element and attribute names any field selector of the spec
/// walks through
fn consumed_names(spec: &SpecDefinition) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for selector in [
        &spec.id_paths,
        &spec.link_paths,
        &spec.image_paths,
        &spec.gallery_paths,
        &spec.availability_paths,
        &spec.price_paths,
    ]
    .into_iter()
    .flatten()
    {
        for step in selector.steps() {
            names.insert(step.local.to_lowercase());
        }
        if selector.steps().is_empty() {
            if let Some(attr) = selector.attribute() {
                names.insert(attr.to_lowercase());
            }
        }
    }
    names
}

/// Maps feeds onto canonical entries
pub struct FeedFixer<'r> {
    registry: &'r SpecRegistry,
    options: FixOptions,
}

impl<'r> FeedFixer<'r> {
    pub fn new(registry: &'r SpecRegistry, options: FixOptions) -> Self {
        Self { registry, options }
    }

    pub fn options(&self) -> &FixOptions {
        &self.options
    }

    /// Map one item. Returns the entry and the tags nobody claimed.
    pub fn map_item(
        &self,
        item: Node,
        reader: Option<&FieldReader>,
    ) -> (CanonicalEntry, Vec<(String, Vec<String>)>) {
        let currency = self.options.default_currency.as_str();
        let mut entry = CanonicalEntry::default();

        if let Some(reader) = reader {
            entry.set(CanonicalField::Id, reader.id(item));
            entry.set(CanonicalField::Link, reader.link(item));
            entry.set(CanonicalField::ImageLink, reader.image(item));
            for url in reader.gallery(item) {
                entry.add_image(&url);
            }
            entry.set(CanonicalField::Availability, reader.availability(item));
            entry.set(
                CanonicalField::Price,
                normalize_price(&reader.price(item), currency),
            );
        }

        let consumed = reader.map(|r| consumed_names(r.spec())).unwrap_or_default();
        let bag = collect_item_values(item);
        let mut unmapped = Vec::new();

        for (tag, values) in &bag {
            if self.options.tag_map.contains_key(tag) {
                continue;
            }
            match canonical_field(tag) {
                Some(field) => {
                    for value in values {
                        entry.push(field, value, currency);
                    }
                }
                None if tag.contains("image") || tag.contains("img") => {
                    for value in values.iter().filter(|v| is_urlish(v)) {
                        entry.add_image(value);
                    }
                }
                None if consumed.contains(tag) => {}
                None => unmapped.push((tag.clone(), values.clone())),
            }
        }

        for (source, target) in &self.options.tag_map {
            let Some((_, values)) = bag.iter().find(|(t, _)| t == source) else {
                continue;
            };
            match target {
                CanonicalField::AdditionalImageLink => {
                    for value in values.iter().filter(|v| is_urlish(v)) {
                        entry.add_image(value);
                    }
                }
                CanonicalField::Link => {
                    if let Some(last) = values.iter().rev().find(|v| !v.trim().is_empty()) {
                        entry.set(CanonicalField::Link, encode_url(last));
                    }
                }
                CanonicalField::ImageLink => {
                    for value in values.iter().filter(|v| !v.trim().is_empty()) {
                        entry.offer_image(value);
                    }
                }
                CanonicalField::Price => {
                    if let Some(last) = values.iter().rev().find(|v| !v.trim().is_empty()) {
                        entry.set(CanonicalField::Price, normalize_price(last, currency));
                    }
                }
                field => {
                    if let Some(first) = values.first() {
                        entry.set_if_empty(*field, first.clone());
                    }
                }
            }
        }

        for field in CanonicalField::ALL.into_iter().filter(CanonicalField::is_text) {
            if let Some(value) = entry.fields.get_mut(&field) {
                *value = value.trim().to_string();
            }
        }
        entry.fields.retain(|_, v| !v.is_empty());

        (entry, unmapped)
    }

    /// Detect, pick an item source and map every item
    pub fn fix(&self, doc: &FeedDocument) -> FixOutcome {
        let detection = Detector::new(self.registry)
            .with_weights(self.options.weights.clone())
            .detect(doc);

        let spec = self.registry.get(detection.spec_name()).or_else(|| {
            detection
                .closest()
                .first()
                .and_then(|best| self.registry.get(&best.spec))
        });

        let mut nodes = spec.map(|s| item_nodes(doc, s)).unwrap_or_default();
        if nodes.is_empty() {
            nodes = doc.repeated_elements();
        }
        match spec {
            Some(s) if detection.is_unknown() => {
                info!("Unknown feed; mapping {} item(s) using '{}'", nodes.len(), s.name)
            }
            Some(s) => debug!("Mapping {} item(s) as '{}'", nodes.len(), s.name),
            None => info!("Unknown feed; mapping {} repeated element(s)", nodes.len()),
        }

        let reader = spec.map(FieldReader::new);
        let mut entries = Vec::with_capacity(nodes.len());
        let mut unmapped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut synthesized_ids = 0;
        let mut missing_ids = 0;

        for node in nodes {
            let (mut entry, leftovers) = self.map_item(node, reader.as_ref());

            if entry.get(CanonicalField::Id).is_empty() {
                let link = entry.get(CanonicalField::Link).to_string();
                if self.options.synthesize_ids && !link.is_empty() {
                    entry.set(CanonicalField::Id, synthesize_id(&link));
                    entry.id_synthesized = true;
                    synthesized_ids += 1;
                } else {
                    missing_ids += 1;
                }
            }

            for (tag, values) in leftovers {
                let examples = unmapped.entry(tag).or_default();
                if let Some(example) = values.into_iter().find(|v| !v.trim().is_empty()) {
                    if examples.len() < MAX_EXAMPLES {
                        examples.insert(example);
                    }
                }
            }
            entries.push(entry);
        }

        let mut ids = DuplicateTracker::new();
        let mut links = DuplicateTracker::new();
        for (index, entry) in entries.iter().enumerate() {
            ids.observe(index, entry.get(CanonicalField::Id));
            links.observe(index, entry.get(CanonicalField::Link));
        }

        FixOutcome {
            source_spec: spec.map(|s| s.name.clone()),
            detection,
            entries,
            unmapped,
            duplicate_ids: ids.into_pairs(),
            duplicate_links: links.into_pairs(),
            synthesized_ids,
            missing_ids,
            policy: self.options.duplicates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CENEO, GOOGLE_ATOM, HEUREKA};
    use pretty_assertions::assert_eq;

    fn fix_with(xml: &str, options: FixOptions) -> FixOutcome {
        let doc = FeedDocument::parse(xml).unwrap();
        let registry = SpecRegistry::builtin();
        FeedFixer::new(&registry, options).fix(&doc)
    }

    fn fix(xml: &str) -> FixOutcome {
        fix_with(xml, FixOptions::default())
    }

    #[test]
    fn test_normalize_price() {
        assert_eq!(normalize_price("12,5", "EUR"), "12.50 EUR");
        assert_eq!(normalize_price("1.234,56 CZK", "EUR"), "1234.56 CZK");
        assert_eq!(normalize_price("$19.9", "EUR"), "19.90 USD");
        assert_eq!(normalize_price("10.00 EUR", "CZK"), "10.00 EUR");
        assert_eq!(normalize_price("call us", "EUR"), "");
        assert_eq!(normalize_price("", "EUR"), "");
    }

    #[test]
    fn test_synthesize_id_is_stable() {
        let a = synthesize_id("https://shop.example/p/1");
        let b = synthesize_id("https://shop.example/p/1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, synthesize_id("https://shop.example/p/2"));
    }

    #[test]
    fn test_heureka_to_canonical() {
        let xml = r#"<SHOP><SHOPITEM>
  <ITEM_ID>H1</ITEM_ID>
  <PRODUCTNAME>  Kettle  </PRODUCTNAME>
  <URL>https://shop.example/kettle</URL>
  <IMGURL>https://shop.example/k.jpg</IMGURL>
  <IMGURL_ALTERNATIVE>https://shop.example/k2.jpg</IMGURL_ALTERNATIVE>
  <PRICE_VAT>899</PRICE_VAT>
  <MANUFACTURER>Acme</MANUFACTURER>
  <EAN>8590000000001</EAN>
  <DELIVERY_DATE>0</DELIVERY_DATE>
  <WARRANTY>24</WARRANTY>
</SHOPITEM></SHOP>"#;
        let outcome = fix(xml);
        assert_eq!(outcome.source_spec.as_deref(), Some(HEUREKA));
        let entry = &outcome.entries[0];
        assert_eq!(entry.get(CanonicalField::Id), "H1");
        assert_eq!(entry.get(CanonicalField::Title), "Kettle");
        assert_eq!(entry.get(CanonicalField::Link), "https://shop.example/kettle");
        assert_eq!(entry.get(CanonicalField::ImageLink), "https://shop.example/k.jpg");
        assert_eq!(entry.additional_images, vec!["https://shop.example/k2.jpg"]);
        assert_eq!(entry.get(CanonicalField::Price), "899.00 EUR");
        assert_eq!(entry.get(CanonicalField::Brand), "Acme");
        assert_eq!(entry.get(CanonicalField::Gtin), "8590000000001");
        assert_eq!(entry.get(CanonicalField::Availability), "in stock");

        let warranty: Vec<&String> = outcome.unmapped["warranty"].iter().collect();
        assert_eq!(warranty, vec!["24"]);
        assert!(!outcome.unmapped.contains_key("delivery_date"));
    }

    #[test]
    fn test_ceneo_nested_images() {
        let xml = r#"<offers><o id="7" url="https://x.example/7" price="10" avail="1">
  <name>Mug</name>
  <imgs><main url="https://x.example/7.jpg"/><i url="https://x.example/7b.jpg"/></imgs>
</o></offers>"#;
        let outcome = fix(xml);
        assert_eq!(outcome.source_spec.as_deref(), Some(CENEO));
        let entry = &outcome.entries[0];
        assert_eq!(entry.get(CanonicalField::ImageLink), "https://x.example/7.jpg");
        assert_eq!(entry.additional_images, vec!["https://x.example/7b.jpg"]);
        assert_eq!(entry.get(CanonicalField::Price), "10.00 EUR");
        assert!(outcome.unmapped.is_empty());
    }

    #[test]
    fn test_tag_map_overrides() {
        let xml = "<products><product><identifier>1</identifier><name>A</name>\
                   <product_url>https://x.example/a</product_url><pic>https://x.example/a.jpg</pic>\
                   <season>winter</season></product></products>";
        let outcome = fix(xml);
        assert!(outcome.unmapped.contains_key("pic"));
        assert!(outcome.unmapped.contains_key("season"));

        let mut options = FixOptions::default();
        options
            .tag_map
            .insert("pic".to_string(), CanonicalField::ImageLink);
        options
            .tag_map
            .insert("season".to_string(), CanonicalField::ProductType);
        let outcome = fix_with(xml, options);
        let entry = &outcome.entries[0];
        assert_eq!(entry.get(CanonicalField::ImageLink), "https://x.example/a.jpg");
        assert_eq!(entry.get(CanonicalField::ProductType), "winter");
        assert!(outcome.unmapped.is_empty());
    }

    #[test]
    fn test_missing_id_synthesized_from_link() {
        let xml = "<products><product><name>A</name>\
                   <product_url>https://x.example/a</product_url></product></products>";
        let outcome = fix(xml);
        let entry = &outcome.entries[0];
        assert!(entry.id_synthesized);
        assert_eq!(entry.get(CanonicalField::Id), synthesize_id("https://x.example/a"));
        assert_eq!(outcome.synthesized_ids, 1);

        let options = FixOptions {
            synthesize_ids: false,
            ..FixOptions::default()
        };
        let outcome = fix_with(xml, options);
        assert_eq!(outcome.missing_ids, 1);
        assert!(outcome.output().is_empty());
    }

    #[test]
    fn test_duplicate_policy() {
        let xml = "<SHOP>\
<SHOPITEM><ITEM_ID>1</ITEM_ID><URL>https://x.example/a</URL></SHOPITEM>\
<SHOPITEM><ITEM_ID>1</ITEM_ID><URL>https://x.example/b</URL></SHOPITEM>\
<SHOPITEM><ITEM_ID>2</ITEM_ID><URL>https://x.example/a</URL></SHOPITEM>\
<SHOPITEM><ITEM_ID>3</ITEM_ID><URL>https://x.example/c</URL></SHOPITEM>\
</SHOP>";
        let outcome = fix(xml);
        assert_eq!(outcome.duplicate_ids.len(), 1);
        assert_eq!(outcome.duplicate_links.len(), 1);
        let kept: Vec<&str> = outcome
            .output()
            .iter()
            .map(|e| e.get(CanonicalField::Id))
            .collect();
        assert_eq!(kept, vec!["1", "3"]);

        let all = apply_duplicate_policy(&outcome.entries, DuplicatePolicy::KeepAll);
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_unknown_feed_best_effort() {
        let xml = "<catalog>\
<record><item_id>1</item_id><productname>A</productname><url>https://x.example/a</url><image>https://x.example/a.jpg</image></record>\
<record><item_id>2</item_id><productname>B</productname><url>https://x.example/b</url><image>https://x.example/b.jpg</image></record>\
</catalog>";
        let outcome = fix(xml);
        assert!(outcome.detection.is_unknown());
        assert!(outcome.source_spec.is_some());
        assert_eq!(outcome.entries.len(), 2);
        let entry = &outcome.entries[1];
        assert_eq!(entry.get(CanonicalField::Id), "2");
        assert_eq!(entry.get(CanonicalField::Title), "B");
        assert_eq!(entry.get(CanonicalField::Link), "https://x.example/b");
        assert_eq!(entry.get(CanonicalField::ImageLink), "https://x.example/b.jpg");
    }

    #[test]
    fn test_reader_link_wins_over_later_links() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom" xmlns:g="http://base.google.com/ns/1.0">
  <entry>
    <g:id>1</g:id>
    <link rel="alternate" href="https://x.example/p/1"/>
    <link rel="related" href="https://x.example/related"/>
    <g:image_link>https://x.example/1.jpg</g:image_link>
  </entry>
</feed>"#;
        let outcome = fix(xml);
        assert_eq!(outcome.source_spec.as_deref(), Some(GOOGLE_ATOM));
        assert_eq!(
            outcome.entries[0].get(CanonicalField::Link),
            "https://x.example/p/1"
        );
    }

    #[test]
    fn test_duplicate_policy_from_str() {
        assert_eq!("keep-first".parse(), Ok(DuplicatePolicy::KeepFirst));
        assert_eq!("ALL".parse(), Ok(DuplicatePolicy::KeepAll));
        assert!("sometimes".parse::<DuplicatePolicy>().is_err());
    }
}
