//! Feed format detection
//!
//! Detection runs in two stages. The strict stage walks the registry in
//! priority order and returns the first spec whose declarative predicate
//! holds. When nothing matches, every spec is scored against the document
//! and the best candidates are reported with hints explaining the gap.

use crate::document::{child_names, local_name, FeedDocument};
use crate::fixer::canonical_field;
use crate::reader::{item_nodes, FieldReader};
use crate::registry::{ItemShape, SpecDefinition, SpecRegistry, UNKNOWN};
use log::{debug, info};
use roxmltree::Node;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Constants of the closest-match score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    /// Weight of the Jaccard similarity between observed and signature tags
    pub tag_similarity: f64,
    /// Weight of the fraction of required field groups present
    pub required_coverage: f64,
    /// Weight of the mean id/link/image retrievability
    pub field_rate: f64,
    pub availability_rate: f64,
    pub root_bonus: f64,
    pub namespace_bonus: f64,
    /// Multiplier applied to large candidate sets with low tag similarity
    pub damping: f64,
    pub large_candidate_threshold: usize,
    pub low_similarity_threshold: f64,
    /// Items sampled per spec when scoring
    pub sample_size: usize,
    /// Number of closest specs reported
    pub hints: usize,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            tag_similarity: 0.35,
            required_coverage: 0.25,
            field_rate: 0.20,
            availability_rate: 0.05,
            root_bonus: 0.10,
            namespace_bonus: 0.05,
            damping: 0.5,
            large_candidate_threshold: 50,
            low_similarity_threshold: 0.10,
            sample_size: 25,
            hints: 2,
        }
    }
}

/// Breakdown of one closest-match score
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoreComponents {
    pub tag_similarity: f64,
    pub required_coverage: f64,
    pub field_rate: f64,
    pub availability_rate: f64,
    pub root_bonus: f64,
    pub namespace_bonus: f64,
    pub candidates: usize,
    pub damped: bool,
}

/// How close a document is to one spec
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecScore {
    pub spec: String,
    pub score: f64,
    pub components: ScoreComponents,
    pub hints: Vec<String>,
}

/// Result of detection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Detection {
    Matched { spec: String },
    Unknown { closest: Vec<SpecScore> },
}

impl Detection {
    /// Detected spec name, or `UNKNOWN`
    pub fn spec_name(&self) -> &str {
        match self {
            Detection::Matched { spec } => spec,
            Detection::Unknown { .. } => UNKNOWN,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Detection::Unknown { .. })
    }

    /// Closest candidates, empty for a strict match
    pub fn closest(&self) -> &[SpecScore] {
        match self {
            Detection::Matched { .. } => &[],
            Detection::Unknown { closest } => closest,
        }
    }
}

/// Check one spec's strict predicate
pub fn matches_strictly(spec: &SpecDefinition, doc: &FeedDocument) -> bool {
    let rule = &spec.detection;

    let Some(first_item) = doc.first_local(&rule.item_tag) else {
        return false;
    };

    if !spec
        .required_namespace_fragments
        .iter()
        .all(|f| doc.contains_fragment(f))
    {
        return false;
    }
    if rule
        .forbidden_namespace_fragments
        .iter()
        .any(|f| doc.contains_fragment(f))
    {
        return false;
    }

    if rule.require_root && !spec.expected_root_names.contains(&doc.root_name()) {
        return false;
    }

    match &rule.item_shape {
        None => true,
        Some(ItemShape::HasChild { tag }) => child_names(&first_item).contains(&tag.to_lowercase()),
        Some(ItemShape::Children {
            all_of,
            any_of,
            min_any,
        }) => {
            let names = child_names(&first_item);
            all_of.iter().all(|t| names.contains(&t.to_lowercase()))
                && any_of
                    .iter()
                    .filter(|t| names.contains(&t.to_lowercase()))
                    .count()
                    >= *min_any
        }
    }
}

/// Lowercased tag names observed on sampled items: attributes, children
/// and grandchildren
pub fn observed_tags(items: &[Node]) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    for item in items {
        for attr in item.attributes() {
            tags.insert(attr.name().to_lowercase());
        }
        for child in item.children().filter(|c| c.is_element()) {
            tags.insert(local_name(&child));
            for grandchild in child.children().filter(|c| c.is_element()) {
                tags.insert(local_name(&grandchild));
            }
        }
    }
    tags
}

fn jaccard(observed: &BTreeSet<String>, signature: &BTreeSet<String>) -> f64 {
    let union = observed.union(signature).count();
    if union == 0 {
        return 0.0;
    }
    observed.intersection(signature).count() as f64 / union as f64
}

fn rate<F>(items: &[Node], present: F) -> f64
where
    F: Fn(Node) -> bool,
{
    if items.is_empty() {
        return 0.0;
    }
    items.iter().filter(|n| present(**n)).count() as f64 / items.len() as f64
}

/// Classifies documents against a registry
pub struct Detector<'r> {
    registry: &'r SpecRegistry,
    weights: ScoreWeights,
}

impl<'r> Detector<'r> {
    pub fn new(registry: &'r SpecRegistry) -> Self {
        Self {
            registry,
            weights: ScoreWeights::default(),
        }
    }

    pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Strict match, else the closest candidates
    pub fn detect(&self, doc: &FeedDocument) -> Detection {
        if let Some(spec) = self.strict_match(doc) {
            debug!("Strict match: {}", spec.name);
            return Detection::Matched {
                spec: spec.name.clone(),
            };
        }

        let mut closest = self.rank(doc);
        closest.truncate(self.weights.hints);
        if let Some(best) = closest.first() {
            info!(
                "No strict match; closest is '{}' (score {:.3})",
                best.spec, best.score
            );
        }
        Detection::Unknown { closest }
    }

    /// First spec, in priority order, whose strict predicate holds
    pub fn strict_match(&self, doc: &FeedDocument) -> Option<&'r SpecDefinition> {
        self.registry.iter().find(|spec| matches_strictly(spec, doc))
    }

    /// Every spec scored against the document, best first
    pub fn rank(&self, doc: &FeedDocument) -> Vec<SpecScore> {
        let generic = doc.repeated_elements();
        let mut scores: Vec<SpecScore> = self
            .registry
            .iter()
            .map(|spec| self.score(doc, spec, &generic))
            .collect();
        scores.sort_by(|a, b| b.score.total_cmp(&a.score));
        scores
    }

    /// Score one spec. Item candidates come from the spec's own item
    /// selectors, or `generic` when those find nothing.
    pub fn score<'a, 'input>(
        &self,
        doc: &'a FeedDocument<'input>,
        spec: &SpecDefinition,
        generic: &[Node<'a, 'input>],
    ) -> SpecScore {
        let w = &self.weights;
        let own = item_nodes(doc, spec);
        let candidates: &[Node<'a, 'input>] = if own.is_empty() { generic } else { &own };
        let sample = &candidates[..candidates.len().min(w.sample_size)];

        let observed = observed_tags(sample);
        let signature: BTreeSet<String> = spec.signature_tags.iter().cloned().collect();
        let tag_similarity = jaccard(&observed, &signature);

        let required_coverage = if spec.required_fields.is_empty() {
            0.0
        } else {
            spec.required_fields
                .iter()
                .filter(|group| group.satisfied_by(&observed))
                .count() as f64
                / spec.required_fields.len() as f64
        };

        let reader = FieldReader::new(spec);
        let field_rate = (rate(sample, |n| !reader.id(n).is_empty())
            + rate(sample, |n| !reader.link_raw(n).is_empty())
            + rate(sample, |n| !reader.image_raw(n).is_empty()))
            / 3.0;
        let availability_rate = rate(sample, |n| !reader.availability(n).is_empty());

        let root = doc.root_name();
        let root_ok = spec.expected_root_names.contains(&root);
        let namespace_ok = !spec.required_namespace_fragments.is_empty()
            && spec
                .required_namespace_fragments
                .iter()
                .all(|f| doc.contains_fragment(f));

        let components = ScoreComponents {
            tag_similarity,
            required_coverage,
            field_rate,
            availability_rate,
            root_bonus: if root_ok { w.root_bonus } else { 0.0 },
            namespace_bonus: if namespace_ok { w.namespace_bonus } else { 0.0 },
            candidates: candidates.len(),
            damped: candidates.len() >= w.large_candidate_threshold
                && tag_similarity < w.low_similarity_threshold,
        };

        let mut score = w.tag_similarity * tag_similarity
            + w.required_coverage * required_coverage
            + w.field_rate * field_rate
            + w.availability_rate * availability_rate
            + components.root_bonus
            + components.namespace_bonus;
        if components.damped {
            score *= w.damping;
        }

        let mut hints = field_hints(spec, &observed);
        if !root_ok && !spec.expected_root_names.is_empty() {
            hints.push(format!(
                "root element is '{}', expected {}",
                root,
                spec.expected_root_names.join(" or ")
            ));
        }
        for fragment in &spec.required_namespace_fragments {
            if !doc.contains_fragment(fragment) {
                hints.push(format!("namespace '{}' not declared", fragment));
            }
        }

        SpecScore {
            spec: spec.name.clone(),
            score,
            components,
            hints,
        }
    }
}

/// Describe each unsatisfied required group. When an observed tag plays the
/// same canonical role as the group, name it.
pub fn field_hints(spec: &SpecDefinition, observed: &BTreeSet<String>) -> Vec<String> {
    let mut hints = Vec::new();
    for group in &spec.required_fields {
        if group.satisfied_by(observed) {
            continue;
        }
        let expected = group.aliases().first().map(String::as_str).unwrap_or("");
        let role = group.aliases().iter().find_map(|a| canonical_field(a));
        let source = role.and_then(|role| {
            observed
                .iter()
                .find(|tag| canonical_field(tag) == Some(role))
        });
        hints.push(match source {
            Some(tag) => format!("source uses '{}' where this spec expects '{}'", tag, expected),
            None => format!("missing required field '{}'", group),
        });
    }
    hints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{
        DetectionRule, RequiredField, CENEJE, CENEO, COMPARI, GOOGLE_ATOM, GOOGLE_PLAIN_RSS,
        GOOGLE_RSS, HEUREKA, SKROUTZ,
    };
    use crate::selector::Selector;

    fn detect(xml: &str) -> Detection {
        let doc = FeedDocument::parse(xml).unwrap();
        let registry = SpecRegistry::builtin();
        Detector::new(&registry).detect(&doc)
    }

    #[test]
    fn test_google_rss() {
        let xml = r#"<rss version="2.0" xmlns:g="http://base.google.com/ns/1.0"><channel>
            <item><g:id>1</g:id></item></channel></rss>"#;
        assert_eq!(detect(xml).spec_name(), GOOGLE_RSS);
    }

    #[test]
    fn test_google_atom_wins_over_rss() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom" xmlns:g="http://base.google.com/ns/1.0">
            <entry><g:id>1</g:id></entry></feed>"#;
        assert_eq!(detect(xml).spec_name(), GOOGLE_ATOM);
    }

    #[test]
    fn test_google_without_namespace() {
        let xml = "<rss><channel><item><id>1</id><link>https://x.example/1</link>\
                   <image_link>https://x.example/1.jpg</image_link></item></channel></rss>";
        assert_eq!(detect(xml).spec_name(), GOOGLE_PLAIN_RSS);
    }

    #[test]
    fn test_plain_items_fall_to_ceneje() {
        let xml = "<rss><channel><item><id>1</id><link>https://x.example/1</link></item></channel></rss>";
        assert_eq!(detect(xml).spec_name(), CENEJE);
    }

    #[test]
    fn test_marketplaces() {
        assert_eq!(
            detect("<SHOP><SHOPITEM><ITEM_ID>1</ITEM_ID></SHOPITEM></SHOP>").spec_name(),
            HEUREKA
        );
        assert_eq!(
            detect(r#"<offers><group><o id="1"/></group></offers>"#).spec_name(),
            CENEO
        );
        assert_eq!(
            detect("<items><Item><ID>1</ID></Item></items>").spec_name(),
            CENEJE
        );
    }

    #[test]
    fn test_skroutz_before_compari() {
        let skroutz = "<mywebstore><products><product><id>1</id>\
                       <price_with_vat>9.90</price_with_vat></product></products></mywebstore>";
        assert_eq!(detect(skroutz).spec_name(), SKROUTZ);

        let compari = "<products><product><identifier>1</identifier>\
                       <price>9.90</price></product></products>";
        assert_eq!(detect(compari).spec_name(), COMPARI);
    }

    #[test]
    fn test_unknown_reports_closest() {
        let xml = "<catalog>\
            <record><item_id>1</item_id><productname>A</productname><url>https://x.example/a</url><image>https://x.example/a.jpg</image></record>\
            <record><item_id>2</item_id><productname>B</productname><url>https://x.example/b</url><image>https://x.example/b.jpg</image></record>\
            </catalog>";
        let detection = detect(xml);
        assert!(detection.is_unknown());
        assert_eq!(detection.spec_name(), UNKNOWN);

        let closest = detection.closest();
        assert_eq!(closest.len(), 2);
        assert_eq!(closest[0].spec, HEUREKA);
        assert!(closest[0].score >= closest[1].score);
        assert!(closest[0]
            .hints
            .iter()
            .any(|h| h == "source uses 'image' where this spec expects 'imgurl'"));
        assert!(closest[0]
            .hints
            .iter()
            .any(|h| h.starts_with("root element is 'catalog'")));
    }

    fn synthetic(name: &str, priority: u16, tags: &[&str]) -> SpecDefinition {
        SpecDefinition {
            name: name.to_string(),
            priority,
            item_paths: vec![Selector::descendant(&format!("{}_item", name))],
            id_paths: vec![Selector::child(tags[0])],
            link_paths: Vec::new(),
            image_paths: Vec::new(),
            gallery_paths: Vec::new(),
            availability_paths: Vec::new(),
            price_paths: Vec::new(),
            required_fields: tags.iter().map(|t| RequiredField::new(t)).collect(),
            availability_aliases: Vec::new(),
            signature_tags: tags.iter().map(|t| t.to_string()).collect(),
            expected_root_names: vec!["elsewhere".to_string()],
            required_namespace_fragments: Vec::new(),
            availability_rule: None,
            price_policy: Default::default(),
            detection: DetectionRule {
                item_tag: format!("{}_item", name),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_signature_overlap_ranks_higher() {
        let mut registry = SpecRegistry::empty();
        registry.insert(synthetic("x", 1, &["alpha", "beta", "gamma"])).unwrap();
        registry.insert(synthetic("y", 2, &["delta", "epsilon"])).unwrap();

        let xml = "<catalog><row><alpha>1</alpha><beta>2</beta><gamma>3</gamma></row>\
                   <row><alpha>4</alpha><beta>5</beta><gamma>6</gamma></row></catalog>";
        let doc = FeedDocument::parse(xml).unwrap();
        let detection = Detector::new(&registry).detect(&doc);

        let closest = detection.closest();
        assert_eq!(closest[0].spec, "x");
        assert_eq!(closest[1].spec, "y");
        assert!(closest[0].score > closest[1].score);
        assert_eq!(closest[1].score, 0.0);
        assert_eq!(closest[0].components.tag_similarity, 1.0);
    }

    #[test]
    fn test_damping_on_large_dissimilar_sets() {
        let mut registry = SpecRegistry::empty();
        registry.insert(synthetic("x", 1, &["alpha"])).unwrap();

        let rows: String = (0..60)
            .map(|i| format!("<row><k{}>v</k{}><alpha>a</alpha></row>", i, i))
            .collect();
        let xml = format!("<catalog>{}</catalog>", rows);
        let doc = FeedDocument::parse(&xml).unwrap();

        let weights = ScoreWeights {
            sample_size: 60,
            ..ScoreWeights::default()
        };
        let scores = Detector::new(&registry).with_weights(weights).rank(&doc);
        assert!(scores[0].components.damped);
        assert_eq!(scores[0].components.candidates, 60);
    }

    #[test]
    fn test_ceneo_spec_not_matched_by_other_roots() {
        let doc = FeedDocument::parse("<offers><o/></offers>").unwrap();
        let registry = SpecRegistry::builtin();
        assert!(matches_strictly(registry.get(CENEO).unwrap(), &doc));
        assert!(!matches_strictly(registry.get(GOOGLE_RSS).unwrap(), &doc));
    }

    #[test]
    fn test_detection_is_repeatable() {
        let fixtures = [
            include_str!("../tests/fixtures/google_rss.xml"),
            include_str!("../tests/fixtures/google_atom.xml"),
            include_str!("../tests/fixtures/google_plain.xml"),
            include_str!("../tests/fixtures/heureka.xml"),
            include_str!("../tests/fixtures/compari.xml"),
            include_str!("../tests/fixtures/skroutz.xml"),
            include_str!("../tests/fixtures/ceneje.xml"),
            include_str!("../tests/fixtures/ceneo.xml"),
            include_str!("../tests/fixtures/unknown.xml"),
        ];
        let registry = SpecRegistry::builtin();
        let detector = Detector::new(&registry);

        for xml in fixtures {
            let doc = FeedDocument::parse(xml).unwrap();
            let first = detector.detect(&doc);
            let second = detector.detect(&doc);
            assert_eq!(first.spec_name(), second.spec_name());

            let ranking = |d: &Detection| -> Vec<(String, f64)> {
                d.closest()
                    .iter()
                    .map(|s| (s.spec.clone(), s.score))
                    .collect()
            };
            assert_eq!(ranking(&first), ranking(&second));
            assert_eq!(first, second);
        }

        let doc = FeedDocument::parse(include_str!("../tests/fixtures/unknown.xml")).unwrap();
        let detection = detector.detect(&doc);
        assert!(detection.is_unknown());
        assert!(!detection.closest().is_empty());
    }
}
