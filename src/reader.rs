//! Field extraction from item elements

use crate::document::{line_of, local_name, node_text, FeedDocument};
use crate::price::extract_numeric;
use crate::registry::SpecDefinition;
use crate::selector::{all_of, first_of};
use crate::url::encode_url;
use roxmltree::Node;
use serde::Serialize;
use std::collections::BTreeMap;

/// Item elements of a document under a spec, in document order.
///
/// The spec's item selectors are evaluated first. If none matches, elements
/// are matched case-insensitively by the local name of each selector's last
/// step, namespace ignored.
pub fn item_nodes<'a, 'input>(
    doc: &'a FeedDocument<'input>,
    spec: &SpecDefinition,
) -> Vec<Node<'a, 'input>> {
    let root = doc.root();
    let mut nodes: Vec<Node> = spec
        .item_paths
        .iter()
        .flat_map(|selector| selector.nodes(root))
        .filter(|n| *n != root)
        .collect();

    if nodes.is_empty() {
        let mut wanted: Vec<String> = spec
            .item_paths
            .iter()
            .filter_map(|s| s.last_local())
            .map(str::to_lowercase)
            .collect();
        wanted.dedup();
        nodes = wanted.iter().flat_map(|local| doc.all_local(local)).collect();
    }

    // Several selectors can reach overlapping sets
    nodes.sort_by_key(|n| n.range().start);
    nodes.dedup();
    nodes
}

/// Fields extracted from one item
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ItemRecord {
    /// Position in the item sequence
    pub index: usize,
    /// Source line of the item element
    pub line: u32,
    pub id: String,
    /// Percent-encoded link
    pub link: String,
    pub link_raw: String,
    /// Percent-encoded primary image
    pub image: String,
    pub image_raw: String,
    pub gallery: Vec<String>,
    pub availability: String,
    pub price_raw: String,
    pub price: Option<f64>,
    /// Fields the spec does not model: child text and item attributes
    pub attrs: BTreeMap<String, String>,
}

/// Applies one spec's selectors to item elements
pub struct FieldReader<'s> {
    spec: &'s SpecDefinition,
    modeled: Vec<String>,
}

impl<'s> FieldReader<'s> {
    pub fn new(spec: &'s SpecDefinition) -> Self {
        Self {
            spec,
            modeled: spec.modeled_names(),
        }
    }

    pub fn spec(&self) -> &'s SpecDefinition {
        self.spec
    }

    pub fn id(&self, item: Node) -> String {
        first_of(&self.spec.id_paths, item)
    }

    pub fn link_raw(&self, item: Node) -> String {
        first_of(&self.spec.link_paths, item)
    }

    pub fn link(&self, item: Node) -> String {
        encode_url(&self.link_raw(item))
    }

    pub fn image_raw(&self, item: Node) -> String {
        first_of(&self.spec.image_paths, item)
    }

    pub fn image(&self, item: Node) -> String {
        encode_url(&self.image_raw(item))
    }

    /// Encoded gallery images, de-duplicated in first-seen order
    pub fn gallery(&self, item: Node) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for url in all_of(&self.spec.gallery_paths, item) {
            let encoded = encode_url(&url);
            if !out.contains(&encoded) {
                out.push(encoded);
            }
        }
        out
    }

    /// Availability from the selectors, then the spec's derivation rule
    pub fn availability(&self, item: Node) -> String {
        let value = first_of(&self.spec.availability_paths, item);
        if !value.is_empty() {
            return value;
        }
        self.spec
            .availability_rule
            .as_ref()
            .and_then(|rule| rule.derive(item))
            .unwrap_or_default()
    }

    pub fn price(&self, item: Node) -> String {
        first_of(&self.spec.price_paths, item)
    }

    /// Child texts and item attributes not consumed by a field selector
    pub fn attrs(&self, item: Node) -> BTreeMap<String, String> {
        let mut attrs = BTreeMap::new();
        for attr in item.attributes() {
            let name = attr.name().to_lowercase();
            let value = attr.value().trim();
            if !value.is_empty() && !self.modeled.contains(&name) {
                attrs.entry(name).or_insert_with(|| value.to_string());
            }
        }
        for child in item.children().filter(|c| c.is_element()) {
            let name = local_name(&child);
            let value = node_text(&child);
            if !value.is_empty() && !self.modeled.contains(&name) {
                attrs.entry(name).or_insert_with(|| value.to_string());
            }
        }
        attrs
    }

    /// Build the full record for one item
    pub fn read(&self, item: Node, index: usize) -> ItemRecord {
        let link_raw = self.link_raw(item);
        let image_raw = self.image_raw(item);
        let price_raw = self.price(item);
        let price = if price_raw.is_empty() {
            None
        } else {
            extract_numeric(&price_raw)
        };

        ItemRecord {
            index,
            line: line_of(&item),
            id: self.id(item),
            link: encode_url(&link_raw),
            link_raw,
            image: encode_url(&image_raw),
            image_raw,
            gallery: self.gallery(item),
            availability: self.availability(item),
            price_raw,
            price,
            attrs: self.attrs(item),
        }
    }
}
