//! Specification registry
//!
//! Every supported marketplace format is one [`SpecDefinition`] record. The
//! detector and the field readers are generic over these records, so a new
//! format is a new table entry (built in, or loaded from a YAML/JSON file)
//! rather than new code.

use crate::config::ConfigError;
use crate::document::{ATOM_NS, GOOGLE_NS};
use crate::price::PricePolicy;
use crate::selector::Selector;
use log::{debug, info};
use roxmltree::Node;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub const GOOGLE_RSS: &str = "Google Merchant (g:) RSS";
pub const GOOGLE_ATOM: &str = "Google Merchant (g:) Atom";
pub const GOOGLE_PLAIN_RSS: &str = "Google Merchant (no-namespace) RSS";
pub const HEUREKA: &str = "Heureka strict";
pub const COMPARI: &str = "Compari / Árukereső / Pazaruvaj (case-insensitive)";
pub const SKROUTZ: &str = "Skroutz strict";
pub const CENEJE: &str = "Jeftinije / Ceneje strict";
pub const CENEO: &str = "Ceneo strict";

/// Name reported when no spec matches
pub const UNKNOWN: &str = "UNKNOWN";

const GOOGLE_FRAGMENT: &str = "base.google.com/ns/1.0";

/// A required field: one or more acceptable tag aliases (`a|b`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct RequiredField {
    aliases: Vec<String>,
}

impl RequiredField {
    pub fn new(spec: &str) -> Self {
        Self {
            aliases: spec
                .split('|')
                .map(|a| a.trim().to_lowercase())
                .filter(|a| !a.is_empty())
                .collect(),
        }
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Check whether any alias appears in a set of lowercased tag names
    pub fn satisfied_by<'a, I>(&self, observed: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        observed.into_iter().any(|t| self.aliases.contains(t))
    }
}

impl From<String> for RequiredField {
    fn from(value: String) -> Self {
        RequiredField::new(&value)
    }
}

impl From<RequiredField> for String {
    fn from(field: RequiredField) -> Self {
        field.to_string()
    }
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.aliases.join("|"))
    }
}

/// Fallback rule deriving availability when no availability selector
/// yields a value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AvailabilityRule {
    /// Read a numeric lead time (days). Below `below` yields `value`; any
    /// other non-empty reading is reported as-is.
    LeadTime {
        selector: Selector,
        below: u32,
        value: String,
    },
}

impl AvailabilityRule {
    pub fn derive(&self, item: Node) -> Option<String> {
        match self {
            AvailabilityRule::LeadTime {
                selector,
                below,
                value,
            } => {
                let raw = selector.first(item);
                if raw.is_empty() {
                    return None;
                }
                let days = raw
                    .chars()
                    .all(|c| c.is_ascii_digit())
                    .then(|| raw.parse::<u64>().ok())
                    .flatten();
                match days {
                    Some(d) if d < u64::from(*below) => Some(value.clone()),
                    _ => Some(raw),
                }
            }
        }
    }
}

/// Extra condition on the first item node for strict detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ItemShape {
    /// The first item has a child with this local name
    HasChild { tag: String },
    /// The first item has every tag in `all_of` and at least `min_any` of
    /// `any_of`
    Children {
        all_of: Vec<String>,
        any_of: Vec<String>,
        min_any: usize,
    },
}

/// Declarative strict-detection predicate
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionRule {
    /// Item element local name, matched case-insensitively anywhere
    pub item_tag: String,
    /// Root local name must be one of `expected_root_names`
    pub require_root: bool,
    /// Fragments that must be absent from the document
    pub forbidden_namespace_fragments: Vec<String>,
    pub item_shape: Option<ItemShape>,
}

impl DetectionRule {
    fn on(item_tag: &str) -> Self {
        Self {
            item_tag: item_tag.to_lowercase(),
            ..Self::default()
        }
    }
}

/// One supported feed format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecDefinition {
    pub name: String,
    /// Strict detection order, lowest first
    pub priority: u16,
    pub item_paths: Vec<Selector>,
    #[serde(default)]
    pub id_paths: Vec<Selector>,
    #[serde(default)]
    pub link_paths: Vec<Selector>,
    #[serde(default)]
    pub image_paths: Vec<Selector>,
    #[serde(default)]
    pub gallery_paths: Vec<Selector>,
    #[serde(default)]
    pub availability_paths: Vec<Selector>,
    #[serde(default)]
    pub price_paths: Vec<Selector>,
    #[serde(default)]
    pub required_fields: Vec<RequiredField>,
    #[serde(default)]
    pub availability_aliases: Vec<String>,
    #[serde(default)]
    pub signature_tags: Vec<String>,
    #[serde(default)]
    pub expected_root_names: Vec<String>,
    #[serde(default)]
    pub required_namespace_fragments: Vec<String>,
    #[serde(default)]
    pub availability_rule: Option<AvailabilityRule>,
    #[serde(default)]
    pub price_policy: PricePolicy,
    pub detection: DetectionRule,
}

impl SpecDefinition {
    fn new(name: &str, priority: u16, item_paths: Vec<Selector>, detection: DetectionRule) -> Self {
        Self {
            name: name.to_string(),
            priority,
            item_paths,
            id_paths: Vec::new(),
            link_paths: Vec::new(),
            image_paths: Vec::new(),
            gallery_paths: Vec::new(),
            availability_paths: Vec::new(),
            price_paths: Vec::new(),
            required_fields: Vec::new(),
            availability_aliases: Vec::new(),
            signature_tags: Vec::new(),
            expected_root_names: Vec::new(),
            required_namespace_fragments: Vec::new(),
            availability_rule: None,
            price_policy: PricePolicy::default(),
            detection,
        }
    }

    fn required(mut self, fields: &[&str]) -> Self {
        self.required_fields = fields.iter().map(|f| RequiredField::new(f)).collect();
        self
    }

    fn signature(mut self, tags: &[&str]) -> Self {
        self.signature_tags = lowercase_all(tags);
        self
    }

    fn roots(mut self, roots: &[&str]) -> Self {
        self.expected_root_names = lowercase_all(roots);
        self
    }

    fn aliases(mut self, aliases: &[&str]) -> Self {
        self.availability_aliases = lowercase_all(aliases);
        self
    }

    /// Whether items of this spec are expected to carry a price
    pub fn checks_price(&self) -> bool {
        !self.price_paths.is_empty()
    }

    /// Lowercased child or attribute names the field selectors consume.
    /// Anything else on an item ends up in the free-form attrs.
    pub fn modeled_names(&self) -> Vec<String> {
        let mut names: Vec<String> = [
            &self.id_paths,
            &self.link_paths,
            &self.image_paths,
            &self.gallery_paths,
            &self.availability_paths,
            &self.price_paths,
        ]
        .into_iter()
        .flatten()
        .flat_map(|s| {
            let mut leaf = Vec::new();
            if let Some(first) = s.steps().first() {
                leaf.push(first.local.to_lowercase());
            } else if let Some(attr) = s.attribute() {
                leaf.push(attr.to_lowercase());
            }
            leaf
        })
        .collect();
        if let Some(AvailabilityRule::LeadTime { selector, .. }) = &self.availability_rule {
            if let Some(local) = selector.last_local() {
                names.push(local.to_lowercase());
            }
        }
        names.sort();
        names.dedup();
        names
    }

    fn normalize(&mut self) {
        self.detection.item_tag = self.detection.item_tag.to_lowercase();
        self.signature_tags = self.signature_tags.iter().map(|t| t.to_lowercase()).collect();
        self.expected_root_names = self
            .expected_root_names
            .iter()
            .map(|t| t.to_lowercase())
            .collect();
        self.availability_aliases = self
            .availability_aliases
            .iter()
            .map(|t| t.to_lowercase())
            .collect();
        if self.detection.item_tag.is_empty() {
            if let Some(local) = self.item_paths.first().and_then(Selector::last_local) {
                self.detection.item_tag = local.to_lowercase();
            }
        }
    }
}

fn lowercase_all(tags: &[&str]) -> Vec<String> {
    tags.iter().map(|t| t.to_lowercase()).collect()
}

fn g(local: &str) -> Selector {
    Selector::child_ns(GOOGLE_NS, local)
}

const GOOGLE_SIGNATURE: &[&str] = &[
    "title",
    "description",
    "link",
    "id",
    "image_link",
    "price",
    "availability",
    "brand",
    "mpn",
    "gtin",
    "condition",
    "google_product_category",
    "product_type",
    "shipping",
];

fn google_rss() -> SpecDefinition {
    let mut spec = SpecDefinition::new(
        GOOGLE_RSS,
        20,
        vec![Selector::descendant("item")],
        DetectionRule::on("item"),
    )
    .required(&["title", "description", "link", "image_link"])
    .signature(GOOGLE_SIGNATURE)
    .roots(&["rss"])
    .aliases(&["availability"]);
    spec.id_paths = vec![g("id")];
    spec.link_paths = vec![Selector::child("link"), g("link")];
    spec.image_paths = vec![g("image_link")];
    spec.gallery_paths = vec![g("additional_image_link")];
    spec.availability_paths = vec![g("availability")];
    spec.price_paths = vec![g("price")];
    spec.required_namespace_fragments = vec![GOOGLE_FRAGMENT.to_string()];
    spec.price_policy = PricePolicy::with_currency();
    spec
}

fn google_atom() -> SpecDefinition {
    let mut spec = SpecDefinition::new(
        GOOGLE_ATOM,
        10,
        vec![
            Selector::descendant_ns(ATOM_NS, "entry"),
            Selector::descendant("entry"),
        ],
        DetectionRule::on("entry"),
    )
    .required(&["id", "link", "image_link"])
    .signature(GOOGLE_SIGNATURE)
    .roots(&["feed"])
    .aliases(&["availability"]);
    spec.id_paths = vec![g("id")];
    spec.link_paths = vec![
        Selector::child_ns(ATOM_NS, "link")
            .where_attr("rel", "alternate")
            .at("href"),
        Selector::child_ns(ATOM_NS, "link").at("href"),
        Selector::child_ns(ATOM_NS, "link"),
        Selector::child("link"),
        g("link"),
    ];
    spec.image_paths = vec![g("image_link")];
    spec.gallery_paths = vec![g("additional_image_link")];
    spec.availability_paths = vec![g("availability")];
    spec.price_paths = vec![g("price")];
    spec.required_namespace_fragments = vec![GOOGLE_FRAGMENT.to_string()];
    spec.price_policy = PricePolicy::with_currency();
    spec
}

fn google_plain_rss() -> SpecDefinition {
    let detection = DetectionRule {
        require_root: true,
        forbidden_namespace_fragments: vec![GOOGLE_FRAGMENT.to_string()],
        item_shape: Some(ItemShape::Children {
            all_of: lowercase_all(&["id", "link", "image_link"]),
            any_of: lowercase_all(&[
                "id",
                "link",
                "image_link",
                "price",
                "availability",
                "product_type",
                "title",
                "description",
            ]),
            min_any: 3,
        }),
        ..DetectionRule::on("item")
    };
    let mut spec = SpecDefinition::new(
        GOOGLE_PLAIN_RSS,
        30,
        vec![Selector::descendant("item")],
        detection,
    )
    .required(&["title", "description", "link", "image_link"])
    .signature(GOOGLE_SIGNATURE)
    .roots(&["rss"])
    .aliases(&["availability"]);
    spec.id_paths = vec![Selector::child("id")];
    spec.link_paths = vec![Selector::child("link")];
    spec.image_paths = vec![Selector::child("image_link")];
    spec.gallery_paths = vec![Selector::child("additional_image_link")];
    spec.availability_paths = vec![Selector::child("availability")];
    spec.price_paths = vec![Selector::child("price")];
    spec.price_policy = PricePolicy::with_currency();
    spec
}

fn heureka() -> SpecDefinition {
    let mut spec = SpecDefinition::new(
        HEUREKA,
        40,
        vec![Selector::descendant("SHOPITEM")],
        DetectionRule::on("shopitem"),
    )
    .required(&["item_id", "productname", "url", "imgurl"])
    .signature(&[
        "item_id",
        "productname",
        "description",
        "url",
        "imgurl",
        "price",
        "manufacturer",
        "categorytext",
        "availability",
        "delivery",
        "delivery_time",
    ])
    .roots(&["shop"])
    .aliases(&["availability", "delivery", "availability_desc", "delivery_date"]);
    spec.id_paths = vec![Selector::child("ITEM_ID")];
    spec.link_paths = vec![Selector::child("URL")];
    spec.image_paths = vec![Selector::child("IMGURL")];
    spec.gallery_paths = vec![Selector::child("IMGURL_ALTERNATIVE")];
    spec.availability_paths = vec![
        Selector::child("AVAILABILITY"),
        Selector::child("DELIVERY"),
        Selector::child("delivery"),
        Selector::child("AVAILABILITY_DESC"),
    ];
    spec.availability_rule = Some(AvailabilityRule::LeadTime {
        selector: Selector::child("DELIVERY_DATE"),
        below: 3,
        value: "in stock".to_string(),
    });
    spec.price_paths = vec![Selector::child("PRICE_VAT"), Selector::child("PRICE")];
    spec.price_policy = PricePolicy::strict();
    spec
}

fn compari() -> SpecDefinition {
    let mut spec = SpecDefinition::new(
        COMPARI,
        80,
        vec![Selector::descendant("product")],
        DetectionRule::on("product"),
    )
    .required(&[
        "identifier|productid",
        "name",
        "product_url",
        "price",
        "image_url",
        "category",
        "description",
    ])
    .signature(&[
        "identifier",
        "productid",
        "name",
        "product_url",
        "price",
        "old_price",
        "image_url",
        "category",
        "category_full",
        "manufacturer",
        "description",
        "delivery_time",
        "stock",
        "in_stock",
    ])
    .roots(&["products"])
    .aliases(&[
        "availability",
        "in_stock",
        "stock",
        "availability_status",
        "delivery_time",
    ]);
    spec.id_paths = ["Identifier", "identifier", "ProductId", "productid", "id"]
        .iter()
        .map(|t| Selector::child(t))
        .collect();
    spec.link_paths = vec![Selector::child("Product_url"), Selector::child("product_url")];
    spec.image_paths = vec![Selector::child("Image_url"), Selector::child("image_url")];
    spec.availability_paths = [
        "availability",
        "in_stock",
        "stock",
        "availability_status",
        "Delivery_time",
    ]
    .iter()
    .map(|t| Selector::child(t))
    .collect();
    spec.price_paths = vec![Selector::child("Price"), Selector::child("price")];
    spec
}

fn skroutz() -> SpecDefinition {
    let detection = DetectionRule {
        item_shape: Some(ItemShape::HasChild {
            tag: "price_with_vat".to_string(),
        }),
        ..DetectionRule::on("product")
    };
    let mut spec = SpecDefinition::new(
        SKROUTZ,
        70,
        vec![Selector::descendant("product")],
        detection,
    )
    .required(&["id", "name", "link", "image", "price_with_vat"])
    .signature(&[
        "id",
        "name",
        "link",
        "image",
        "price_with_vat",
        "category",
        "category_id",
        "brand",
        "availability",
    ])
    .roots(&["products"])
    .aliases(&["availability", "in_stock", "stock"]);
    spec.id_paths = vec![Selector::child("id")];
    spec.link_paths = vec![Selector::child("link")];
    spec.image_paths = vec![Selector::child("image")];
    spec.gallery_paths = vec![Selector::child("additionalimage")];
    spec.availability_paths = vec![
        Selector::child("availability"),
        Selector::child("in_stock"),
        Selector::child("stock"),
    ];
    spec.price_paths = vec![Selector::child("price_with_vat")];
    spec
}

fn ceneje() -> SpecDefinition {
    let mut spec = SpecDefinition::new(
        CENEJE,
        60,
        vec![Selector::descendant("Item")],
        DetectionRule::on("item"),
    )
    .required(&["id", "name", "link", "mainimage|image", "price"])
    .signature(&[
        "id",
        "name",
        "link",
        "mainimage",
        "image",
        "price",
        "brand",
        "category",
        "availability",
        "description",
    ])
    .roots(&["items", "products", "shop"])
    .aliases(&["availability", "in_stock", "stock"]);
    spec.id_paths = vec![Selector::child("ID"), Selector::child("id")];
    spec.link_paths = vec![Selector::child("link")];
    spec.image_paths = vec![Selector::child("mainImage"), Selector::child("image")];
    spec.gallery_paths = vec![Selector::child("moreImages").then("image")];
    spec.availability_paths = vec![
        Selector::child("availability"),
        Selector::child("in_stock"),
        Selector::child("stock"),
    ];
    spec.price_paths = vec![Selector::child("price")];
    spec
}

fn ceneo() -> SpecDefinition {
    let mut spec = SpecDefinition::new(
        CENEO,
        50,
        vec![Selector::descendant("o")],
        DetectionRule::on("o"),
    )
    .required(&["name", "price", "cat", "url"])
    .signature(&[
        "id",
        "name",
        "price",
        "cat",
        "url",
        "imgs",
        "main",
        "desc",
        "avail",
        "availability",
        "stock",
    ])
    .roots(&["offers"])
    .aliases(&["availability", "stock", "avail"]);
    spec.id_paths = vec![Selector::attr("id")];
    spec.link_paths = vec![Selector::attr("url")];
    spec.image_paths = vec![
        Selector::child("imgs").then("main").at("url"),
        Selector::child("image"),
    ];
    spec.gallery_paths = vec![
        Selector::child("imgs").then("i").at("url"),
        Selector::child("imgs").then("img").at("url"),
    ];
    spec.availability_paths = vec![
        Selector::attr("avail"),
        Selector::attr("availability"),
        Selector::attr("stock"),
    ];
    spec.price_paths = vec![Selector::attr("price")];
    spec
}

/// On-disk layout of a spec extension file
#[derive(Debug, Deserialize)]
struct SpecFile {
    #[serde(default)]
    specs: Vec<SpecDefinition>,
}

/// The set of known specs, ordered by detection priority
#[derive(Debug, Clone)]
pub struct SpecRegistry {
    specs: Vec<SpecDefinition>,
}

impl Default for SpecRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SpecRegistry {
    /// An empty registry
    pub fn empty() -> Self {
        Self { specs: Vec::new() }
    }

    /// The built-in marketplace formats
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for spec in [
            google_atom(),
            google_rss(),
            google_plain_rss(),
            heureka(),
            ceneo(),
            ceneje(),
            skroutz(),
            compari(),
        ] {
            registry.push(spec);
        }
        registry
    }

    fn push(&mut self, mut spec: SpecDefinition) {
        spec.normalize();
        self.specs.push(spec);
        self.specs
            .sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
    }

    /// Add a spec. Names are unique keys.
    pub fn insert(&mut self, spec: SpecDefinition) -> Result<(), ConfigError> {
        if spec.name == UNKNOWN || self.get(&spec.name).is_some() {
            return Err(ConfigError::Invalid(format!(
                "duplicate spec name '{}'",
                spec.name
            )));
        }
        if spec.item_paths.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "spec '{}' has no item paths",
                spec.name
            )));
        }
        debug!("Registered spec '{}' (priority {})", spec.name, spec.priority);
        self.push(spec);
        Ok(())
    }

    /// Load extra specs from a YAML or JSON file with a top-level `specs` list
    pub fn load_file(&mut self, path: &Path) -> Result<usize, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let file: SpecFile = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        let count = file.specs.len();
        for spec in file.specs {
            self.insert(spec)?;
        }
        info!("Loaded {} spec(s) from {}", count, path.display());
        Ok(count)
    }

    pub fn get(&self, name: &str) -> Option<&SpecDefinition> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Specs in detection priority order
    pub fn iter(&self) -> impl Iterator<Item = &SpecDefinition> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
