//! Parsed feed document backed by roxmltree
//!
//! The parser is configured to refuse DTDs, so no external entity is ever
//! resolved or expanded. Everything downstream works on the parsed tree.

use crate::error::FeedError;
use roxmltree::{Document, Node, ParsingOptions};
use std::collections::{BTreeSet, HashMap};

/// Google Merchant namespace URI
pub const GOOGLE_NS: &str = "http://base.google.com/ns/1.0";

/// Atom namespace URI
pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

/// RSS content module namespace URI
pub const CONTENT_NS: &str = "http://purl.org/rss/1.0/modules/content/";

/// Resolve one of the well-known namespace prefixes used in selectors
pub fn namespace_for_prefix(prefix: &str) -> Option<&'static str> {
    match prefix {
        "g" => Some(GOOGLE_NS),
        "atom" => Some(ATOM_NS),
        "content" => Some(CONTENT_NS),
        _ => None,
    }
}

/// Inverse of [`namespace_for_prefix`]
pub fn prefix_for_namespace(uri: &str) -> Option<&'static str> {
    match uri {
        GOOGLE_NS => Some("g"),
        ATOM_NS => Some("atom"),
        CONTENT_NS => Some("content"),
        _ => None,
    }
}

/// A parsed feed
pub struct FeedDocument<'input> {
    doc: Document<'input>,
}

impl<'input> FeedDocument<'input> {
    /// Parse XML text. Malformed input yields [`FeedError::Parse`] with the
    /// position reported by the parser.
    pub fn parse(source: &'input str) -> Result<Self, FeedError> {
        let options = ParsingOptions {
            allow_dtd: false,
            ..ParsingOptions::default()
        };
        let doc = Document::parse_with_options(source, options)?;
        Ok(Self { doc })
    }

    /// The root element
    pub fn root(&self) -> Node<'_, 'input> {
        self.doc.root_element()
    }

    /// Lowercased local name of the root element
    pub fn root_name(&self) -> String {
        local_name(&self.root())
    }

    /// Original text the document was parsed from
    pub fn source(&self) -> &'input str {
        self.doc.input_text()
    }

    /// Check whether a namespace fragment occurs anywhere in the document,
    /// either in the raw text or in a resolved element namespace.
    pub fn contains_fragment(&self, fragment: &str) -> bool {
        if fragment.is_empty() {
            return true;
        }
        if self.source().contains(fragment) {
            return true;
        }
        self.elements().any(|node| {
            node.tag_name()
                .namespace()
                .is_some_and(|ns| ns.contains(fragment))
        })
    }

    /// All elements in document order, root included
    pub fn elements(&self) -> impl Iterator<Item = Node<'_, 'input>> {
        self.root().descendants().filter(|n| n.is_element())
    }

    /// First element whose lowercased local name equals `local`
    pub fn first_local(&self, local: &str) -> Option<Node<'_, 'input>> {
        self.elements().find(|n| has_local_name(n, local))
    }

    /// All elements whose lowercased local name equals `local`
    pub fn all_local(&self, local: &str) -> Vec<Node<'_, 'input>> {
        self.elements().filter(|n| has_local_name(n, local)).collect()
    }

    /// Elements sharing the most frequent local name among non-root
    /// elements that have element children. Used as generic item candidates
    /// when no spec's item selector matches.
    pub fn repeated_elements(&self) -> Vec<Node<'_, 'input>> {
        let root = self.root();
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for node in self.elements() {
            if node == root || !node.children().any(|c| c.is_element()) {
                continue;
            }
            let name = local_name(&node);
            let count = counts.entry(name.clone()).or_insert(0);
            if *count == 0 {
                order.push(name);
            }
            *count += 1;
        }

        let mut best: Option<(&str, usize)> = None;
        for name in &order {
            let count = counts[name];
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((name.as_str(), count));
            }
        }

        match best {
            Some((name, _)) => self
                .elements()
                .filter(|n| *n != root && has_local_name(n, name))
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Lowercased local name of an element, namespace dropped
pub fn local_name(node: &Node) -> String {
    node.tag_name().name().to_lowercase()
}

/// Case-insensitive local-name comparison. `local` must already be lowercase.
pub fn has_local_name(node: &Node, local: &str) -> bool {
    node.is_element() && node.tag_name().name().to_lowercase() == local
}

/// Lowercased local names of an element's direct element children
pub fn child_names(node: &Node) -> BTreeSet<String> {
    node.children()
        .filter(|c| c.is_element())
        .map(|c| local_name(&c))
        .collect()
}

/// 1-based line of a node's start tag
pub fn line_of(node: &Node) -> u32 {
    node.document().text_pos_at(node.range().start).row
}

/// Trimmed text content directly owned by an element
pub fn node_text<'a>(node: &Node<'a, '_>) -> &'a str {
    node.text().map(str::trim).unwrap_or("")
}
