//! Location selectors
//!
//! A selector addresses a value relative to an item element. Supported forms:
//!
//! - `@attr` reads an attribute of the item itself
//! - `path` reads the text of the first element reached by `path`
//! - `path/@attr` reads an attribute of the first element reached by `path`
//!
//! A path is a `/`-separated list of steps, optionally prefixed with `./`
//! (children) or `.//` (descendants, first step only). A step names an element
//! as `local`, `prefix:local` (`g`, `atom`, `content`) or `{uri}local`, and
//! may carry one `[@attr='value']` predicate. Unqualified steps only match
//! elements without a namespace; local names match case-sensitively.

use crate::document::{namespace_for_prefix, node_text, prefix_for_namespace};
use roxmltree::Node;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Malformed selector text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,

    #[error("empty step in '{0}'")]
    EmptyStep(String),

    #[error("unknown namespace prefix '{0}'")]
    UnknownPrefix(String),

    #[error("malformed predicate '{0}'")]
    BadPredicate(String),

    #[error("unclosed namespace brace in '{0}'")]
    UnclosedBrace(String),

    #[error("descendant axis only allowed on the first step in '{0}'")]
    MisplacedDescendant(String),
}

/// Traversal axis of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Descendant,
}

/// One element step of a selector path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub axis: Axis,
    pub namespace: Option<String>,
    pub local: String,
    pub predicate: Option<(String, String)>,
}

impl Step {
    fn new(axis: Axis, namespace: Option<&str>, local: &str) -> Self {
        Self {
            axis,
            namespace: namespace.map(str::to_string),
            local: local.to_string(),
            predicate: None,
        }
    }

    fn matches(&self, node: &Node) -> bool {
        if !node.is_element() {
            return false;
        }
        let tag = node.tag_name();
        if tag.name() != self.local || tag.namespace() != self.namespace.as_deref() {
            return false;
        }
        match &self.predicate {
            Some((attr, value)) => node.attribute(attr.as_str()) == Some(value.as_str()),
            None => true,
        }
    }

    fn parse(raw: &str, axis: Axis, whole: &str) -> Result<Self, SelectorError> {
        let (name, predicate) = match raw.find('[') {
            Some(open) if !raw[..open].contains('{') || raw[..open].contains('}') => {
                let inner = raw[open + 1..]
                    .strip_suffix(']')
                    .ok_or_else(|| SelectorError::BadPredicate(raw.to_string()))?;
                (&raw[..open], Some(parse_predicate(inner)?))
            }
            _ => (raw, None),
        };

        let (namespace, local) = if let Some(rest) = name.strip_prefix('{') {
            let close = rest
                .find('}')
                .ok_or_else(|| SelectorError::UnclosedBrace(whole.to_string()))?;
            (Some(rest[..close].to_string()), &rest[close + 1..])
        } else if let Some((prefix, local)) = name.split_once(':') {
            let uri = namespace_for_prefix(prefix)
                .ok_or_else(|| SelectorError::UnknownPrefix(prefix.to_string()))?;
            (Some(uri.to_string()), local)
        } else {
            (None, name)
        };

        if local.is_empty() || local.chars().any(char::is_whitespace) {
            return Err(SelectorError::EmptyStep(whole.to_string()));
        }

        Ok(Self {
            axis,
            namespace,
            local: local.to_string(),
            predicate,
        })
    }
}

fn parse_predicate(inner: &str) -> Result<(String, String), SelectorError> {
    let bad = || SelectorError::BadPredicate(inner.to_string());
    let body = inner.strip_prefix('@').ok_or_else(bad)?;
    let (attr, value) = body.split_once('=').ok_or_else(bad)?;
    let value = value.trim();
    let unquoted = value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
        .ok_or_else(bad)?;
    let attr = attr.trim();
    if attr.is_empty() {
        return Err(bad());
    }
    Ok((attr.to_string(), unquoted.to_string()))
}

/// Split on `/` outside `{...}` and `[...]`
fn split_segments(input: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '{' | '[' => depth += 1,
            '}' | ']' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => {
                segments.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&input[start..]);
    segments
}

/// A parsed location selector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Selector {
    steps: Vec<Step>,
    attribute: Option<String>,
}

impl Selector {
    /// Attribute of the item element itself
    pub fn attr(name: &str) -> Self {
        Self {
            steps: Vec::new(),
            attribute: Some(name.to_string()),
        }
    }

    /// Unqualified direct child
    pub fn child(local: &str) -> Self {
        Self {
            steps: vec![Step::new(Axis::Child, None, local)],
            attribute: None,
        }
    }

    /// Namespaced direct child
    pub fn child_ns(namespace: &str, local: &str) -> Self {
        Self {
            steps: vec![Step::new(Axis::Child, Some(namespace), local)],
            attribute: None,
        }
    }

    /// Unqualified descendant at any depth
    pub fn descendant(local: &str) -> Self {
        Self {
            steps: vec![Step::new(Axis::Descendant, None, local)],
            attribute: None,
        }
    }

    /// Namespaced descendant at any depth
    pub fn descendant_ns(namespace: &str, local: &str) -> Self {
        Self {
            steps: vec![Step::new(Axis::Descendant, Some(namespace), local)],
            attribute: None,
        }
    }

    /// Append an unqualified child step
    pub fn then(mut self, local: &str) -> Self {
        self.steps.push(Step::new(Axis::Child, None, local));
        self
    }

    /// Require an attribute value on the last step
    pub fn where_attr(mut self, name: &str, value: &str) -> Self {
        if let Some(step) = self.steps.last_mut() {
            step.predicate = Some((name.to_string(), value.to_string()));
        }
        self
    }

    /// Read an attribute of the reached element instead of its text
    pub fn at(mut self, attr: &str) -> Self {
        self.attribute = Some(attr.to_string());
        self
    }

    /// Parse selector text
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(SelectorError::Empty);
        }

        let mut segments = split_segments(input);

        let attribute = match segments.last() {
            Some(last) if last.starts_with('@') => {
                let name = &last[1..];
                if name.is_empty() {
                    return Err(SelectorError::EmptyStep(input.to_string()));
                }
                let name = name.to_string();
                segments.pop();
                Some(name)
            }
            _ => None,
        };

        if segments.first() == Some(&".") {
            segments.remove(0);
        }

        let mut axis = Axis::Child;
        if segments.first() == Some(&"") && segments.len() > 1 {
            segments.remove(0);
            axis = Axis::Descendant;
        }

        if segments.is_empty() && attribute.is_none() {
            return Err(SelectorError::Empty);
        }

        let mut steps = Vec::with_capacity(segments.len());
        for raw in segments {
            if raw.is_empty() {
                return Err(if steps.is_empty() && axis == Axis::Child {
                    SelectorError::EmptyStep(input.to_string())
                } else {
                    SelectorError::MisplacedDescendant(input.to_string())
                });
            }
            steps.push(Step::parse(raw, axis, input)?);
            axis = Axis::Child;
        }

        Ok(Self { steps, attribute })
    }

    /// Steps of the path, empty for a bare `@attr`
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Attribute read at the end of the path
    pub fn attribute(&self) -> Option<&str> {
        self.attribute.as_deref()
    }

    /// Local name of the last element step
    pub fn last_local(&self) -> Option<&str> {
        self.steps.last().map(|s| s.local.as_str())
    }

    /// All elements reached by the path, in document order
    pub fn nodes<'a, 'input>(&self, context: Node<'a, 'input>) -> Vec<Node<'a, 'input>> {
        let mut current = vec![context];
        for step in &self.steps {
            let mut next = Vec::new();
            for node in &current {
                match step.axis {
                    Axis::Child => next.extend(node.children().filter(|c| step.matches(c))),
                    Axis::Descendant => {
                        next.extend(node.descendants().skip(1).filter(|c| step.matches(c)))
                    }
                }
            }
            if next.is_empty() {
                return next;
            }
            current = next;
        }
        current
    }

    fn read<'a>(&self, node: &Node<'a, '_>) -> &'a str {
        match &self.attribute {
            Some(attr) => node.attribute(attr.as_str()).map(str::trim).unwrap_or(""),
            None => node_text(node),
        }
    }

    /// Trimmed value of the first reached element, or empty
    pub fn first(&self, context: Node) -> String {
        if self.steps.is_empty() {
            return self.read(&context).to_string();
        }
        self.nodes(context)
            .first()
            .map(|n| self.read(n).to_string())
            .unwrap_or_default()
    }

    /// Non-empty trimmed values of every reached element
    pub fn all(&self, context: Node) -> Vec<String> {
        if self.steps.is_empty() {
            let value = self.read(&context);
            return if value.is_empty() {
                Vec::new()
            } else {
                vec![value.to_string()]
            };
        }
        self.nodes(context)
            .iter()
            .map(|n| self.read(n))
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// First non-empty value across an ordered selector list
pub fn first_of(selectors: &[Selector], context: Node) -> String {
    selectors
        .iter()
        .map(|s| s.first(context))
        .find(|v| !v.is_empty())
        .unwrap_or_default()
}

/// Every value across a selector list, de-duplicated in first-seen order
pub fn all_of(selectors: &[Selector], context: Node) -> Vec<String> {
    let mut values: Vec<String> = Vec::new();
    for selector in selectors {
        for value in selector.all(context) {
            if !values.contains(&value) {
                values.push(value);
            }
        }
    }
    values
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for step in &self.steps {
            match (first, step.axis) {
                (true, Axis::Descendant) => write!(f, ".//")?,
                (true, Axis::Child) => write!(f, "./")?,
                (false, _) => write!(f, "/")?,
            }
            first = false;
            match step.namespace.as_deref() {
                Some(uri) => match prefix_for_namespace(uri) {
                    Some(prefix) => write!(f, "{}:", prefix)?,
                    None => write!(f, "{{{}}}", uri)?,
                },
                None => {}
            }
            write!(f, "{}", step.local)?;
            if let Some((attr, value)) = &step.predicate {
                write!(f, "[@{}='{}']", attr, value)?;
            }
        }
        if let Some(attr) = &self.attribute {
            if !self.steps.is_empty() {
                write!(f, "/")?;
            }
            write!(f, "@{}", attr)?;
        }
        Ok(())
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Selector::parse(s)
    }
}

impl TryFrom<String> for Selector {
    type Error = SelectorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Selector::parse(&value)
    }
}

impl From<Selector> for String {
    fn from(selector: Selector) -> Self {
        selector.to_string()
    }
}
