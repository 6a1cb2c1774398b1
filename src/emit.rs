//! Serializers for fixer output
//!
//! Both writers take entries that already passed the duplicate policy.
//! Entries without an id are skipped.

use crate::document::GOOGLE_NS;
use crate::error::FeedError;
use crate::fixer::{CanonicalEntry, CanonicalField};
use crate::url::encode_url;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Channel link used when none is configured
pub const DEFAULT_CHANNEL_LINK: &str = "https://example.com/";

/// Output vocabulary of the fixer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    #[default]
    Google,
    Heureka,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Google => write!(f, "google"),
            Target::Heureka => write!(f, "heureka"),
        }
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "google" | "google-rss" | "gmc" => Ok(Target::Google),
            "heureka" => Ok(Target::Heureka),
            _ => Err(format!("unknown target '{}'", s)),
        }
    }
}

/// Channel metadata of a Google RSS document
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub title: String,
    pub link: String,
}

impl Channel {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            link: DEFAULT_CHANNEL_LINK.to_string(),
        }
    }

    pub fn with_link(mut self, link: &str) -> Self {
        self.link = link.to_string();
        self
    }
}

/// Serialize `entries` in the vocabulary of `target`
pub fn emit(
    target: Target,
    entries: &[&CanonicalEntry],
    channel: &Channel,
) -> Result<Vec<u8>, FeedError> {
    match target {
        Target::Google => google_rss(entries, channel),
        Target::Heureka => heureka(entries),
    }
}

/// Thin wrapper over an indenting writer that skips empty values
struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    fn new() -> Result<Self, FeedError> {
        let mut out = Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        };
        out.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        Ok(out)
    }

    fn event(&mut self, event: Event) -> Result<(), FeedError> {
        self.writer
            .write_event(event)
            .map_err(|e| FeedError::Emit(e.to_string()))
    }

    fn open(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), FeedError> {
        let start = BytesStart::new(name).with_attributes(attrs.iter().copied());
        self.event(Event::Start(start))
    }

    fn close(&mut self, name: &str) -> Result<(), FeedError> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn text(&mut self, name: &str, value: &str) -> Result<(), FeedError> {
        if value.is_empty() {
            return Ok(());
        }
        self.open(name, &[])?;
        self.event(Event::Text(BytesText::new(value)))?;
        self.close(name)
    }

    fn cdata(&mut self, name: &str, value: &str) -> Result<(), FeedError> {
        if value.is_empty() {
            return Ok(());
        }
        let safe = value.replace("]]>", "]]]]><![CDATA[>");
        self.open(name, &[])?;
        self.event(Event::CData(BytesCData::new(safe.as_str())))?;
        self.close(name)
    }

    fn finish(self) -> Vec<u8> {
        let mut bytes = self.writer.into_inner();
        bytes.push(b'\n');
        bytes
    }
}

/// Google Merchant RSS 2.0 with the `g:` namespace
pub fn google_rss(entries: &[&CanonicalEntry], channel: &Channel) -> Result<Vec<u8>, FeedError> {
    let mut out = XmlOut::new()?;
    out.open("rss", &[("version", "2.0"), ("xmlns:g", GOOGLE_NS)])?;
    out.open("channel", &[])?;
    out.text("title", &channel.title)?;
    out.text("link", &channel.link)?;
    out.text("description", &format!("{} feed", channel.title))?;

    for entry in entries {
        let id = entry.get(CanonicalField::Id).trim();
        if id.is_empty() {
            continue;
        }
        out.open("item", &[])?;
        out.text("g:id", id)?;
        out.cdata("title", entry.get(CanonicalField::Title))?;
        out.cdata("description", entry.get(CanonicalField::Description))?;
        out.text("link", &encode_url(entry.get(CanonicalField::Link)))?;
        out.text("g:image_link", &encode_url(entry.get(CanonicalField::ImageLink)))?;
        for image in &entry.additional_images {
            out.text("g:additional_image_link", &encode_url(image))?;
        }
        out.text("g:price", entry.get(CanonicalField::Price))?;
        out.text("g:availability", entry.get(CanonicalField::Availability))?;
        for field in CanonicalField::ATTRIBUTES {
            out.text(&format!("g:{}", field), entry.get(field).trim())?;
        }
        out.close("item")?;
    }

    out.close("channel")?;
    out.close("rss")?;
    Ok(out.finish())
}

/// Heureka `SHOP/SHOPITEM`
pub fn heureka(entries: &[&CanonicalEntry]) -> Result<Vec<u8>, FeedError> {
    let mut out = XmlOut::new()?;
    out.open("SHOP", &[])?;

    for entry in entries {
        let id = entry.get(CanonicalField::Id).trim();
        if id.is_empty() {
            continue;
        }
        out.open("SHOPITEM", &[])?;
        out.text("ITEM_ID", id)?;
        out.cdata("PRODUCTNAME", entry.get(CanonicalField::Title).trim())?;
        out.text("URL", &encode_url(entry.get(CanonicalField::Link)))?;
        out.text("IMGURL", &encode_url(entry.get(CanonicalField::ImageLink)))?;
        let price = entry
            .get(CanonicalField::Price)
            .split_whitespace()
            .next()
            .unwrap_or("");
        out.text("PRICE_VAT", price)?;
        out.cdata("MANUFACTURER", entry.get(CanonicalField::Brand).trim())?;
        out.cdata("DESCRIPTION", entry.get(CanonicalField::Description).trim())?;
        let availability = entry.get(CanonicalField::Availability);
        if !availability.is_empty() {
            let days = if availability.to_lowercase().starts_with("in stock") {
                "0"
            } else {
                "7"
            };
            out.text("DELIVERY_DATE", days)?;
        }
        for image in &entry.additional_images {
            out.text("IMGURL_ALTERNATIVE", &encode_url(image))?;
        }
        out.close("SHOPITEM")?;
    }

    out.close("SHOP")?;
    Ok(out.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(pairs: &[(CanonicalField, &str)]) -> CanonicalEntry {
        let mut entry = CanonicalEntry::default();
        for (field, value) in pairs {
            entry.set(*field, value.to_string());
        }
        entry
    }

    fn child_text(node: roxmltree::Node, tag: &str) -> Option<String> {
        node.children()
            .find(|c| c.is_element() && c.tag_name().name() == tag)
            .map(|c| c.text().unwrap_or("").to_string())
    }

    #[test]
    fn test_google_rss_layout() {
        let mut kettle = entry(&[
            (CanonicalField::Id, "K1"),
            (CanonicalField::Title, "Kettle & <Cup>"),
            (CanonicalField::Link, "https://shop.example/a b"),
            (CanonicalField::ImageLink, "https://shop.example/k.jpg"),
            (CanonicalField::Price, "12.50 EUR"),
            (CanonicalField::Availability, "in stock"),
            (CanonicalField::Brand, "Acme"),
        ]);
        kettle.additional_images.push("https://shop.example/k2.jpg".to_string());
        let nameless = entry(&[(CanonicalField::Title, "No id")]);

        let bytes = google_rss(&[&kettle, &nameless], &Channel::new("Shop")).unwrap();
        let xml = String::from_utf8(bytes).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<![CDATA[Kettle & <Cup>]]>"));

        let doc = roxmltree::Document::parse(&xml).unwrap();
        let root = doc.root_element();
        assert_eq!(root.tag_name().name(), "rss");
        assert_eq!(root.attribute("version"), Some("2.0"));

        let channel = root.first_element_child().unwrap();
        assert_eq!(child_text(channel, "title").as_deref(), Some("Shop"));
        assert_eq!(child_text(channel, "link").as_deref(), Some(DEFAULT_CHANNEL_LINK));
        assert_eq!(child_text(channel, "description").as_deref(), Some("Shop feed"));

        let items: Vec<_> = channel
            .children()
            .filter(|c| c.has_tag_name("item"))
            .collect();
        assert_eq!(items.len(), 1);

        let item = items[0];
        let id = item
            .children()
            .find(|c| c.has_tag_name((GOOGLE_NS, "id")))
            .and_then(|c| c.text());
        assert_eq!(id, Some("K1"));
        assert_eq!(child_text(item, "title").as_deref(), Some("Kettle & <Cup>"));
        assert_eq!(
            child_text(item, "link").as_deref(),
            Some("https://shop.example/a%20b")
        );
        assert_eq!(child_text(item, "brand").as_deref(), Some("Acme"));
        assert_eq!(child_text(item, "additional_image_link").as_deref(), Some("https://shop.example/k2.jpg"));
        assert_eq!(child_text(item, "mpn"), None);
    }

    #[test]
    fn test_cdata_terminator_is_split() {
        let tricky = entry(&[(CanonicalField::Id, "1"), (CanonicalField::Title, "a]]>b")]);
        let bytes = google_rss(&[&tricky], &Channel::new("Shop")).unwrap();
        let xml = String::from_utf8(bytes).unwrap();
        let doc = roxmltree::Document::parse(&xml).unwrap();
        let title = doc
            .descendants()
            .find(|n| n.has_tag_name("item"))
            .and_then(|item| child_text(item, "title"));
        assert_eq!(title.as_deref(), Some("a]]>b"));
    }

    #[test]
    fn test_heureka_layout() {
        let mut in_stock = entry(&[
            (CanonicalField::Id, "H1"),
            (CanonicalField::Title, "Kettle"),
            (CanonicalField::Link, "https://shop.example/k"),
            (CanonicalField::Price, "899.00 CZK"),
            (CanonicalField::Brand, "Acme"),
            (CanonicalField::Availability, "In stock"),
        ]);
        in_stock.additional_images.push("https://shop.example/k2.jpg".to_string());
        let preorder = entry(&[
            (CanonicalField::Id, "H2"),
            (CanonicalField::Availability, "preorder"),
        ]);
        let unknown = entry(&[(CanonicalField::Id, "H3")]);

        let bytes = heureka(&[&in_stock, &preorder, &unknown]).unwrap();
        let xml = String::from_utf8(bytes).unwrap();
        let doc = roxmltree::Document::parse(&xml).unwrap();
        let items: Vec<_> = doc
            .root_element()
            .children()
            .filter(|c| c.has_tag_name("SHOPITEM"))
            .collect();
        assert_eq!(items.len(), 3);

        assert_eq!(child_text(items[0], "ITEM_ID").as_deref(), Some("H1"));
        assert_eq!(child_text(items[0], "PRODUCTNAME").as_deref(), Some("Kettle"));
        assert_eq!(child_text(items[0], "PRICE_VAT").as_deref(), Some("899.00"));
        assert_eq!(child_text(items[0], "MANUFACTURER").as_deref(), Some("Acme"));
        assert_eq!(child_text(items[0], "DELIVERY_DATE").as_deref(), Some("0"));
        assert_eq!(
            child_text(items[0], "IMGURL_ALTERNATIVE").as_deref(),
            Some("https://shop.example/k2.jpg")
        );
        assert_eq!(child_text(items[1], "DELIVERY_DATE").as_deref(), Some("7"));
        assert_eq!(child_text(items[2], "DELIVERY_DATE"), None);
    }

    #[test]
    fn test_target_from_str() {
        assert_eq!("Google".parse(), Ok(Target::Google));
        assert_eq!("heureka".parse(), Ok(Target::Heureka));
        assert!("ceneo".parse::<Target>().is_err());
        assert_eq!(Target::Heureka.to_string(), "heureka");
    }
}
