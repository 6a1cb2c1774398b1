//! Canonical output fields and the source-tag synonym table

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A Google Merchant field the fixer can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    Id,
    ItemGroupId,
    Title,
    Description,
    Link,
    ImageLink,
    AdditionalImageLink,
    Price,
    Availability,
    Brand,
    Mpn,
    Gtin,
    Condition,
    GoogleProductCategory,
    ProductType,
    Color,
    Material,
    Size,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 18] = [
        CanonicalField::Id,
        CanonicalField::ItemGroupId,
        CanonicalField::Title,
        CanonicalField::Description,
        CanonicalField::Link,
        CanonicalField::ImageLink,
        CanonicalField::AdditionalImageLink,
        CanonicalField::Price,
        CanonicalField::Availability,
        CanonicalField::Brand,
        CanonicalField::Mpn,
        CanonicalField::Gtin,
        CanonicalField::Condition,
        CanonicalField::GoogleProductCategory,
        CanonicalField::ProductType,
        CanonicalField::Color,
        CanonicalField::Material,
        CanonicalField::Size,
    ];

    /// Fields emitted as plain `g:` elements after the core block
    pub const ATTRIBUTES: [CanonicalField; 10] = [
        CanonicalField::ItemGroupId,
        CanonicalField::Brand,
        CanonicalField::Mpn,
        CanonicalField::Gtin,
        CanonicalField::Condition,
        CanonicalField::GoogleProductCategory,
        CanonicalField::ProductType,
        CanonicalField::Color,
        CanonicalField::Material,
        CanonicalField::Size,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::Id => "id",
            CanonicalField::ItemGroupId => "item_group_id",
            CanonicalField::Title => "title",
            CanonicalField::Description => "description",
            CanonicalField::Link => "link",
            CanonicalField::ImageLink => "image_link",
            CanonicalField::AdditionalImageLink => "additional_image_link",
            CanonicalField::Price => "price",
            CanonicalField::Availability => "availability",
            CanonicalField::Brand => "brand",
            CanonicalField::Mpn => "mpn",
            CanonicalField::Gtin => "gtin",
            CanonicalField::Condition => "condition",
            CanonicalField::GoogleProductCategory => "google_product_category",
            CanonicalField::ProductType => "product_type",
            CanonicalField::Color => "color",
            CanonicalField::Material => "material",
            CanonicalField::Size => "size",
        }
    }

    /// Free-text fields that get whitespace-trimmed after mapping
    pub fn is_text(&self) -> bool {
        !matches!(
            self,
            CanonicalField::Id
                | CanonicalField::Link
                | CanonicalField::ImageLink
                | CanonicalField::AdditionalImageLink
                | CanonicalField::Price
                | CanonicalField::Availability
        )
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CanonicalField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        CanonicalField::ALL
            .into_iter()
            .find(|f| f.as_str() == wanted)
            .ok_or_else(|| format!("unknown field '{}'", s))
    }
}

/// Canonical role of a lowercased source tag, if it is a known synonym
pub fn canonical_field(tag: &str) -> Option<CanonicalField> {
    use CanonicalField::*;

    let field = match tag {
        "id" | "item_id" | "identifier" | "productid" | "product_id" | "itemid" => Id,
        "itemgroup_id" | "item_group_id" | "groupid" => ItemGroupId,
        "title" | "name" | "productname" => Title,
        "description" | "desc" | "content" => Description,
        "link" | "url" | "product_url" | "u" => Link,
        "image" | "img" | "imgurl" | "image_url" | "image_link" | "mainimage" | "main"
        | "imgurl_main" | "img_main" | "mainurl" => ImageLink,
        "image_url_2" | "image2" | "img2" | "image_url_3" | "image3" | "img3" | "image_url_4"
        | "image4" | "img4" | "image_url_5" | "image5" | "img5" | "imgurl_alternative"
        | "moreimages" | "gallery" | "imgs" | "additional_image_link" => AdditionalImageLink,
        "price" | "price_vat" | "price_with_vat" => Price,
        "availability" | "stock" | "in_stock" | "avail" | "availability_status"
        | "delivery_date" | "delivery" => Availability,
        "brand" | "manufacturer" | "producer" => Brand,
        "mpn" => Mpn,
        "ean" | "gtin" => Gtin,
        "condition" => Condition,
        "google_product_category" | "categorytext" | "cat" => GoogleProductCategory,
        "category" | "product_type" | "category_full" => ProductType,
        "color" | "colour" | "farba" | "kolor" => Color,
        "material" | "materiál" => Material,
        "size" | "velikost" | "rozmiar" | "größe" => Size,
        _ => return None,
    };
    Some(field)
}
