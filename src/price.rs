//! Price normalization and validation
//!
//! [`extract_numeric`] is deliberately lenient and accepts almost any
//! localized rendering. [`check_price`] layers the per-spec policy on top:
//! currency presence and, for strict specs, a fixed set of accepted shapes.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Currency signs accepted as a currency token
pub const CURRENCY_SIGNS: &[char] = &[
    '€', '$', '£', '¥', '₽', '₺', '₪', '₫', '₭', '₮', '₴', '₸', '₨', '₩', '₱', '₦', '₡', '₲', '₳',
    '₵', '₣', '₤', '₥', '₧', '₰',
];

/// How strictly the textual shape of a price is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceFormat {
    /// Any value [`extract_numeric`] can read
    #[default]
    Lenient,
    /// Only plain integers, space-grouped thousands and single-separator
    /// decimals
    Strict,
}

/// Per-spec price rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricePolicy {
    pub format: PriceFormat,
    pub require_currency: bool,
    pub max_decimals: u8,
}

impl Default for PricePolicy {
    fn default() -> Self {
        Self {
            format: PriceFormat::Lenient,
            require_currency: false,
            max_decimals: 2,
        }
    }
}

impl PricePolicy {
    pub fn strict() -> Self {
        Self {
            format: PriceFormat::Strict,
            ..Self::default()
        }
    }

    pub fn with_currency() -> Self {
        Self {
            require_currency: true,
            ..Self::default()
        }
    }
}

/// A single problem with a present price value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriceProblem {
    NotNumeric,
    NonPositive,
    MissingCurrency,
    InvalidFormat,
    OverPrecision,
}

impl PriceProblem {
    pub fn reason(&self) -> &'static str {
        match self {
            PriceProblem::NotNumeric => "not numeric",
            PriceProblem::NonPositive => "non-positive value",
            PriceProblem::MissingCurrency => "missing currency",
            PriceProblem::InvalidFormat => "invalid format",
            PriceProblem::OverPrecision => "over precision",
        }
    }
}

impl fmt::Display for PriceProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Outcome of validating a present price
#[derive(Debug, Clone, PartialEq)]
pub struct PriceCheck {
    pub value: Option<f64>,
    pub problems: Vec<PriceProblem>,
}

impl PriceCheck {
    pub fn is_valid(&self) -> bool {
        self.problems.is_empty()
    }

    /// Comma-joined reasons, used as the per-item note
    pub fn reasons(&self) -> String {
        self.problems
            .iter()
            .map(PriceProblem::reason)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Extract a numeric value from a localized price string.
///
/// Non-breaking spaces count as spaces. A leading minus sign is honoured.
/// When both `,` and `.` occur, the rightmost one is the decimal separator
/// and the other is a grouping separator. A lone comma is a decimal comma;
/// repeated commas or repeated periods are grouping separators.
pub fn extract_numeric(raw: &str) -> Option<f64> {
    let text = raw.replace('\u{a0}', " ");
    let mut text = text.trim();
    if !text.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let negative = text.starts_with('-');
    if negative {
        text = text[1..].trim_start();
    }

    let mut candidate: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.'))
        .collect();

    let commas = candidate.matches(',').count();
    let periods = candidate.matches('.').count();

    if commas > 0 && periods > 0 {
        let last_comma = candidate.rfind(',').unwrap_or(0);
        let last_period = candidate.rfind('.').unwrap_or(0);
        if last_period > last_comma {
            candidate = candidate.replace(',', "");
        } else {
            candidate = candidate.replace('.', "").replace(',', ".");
        }
    } else {
        if commas > 1 {
            candidate = candidate.replace(',', "");
        } else if commas == 1 {
            candidate = candidate.replace(',', ".");
        }
        if candidate.matches('.').count() > 1 {
            candidate = candidate.replace('.', "");
        }
    }

    let value: f64 = candidate.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Check for an alphabetic currency code or a known currency sign
pub fn has_currency_token(raw: &str) -> bool {
    raw.chars()
        .any(|c| c.is_alphabetic() || CURRENCY_SIGNS.contains(&c))
}

fn strict_shape() -> &'static Regex {
    static SHAPE: OnceLock<Regex> = OnceLock::new();
    SHAPE.get_or_init(|| {
        Regex::new(r"^(?P<int>\d{1,3}(?: \d{3})+|\d+)(?:[.,](?P<frac>\d+))?$")
            .expect("price shape pattern is valid")
    })
}

/// Shape of a price under the strict grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Accepted; carries the number of decimal digits
    Valid(usize),
    Invalid,
}

/// Match the numeric part of a price against the strict grammar. Currency
/// codes, signs and whitespace around the number are ignored.
pub fn strict_shape_of(raw: &str) -> Shape {
    let text = raw.replace('\u{a0}', " ");
    let core = text.trim_matches(|c: char| {
        c.is_whitespace() || c.is_alphabetic() || CURRENCY_SIGNS.contains(&c)
    });

    let Some(caps) = strict_shape().captures(core) else {
        return Shape::Invalid;
    };

    let int = caps.name("int").map_or("", |m| m.as_str());
    let decimals = caps.name("frac").map_or(0, |m| m.as_str().len());

    // 1-3 digits then exactly three more is how a thousands separator looks
    if decimals == 3 && int.len() <= 3 {
        return Shape::Invalid;
    }
    Shape::Valid(decimals)
}

/// Validate a present (non-empty) price against a policy
pub fn check_price(raw: &str, policy: &PricePolicy) -> PriceCheck {
    let mut problems = Vec::new();
    let value = extract_numeric(raw);

    match value {
        None => problems.push(PriceProblem::NotNumeric),
        Some(v) if v <= 0.0 => problems.push(PriceProblem::NonPositive),
        Some(_) => {}
    }

    if value.is_some() && policy.require_currency && !has_currency_token(raw) {
        problems.push(PriceProblem::MissingCurrency);
    }

    if policy.format == PriceFormat::Strict && value.is_some() {
        match strict_shape_of(raw) {
            Shape::Invalid => problems.push(PriceProblem::InvalidFormat),
            Shape::Valid(decimals) if decimals > usize::from(policy.max_decimals) => {
                problems.push(PriceProblem::OverPrecision)
            }
            Shape::Valid(_) => {}
        }
    }

    PriceCheck { value, problems }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(value: Option<f64>, expected: f64) -> bool {
        value.is_some_and(|v| (v - expected).abs() < 1e-9)
    }

    #[test]
    fn test_extract_localized_forms() {
        assert!(approx(extract_numeric("1.234,56 EUR"), 1234.56));
        assert!(approx(extract_numeric("1,234.56"), 1234.56));
        assert!(approx(extract_numeric("12,50"), 12.5));
        assert!(approx(extract_numeric("€ 9.99"), 9.99));
        assert!(approx(extract_numeric("1,234,567"), 1_234_567.0));
        assert!(approx(extract_numeric("1.234.567"), 1_234_567.0));
        assert!(approx(extract_numeric("8 000 Kč"), 8000.0));
        assert!(approx(extract_numeric("8\u{a0}000"), 8000.0));
    }

    #[test]
    fn test_extract_negative_and_none() {
        assert!(approx(extract_numeric("-5.00 USD"), -5.0));
        assert_eq!(extract_numeric("free"), None);
        assert_eq!(extract_numeric(""), None);
    }

    #[test]
    fn test_currency_token() {
        assert!(has_currency_token("10 EUR"));
        assert!(has_currency_token("£10"));
        assert!(has_currency_token("10 ₴"));
        assert!(!has_currency_token("10.00"));
    }

    #[test]
    fn test_strict_shapes() {
        assert_eq!(strict_shape_of("8000"), Shape::Valid(0));
        assert_eq!(strict_shape_of("8 000"), Shape::Valid(0));
        assert_eq!(strict_shape_of("8000,50"), Shape::Valid(2));
        assert_eq!(strict_shape_of("8000.50 CZK"), Shape::Valid(2));
        assert_eq!(strict_shape_of("1 234,50 Kč"), Shape::Valid(2));
        assert_eq!(strict_shape_of("8.000"), Shape::Invalid);
        assert_eq!(strict_shape_of("1,234"), Shape::Invalid);
        assert_eq!(strict_shape_of("1.234,56"), Shape::Invalid);
        assert_eq!(strict_shape_of("12.5000"), Shape::Valid(4));
    }

    #[test]
    fn test_lenient_policy_accepts_grouping_shape() {
        let check = check_price("8.000", &PricePolicy::default());
        assert!(check.is_valid());
        assert!(approx(check.value, 8.0));
    }

    #[test]
    fn test_strict_policy_rejects_thousands_shape() {
        let check = check_price("8.000", &PricePolicy::strict());
        assert_eq!(check.problems, vec![PriceProblem::InvalidFormat]);
    }

    #[test]
    fn test_strict_policy_over_precision() {
        let check = check_price("12.3456", &PricePolicy::strict());
        assert_eq!(check.problems, vec![PriceProblem::OverPrecision]);
        assert_eq!(check.reasons(), "over precision");
    }

    #[test]
    fn test_policy_problems() {
        let google = PricePolicy::with_currency();
        assert_eq!(
            check_price("abc", &google).problems,
            vec![PriceProblem::NotNumeric]
        );
        assert_eq!(
            check_price("0 EUR", &google).problems,
            vec![PriceProblem::NonPositive]
        );
        assert_eq!(
            check_price("19.99", &google).problems,
            vec![PriceProblem::MissingCurrency]
        );
        assert!(check_price("19.99 EUR", &google).is_valid());
    }
}
