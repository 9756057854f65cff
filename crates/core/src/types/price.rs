//! Price snapshot and currency handling.
//!
//! Prices travel through the system as integer minor units ("pence")
//! because that is what the gateway's metadata bag can round-trip
//! losslessly. [`rust_decimal`] is used only when a minor-unit amount
//! has to be presented as a decimal major-unit value (coupon
//! normalization).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// ISO 4217 currencies the storefront sells in.
///
/// Serialized as the lowercase code, matching the gateway's currency
/// fields and the metadata bag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    #[default]
    Gbp,
    Usd,
    Eur,
}

impl Currency {
    /// Lowercase ISO code, as stored in metadata.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Gbp => "gbp",
            Self::Usd => "usd",
            Self::Eur => "eur",
        }
    }

    /// Currency symbol for display formatting.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Gbp => "£",
            Self::Usd => "$",
            Self::Eur => "€",
        }
    }

    /// Number of decimal places in the major unit (2 for all currently
    /// supported currencies; zero-decimal currencies would add a row
    /// here, which is why this is a table and not a constant).
    #[must_use]
    pub const fn minor_unit_exponent(self) -> u32 {
        match self {
            Self::Gbp | Self::Usd | Self::Eur => 2,
        }
    }

    /// Parse a (case-insensitive) ISO code. Unknown codes yield `None`.
    #[must_use]
    pub fn parse(code: &str) -> Option<Self> {
        match code.to_ascii_lowercase().as_str() {
            "gbp" => Some(Self::Gbp),
            "usd" => Some(Self::Usd),
            "eur" => Some(Self::Eur),
            _ => None,
        }
    }

    /// Convert an amount in minor units to a decimal major-unit value,
    /// e.g. 2621 pence -> 26.21.
    #[must_use]
    pub fn to_major_units(self, minor: u64) -> Decimal {
        Decimal::new(i64::try_from(minor).unwrap_or(i64::MAX), self.minor_unit_exponent())
    }

    /// Format an amount in minor units for display, e.g. "£26.21".
    #[must_use]
    pub fn format_minor(self, minor: u64) -> String {
        format!("{}{}", self.symbol(), self.to_major_units(minor))
    }
}

/// A price snapshot taken at checkout time.
///
/// This is the amount the customer agreed to, independent of what the
/// gateway will eventually charge. It must never be merged or averaged
/// with another snapshot; a later different snapshot replaces it only
/// through an explicit update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    /// Amount in minor currency units (pence for GBP).
    pub pence: u64,
    /// Lowercase ISO currency code.
    pub currency: Currency,
    /// Pre-formatted display string (e.g. "£26.21"). May be empty when
    /// the storefront did not supply one.
    pub display: String,
}

impl PriceSnapshot {
    /// Build a snapshot, deriving the display string when none is given.
    #[must_use]
    pub fn new(pence: u64, currency: Currency, display: Option<String>) -> Self {
        let display = display
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| currency.format_minor(pence));
        Self {
            pence,
            currency,
            display,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_parse_case_insensitive() {
        assert_eq!(Currency::parse("GBP"), Some(Currency::Gbp));
        assert_eq!(Currency::parse("usd"), Some(Currency::Usd));
        assert_eq!(Currency::parse("xxx"), None);
    }

    #[test]
    fn test_format_minor() {
        assert_eq!(Currency::Gbp.format_minor(2621), "£26.21");
        assert_eq!(Currency::Usd.format_minor(5), "$0.05");
        assert_eq!(Currency::Eur.format_minor(100), "€1.00");
    }

    #[test]
    fn test_to_major_units() {
        assert_eq!(Currency::Gbp.to_major_units(2621), Decimal::new(2621, 2));
        assert_eq!(Currency::Gbp.to_major_units(0), Decimal::new(0, 2));
    }

    #[test]
    fn test_snapshot_derives_display() {
        let snap = PriceSnapshot::new(2621, Currency::Gbp, None);
        assert_eq!(snap.display, "£26.21");

        let snap = PriceSnapshot::new(2621, Currency::Gbp, Some("£26.21 (2 people)".into()));
        assert_eq!(snap.display, "£26.21 (2 people)");

        // Empty display strings are treated as absent.
        let snap = PriceSnapshot::new(2621, Currency::Gbp, Some(String::new()));
        assert_eq!(snap.display, "£26.21");
    }

    #[test]
    fn test_snapshot_serde_round_trip() {
        let snap = PriceSnapshot::new(2621, Currency::Gbp, None);
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"gbp\""));
        let back: PriceSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }
}
