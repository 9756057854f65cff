//! Postal address and shipping details.
//!
//! Field names mirror the gateway's address object so these types can
//! be deserialized straight out of gateway responses and serialized
//! straight into API responses.

use serde::{Deserialize, Serialize};

/// A postal address. All fields optional; the gateway tolerates
/// partial addresses and so do we.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    /// Uppercase ISO 3166-1 alpha-2 code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl Address {
    /// Whether any field is populated.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.line1.is_none()
            && self.line2.is_none()
            && self.city.is_none()
            && self.postal_code.is_none()
            && self.country.is_none()
    }
}

/// Shipping recipient: name, phone and address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ShippingDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_address() {
        assert!(Address::default().is_empty());
        let addr = Address {
            line1: Some("1 High St".into()),
            ..Address::default()
        };
        assert!(!addr.is_empty());
    }

    #[test]
    fn test_skips_absent_fields() {
        let addr = Address {
            line1: Some("1 High St".into()),
            country: Some("GB".into()),
            ..Address::default()
        };
        let json = serde_json::to_string(&addr).unwrap();
        assert!(json.contains("line1"));
        assert!(!json.contains("line2"));
    }
}
