//! Coupon validation.
//!
//! Validates a promotion code against the gateway and normalizes the
//! underlying discount for the storefront: percentage discounts pass
//! through, fixed discounts convert from minor units to a decimal
//! major-unit amount. An unknown or inactive code is a well-formed
//! "not valid" answer, never an error; only a gateway outage surfaces
//! as one.

use preorder_core::Currency;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::instrument;

use crate::error::{ApiError, Result};
use crate::stripe::StripeClient;
use crate::stripe::types::PromotionCode;

/// Normalized answer for the storefront's coupon field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CouponCheck {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_off: Option<f64>,
    /// Fixed discount in major units (e.g. 15.50 for 1550 pence).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_off: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl CouponCheck {
    fn not_valid(message: &str) -> Self {
        Self {
            valid: false,
            message: Some(message.to_string()),
            code: None,
            kind: None,
            percent_off: None,
            amount_off: None,
            currency: None,
        }
    }
}

/// Normalize an active promotion code. Pure.
fn normalize(promo: &PromotionCode) -> CouponCheck {
    if let Some(percent) = promo.coupon.percent_off {
        return CouponCheck {
            valid: true,
            message: None,
            code: Some(promo.code.clone()),
            kind: Some("percent"),
            percent_off: Some(percent),
            amount_off: None,
            currency: None,
        };
    }
    if let Some(minor) = promo.coupon.amount_off {
        let currency = promo
            .coupon
            .currency
            .as_deref()
            .and_then(Currency::parse)
            .unwrap_or_default();
        return CouponCheck {
            valid: true,
            message: None,
            code: Some(promo.code.clone()),
            kind: Some("amount"),
            percent_off: None,
            amount_off: Some(currency.to_major_units(minor)),
            currency: Some(currency.code().to_string()),
        };
    }
    CouponCheck::not_valid("This code can't be applied to this order.")
}

/// Check a coupon code against the gateway.
///
/// # Errors
///
/// `Validation` for an empty code, gateway errors when the lookup
/// itself fails. An unknown code is a `valid: false` answer.
#[instrument(skip(stripe))]
pub async fn validate(stripe: &StripeClient, code: &str) -> Result<CouponCheck> {
    let code = code.trim();
    if code.is_empty() {
        return Err(ApiError::Validation("coupon code is required".to_string()));
    }

    match stripe.find_active_promotion_code(code).await? {
        Some(promo) => Ok(normalize(&promo)),
        None => Ok(CouponCheck::not_valid(
            "This code isn't valid or has expired.",
        )),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn promo(json: serde_json::Value) -> PromotionCode {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_percent_discount_passes_through() {
        let check = normalize(&promo(serde_json::json!({
            "id": "promo_1",
            "code": "SAVE15",
            "active": true,
            "coupon": { "percent_off": 15.0 }
        })));
        assert!(check.valid);
        assert_eq!(check.code.as_deref(), Some("SAVE15"));
        assert_eq!(check.kind, Some("percent"));
        assert_eq!(check.percent_off, Some(15.0));
        assert_eq!(check.amount_off, None);
    }

    #[test]
    fn test_fixed_discount_converts_to_major_units() {
        let check = normalize(&promo(serde_json::json!({
            "id": "promo_2",
            "code": "FIVER",
            "active": true,
            "coupon": { "amount_off": 500, "currency": "gbp" }
        })));
        assert!(check.valid);
        assert_eq!(check.kind, Some("amount"));
        assert_eq!(check.amount_off, Some(Decimal::new(500, 2)));
        assert_eq!(check.currency.as_deref(), Some("gbp"));

        // Non-round amounts keep their precision.
        let check = normalize(&promo(serde_json::json!({
            "id": "promo_3",
            "code": "ODD",
            "active": true,
            "coupon": { "amount_off": 1551, "currency": "gbp" }
        })));
        assert_eq!(check.amount_off.unwrap().to_string(), "15.51");
    }

    #[test]
    fn test_discount_with_neither_shape_is_not_valid() {
        let check = normalize(&promo(serde_json::json!({
            "id": "promo_4",
            "code": "WEIRD",
            "active": true,
            "coupon": {}
        })));
        assert!(!check.valid);
        assert!(check.message.is_some());
    }

    #[test]
    fn test_serialized_shape_omits_unset_fields() {
        let json = serde_json::to_value(CouponCheck::not_valid("nope")).unwrap();
        assert_eq!(json["valid"], false);
        assert_eq!(json["message"], "nope");
        assert!(json.get("code").is_none());
        assert!(json.get("percent_off").is_none());
    }
}
