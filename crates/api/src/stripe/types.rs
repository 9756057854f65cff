//! Typed subset of the gateway objects this service reads.
//!
//! Only the fields the preorder core actually consumes are modeled;
//! everything else in the gateway's responses is ignored by serde.

use std::collections::HashMap;

use preorder_core::{Address, ShippingDetails};
use serde::Deserialize;

/// A reference that the gateway returns either as a bare id string or,
/// when expanded, as the full object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Expandable<T> {
    Id(String),
    Object(Box<T>),
}

impl<T: HasId> Expandable<T> {
    /// The referenced object's id, expanded or not.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) => id,
            Self::Object(obj) => obj.id(),
        }
    }

    /// The expanded object, when the request asked for expansion.
    #[must_use]
    pub fn as_object(&self) -> Option<&T> {
        match self {
            Self::Id(_) => None,
            Self::Object(obj) => Some(obj),
        }
    }
}

/// Objects addressable by a gateway id.
pub trait HasId {
    fn id(&self) -> &str;
}

/// Generic list envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct List<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

/// The gateway's persistent customer object - the single source of
/// truth for preorder state, via its metadata bag.
#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    pub id: String,
    /// Hard-deleted customers come back as a stub with `deleted: true`.
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub shipping: Option<ShippingDetails>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl HasId for Customer {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Contact details captured by a checkout session.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<Address>,
}

/// A checkout session (payment, subscription or setup mode).
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub mode: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub customer: Option<Expandable<Customer>>,
    #[serde(default)]
    pub setup_intent: Option<Expandable<SetupIntent>>,
    #[serde(default)]
    pub payment_intent: Option<Expandable<PaymentIntentStub>>,
    #[serde(default)]
    pub subscription: Option<Expandable<SubscriptionStub>>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub shipping_details: Option<ShippingDetails>,
    #[serde(default)]
    pub line_items: Option<List<LineItem>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl HasId for CheckoutSession {
    fn id(&self) -> &str {
        &self.id
    }
}

/// "Collect and save a payment method without charging yet".
#[derive(Debug, Clone, Deserialize)]
pub struct SetupIntent {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub customer: Option<Expandable<Customer>>,
    #[serde(default)]
    pub payment_method: Option<Expandable<PaymentMethod>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl HasId for SetupIntent {
    fn id(&self) -> &str {
        &self.id
    }
}

impl SetupIntent {
    /// Terminal setup-intent states; cancelling these is an error.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status == "succeeded" || self.status == "canceled"
    }
}

/// A saved payment method.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentMethod {
    pub id: String,
    #[serde(default)]
    pub card: Option<CardDetails>,
}

impl HasId for PaymentMethod {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Card details on a payment method.
#[derive(Debug, Clone, Deserialize)]
pub struct CardDetails {
    pub brand: String,
    pub last4: String,
    pub exp_month: u8,
    pub exp_year: u16,
}

/// Payment intents and subscriptions are only ever id-referenced or
/// existence-checked here, never inspected.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntentStub {
    pub id: String,
}

impl HasId for PaymentIntentStub {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionStub {
    pub id: String,
}

impl HasId for SubscriptionStub {
    fn id(&self) -> &str {
        &self.id
    }
}

/// A line item on a non-setup checkout session.
#[derive(Debug, Clone, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub quantity: Option<u64>,
    #[serde(default)]
    pub price: Option<PriceRef>,
}

/// Price reference on a line item.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceRef {
    #[serde(default)]
    pub unit_amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub product: Option<Expandable<Product>>,
}

/// Product stub for line-item display.
#[derive(Debug, Clone, Deserialize)]
pub struct Product {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl HasId for Product {
    fn id(&self) -> &str {
        &self.id
    }
}

/// An active promotion code with its underlying coupon expanded.
#[derive(Debug, Clone, Deserialize)]
pub struct PromotionCode {
    pub id: String,
    pub code: String,
    #[serde(default)]
    pub active: bool,
    pub coupon: Coupon,
}

/// The discount behind a promotion code. Exactly one of `percent_off`
/// / `amount_off` is populated by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct Coupon {
    #[serde(default)]
    pub percent_off: Option<f64>,
    /// Amount in the smallest currency unit.
    #[serde(default)]
    pub amount_off: Option<u64>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// A billing-portal session.
#[derive(Debug, Clone, Deserialize)]
pub struct PortalSession {
    pub id: String,
    pub url: String,
}

/// Response from a customer delete call.
#[derive(Debug, Clone, Deserialize)]
pub struct DeletedCustomer {
    pub id: String,
    #[serde(default)]
    pub deleted: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_expandable_id_or_object() {
        let bare: Expandable<Customer> = serde_json::from_str("\"cus_123\"").unwrap();
        assert_eq!(bare.id(), "cus_123");
        assert!(bare.as_object().is_none());

        let expanded: Expandable<Customer> =
            serde_json::from_str(r#"{"id":"cus_123","email":"a@b.com"}"#).unwrap();
        assert_eq!(expanded.id(), "cus_123");
        assert_eq!(
            expanded.as_object().unwrap().email.as_deref(),
            Some("a@b.com")
        );
    }

    #[test]
    fn test_deleted_customer_stub() {
        let customer: Customer =
            serde_json::from_str(r#"{"id":"cus_123","deleted":true}"#).unwrap();
        assert!(customer.deleted);
        assert!(customer.metadata.is_empty());
    }

    #[test]
    fn test_setup_intent_terminal_states() {
        let mk = |status: &str| SetupIntent {
            id: "seti_1".into(),
            status: status.into(),
            client_secret: None,
            customer: None,
            payment_method: None,
            metadata: HashMap::new(),
        };
        assert!(mk("succeeded").is_terminal());
        assert!(mk("canceled").is_terminal());
        assert!(!mk("requires_payment_method").is_terminal());
        assert!(!mk("requires_confirmation").is_terminal());
    }

    #[test]
    fn test_session_deserializes_minimal() {
        let session: CheckoutSession = serde_json::from_str(
            r#"{"id":"cs_1","mode":"setup","metadata":{"selectedPack":"6-pack"}}"#,
        )
        .unwrap();
        assert_eq!(session.mode, "setup");
        assert_eq!(
            session.metadata.get("selectedPack").map(String::as_str),
            Some("6-pack")
        );
    }
}
