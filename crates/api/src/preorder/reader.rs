//! Order read path.
//!
//! There is no order table. An order is reconstructed on every read
//! from a checkout session or setup intent plus its customer record.
//! Customer metadata wins for durable preferences (it reflects the
//! latest confirmed state); session or intent metadata wins for the
//! per-attempt price snapshot and order summary, falling back to the
//! customer's last confirmed snapshot.

use preorder_core::{
    Currency, CustomerMetadata, OrderView, PlanMode, PreorderStatus, SavedCard, SessionMetadata,
    ShippingDetails,
};
use serde::Serialize;
use tracing::{instrument, warn};

use crate::error::{ApiError, Result};
use crate::stripe::StripeClient;
use crate::stripe::types::{
    CheckoutSession, Customer, CustomerDetails, Expandable, PaymentMethod,
};

/// Reject malformed gateway ids before any network call, so typos and
/// probing get a 400 instead of a relayed upstream error.
fn validate_id(id: &str, prefix: &str, what: &str) -> Result<()> {
    let well_formed = id.starts_with(prefix)
        && id.len() > prefix.len()
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if well_formed {
        Ok(())
    } else {
        Err(ApiError::Validation(format!("malformed {what} id")))
    }
}

pub fn validate_session_id(id: &str) -> Result<()> {
    validate_id(id, "cs_", "session")
}

pub fn validate_intent_id(id: &str) -> Result<()> {
    validate_id(id, "seti_", "setup intent")
}

pub fn validate_customer_id(id: &str) -> Result<()> {
    validate_id(id, "cus_", "customer")
}

pub fn validate_payment_method_id(id: &str) -> Result<()> {
    validate_id(id, "pm_", "payment method")
}

/// Resolve an expandable customer reference to the full record.
async fn resolve_customer(
    stripe: &StripeClient,
    reference: Option<&Expandable<Customer>>,
) -> Result<Option<Customer>> {
    match reference {
        None => Ok(None),
        Some(Expandable::Object(customer)) => Ok(Some((**customer).clone())),
        Some(Expandable::Id(id)) => Ok(Some(stripe.retrieve_customer(id).await?)),
    }
}

/// A cancelled or hard-deleted preorder is gone; readers must not
/// reconstruct a view of it.
fn ensure_not_gone(customer: Option<&Customer>, meta: &CustomerMetadata) -> Result<()> {
    if customer.is_some_and(|c| c.deleted) {
        return Err(ApiError::Gone("customer_deleted".to_string()));
    }
    if meta.status == Some(PreorderStatus::Cancelled) {
        return Err(ApiError::Gone("preorder_cancelled".to_string()));
    }
    Ok(())
}

fn card_view(method: &PaymentMethod) -> Option<SavedCard> {
    method.card.as_ref().map(|card| SavedCard {
        id: method.id.clone(),
        brand: card.brand.clone(),
        last4: card.last4.clone(),
        exp_month: card.exp_month,
        exp_year: card.exp_year,
    })
}

/// Merge the attempt-level and customer-level state into a view.
/// Pure; all precedence rules live here.
#[allow(clippy::too_many_arguments)]
fn assemble(
    id: &str,
    status: Option<&str>,
    attempt: &SessionMetadata,
    customer: Option<&Customer>,
    customer_meta: &CustomerMetadata,
    details: Option<&CustomerDetails>,
    attempt_shipping: Option<&ShippingDetails>,
    fallback_currency: Currency,
) -> OrderView {
    OrderView {
        id: id.to_string(),
        status: status.map(str::to_string),
        customer_id: customer.map(|c| c.id.clone()),
        email: details
            .and_then(|d| d.email.clone())
            .or_else(|| customer.and_then(|c| c.email.clone())),
        customer_name: details
            .and_then(|d| d.name.clone())
            .or_else(|| customer.and_then(|c| c.name.clone())),
        shipping: attempt_shipping
            .cloned()
            .or_else(|| customer.and_then(|c| c.shipping.clone())),
        billing: details
            .and_then(|d| d.address.clone())
            .or_else(|| customer.and_then(|c| c.address.clone())),
        selected_pack: customer_meta
            .selected_pack
            .clone()
            .or_else(|| attempt.selected_pack.clone()),
        people_key: customer_meta
            .people_key
            .clone()
            .or_else(|| attempt.people_key.clone()),
        ship_delay: customer_meta
            .ship_delay
            .clone()
            .or_else(|| attempt.ship_delay.clone()),
        plan_mode: attempt.mode,
        preorder_status: customer_meta.status,
        intended_price: attempt
            .price_snapshot(fallback_currency)
            .or_else(|| customer_meta.last_price_snapshot()),
        order_summary: attempt.order_summary.clone(),
        coupon_code: attempt.coupon.clone(),
        saved_card: None,
    }
}

/// Fall back to the customer's first saved card when the attempt did
/// not carry one. Cosmetic on the order page, so a listing failure
/// degrades to "no card shown".
async fn backfill_saved_card(stripe: &StripeClient, customer: Option<&Customer>) -> Option<SavedCard> {
    let customer = customer?;
    match stripe.list_card_payment_methods(&customer.id, 1).await {
        Ok(methods) => methods.first().and_then(card_view),
        Err(e) => {
            warn!(customer_id = %customer.id, error = %e, "card listing failed, omitting saved card");
            None
        }
    }
}

/// Decode the attempt bag for a session. A setup session's metadata is
/// also stamped on the setup intent it created, and older records may
/// carry it only there, so the expanded intent's bag fills any gaps
/// before the customer-level fallback applies.
fn attempt_from_session(session: &CheckoutSession) -> SessionMetadata {
    let mut attempt = SessionMetadata::decode(&session.metadata);
    if let Some(intent) = session.setup_intent.as_ref().and_then(Expandable::as_object) {
        attempt = attempt.merged_with(SessionMetadata::decode(&intent.metadata));
    }
    if attempt.mode.is_none() {
        attempt.mode = PlanMode::parse(&session.mode);
    }
    attempt
}

/// Reconstruct the order view behind a checkout session.
///
/// # Errors
///
/// `Validation` for a malformed id, `Gone` when the preorder was
/// cancelled or its customer deleted, gateway errors otherwise.
#[instrument(skip(stripe))]
pub async fn order_from_session(stripe: &StripeClient, session_id: &str) -> Result<OrderView> {
    validate_session_id(session_id)?;
    let session = stripe
        .retrieve_checkout_session(
            session_id,
            &["customer", "setup_intent", "setup_intent.payment_method"],
        )
        .await?;

    let customer = resolve_customer(stripe, session.customer.as_ref()).await?;
    let customer_meta = customer
        .as_ref()
        .map(|c| CustomerMetadata::decode(&c.metadata))
        .unwrap_or_default();
    ensure_not_gone(customer.as_ref(), &customer_meta)?;

    let attempt = attempt_from_session(&session);
    let fallback_currency = session
        .currency
        .as_deref()
        .and_then(Currency::parse)
        .unwrap_or_default();

    let mut view = assemble(
        &session.id,
        session.status.as_deref(),
        &attempt,
        customer.as_ref(),
        &customer_meta,
        session.customer_details.as_ref(),
        session.shipping_details.as_ref(),
        fallback_currency,
    );

    view.saved_card = session
        .setup_intent
        .as_ref()
        .and_then(Expandable::as_object)
        .and_then(|intent| intent.payment_method.as_ref())
        .and_then(Expandable::as_object)
        .and_then(|method| card_view(method));
    if view.saved_card.is_none() {
        view.saved_card = backfill_saved_card(stripe, customer.as_ref()).await;
    }

    Ok(view)
}

/// Reconstruct the order view behind a setup intent.
///
/// # Errors
///
/// Same taxonomy as [`order_from_session`].
#[instrument(skip(stripe))]
pub async fn order_from_setup_intent(stripe: &StripeClient, intent_id: &str) -> Result<OrderView> {
    validate_intent_id(intent_id)?;
    let intent = stripe
        .retrieve_setup_intent(intent_id, &["customer", "payment_method"])
        .await?;

    let customer = resolve_customer(stripe, intent.customer.as_ref()).await?;
    let customer_meta = customer
        .as_ref()
        .map(|c| CustomerMetadata::decode(&c.metadata))
        .unwrap_or_default();
    ensure_not_gone(customer.as_ref(), &customer_meta)?;

    let attempt = SessionMetadata::decode(&intent.metadata);

    let mut view = assemble(
        &intent.id,
        Some(&intent.status),
        &attempt,
        customer.as_ref(),
        &customer_meta,
        None,
        None,
        Currency::default(),
    );

    view.saved_card = intent
        .payment_method
        .as_ref()
        .and_then(Expandable::as_object)
        .and_then(|method| card_view(method));
    if view.saved_card.is_none() {
        view.saved_card = backfill_saved_card(stripe, customer.as_ref()).await;
    }

    Ok(view)
}

/// Line-item summary of a checkout session, for the thank-you page.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_total: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub items: Vec<ItemSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_amount: Option<i64>,
}

fn summarize(session: &CheckoutSession) -> SessionSummary {
    let items = session
        .line_items
        .as_ref()
        .map(|list| {
            list.data
                .iter()
                .map(|item| ItemSummary {
                    name: item.price.as_ref().and_then(|price| {
                        price
                            .product
                            .as_ref()
                            .and_then(Expandable::as_object)
                            .and_then(|product| product.name.clone())
                    }),
                    quantity: item.quantity,
                    unit_amount: item.price.as_ref().and_then(|price| price.unit_amount),
                })
                .collect()
        })
        .unwrap_or_default();

    SessionSummary {
        id: session.id.clone(),
        mode: session.mode.clone(),
        status: session.status.clone(),
        currency: session.currency.clone(),
        amount_total: session.amount_total,
        email: session
            .customer_details
            .as_ref()
            .and_then(|d| d.email.clone()),
        items,
    }
}

/// Retrieve a plain session summary (no customer resolution, no
/// preorder semantics).
///
/// # Errors
///
/// `Validation` for a malformed id, gateway errors otherwise.
#[instrument(skip(stripe))]
pub async fn session_summary(stripe: &StripeClient, session_id: &str) -> Result<SessionSummary> {
    validate_session_id(session_id)?;
    let session = stripe
        .retrieve_checkout_session(session_id, &["line_items", "line_items.data.price.product"])
        .await?;
    Ok(summarize(&session))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::collections::HashMap;

    use preorder_core::metadata::keys;

    use super::*;

    #[test]
    fn test_id_validation() {
        assert!(validate_session_id("cs_test_a1B2c3").is_ok());
        assert!(validate_intent_id("seti_1NqrT2").is_ok());
        assert!(validate_customer_id("cus_9xYz").is_ok());
        assert!(validate_payment_method_id("pm_1AbCd").is_ok());

        assert!(validate_session_id("seti_123").is_err());
        assert!(validate_payment_method_id("card_123").is_err());
        assert!(validate_session_id("cs_").is_err());
        assert!(validate_session_id("cs_123; DROP").is_err());
        assert!(validate_session_id("").is_err());
        assert!(validate_customer_id(" cus_123").is_err());
    }

    fn customer_with(bag: &[(&str, &str)]) -> Customer {
        let metadata: HashMap<String, String> = bag
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        serde_json::from_value(serde_json::json!({
            "id": "cus_123",
            "email": "stored@example.com",
            "name": "Stored Name",
            "metadata": metadata,
        }))
        .unwrap()
    }

    #[test]
    fn test_cancelled_preorder_is_gone() {
        let customer = customer_with(&[(keys::PREORDER_STATUS, "cancelled")]);
        let meta = CustomerMetadata::decode(&customer.metadata);
        let err = ensure_not_gone(Some(&customer), &meta).unwrap_err();
        assert!(matches!(err, ApiError::Gone(_)));
    }

    #[test]
    fn test_deleted_customer_is_gone() {
        let customer: Customer =
            serde_json::from_str(r#"{"id":"cus_123","deleted":true}"#).unwrap();
        let err = ensure_not_gone(Some(&customer), &CustomerMetadata::default()).unwrap_err();
        assert!(matches!(err, ApiError::Gone(_)));
    }

    #[test]
    fn test_customer_metadata_wins_durable_preferences() {
        let customer = customer_with(&[
            (keys::SELECTED_PACK, "12-pack"),
            (keys::PEOPLE_KEY, "4"),
            (keys::SHIP_DELAY, "1m"),
        ]);
        let customer_meta = CustomerMetadata::decode(&customer.metadata);
        let attempt = SessionMetadata {
            selected_pack: Some("6-pack".into()),
            people_key: Some("2".into()),
            ship_delay: Some("none".into()),
            ..SessionMetadata::default()
        };

        let view = assemble(
            "cs_1",
            Some("complete"),
            &attempt,
            Some(&customer),
            &customer_meta,
            None,
            None,
            Currency::Gbp,
        );
        assert_eq!(view.selected_pack.as_deref(), Some("12-pack"));
        assert_eq!(view.people_key.as_deref(), Some("4"));
        assert_eq!(view.ship_delay.as_deref(), Some("1m"));
    }

    #[test]
    fn test_attempt_price_wins_over_last_confirmed() {
        let customer = customer_with(&[
            (keys::LAST_INTENDED_PRICE_PENCE, "1999"),
            (keys::LAST_INTENDED_PRICE_CURRENCY, "gbp"),
        ]);
        let customer_meta = CustomerMetadata::decode(&customer.metadata);
        let attempt = SessionMetadata {
            price_pence: Some(2621),
            price_currency: Some(Currency::Gbp),
            ..SessionMetadata::default()
        };

        let view = assemble(
            "cs_1",
            None,
            &attempt,
            Some(&customer),
            &customer_meta,
            None,
            None,
            Currency::Gbp,
        );
        assert_eq!(view.intended_price.unwrap().pence, 2621);

        // Without an attempt snapshot, the last confirmed one shows.
        let view = assemble(
            "cs_1",
            None,
            &SessionMetadata::default(),
            Some(&customer),
            &customer_meta,
            None,
            None,
            Currency::Gbp,
        );
        assert_eq!(view.intended_price.unwrap().pence, 1999);
    }

    #[test]
    fn test_contact_details_win_over_customer_record() {
        let customer = customer_with(&[]);
        let details = CustomerDetails {
            email: Some("checkout@example.com".into()),
            name: Some("Checkout Name".into()),
            phone: None,
            address: None,
        };
        let view = assemble(
            "cs_1",
            None,
            &SessionMetadata::default(),
            Some(&customer),
            &CustomerMetadata::default(),
            Some(&details),
            None,
            Currency::Gbp,
        );
        assert_eq!(view.email.as_deref(), Some("checkout@example.com"));
        assert_eq!(view.customer_name.as_deref(), Some("Checkout Name"));

        // Falls back to the customer record when the session carried none.
        let view = assemble(
            "cs_1",
            None,
            &SessionMetadata::default(),
            Some(&customer),
            &CustomerMetadata::default(),
            None,
            None,
            Currency::Gbp,
        );
        assert_eq!(view.email.as_deref(), Some("stored@example.com"));
        assert_eq!(view.customer_name.as_deref(), Some("Stored Name"));
    }

    #[test]
    fn test_session_attempt_falls_back_to_intent_bag() {
        // Setup sessions created through the hosted flow carry the
        // attempt bag on the setup intent; the session itself may have
        // an empty one.
        let session: CheckoutSession = serde_json::from_value(serde_json::json!({
            "id": "cs_1",
            "mode": "setup",
            "metadata": {},
            "setup_intent": {
                "id": "seti_1",
                "status": "succeeded",
                "metadata": {
                    "mode": "payment",
                    "order_summary": "6 rolls, one-off",
                    "coupon": "SAVE15",
                    "intended_price_pence": "2621",
                    "intended_price_currency": "gbp"
                }
            }
        }))
        .unwrap();

        let attempt = attempt_from_session(&session);
        assert_eq!(attempt.order_summary.as_deref(), Some("6 rolls, one-off"));
        assert_eq!(attempt.coupon.as_deref(), Some("SAVE15"));
        assert_eq!(attempt.price_pence, Some(2621));
        assert_eq!(attempt.mode, Some(PlanMode::Payment));
    }

    #[test]
    fn test_session_bag_wins_over_intent_bag() {
        let session: CheckoutSession = serde_json::from_value(serde_json::json!({
            "id": "cs_1",
            "mode": "setup",
            "metadata": { "order_summary": "12 rolls, monthly" },
            "setup_intent": {
                "id": "seti_1",
                "status": "succeeded",
                "metadata": { "order_summary": "stale summary" }
            }
        }))
        .unwrap();
        let attempt = attempt_from_session(&session);
        assert_eq!(attempt.order_summary.as_deref(), Some("12 rolls, monthly"));
    }

    #[test]
    fn test_summarize_expanded_line_items() {
        let session: CheckoutSession = serde_json::from_value(serde_json::json!({
            "id": "cs_1",
            "mode": "payment",
            "status": "complete",
            "currency": "gbp",
            "amount_total": 2621,
            "customer_details": { "email": "a@b.com" },
            "line_items": { "data": [ {
                "quantity": 2,
                "price": {
                    "unit_amount": 1311,
                    "currency": "gbp",
                    "product": { "id": "prod_1", "name": "6-pack" }
                }
            } ] },
            "metadata": {}
        }))
        .unwrap();

        let summary = summarize(&session);
        assert_eq!(summary.amount_total, Some(2621));
        assert_eq!(summary.email.as_deref(), Some("a@b.com"));
        assert_eq!(summary.items.len(), 1);
        assert_eq!(summary.items[0].name.as_deref(), Some("6-pack"));
        assert_eq!(summary.items[0].quantity, Some(2));
        assert_eq!(summary.items[0].unit_amount, Some(1311));
    }
}
