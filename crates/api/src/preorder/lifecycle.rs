//! Preorder lifecycle transitions.
//!
//! All state lives in the gateway customer's metadata bag; every
//! transition here is an ordered sequence of gateway writes. The
//! `cancelled` status is terminal: once set, mutations are rejected
//! with a conflict and reads report the preorder as gone.

use chrono::Utc;
use preorder_core::metadata::keys;
use preorder_core::{
    Address, CustomerMetadata, PreorderStatus, PriceSnapshot, SessionMetadata, ShippingDetails,
};
use tracing::{info, instrument, warn};

use crate::error::{ApiError, Result};
use crate::preorder::reader::{
    validate_customer_id, validate_intent_id, validate_payment_method_id,
};
use crate::stripe::types::{Customer, Expandable};
use crate::stripe::{Params, StripeClient, StripeError};

/// Optional durable-preference fields accepted by mutations. Only
/// populated fields are written; the gateway merges metadata updates
/// key-by-key, so absent fields keep their stored values.
#[derive(Debug, Clone, Default)]
pub struct PreferenceUpdate {
    pub selected_pack: Option<String>,
    pub people_key: Option<String>,
    pub ship_delay: Option<String>,
    pub price_id: Option<String>,
    pub order_notes: Option<String>,
    pub subscriber_yes_no: Option<String>,
    pub subscription_freq: Option<String>,
}

impl PreferenceUpdate {
    fn into_metadata(self, status: Option<PreorderStatus>) -> CustomerMetadata {
        CustomerMetadata {
            status,
            selected_pack: self.selected_pack,
            people_key: self.people_key,
            ship_delay: self.ship_delay,
            price_id: self.price_id,
            order_notes: self.order_notes,
            subscriber_yes_no: self.subscriber_yes_no,
            subscription_freq: self.subscription_freq,
            ..CustomerMetadata::default()
        }
    }
}

/// Mutations against a cancelled preorder are conflicts, never silent
/// rewrites.
fn ensure_not_cancelled(meta: &CustomerMetadata) -> Result<()> {
    if meta.status == Some(PreorderStatus::Cancelled) {
        return Err(ApiError::Conflict("preorder is cancelled".to_string()));
    }
    Ok(())
}

async fn load_live_customer(stripe: &StripeClient, customer_id: &str) -> Result<Customer> {
    let customer = stripe.retrieve_customer(customer_id).await?;
    if customer.deleted {
        return Err(ApiError::Gone("customer_deleted".to_string()));
    }
    Ok(customer)
}

/// Mark a preorder active and record the chosen preferences.
///
/// # Errors
///
/// `Conflict` when the preorder is cancelled, `Gone` when the customer
/// record was deleted, gateway errors otherwise.
#[instrument(skip(stripe, prefs))]
pub async fn activate(
    stripe: &StripeClient,
    customer_id: &str,
    prefs: PreferenceUpdate,
) -> Result<Customer> {
    validate_customer_id(customer_id)?;
    let customer = load_live_customer(stripe, customer_id).await?;
    ensure_not_cancelled(&CustomerMetadata::decode(&customer.metadata))?;

    let update = prefs.into_metadata(Some(PreorderStatus::Active));
    let mut params = Params::new();
    params.metadata("metadata", &update.encode());
    let updated = stripe.update_customer(customer_id, &params).await?;
    info!(customer_id, "preorder activated");
    Ok(updated)
}

/// Result of finalizing a preorder, carried to the CRM mirror.
#[derive(Debug, Clone)]
pub struct FinalizeOutcome {
    pub customer: Customer,
    /// Per-attempt metadata from the finalized setup intent.
    pub attempt: SessionMetadata,
    pub payment_method_id: Option<String>,
}

/// Finalize a save-card-now preorder after its setup intent succeeds:
/// attach and default the collected payment method, promote the
/// attempt metadata onto the customer, and mark the order placed.
///
/// A provisional customer (created before an email was known) is
/// upgraded in the same write when an email is supplied.
///
/// # Errors
///
/// `Conflict` when the intent has not succeeded or the preorder is
/// cancelled, `Validation`/`Gone`/gateway errors per the usual taxonomy.
#[instrument(skip(stripe))]
pub async fn finalize(
    stripe: &StripeClient,
    setup_intent_id: &str,
    email: Option<&str>,
    name: Option<&str>,
) -> Result<FinalizeOutcome> {
    validate_intent_id(setup_intent_id)?;
    let intent = stripe
        .retrieve_setup_intent(setup_intent_id, &["customer", "payment_method"])
        .await?;
    if intent.status != "succeeded" {
        return Err(ApiError::Conflict(format!(
            "setup intent is {}, not succeeded",
            intent.status
        )));
    }

    let customer = match intent.customer.as_ref() {
        Some(Expandable::Object(customer)) => (**customer).clone(),
        Some(Expandable::Id(id)) => stripe.retrieve_customer(id).await?,
        None => {
            let email = email.ok_or_else(|| {
                ApiError::Validation("setup intent has no customer and no email given".to_string())
            })?;
            resolve_or_create_customer(stripe, email, name).await?
        }
    };
    if customer.deleted {
        return Err(ApiError::Gone("customer_deleted".to_string()));
    }
    let stored = CustomerMetadata::decode(&customer.metadata);
    ensure_not_cancelled(&stored)?;

    let payment_method_id = intent
        .payment_method
        .as_ref()
        .map(|pm| pm.id().to_string());
    if let Some(pm_id) = &payment_method_id {
        stripe.attach_payment_method(pm_id, &customer.id).await?;
        stripe
            .set_default_payment_method(&customer.id, pm_id)
            .await?;
    }

    // Promote the attempt onto the customer record: durable prefs, the
    // confirmed price snapshot, the ordered status. The provisional
    // marker is cleared with an explicit empty write (merge semantics
    // would otherwise leave it set).
    let attempt = SessionMetadata::decode(&intent.metadata);
    let update = CustomerMetadata {
        status: Some(PreorderStatus::Ordered),
        selected_pack: attempt.selected_pack.clone(),
        people_key: attempt.people_key.clone(),
        ship_delay: attempt.ship_delay.clone(),
        price_id: attempt.price_id.clone(),
        last_price_pence: attempt.price_pence,
        last_price_currency: attempt.price_currency,
        last_price_display: attempt.price_display.clone(),
        ..CustomerMetadata::default()
    };
    let mut params = Params::new();
    params.metadata("metadata", &update.encode());
    params.push(&format!("metadata[{}]", keys::PROVISIONAL), "");
    if stored.provisional {
        params.push_opt("email", email);
    }
    params.push_opt("name", name);
    let customer = stripe.update_customer(&customer.id, &params).await?;
    info!(customer_id = %customer.id, setup_intent_id, "preorder finalized");

    Ok(FinalizeOutcome {
        customer,
        attempt,
        payment_method_id,
    })
}

/// Find the newest customer with this email or create one.
pub(crate) async fn resolve_or_create_customer(
    stripe: &StripeClient,
    email: &str,
    name: Option<&str>,
) -> Result<Customer> {
    if let Some(existing) = stripe.find_customer_by_email(email).await? {
        return Ok(existing);
    }
    let mut params = Params::new();
    params.push("email", email);
    params.push_opt("name", name);
    Ok(stripe.create_customer(&params).await?)
}

/// Result of a cancellation, carried to the CRM mirror.
#[derive(Debug, Clone)]
pub struct CancelOutcome {
    /// The flag was already set (or the record already deleted); no
    /// write happened.
    pub already_cancelled: bool,
    pub customer_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    /// Last confirmed price snapshot from the customer record, for the
    /// CRM's order label.
    pub last_price: Option<PriceSnapshot>,
    /// RFC 3339 timestamp of this cancellation.
    pub cancelled_at: String,
}

/// Cancel a preorder. Idempotent: cancelling twice, or cancelling a
/// customer the gateway no longer knows, succeeds without a write.
///
/// The cancelled flag is written first and must succeed; detaching the
/// saved cards (one named method, or all of them) and deleting the
/// customer record are cleanup that can fail without un-cancelling
/// anything.
///
/// # Errors
///
/// `Validation` for a malformed id; gateway errors only from the flag
/// write itself.
#[instrument(skip(stripe))]
pub async fn cancel(
    stripe: &StripeClient,
    customer_id: &str,
    detach_payment_method_id: Option<&str>,
    note: Option<&str>,
) -> Result<CancelOutcome> {
    validate_customer_id(customer_id)?;
    if let Some(pm_id) = detach_payment_method_id {
        validate_payment_method_id(pm_id)?;
    }
    let cancelled_at = Utc::now().to_rfc3339();

    let customer = match stripe.retrieve_customer(customer_id).await {
        Ok(customer) => customer,
        Err(StripeError::NotFound(_)) => {
            return Ok(CancelOutcome {
                already_cancelled: true,
                customer_id: customer_id.to_string(),
                email: None,
                name: None,
                last_price: None,
                cancelled_at,
            });
        }
        Err(e) => return Err(e.into()),
    };

    let stored = CustomerMetadata::decode(&customer.metadata);
    let outcome = CancelOutcome {
        already_cancelled: false,
        customer_id: customer.id.clone(),
        email: customer.email.clone(),
        name: customer.name.clone(),
        last_price: stored.last_price_snapshot(),
        cancelled_at,
    };
    if customer.deleted || stored.status == Some(PreorderStatus::Cancelled) {
        return Ok(CancelOutcome {
            already_cancelled: true,
            ..outcome
        });
    }

    // Flag first. If this write fails the preorder stays live and the
    // caller sees the error.
    let mut params = Params::new();
    params.push(
        &format!("metadata[{}]", keys::PREORDER_STATUS),
        PreorderStatus::Cancelled.as_str(),
    );
    if let Some(note) = note {
        params.push(&format!("metadata[{}]", keys::ORDER_NOTES), note);
    }
    stripe.update_customer(&customer.id, &params).await?;
    info!(customer_id = %customer.id, "preorder cancelled");

    // Cleanup after the flag is durable. When the caller names the
    // method to detach, only that one goes; otherwise every saved card.
    if let Some(pm_id) = detach_payment_method_id {
        if let Err(e) = stripe.detach_payment_method(pm_id).await {
            warn!(payment_method_id = %pm_id, error = %e, "detach failed after cancellation");
        }
    } else {
        match stripe.list_card_payment_methods(&customer.id, 100).await {
            Ok(methods) => {
                for method in methods {
                    if let Err(e) = stripe.detach_payment_method(&method.id).await {
                        warn!(payment_method_id = %method.id, error = %e, "detach failed after cancellation");
                    }
                }
            }
            Err(e) => warn!(customer_id = %customer.id, error = %e, "card listing failed after cancellation"),
        }
    }
    if let Err(e) = stripe.delete_customer(&customer.id).await {
        warn!(customer_id = %customer.id, error = %e, "customer delete failed after cancellation");
    }

    Ok(outcome)
}

/// Result of an abandonment teardown.
#[derive(Debug, Clone, Default)]
pub struct TeardownOutcome {
    pub intent_cancelled: bool,
    pub customer_deleted: bool,
}

/// Whether an abandoned provisional customer record may be deleted.
/// Only records that were never upgraded and gathered no gateway
/// history qualify.
const fn should_delete_provisional(
    provisional: bool,
    has_payment_methods: bool,
    has_invoices: bool,
    has_subscriptions: bool,
    has_payment_intents: bool,
) -> bool {
    provisional && !has_payment_methods && !has_invoices && !has_subscriptions && !has_payment_intents
}

/// Tear down an abandoned save-card attempt: cancel the setup intent
/// if it is still live and delete its customer record if, and only if,
/// the record is provisional with no gateway history.
///
/// # Errors
///
/// `Validation` for malformed ids, gateway errors otherwise. A setup
/// intent or customer the gateway no longer knows counts as already
/// torn down.
#[instrument(skip(stripe))]
pub async fn teardown(
    stripe: &StripeClient,
    setup_intent_id: Option<&str>,
    customer_id: Option<&str>,
) -> Result<TeardownOutcome> {
    if let Some(id) = setup_intent_id {
        validate_intent_id(id)?;
    }
    if let Some(id) = customer_id {
        validate_customer_id(id)?;
    }
    let mut outcome = TeardownOutcome::default();

    if let Some(intent_id) = setup_intent_id {
        match stripe.retrieve_setup_intent(intent_id, &[]).await {
            Ok(intent) if !intent.is_terminal() => {
                stripe.cancel_setup_intent(intent_id).await?;
                outcome.intent_cancelled = true;
            }
            Ok(_) => {}
            Err(StripeError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    if let Some(customer_id) = customer_id {
        let customer = match stripe.retrieve_customer(customer_id).await {
            Ok(customer) => customer,
            Err(StripeError::NotFound(_)) => return Ok(outcome),
            Err(e) => return Err(e.into()),
        };
        if customer.deleted {
            return Ok(outcome);
        }
        let meta = CustomerMetadata::decode(&customer.metadata);

        let (methods, invoices, subscriptions, intents) = tokio::try_join!(
            stripe.list_card_payment_methods(customer_id, 1),
            stripe.has_invoices(customer_id),
            stripe.has_subscriptions(customer_id),
            stripe.has_payment_intents(customer_id),
        )?;

        if should_delete_provisional(
            meta.provisional,
            !methods.is_empty(),
            invoices,
            subscriptions,
            intents,
        ) {
            outcome.customer_deleted = stripe.delete_customer(customer_id).await?;
            info!(customer_id, "provisional customer deleted on teardown");
        }
    }

    Ok(outcome)
}

/// Update contact details (email, name, phone) on a live preorder.
///
/// # Errors
///
/// `Conflict` on a cancelled preorder, `Gone` on a deleted record.
#[instrument(skip(stripe))]
pub async fn update_contact(
    stripe: &StripeClient,
    customer_id: &str,
    email: Option<&str>,
    name: Option<&str>,
    phone: Option<&str>,
) -> Result<Customer> {
    validate_customer_id(customer_id)?;
    if email.is_none() && name.is_none() && phone.is_none() {
        return Err(ApiError::Validation("no fields to update".to_string()));
    }
    let customer = load_live_customer(stripe, customer_id).await?;
    ensure_not_cancelled(&CustomerMetadata::decode(&customer.metadata))?;

    let mut params = Params::new();
    params.push_opt("email", email);
    params.push_opt("name", name);
    params.push_opt("phone", phone);
    Ok(stripe.update_customer(customer_id, &params).await?)
}

/// Update the shipping (and optionally billing) address on a live
/// preorder.
///
/// # Errors
///
/// Same taxonomy as [`update_contact`].
#[instrument(skip(stripe, shipping, billing))]
pub async fn update_shipping(
    stripe: &StripeClient,
    customer_id: &str,
    shipping: &ShippingDetails,
    billing: Option<&Address>,
) -> Result<Customer> {
    validate_customer_id(customer_id)?;
    let customer = load_live_customer(stripe, customer_id).await?;
    ensure_not_cancelled(&CustomerMetadata::decode(&customer.metadata))?;

    let mut params = Params::new();
    params.shipping("shipping", shipping);
    if let Some(billing) = billing {
        params.address("address", billing);
    }
    if params.is_empty() {
        return Err(ApiError::Validation("no address fields to update".to_string()));
    }
    Ok(stripe.update_customer(customer_id, &params).await?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_terminal_for_mutations() {
        let meta = CustomerMetadata {
            status: Some(PreorderStatus::Cancelled),
            ..CustomerMetadata::default()
        };
        assert!(matches!(
            ensure_not_cancelled(&meta).unwrap_err(),
            ApiError::Conflict(_)
        ));

        for status in [
            None,
            Some(PreorderStatus::Pending),
            Some(PreorderStatus::Active),
            Some(PreorderStatus::Ordered),
        ] {
            let meta = CustomerMetadata {
                status,
                ..CustomerMetadata::default()
            };
            assert!(ensure_not_cancelled(&meta).is_ok());
        }
    }

    #[test]
    fn test_provisional_delete_guard() {
        // Clean provisional record: delete.
        assert!(should_delete_provisional(true, false, false, false, false));
        // Not provisional: never delete.
        assert!(!should_delete_provisional(false, false, false, false, false));
        // Any gateway history blocks deletion.
        assert!(!should_delete_provisional(true, true, false, false, false));
        assert!(!should_delete_provisional(true, false, true, false, false));
        assert!(!should_delete_provisional(true, false, false, true, false));
        assert!(!should_delete_provisional(true, false, false, false, true));
    }

    #[test]
    fn test_preference_update_only_writes_set_fields() {
        let prefs = PreferenceUpdate {
            selected_pack: Some("6-pack".into()),
            ..PreferenceUpdate::default()
        };
        let bag = prefs.into_metadata(Some(PreorderStatus::Active)).encode();
        assert_eq!(
            bag.get(keys::PREORDER_STATUS).map(String::as_str),
            Some("active")
        );
        assert_eq!(bag.get(keys::SELECTED_PACK).map(String::as_str), Some("6-pack"));
        assert!(!bag.contains_key(keys::PEOPLE_KEY));
        assert!(!bag.contains_key(keys::ORDER_NOTES));
    }
}
