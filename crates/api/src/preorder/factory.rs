//! Checkout, setup-session and setup-intent creation.
//!
//! Two enrollment shapes exist: a hosted checkout session (payment or
//! subscription mode, charging now or after a trial) and a
//! save-card-now flow (a setup session or bare setup intent that
//! collects a card without charging). Every created object is stamped
//! with the attempt metadata, and the customer record gets the
//! `last_intended_price_*` snapshot so the agreed price survives the
//! attempt itself.

use chrono::{DateTime, Duration, Utc};
use preorder_core::{CustomerMetadata, PlanMode, PriceSnapshot, SessionMetadata};
use tracing::{info, instrument, warn};

use crate::error::{ApiError, Result};
use crate::preorder::lifecycle::resolve_or_create_customer;
use crate::preorder::reader::{validate_customer_id, validate_session_id};
use crate::stripe::types::{CheckoutSession, Customer, SetupIntent};
use crate::stripe::{Params, StripeClient};

/// Placeholder the gateway substitutes with the real session id on
/// redirect. A success URL without it cannot identify the order.
const SESSION_ID_TOKEN: &str = "{CHECKOUT_SESSION_ID}";

/// The gateway rejects subscription trials ending within 48 hours.
/// A small margin covers request latency.
fn min_trial() -> Duration {
    Duration::hours(49)
}

/// Validate or derive the post-checkout redirect URL.
///
/// # Errors
///
/// `Validation` when a caller-supplied URL lacks the session-id token.
pub fn resolve_success_url(base_url: &str, provided: Option<&str>) -> Result<String> {
    match provided {
        Some(url) if url.contains(SESSION_ID_TOKEN) => Ok(url.to_string()),
        Some(_) => Err(ApiError::Validation(format!(
            "success_url must contain the {SESSION_ID_TOKEN} token"
        ))),
        None => Ok(format!("{base_url}/thanks?session_id={SESSION_ID_TOKEN}")),
    }
}

#[must_use]
pub fn resolve_cancel_url(base_url: &str, provided: Option<&str>) -> String {
    provided.map_or_else(|| format!("{base_url}/"), str::to_string)
}

/// Unix timestamp for a subscription trial ending after the requested
/// ship delay, or `None` when the delay is too short to satisfy the
/// gateway's minimum (the subscription then starts immediately).
fn trial_end(now: DateTime<Utc>, delay_days: u64) -> Option<i64> {
    if delay_days == 0 {
        return None;
    }
    let days = i64::try_from(delay_days).unwrap_or(i64::MAX / 86_400);
    let candidate = now + Duration::days(days);
    if candidate - now < min_trial() {
        return None;
    }
    Some(candidate.timestamp())
}

/// Human label for the agreed price, shown in the hosted checkout and
/// mirrored to the CRM.
#[must_use]
pub fn intended_label(price: Option<&PriceSnapshot>) -> String {
    price.map_or_else(
        || "Intended: n/a".to_string(),
        |p| format!("Intended: {} ({})", p.display, p.currency.code().to_uppercase()),
    )
}

fn require_price_id(price_id: &str) -> Result<()> {
    if price_id.starts_with("price_") && price_id.len() > "price_".len() {
        Ok(())
    } else {
        Err(ApiError::Validation("malformed price id".to_string()))
    }
}

/// Input for a hosted checkout session (charge now, or subscribe).
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub price_id: String,
    pub quantity: u64,
    pub mode: PlanMode,
    pub email: Option<String>,
    pub coupon: Option<String>,
    pub selected_pack: Option<String>,
    pub people_key: Option<String>,
    pub ship_delay: Option<String>,
    pub delay_days: Option<u64>,
    pub order_summary: Option<String>,
    pub price: Option<PriceSnapshot>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

impl CheckoutRequest {
    fn attempt_metadata(&self) -> SessionMetadata {
        SessionMetadata {
            mode: Some(self.mode),
            selected_pack: self.selected_pack.clone(),
            people_key: self.people_key.clone(),
            ship_delay: self.ship_delay.clone(),
            delay_days: self.delay_days,
            price_id: Some(self.price_id.clone()),
            order_summary: self.order_summary.clone(),
            coupon: self.coupon.clone(),
            price_pence: self.price.as_ref().map(|p| p.pence),
            price_currency: self.price.as_ref().map(|p| p.currency),
            price_display: self.price.as_ref().map(|p| p.display.clone()),
        }
    }
}

/// Create a hosted checkout session.
///
/// Payment mode always creates a customer record and saves the card
/// for later off-session charges. Subscription mode converts the ship
/// delay into a trial when it clears the gateway minimum.
///
/// # Errors
///
/// `Validation` for malformed input, gateway errors otherwise.
#[instrument(skip(stripe, req), fields(mode = req.mode.as_str(), price_id = %req.price_id))]
pub async fn create_checkout_session(
    stripe: &StripeClient,
    base_url: &str,
    req: &CheckoutRequest,
) -> Result<CheckoutSession> {
    require_price_id(&req.price_id)?;
    if req.quantity == 0 {
        return Err(ApiError::Validation("quantity must be at least 1".to_string()));
    }
    let success_url = resolve_success_url(base_url, req.success_url.as_deref())?;
    let cancel_url = resolve_cancel_url(base_url, req.cancel_url.as_deref());

    let mut params = Params::new();
    params
        .push("mode", req.mode.as_str())
        .push("line_items[0][price]", req.price_id.as_str())
        .push("line_items[0][quantity]", req.quantity.to_string())
        .push("success_url", success_url)
        .push("cancel_url", cancel_url)
        .push_opt("customer_email", req.email.as_deref());

    match req.mode {
        PlanMode::Payment => {
            params
                .push("customer_creation", "always")
                .push("payment_intent_data[setup_future_usage]", "off_session");
        }
        PlanMode::Subscription => {
            let delay = req.delay_days.unwrap_or(0);
            if let Some(ts) = trial_end(Utc::now(), delay) {
                params.push("subscription_data[trial_end]", ts.to_string());
            } else if delay > 0 {
                info!(delay_days = delay, "ship delay below trial minimum, charging immediately");
            }
        }
    }

    // A coupon that no longer resolves to an active promotion code is
    // dropped rather than blocking checkout; the validate endpoint is
    // where invalid codes get reported.
    if let Some(code) = &req.coupon {
        match stripe.find_active_promotion_code(code).await {
            Ok(Some(promo)) => {
                params.push("discounts[0][promotion_code]", promo.id);
            }
            Ok(None) => warn!(code = %code, "coupon not active at checkout, ignoring"),
            Err(e) => warn!(code = %code, error = %e, "coupon lookup failed at checkout, ignoring"),
        }
    }

    params.metadata("metadata", &req.attempt_metadata().encode());
    Ok(stripe.create_checkout_session(&params).await?)
}

/// Input for the save-card-now flows.
#[derive(Debug, Clone)]
pub struct SetupRequest {
    /// Required for setup sessions, optional for bare setup intents
    /// (absent email creates a provisional customer).
    pub email: Option<String>,
    pub name: Option<String>,
    pub mode: Option<PlanMode>,
    pub selected_pack: Option<String>,
    pub people_key: Option<String>,
    pub ship_delay: Option<String>,
    pub delay_days: Option<u64>,
    pub price_id: Option<String>,
    pub order_summary: Option<String>,
    pub price: Option<PriceSnapshot>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

impl SetupRequest {
    fn attempt_metadata(&self) -> SessionMetadata {
        SessionMetadata {
            mode: self.mode,
            selected_pack: self.selected_pack.clone(),
            people_key: self.people_key.clone(),
            ship_delay: self.ship_delay.clone(),
            delay_days: self.delay_days,
            price_id: self.price_id.clone(),
            order_summary: self.order_summary.clone(),
            coupon: None,
            price_pence: self.price.as_ref().map(|p| p.pence),
            price_currency: self.price.as_ref().map(|p| p.currency),
            price_display: self.price.as_ref().map(|p| p.display.clone()),
        }
    }

    /// Durable fields stamped onto the customer record at creation
    /// time, including the last agreed price snapshot.
    fn customer_metadata(&self, provisional: bool) -> CustomerMetadata {
        CustomerMetadata {
            selected_pack: self.selected_pack.clone(),
            people_key: self.people_key.clone(),
            ship_delay: self.ship_delay.clone(),
            price_id: self.price_id.clone(),
            provisional,
            last_price_pence: self.price.as_ref().map(|p| p.pence),
            last_price_currency: self.price.as_ref().map(|p| p.currency),
            last_price_display: self.price.as_ref().map(|p| p.display.clone()),
            ..CustomerMetadata::default()
        }
    }
}

/// Resolve the customer for a setup flow and stamp the durable fields.
async fn prepare_customer(stripe: &StripeClient, req: &SetupRequest) -> Result<Customer> {
    let customer = match req.email.as_deref() {
        Some(email) => resolve_or_create_customer(stripe, email, req.name.as_deref()).await?,
        None => {
            let mut params = Params::new();
            params.push_opt("name", req.name.as_deref());
            params.metadata("metadata", &req.customer_metadata(true).encode());
            let customer = stripe.create_customer(&params).await?;
            info!(customer_id = %customer.id, "provisional customer created");
            return Ok(customer);
        }
    };

    let mut params = Params::new();
    params.metadata("metadata", &req.customer_metadata(false).encode());
    if !params.is_empty() {
        return Ok(stripe.update_customer(&customer.id, &params).await?);
    }
    Ok(customer)
}

/// Create a hosted setup session: collect and save a card now, charge
/// later. The submit message shows the agreed price so the customer
/// knows nothing is charged today.
///
/// # Errors
///
/// `Validation` when no email is given, gateway errors otherwise.
#[instrument(skip(stripe, req))]
pub async fn create_setup_session(
    stripe: &StripeClient,
    base_url: &str,
    req: &SetupRequest,
) -> Result<CheckoutSession> {
    if req.email.as_deref().is_none_or(str::is_empty) {
        return Err(ApiError::Validation("email is required".to_string()));
    }
    if let Some(price_id) = req.price_id.as_deref() {
        require_price_id(price_id)?;
    }
    let success_url = resolve_success_url(base_url, req.success_url.as_deref())?;
    let cancel_url = resolve_cancel_url(base_url, req.cancel_url.as_deref());

    let customer = prepare_customer(stripe, req).await?;

    let submit_message = format!(
        "No charge today. Your card is saved and charged when your order ships. {}",
        intended_label(req.price.as_ref())
    );
    let mut params = Params::new();
    params
        .push("mode", "setup")
        .push("customer", customer.id.as_str())
        .push("success_url", success_url)
        .push("cancel_url", cancel_url)
        .push("payment_method_types[0]", "card")
        .push("custom_text[submit][message]", submit_message)
        .push("consent_collection[terms_of_service]", "required");
    let attempt = req.attempt_metadata().encode();
    params.metadata("metadata", &attempt);
    // Stamped on the created setup intent as well, so intent-keyed
    // reads see the attempt without going back through the session.
    params.metadata("setup_intent_data[metadata]", &attempt);
    Ok(stripe.create_checkout_session(&params).await?)
}

/// Create a bare setup intent for an embedded card form. Without an
/// email the backing customer is provisional and eligible for teardown
/// if the attempt is abandoned.
///
/// # Errors
///
/// Gateway errors.
#[instrument(skip(stripe, req))]
pub async fn create_setup_intent(
    stripe: &StripeClient,
    req: &SetupRequest,
) -> Result<SetupIntent> {
    if let Some(price_id) = req.price_id.as_deref() {
        require_price_id(price_id)?;
    }
    let customer = prepare_customer(stripe, req).await?;

    let mut params = Params::new();
    params
        .push("customer", customer.id.as_str())
        .push("usage", "off_session")
        .push("payment_method_types[0]", "card")
        .push("payment_method_types[1]", "link");
    params.metadata("metadata", &req.attempt_metadata().encode());
    Ok(stripe.create_setup_intent(&params).await?)
}

/// Create a billing-portal link, returning to the account page. Takes
/// either a customer id or a checkout-session id (resolved to its
/// customer).
///
/// # Errors
///
/// `Validation` for a malformed id, `NotFound` for a session without a
/// customer, gateway errors otherwise.
#[instrument(skip(stripe))]
pub async fn portal_link(stripe: &StripeClient, base_url: &str, id: &str) -> Result<String> {
    let customer_id = if id.starts_with("cus_") {
        validate_customer_id(id)?;
        id.to_string()
    } else {
        validate_session_id(id)?;
        let session = stripe.retrieve_checkout_session(id, &[]).await?;
        session
            .customer
            .as_ref()
            .map(|c| c.id().to_string())
            .ok_or_else(|| ApiError::NotFound("session has no customer".to_string()))?
    };
    let session = stripe
        .create_portal_session(&customer_id, &format!("{base_url}/account"))
        .await?;
    Ok(session.url)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use preorder_core::Currency;

    use super::*;

    #[test]
    fn test_success_url_requires_token() {
        let ok = resolve_success_url(
            "https://shop.example.com",
            Some("https://shop.example.com/done?sid={CHECKOUT_SESSION_ID}"),
        );
        assert!(ok.is_ok());

        let err = resolve_success_url("https://shop.example.com", Some("https://shop.example.com/done"));
        assert!(matches!(err.unwrap_err(), ApiError::Validation(_)));

        let derived = resolve_success_url("https://shop.example.com", None).unwrap();
        assert!(derived.contains("{CHECKOUT_SESSION_ID}"));
        assert!(derived.starts_with("https://shop.example.com/"));
    }

    #[test]
    fn test_cancel_url_defaults_to_base() {
        assert_eq!(
            resolve_cancel_url("https://shop.example.com", None),
            "https://shop.example.com/"
        );
        assert_eq!(
            resolve_cancel_url("https://shop.example.com", Some("https://x.test/back")),
            "https://x.test/back"
        );
    }

    #[test]
    fn test_trial_end_honors_gateway_minimum() {
        let now = Utc::now();
        assert_eq!(trial_end(now, 0), None);
        // One day is below the 48h minimum.
        assert_eq!(trial_end(now, 1), None);
        // Two days is still inside the latency margin.
        assert_eq!(trial_end(now, 2), None);
        let ts = trial_end(now, 14).unwrap();
        assert_eq!(ts, (now + Duration::days(14)).timestamp());
    }

    #[test]
    fn test_intended_label() {
        let price = PriceSnapshot::new(2621, Currency::Gbp, None);
        assert_eq!(intended_label(Some(&price)), "Intended: £26.21 (GBP)");
        assert_eq!(intended_label(None), "Intended: n/a");
    }

    #[test]
    fn test_price_id_validation() {
        assert!(require_price_id("price_1NqrT2abc").is_ok());
        assert!(require_price_id("price_").is_err());
        assert!(require_price_id("prod_123").is_err());
        assert!(require_price_id("").is_err());
    }

    #[test]
    fn test_checkout_attempt_metadata_carries_snapshot() {
        let req = CheckoutRequest {
            price_id: "price_123".into(),
            quantity: 1,
            mode: PlanMode::Payment,
            email: None,
            coupon: Some("SAVE15".into()),
            selected_pack: Some("6-pack".into()),
            people_key: None,
            ship_delay: None,
            delay_days: None,
            order_summary: Some("6 rolls".into()),
            price: Some(PriceSnapshot::new(2621, Currency::Gbp, None)),
            success_url: None,
            cancel_url: None,
        };
        let bag = req.attempt_metadata().encode();
        assert_eq!(bag.get("mode").map(String::as_str), Some("payment"));
        assert_eq!(bag.get("intended_price_pence").map(String::as_str), Some("2621"));
        assert_eq!(bag.get("coupon").map(String::as_str), Some("SAVE15"));
        assert_eq!(bag.get("selectedPack").map(String::as_str), Some("6-pack"));
    }
}
