//! Preorder lifecycle route handlers.
//!
//! Each mutation runs the payment-side transition first; only after it
//! succeeds is the CRM mirror updated, and a CRM failure never changes
//! the response.

use axum::{Json, extract::State};
use preorder_core::{Currency, CustomerMetadata, PlanMode, PriceSnapshot};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::error::{ApiError, Result};
use crate::preorder::factory::{self, intended_label};
use crate::preorder::lifecycle::{self, PreferenceUpdate};
use crate::preorder::sync::{OrderCancelledFields, OrderPlacedFields, first_name};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ActivateBody {
    pub customer_id: String,
    pub selected_pack: Option<String>,
    pub people_key: Option<String>,
    pub ship_delay: Option<String>,
    pub price_id: Option<String>,
    pub order_notes: Option<String>,
    pub subscriber_yes_no: Option<String>,
    pub subscription_freq: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ActivateResponse {
    pub ok: bool,
    pub customer_id: String,
    pub preorder_status: &'static str,
}

/// `POST /api/preorder/activate`
#[instrument(skip(state, body), fields(customer_id = %body.customer_id))]
pub async fn activate(
    State(state): State<AppState>,
    Json(body): Json<ActivateBody>,
) -> Result<Json<ActivateResponse>> {
    let prefs = PreferenceUpdate {
        selected_pack: body.selected_pack,
        people_key: body.people_key,
        ship_delay: body.ship_delay,
        price_id: body.price_id,
        order_notes: body.order_notes,
        subscriber_yes_no: body.subscriber_yes_no,
        subscription_freq: body.subscription_freq,
    };
    let customer = lifecycle::activate(state.stripe(), &body.customer_id, prefs).await?;
    Ok(Json(ActivateResponse {
        ok: true,
        customer_id: customer.id,
        preorder_status: "active",
    }))
}

#[derive(Debug, Deserialize)]
pub struct FinalizeBody {
    pub setup_intent_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FinalizeResponse {
    pub ok: bool,
    pub customer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method_id: Option<String>,
}

/// CRM "Subscriber" value: the stored preference when one exists,
/// otherwise derived from the attempt's plan mode.
fn subscriber_label(stored: Option<String>, mode: Option<PlanMode>) -> String {
    stored.unwrap_or_else(|| {
        match mode {
            Some(PlanMode::Subscription) => "Yes",
            _ => "No",
        }
        .to_string()
    })
}

/// CRM "Order Label" on cancellation, from the last confirmed price.
/// Empty when no snapshot was recorded; the mirror then leaves the
/// field as written at order time.
fn cancelled_order_label(last_price: Option<&PriceSnapshot>) -> String {
    last_price.map_or_else(String::new, |price| intended_label(Some(price)))
}

/// `POST /api/preorder/finalize`
#[instrument(skip(state, body), fields(setup_intent_id = %body.setup_intent_id))]
pub async fn finalize(
    State(state): State<AppState>,
    Json(body): Json<FinalizeBody>,
) -> Result<Json<FinalizeResponse>> {
    let outcome = lifecycle::finalize(
        state.stripe(),
        &body.setup_intent_id,
        body.email.as_deref(),
        body.name.as_deref(),
    )
    .await?;

    if let Some(email) = outcome.customer.email.clone() {
        let stored = CustomerMetadata::decode(&outcome.customer.metadata);
        let portal_link = match factory::portal_link(
            state.stripe(),
            state.base_url(),
            &outcome.customer.id,
        )
        .await
        {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "portal link creation failed, mirroring without one");
                String::new()
            }
        };
        let fields = OrderPlacedFields {
            full_name: outcome.customer.name.clone().unwrap_or_default(),
            order_label: outcome
                .attempt
                .order_summary
                .clone()
                .unwrap_or_else(|| {
                    intended_label(outcome.attempt.price_snapshot(Currency::default()).as_ref())
                }),
            order_link: format!("{}/preorder/{}", state.base_url(), body.setup_intent_id),
            portal_link,
            pack: outcome.attempt.selected_pack.clone().unwrap_or_default(),
            subscriber_yes_no: subscriber_label(stored.subscriber_yes_no, outcome.attempt.mode),
            subscription_freq: stored.subscription_freq.unwrap_or_default(),
        };
        state.crm().order_placed(&email, &fields).await;
    }

    Ok(Json(FinalizeResponse {
        ok: true,
        customer_id: outcome.customer.id,
        payment_method_id: outcome.payment_method_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub customer_id: String,
    /// Detach only this saved card; every saved card when absent.
    pub detach_payment_method_id: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub ok: bool,
    pub already_cancelled: bool,
}

/// `POST /api/preorder/cancel`
#[instrument(skip(state, body), fields(customer_id = %body.customer_id))]
pub async fn cancel(
    State(state): State<AppState>,
    Json(body): Json<CancelBody>,
) -> Result<Json<CancelResponse>> {
    let outcome = lifecycle::cancel(
        state.stripe(),
        &body.customer_id,
        body.detach_payment_method_id.as_deref(),
        body.note.as_deref(),
    )
    .await?;

    if !outcome.already_cancelled {
        if let Some(email) = &outcome.email {
            let fields = OrderCancelledFields {
                order_label: cancelled_order_label(outcome.last_price.as_ref()),
                cancelled_at: outcome.cancelled_at.clone(),
                cancel_note: body.note.unwrap_or_default(),
            };
            state
                .crm()
                .order_cancelled(
                    email,
                    first_name(outcome.name.as_deref().unwrap_or_default()),
                    &fields,
                )
                .await;
        }
    }

    Ok(Json(CancelResponse {
        ok: true,
        already_cancelled: outcome.already_cancelled,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TeardownBody {
    pub setup_intent_id: Option<String>,
    pub customer_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TeardownResponse {
    pub ok: bool,
    pub intent_cancelled: bool,
    pub customer_deleted: bool,
}

/// `POST /api/preorder/teardown`
#[instrument(skip(state, body))]
pub async fn teardown(
    State(state): State<AppState>,
    Json(body): Json<TeardownBody>,
) -> Result<Json<TeardownResponse>> {
    if body.setup_intent_id.is_none() && body.customer_id.is_none() {
        return Err(ApiError::Validation(
            "setup_intent_id or customer_id is required".to_string(),
        ));
    }
    let outcome = lifecycle::teardown(
        state.stripe(),
        body.setup_intent_id.as_deref(),
        body.customer_id.as_deref(),
    )
    .await?;
    Ok(Json(TeardownResponse {
        ok: true,
        intent_cancelled: outcome.intent_cancelled,
        customer_deleted: outcome.customer_deleted,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_label_falls_back_to_plan_mode() {
        assert_eq!(
            subscriber_label(Some("Yes".into()), Some(PlanMode::Payment)),
            "Yes"
        );
        assert_eq!(subscriber_label(None, Some(PlanMode::Subscription)), "Yes");
        assert_eq!(subscriber_label(None, Some(PlanMode::Payment)), "No");
        assert_eq!(subscriber_label(None, None), "No");
    }

    #[test]
    fn test_cancelled_order_label_uses_last_price() {
        let price = PriceSnapshot::new(2621, Currency::Gbp, None);
        assert_eq!(
            cancelled_order_label(Some(&price)),
            "Intended: £26.21 (GBP)"
        );
        // No snapshot means no label write, never a blank overwrite.
        assert_eq!(cancelled_order_label(None), "");
    }
}
