//! Enrollment and order-view route handlers.

use axum::{
    Json,
    extract::{Path, State},
};
use preorder_core::{Currency, OrderView, PlanMode, PriceSnapshot};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::{ApiError, Result};
use crate::preorder::reader::{self, SessionSummary};
use crate::preorder::factory::{self, CheckoutRequest, SetupRequest};
use crate::state::AppState;

const fn default_quantity() -> u64 {
    1
}

/// Parse the storefront's price snapshot fields. An explicit unknown
/// currency is rejected; an absent one defaults.
fn price_from_body(
    pence: Option<u64>,
    currency: Option<&str>,
    display: Option<String>,
) -> Result<Option<PriceSnapshot>> {
    let Some(pence) = pence else {
        return Ok(None);
    };
    let currency = match currency {
        Some(code) => Currency::parse(code)
            .ok_or_else(|| ApiError::Validation(format!("unsupported currency: {code}")))?,
        None => Currency::default(),
    };
    Ok(Some(PriceSnapshot::new(pence, currency, display)))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    pub price_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: u64,
    /// Defaults to a one-off payment.
    pub mode: Option<PlanMode>,
    pub email: Option<String>,
    pub coupon: Option<String>,
    pub selected_pack: Option<String>,
    pub people_key: Option<String>,
    pub ship_delay: Option<String>,
    pub delay_days: Option<u64>,
    pub order_summary: Option<String>,
    pub price_pence: Option<u64>,
    pub price_currency: Option<String>,
    pub price_display: Option<String>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

/// Redirect target for a created hosted session.
#[derive(Debug, Serialize)]
pub struct CreatedSession {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// `POST /api/checkout-session`
#[instrument(skip(state, body))]
pub async fn create_checkout(
    State(state): State<AppState>,
    Json(body): Json<CheckoutBody>,
) -> Result<Json<CreatedSession>> {
    let price = price_from_body(
        body.price_pence,
        body.price_currency.as_deref(),
        body.price_display,
    )?;
    let req = CheckoutRequest {
        price_id: body.price_id,
        quantity: body.quantity,
        mode: body.mode.unwrap_or(PlanMode::Payment),
        email: body.email,
        coupon: body.coupon,
        selected_pack: body.selected_pack,
        people_key: body.people_key,
        ship_delay: body.ship_delay,
        delay_days: body.delay_days,
        order_summary: body.order_summary,
        price,
        success_url: body.success_url,
        cancel_url: body.cancel_url,
    };
    let session = factory::create_checkout_session(state.stripe(), state.base_url(), &req).await?;
    Ok(Json(CreatedSession {
        id: session.id,
        url: session.url,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SetupBody {
    pub email: Option<String>,
    pub name: Option<String>,
    pub mode: Option<PlanMode>,
    pub selected_pack: Option<String>,
    pub people_key: Option<String>,
    pub ship_delay: Option<String>,
    pub delay_days: Option<u64>,
    pub price_id: Option<String>,
    pub order_summary: Option<String>,
    pub price_pence: Option<u64>,
    pub price_currency: Option<String>,
    pub price_display: Option<String>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

impl SetupBody {
    fn into_request(self) -> Result<SetupRequest> {
        let price = price_from_body(
            self.price_pence,
            self.price_currency.as_deref(),
            self.price_display,
        )?;
        Ok(SetupRequest {
            email: self.email,
            name: self.name,
            mode: self.mode,
            selected_pack: self.selected_pack,
            people_key: self.people_key,
            ship_delay: self.ship_delay,
            delay_days: self.delay_days,
            price_id: self.price_id,
            order_summary: self.order_summary,
            price,
            success_url: self.success_url,
            cancel_url: self.cancel_url,
        })
    }
}

/// `POST /api/setup-session`
#[instrument(skip(state, body))]
pub async fn create_setup_session(
    State(state): State<AppState>,
    Json(body): Json<SetupBody>,
) -> Result<Json<CreatedSession>> {
    let req = body.into_request()?;
    let session = factory::create_setup_session(state.stripe(), state.base_url(), &req).await?;
    Ok(Json(CreatedSession {
        id: session.id,
        url: session.url,
    }))
}

/// Client-side handle for a created setup intent.
#[derive(Debug, Serialize)]
pub struct CreatedSetupIntent {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
}

/// `POST /api/setup-intent`
#[instrument(skip(state, body))]
pub async fn create_setup_intent(
    State(state): State<AppState>,
    Json(body): Json<SetupBody>,
) -> Result<Json<CreatedSetupIntent>> {
    let req = body.into_request()?;
    let intent = factory::create_setup_intent(state.stripe(), &req).await?;
    let customer_id = intent.customer.as_ref().map(|c| c.id().to_string());
    Ok(Json(CreatedSetupIntent {
        id: intent.id,
        client_secret: intent.client_secret,
        customer_id,
    }))
}

/// `GET /api/setup-session/{id}`
#[instrument(skip(state))]
pub async fn get_setup_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OrderView>> {
    Ok(Json(reader::order_from_session(state.stripe(), &id).await?))
}

/// `GET /api/setup-intent/{id}`
#[instrument(skip(state))]
pub async fn get_setup_intent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OrderView>> {
    Ok(Json(
        reader::order_from_setup_intent(state.stripe(), &id).await?,
    ))
}

/// `GET /api/session/{id}`
#[instrument(skip(state))]
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSummary>> {
    Ok(Json(reader::session_summary(state.stripe(), &id).await?))
}

#[derive(Debug, Serialize)]
pub struct PortalLink {
    pub url: String,
}

/// `GET /api/portal-session/{id}` (customer id, or a checkout-session
/// id resolved to its customer)
#[instrument(skip(state))]
pub async fn get_portal_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PortalLink>> {
    let url = factory::portal_link(state.stripe(), state.base_url(), &id).await?;
    Ok(Json(PortalLink { url }))
}
