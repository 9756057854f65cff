//! Customer detail route handlers.

use axum::{Json, extract::State};
use preorder_core::{Address, ShippingDetails};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::{ApiError, Result};
use crate::preorder::lifecycle;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UpdateResponse {
    pub ok: bool,
    pub customer_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ContactBody {
    pub customer_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
}

/// `POST /api/customer/update`
#[instrument(skip(state, body), fields(customer_id = %body.customer_id))]
pub async fn update(
    State(state): State<AppState>,
    Json(body): Json<ContactBody>,
) -> Result<Json<UpdateResponse>> {
    let customer = lifecycle::update_contact(
        state.stripe(),
        &body.customer_id,
        body.email.as_deref(),
        body.name.as_deref(),
        body.phone.as_deref(),
    )
    .await?;

    if let Some(email) = &customer.email {
        state
            .crm()
            .contact_updated(email, customer.name.as_deref())
            .await;
    }

    Ok(Json(UpdateResponse {
        ok: true,
        customer_id: customer.id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ShippingBody {
    pub customer_id: String,
    pub shipping: ShippingDetails,
    pub billing: Option<Address>,
}

/// `POST /api/customer/shipping`
#[instrument(skip(state, body), fields(customer_id = %body.customer_id))]
pub async fn shipping(
    State(state): State<AppState>,
    Json(body): Json<ShippingBody>,
) -> Result<Json<UpdateResponse>> {
    if body
        .shipping
        .address
        .as_ref()
        .is_none_or(Address::is_empty)
    {
        return Err(ApiError::Validation(
            "shipping address is required".to_string(),
        ));
    }
    let customer = lifecycle::update_shipping(
        state.stripe(),
        &body.customer_id,
        &body.shipping,
        body.billing.as_ref(),
    )
    .await?;
    Ok(Json(UpdateResponse {
        ok: true,
        customer_id: customer.id,
    }))
}
