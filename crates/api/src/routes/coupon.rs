//! Coupon validation route handler.

use axum::{Json, extract::State};
use serde::Deserialize;
use tracing::instrument;

use crate::error::Result;
use crate::preorder::coupon::{self, CouponCheck};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CouponBody {
    pub code: String,
}

/// `POST /api/coupon/validate`
///
/// An unknown or expired code is a 200 with `valid: false`; only a
/// malformed request or a gateway outage is an error.
#[instrument(skip(state, body))]
pub async fn validate(
    State(state): State<AppState>,
    Json(body): Json<CouponBody>,
) -> Result<Json<CouponCheck>> {
    Ok(Json(coupon::validate(state.stripe(), &body.code).await?))
}
