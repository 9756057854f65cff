//! The assembled order view.

use serde::{Deserialize, Serialize};

use crate::types::{Address, PlanMode, PreorderStatus, PriceSnapshot, SavedCard, ShippingDetails};

/// Normalized order state, assembled on read.
///
/// There is no stored order row anywhere; this view is reconstructed
/// from a gateway session or setup-intent plus its associated customer
/// record, with customer-level metadata taking precedence for durable
/// preferences and session-level metadata filling in per-attempt
/// values (price snapshot, order summary).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OrderView {
    /// Session or setup-intent identifier this view was read from.
    pub id: String,
    /// Gateway object status (e.g. "complete", "succeeded").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping: Option<ShippingDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing: Option<Address>,

    // Durable product preferences (customer metadata wins).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_pack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub people_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ship_delay: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_mode: Option<PlanMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preorder_status: Option<PreorderStatus>,

    // Per-attempt snapshot (session/intent metadata wins).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intended_price: Option<PriceSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_card: Option<SavedCard>,
}
