//! Saved payment-method summary.

use serde::{Deserialize, Serialize};

/// Summary of a card saved for a future off-session charge.
///
/// Presence on an [`super::OrderView`] means a usable payment method is
/// attached to the customer record. Absence is not an error; the
/// customer simply has not completed card collection yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedCard {
    /// Gateway payment-method identifier.
    pub id: String,
    /// Card brand (e.g. "visa").
    pub brand: String,
    /// Last four digits.
    pub last4: String,
    pub exp_month: u8,
    pub exp_year: u16,
}
