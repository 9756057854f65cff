//! Shared domain types for the preorder backend.

pub mod address;
pub mod card;
pub mod order;
pub mod price;
pub mod status;

pub use address::{Address, ShippingDetails};
pub use card::SavedCard;
pub use order::OrderView;
pub use price::{Currency, PriceSnapshot};
pub use status::{PlanMode, PreorderStatus};
