//! Preorder lifecycle and cross-system reconciliation.
//!
//! The canonical preorder state lives in the gateway customer record's
//! metadata bag. These modules decide how that state is written
//! ([`lifecycle`]), how sessions are stamped with it ([`factory`]), how
//! a normalized order view is reconstructed from it ([`reader`]), and
//! how it is best-effort mirrored into the CRM ([`sync`]).

pub mod coupon;
pub mod factory;
pub mod lifecycle;
pub mod reader;
pub mod sync;
