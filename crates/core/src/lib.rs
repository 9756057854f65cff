//! Preorder Core - Shared types library.
//!
//! This crate provides the domain model shared between the API binary
//! and any future tooling:
//!
//! - [`types`] - price snapshots, status enums, addresses, the assembled
//!   order view
//! - [`metadata`] - the codec between the domain model and the flat
//!   string metadata bag the payment gateway persists
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no
//! HTTP clients. The gateway customer record's metadata bag is the only
//! durable store in the system, so the codec's key names are a stable
//! persistence contract and must not change across deploys.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod metadata;
pub mod types;

pub use metadata::{CustomerMetadata, SessionMetadata, MAX_METADATA_VALUE_LEN};
pub use types::*;
