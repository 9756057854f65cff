//! External service clients.

pub mod kit;

pub use kit::{KitClient, KitError};
