//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::preorder::sync::CrmSync;
use crate::services::KitError;
use crate::stripe::{StripeClient, StripeError};

/// Error constructing the shared clients at startup.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("payment gateway client: {0}")]
    Stripe(#[from] StripeError),
    #[error("CRM client: {0}")]
    Kit(#[from] KitError),
}

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: AppConfig,
    stripe: StripeClient,
    crm: CrmSync,
}

impl AppState {
    /// Build the shared clients from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if either HTTP client fails to construct
    /// (malformed credentials).
    pub fn new(config: AppConfig) -> Result<Self, StateError> {
        let stripe = StripeClient::new(&config.stripe)?;
        let crm = CrmSync::new(config.kit.as_ref(), &config.base_url)?;
        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                stripe,
                crm,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn stripe(&self) -> &StripeClient {
        &self.inner.stripe
    }

    #[must_use]
    pub fn crm(&self) -> &CrmSync {
        &self.inner.crm
    }

    /// Canonical storefront origin.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.inner.config.base_url
    }
}
