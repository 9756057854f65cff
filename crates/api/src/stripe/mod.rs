//! Payment gateway (Stripe) API client.
//!
//! # Architecture
//!
//! - Hand-rolled `reqwest` client; the gateway speaks form-encoded
//!   request bodies and JSON responses
//! - The customer record's metadata bag is the system's only durable
//!   store, so every mutation here is effectively a persistence write
//! - No application-level retries: a failed call is surfaced to the
//!   caller (payment path) or logged and abandoned (advisory path)
//! - Every request is bounded by the client's default timeout

pub mod types;

pub use types::*;

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::instrument;

use preorder_core::{Address, ShippingDetails};

use crate::config::StripeConfig;

/// Gateway REST API base URL.
const BASE_URL: &str = "https://api.stripe.com/v1";

/// Upper bound for any single gateway call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when interacting with the gateway API.
#[derive(Debug, Error)]
pub enum StripeError {
    /// HTTP request failed or timed out.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Referenced object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Failed to parse response.
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Error envelope the gateway wraps failures in.
#[derive(Debug, serde::Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Form-encoded parameter list with the gateway's bracket notation for
/// nested fields (`metadata[selectedPack]`, `shipping[address][line1]`).
#[derive(Debug, Default, Clone)]
pub struct Params(Vec<(String, String)>);

impl Params {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.0.push((key.to_string(), value.into()));
        self
    }

    pub fn push_opt(&mut self, key: &str, value: Option<&str>) -> &mut Self {
        if let Some(v) = value {
            self.push(key, v);
        }
        self
    }

    /// Append `expand[]` entries.
    pub fn expand(&mut self, paths: &[&str]) -> &mut Self {
        for path in paths {
            self.push("expand[]", *path);
        }
        self
    }

    /// Append metadata entries under `{prefix}[key]`.
    pub fn metadata<'a>(
        &mut self,
        prefix: &str,
        entries: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> &mut Self {
        for (key, value) in entries {
            self.push(&format!("{prefix}[{key}]"), value.clone());
        }
        self
    }

    /// Append a nested address under `{prefix}[line1]` etc. Only set
    /// fields are written, so existing values are never blanked.
    pub fn address(&mut self, prefix: &str, address: &Address) -> &mut Self {
        self.push_opt(&format!("{prefix}[line1]"), address.line1.as_deref());
        self.push_opt(&format!("{prefix}[line2]"), address.line2.as_deref());
        self.push_opt(&format!("{prefix}[city]"), address.city.as_deref());
        self.push_opt(
            &format!("{prefix}[postal_code]"),
            address.postal_code.as_deref(),
        );
        self.push_opt(&format!("{prefix}[country]"), address.country.as_deref());
        self
    }

    /// Append shipping details under `{prefix}[name]` / `{prefix}[address][...]`.
    pub fn shipping(&mut self, prefix: &str, shipping: &ShippingDetails) -> &mut Self {
        self.push_opt(&format!("{prefix}[name]"), shipping.name.as_deref());
        self.push_opt(&format!("{prefix}[phone]"), shipping.phone.as_deref());
        if let Some(address) = &shipping.address {
            self.address(&format!("{prefix}[address]"), address);
        }
        self
    }

    #[must_use]
    pub fn as_slice(&self) -> &[(String, String)] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Client for the payment gateway API.
#[derive(Clone)]
pub struct StripeClient {
    inner: Arc<StripeClientInner>,
}

struct StripeClientInner {
    client: reqwest::Client,
}

impl StripeClient {
    /// Create a new gateway client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &StripeConfig) -> Result<Self, StripeError> {
        let mut headers = HeaderMap::new();

        let auth_value = format!("Bearer {}", config.secret_key.expose_secret());
        let mut auth_header = HeaderValue::from_str(&auth_value)
            .map_err(|e| StripeError::Parse(format!("Invalid secret key format: {e}")))?;
        auth_header.set_sensitive(true);
        headers.insert("Authorization", auth_header);

        // Pin the API version so response shapes are stable
        headers.insert(
            "Stripe-Version",
            HeaderValue::from_str(&config.api_version)
                .map_err(|e| StripeError::Parse(format!("Invalid API version: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            inner: Arc::new(StripeClientInner { client }),
        })
    }

    /// Execute a GET request.
    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &Params,
    ) -> Result<T, StripeError> {
        let url = format!("{BASE_URL}{path}");
        let response = self
            .inner
            .client
            .get(&url)
            .query(query.as_slice())
            .send()
            .await?;
        Self::handle_response(path, response).await
    }

    /// Execute a form-encoded POST request.
    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &Params,
    ) -> Result<T, StripeError> {
        let url = format!("{BASE_URL}{path}");
        let response = self
            .inner
            .client
            .post(&url)
            .form(params.as_slice())
            .send()
            .await?;
        Self::handle_response(path, response).await
    }

    /// Execute a DELETE request.
    async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, StripeError> {
        let url = format!("{BASE_URL}{path}");
        let response = self.inner.client.delete(&url).send().await?;
        Self::handle_response(path, response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        path: &str,
        response: reqwest::Response,
    ) -> Result<T, StripeError> {
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StripeError::NotFound(path.to_string()));
        }

        let body = response.text().await?;

        if !status.is_success() {
            let (message, code) = serde_json::from_str::<ErrorEnvelope>(&body).map_or_else(
                |_| (body.chars().take(200).collect::<String>(), None),
                |env| {
                    (
                        env.error.message.unwrap_or_else(|| "unknown error".into()),
                        env.error.code,
                    )
                },
            );
            return Err(StripeError::Api {
                status: status.as_u16(),
                code,
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| StripeError::Parse(e.to_string()))
    }

    // =========================================================================
    // Customers
    // =========================================================================

    /// Retrieve a customer. Hard-deleted customers come back as a stub
    /// with `deleted: true`, not as an error.
    #[instrument(skip(self))]
    pub async fn retrieve_customer(&self, customer_id: &str) -> Result<Customer, StripeError> {
        self.get(&format!("/customers/{customer_id}"), &Params::new())
            .await
    }

    /// Find the most recent non-deleted customer with this email, if any.
    ///
    /// "Find-by-email before create" keeps at most one customer record
    /// per real-world email address.
    #[instrument(skip(self))]
    pub async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Customer>, StripeError> {
        let mut query = Params::new();
        query.push("email", email).push("limit", "1");
        let list: List<Customer> = self.get("/customers", &query).await?;
        Ok(list.data.into_iter().next())
    }

    /// Create a customer.
    #[instrument(skip_all)]
    pub async fn create_customer(&self, params: &Params) -> Result<Customer, StripeError> {
        self.post("/customers", params).await
    }

    /// Update a customer. Metadata updates merge key-by-key; only keys
    /// present in `params` change.
    #[instrument(skip(self, params))]
    pub async fn update_customer(
        &self,
        customer_id: &str,
        params: &Params,
    ) -> Result<Customer, StripeError> {
        self.post(&format!("/customers/{customer_id}"), params).await
    }

    /// Hard-delete a customer. Returns whether the gateway confirmed
    /// the deletion.
    #[instrument(skip(self))]
    pub async fn delete_customer(&self, customer_id: &str) -> Result<bool, StripeError> {
        let deleted: DeletedCustomer = self.delete(&format!("/customers/{customer_id}")).await?;
        Ok(deleted.deleted)
    }

    // =========================================================================
    // Checkout sessions
    // =========================================================================

    /// Create a checkout session (payment, subscription or setup mode).
    #[instrument(skip_all)]
    pub async fn create_checkout_session(
        &self,
        params: &Params,
    ) -> Result<CheckoutSession, StripeError> {
        self.post("/checkout/sessions", params).await
    }

    /// Retrieve a checkout session with the given expansions.
    #[instrument(skip(self, expand))]
    pub async fn retrieve_checkout_session(
        &self,
        session_id: &str,
        expand: &[&str],
    ) -> Result<CheckoutSession, StripeError> {
        let mut query = Params::new();
        query.expand(expand);
        self.get(&format!("/checkout/sessions/{session_id}"), &query)
            .await
    }

    // =========================================================================
    // Setup intents
    // =========================================================================

    /// Create a setup intent for off-session reuse.
    #[instrument(skip_all)]
    pub async fn create_setup_intent(&self, params: &Params) -> Result<SetupIntent, StripeError> {
        self.post("/setup_intents", params).await
    }

    /// Retrieve a setup intent with the given expansions.
    #[instrument(skip(self, expand))]
    pub async fn retrieve_setup_intent(
        &self,
        intent_id: &str,
        expand: &[&str],
    ) -> Result<SetupIntent, StripeError> {
        let mut query = Params::new();
        query.expand(expand);
        self.get(&format!("/setup_intents/{intent_id}"), &query)
            .await
    }

    /// Cancel a setup intent.
    #[instrument(skip(self))]
    pub async fn cancel_setup_intent(&self, intent_id: &str) -> Result<SetupIntent, StripeError> {
        self.post(&format!("/setup_intents/{intent_id}/cancel"), &Params::new())
            .await
    }

    // =========================================================================
    // Payment methods
    // =========================================================================

    /// Attach a payment method to a customer.
    ///
    /// The gateway rejects re-attaching a method that is already on a
    /// customer; that case is treated as already-satisfied, not as an
    /// error, so `finalize` stays idempotent.
    #[instrument(skip(self))]
    pub async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
    ) -> Result<(), StripeError> {
        let mut params = Params::new();
        params.push("customer", customer_id);
        let result: Result<PaymentMethod, StripeError> = self
            .post(&format!("/payment_methods/{payment_method_id}/attach"), &params)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(StripeError::Api { ref message, .. })
                if message.to_lowercase().contains("already been attached") =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Detach a payment method from its customer.
    #[instrument(skip(self))]
    pub async fn detach_payment_method(
        &self,
        payment_method_id: &str,
    ) -> Result<(), StripeError> {
        let _: PaymentMethod = self
            .post(
                &format!("/payment_methods/{payment_method_id}/detach"),
                &Params::new(),
            )
            .await?;
        Ok(())
    }

    /// List a customer's saved cards, most recently attached first.
    #[instrument(skip(self))]
    pub async fn list_card_payment_methods(
        &self,
        customer_id: &str,
        limit: u8,
    ) -> Result<Vec<PaymentMethod>, StripeError> {
        let mut query = Params::new();
        query
            .push("customer", customer_id)
            .push("type", "card")
            .push("limit", limit.to_string());
        let list: List<PaymentMethod> = self.get("/payment_methods", &query).await?;
        Ok(list.data)
    }

    /// Set the default payment method for future off-session charges.
    #[instrument(skip(self))]
    pub async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> Result<(), StripeError> {
        let mut params = Params::new();
        params.push(
            "invoice_settings[default_payment_method]",
            payment_method_id,
        );
        let _: Customer = self
            .post(&format!("/customers/{customer_id}"), &params)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Financial-history probes (teardown guard)
    // =========================================================================

    /// Whether any object of the given collection exists for a customer.
    async fn has_any(&self, path: &str, customer_id: &str) -> Result<bool, StripeError> {
        let mut query = Params::new();
        query.push("customer", customer_id).push("limit", "1");
        let list: List<serde_json::Value> = self.get(path, &query).await?;
        Ok(!list.data.is_empty())
    }

    /// Whether the customer has any invoices.
    pub async fn has_invoices(&self, customer_id: &str) -> Result<bool, StripeError> {
        self.has_any("/invoices", customer_id).await
    }

    /// Whether the customer has any subscriptions.
    pub async fn has_subscriptions(&self, customer_id: &str) -> Result<bool, StripeError> {
        self.has_any("/subscriptions", customer_id).await
    }

    /// Whether the customer has any payment intents.
    pub async fn has_payment_intents(&self, customer_id: &str) -> Result<bool, StripeError> {
        self.has_any("/payment_intents", customer_id).await
    }

    // =========================================================================
    // Promotion codes
    // =========================================================================

    /// Look up an active promotion code by exact code, with its coupon
    /// expanded. Absence is `None`, never an error.
    #[instrument(skip(self))]
    pub async fn find_active_promotion_code(
        &self,
        code: &str,
    ) -> Result<Option<PromotionCode>, StripeError> {
        let mut query = Params::new();
        query
            .push("code", code)
            .push("active", "true")
            .push("limit", "1")
            .expand(&["data.coupon"]);
        let list: List<PromotionCode> = self.get("/promotion_codes", &query).await?;
        Ok(list.data.into_iter().next())
    }

    // =========================================================================
    // Billing portal
    // =========================================================================

    /// Create a billing-portal session for a customer.
    #[instrument(skip(self))]
    pub async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, StripeError> {
        let mut params = Params::new();
        params
            .push("customer", customer_id)
            .push("return_url", return_url);
        self.post("/billing_portal/sessions", &params).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_params_bracket_notation() {
        let mut params = Params::new();
        params.push("customer", "cus_1");
        params.push("metadata[preorder_status]", "active");
        assert_eq!(
            params.as_slice(),
            &[
                ("customer".to_string(), "cus_1".to_string()),
                ("metadata[preorder_status]".to_string(), "active".to_string()),
            ]
        );
    }

    #[test]
    fn test_params_address_skips_unset_fields() {
        let address = Address {
            line1: Some("1 High St".into()),
            country: Some("GB".into()),
            ..Address::default()
        };
        let mut params = Params::new();
        params.address("address", &address);
        let keys: Vec<&str> = params.as_slice().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["address[line1]", "address[country]"]);
    }

    #[test]
    fn test_params_shipping_nests_address() {
        let shipping = ShippingDetails {
            name: Some("Ada".into()),
            phone: None,
            address: Some(Address {
                line1: Some("1 High St".into()),
                postal_code: Some("N1 1AA".into()),
                ..Address::default()
            }),
        };
        let mut params = Params::new();
        params.shipping("shipping", &shipping);
        let keys: Vec<&str> = params.as_slice().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "shipping[name]",
                "shipping[address][line1]",
                "shipping[address][postal_code]",
            ]
        );
    }

    #[test]
    fn test_params_expand() {
        let mut params = Params::new();
        params.expand(&["customer", "setup_intent"]);
        assert_eq!(
            params.as_slice(),
            &[
                ("expand[]".to_string(), "customer".to_string()),
                ("expand[]".to_string(), "setup_intent".to_string()),
            ]
        );
    }

    #[test]
    fn test_error_envelope_parse() {
        let env: ErrorEnvelope = serde_json::from_str(
            r#"{"error":{"message":"No such customer","code":"resource_missing","type":"invalid_request_error"}}"#,
        )
        .unwrap();
        assert_eq!(env.error.code.as_deref(), Some("resource_missing"));
    }
}
