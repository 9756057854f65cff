//! Kit (CRM) API client.
//!
//! Mirrors order state into subscriber custom fields and enrolls
//! subscribers in notification sequences. Everything here is advisory
//! relative to payment state: callers log failures and move on (see
//! `preorder::sync` for the enforcement of that contract).
//!
//! # API Reference
//!
//! - Base URL: `https://api.kit.com/v4`
//! - Authentication: API key via `X-Kit-Api-Key` header
//! - `POST /custom_fields` is an idempotent "ensure": posting an
//!   existing label returns the same field key, which is why the
//!   label->key mapping is cacheable

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

use crate::config::KitConfig;

/// Kit API base URL.
const BASE_URL: &str = "https://api.kit.com/v4";

/// Upper bound for any single CRM call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// How long ensured field keys stay cached. Field keys are effectively
/// immutable once created, the TTL only bounds memory.
const FIELD_KEY_TTL: Duration = Duration::from_secs(3600);

/// Errors that can occur when interacting with the Kit API.
#[derive(Debug, Error)]
pub enum KitError {
    /// HTTP request failed or timed out.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Failed to parse response.
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Kit API client.
#[derive(Clone)]
pub struct KitClient {
    inner: Arc<KitClientInner>,
}

struct KitClientInner {
    client: reqwest::Client,
    /// label -> field key
    field_keys: Cache<String, String>,
}

/// A CRM subscriber record.
#[derive(Debug, Clone, Deserialize)]
pub struct Subscriber {
    pub id: u64,
    #[serde(default)]
    pub first_name: Option<String>,
    /// Custom field values keyed by field key; absent fields may be
    /// present with a null value.
    #[serde(default)]
    pub fields: HashMap<String, Option<String>>,
}

impl Subscriber {
    /// Whether a custom field has a non-empty value.
    #[must_use]
    pub fn has_field(&self, key: &str) -> bool {
        self.fields
            .get(key)
            .and_then(Option::as_deref)
            .is_some_and(|v| !v.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct CustomFieldEnvelope {
    custom_field: CustomField,
}

#[derive(Debug, Deserialize)]
struct CustomField {
    key: String,
}

#[derive(Debug, Deserialize)]
struct SubscriberEnvelope {
    subscriber: Subscriber,
}

#[derive(Debug, Deserialize)]
struct SubscribersEnvelope {
    #[serde(default = "Vec::new")]
    subscribers: Vec<Subscriber>,
}

impl KitClient {
    /// Create a new Kit API client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &KitConfig) -> Result<Self, KitError> {
        let mut headers = HeaderMap::new();

        let mut key_header = HeaderValue::from_str(config.api_key.expose_secret())
            .map_err(|e| KitError::Parse(format!("Invalid API key format: {e}")))?;
        key_header.set_sensitive(true);
        headers.insert("X-Kit-Api-Key", key_header);
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let field_keys = Cache::builder()
            .max_capacity(256)
            .time_to_live(FIELD_KEY_TTL)
            .build();

        Ok(Self {
            inner: Arc::new(KitClientInner { client, field_keys }),
        })
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, KitError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(KitError::Api {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        serde_json::from_str(&body).map_err(|e| KitError::Parse(e.to_string()))
    }

    /// Ensure a custom field with this label exists and return its key.
    ///
    /// Idempotent: posting the same label twice returns the same key,
    /// so results are cached per label.
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails.
    #[instrument(skip(self))]
    pub async fn ensure_custom_field(&self, label: &str) -> Result<String, KitError> {
        if let Some(key) = self.inner.field_keys.get(label).await {
            return Ok(key);
        }

        let response = self
            .inner
            .client
            .post(format!("{BASE_URL}/custom_fields"))
            .json(&serde_json::json!({ "label": label }))
            .send()
            .await?;
        let envelope: CustomFieldEnvelope = Self::handle_response(response).await?;

        self.inner
            .field_keys
            .insert(label.to_string(), envelope.custom_field.key.clone())
            .await;
        Ok(envelope.custom_field.key)
    }

    /// Create or update a subscriber by email (upsert).
    ///
    /// Returns the subscriber id when the API reports one. Some
    /// accounts upsert silently without updating existing contacts,
    /// which is why callers follow up with [`Self::update_subscriber`].
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails.
    #[instrument(skip(self, fields), fields(email = %email))]
    pub async fn create_or_update_subscriber(
        &self,
        email: &str,
        first_name: &str,
        fields: &HashMap<String, String>,
    ) -> Result<Option<u64>, KitError> {
        let response = self
            .inner
            .client
            .post(format!("{BASE_URL}/subscribers"))
            .json(&serde_json::json!({
                "email_address": email,
                "first_name": first_name,
                "fields": fields,
            }))
            .send()
            .await?;
        let envelope: SubscriberEnvelope = Self::handle_response(response).await?;
        Ok(Some(envelope.subscriber.id))
    }

    /// Fetch a subscriber by email address.
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails.
    #[instrument(skip(self))]
    pub async fn get_subscriber_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Subscriber>, KitError> {
        let url = format!(
            "{BASE_URL}/subscribers?email_address={}",
            urlencoding::encode(email)
        );
        let response = self.inner.client.get(&url).send().await?;
        let envelope: SubscribersEnvelope = Self::handle_response(response).await?;
        Ok(envelope.subscribers.into_iter().next())
    }

    /// Force-update a subscriber by id. Covers providers whose upsert
    /// does not reliably update existing contacts.
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails.
    #[instrument(skip(self, fields))]
    pub async fn update_subscriber(
        &self,
        subscriber_id: u64,
        first_name: Option<&str>,
        fields: &HashMap<String, String>,
    ) -> Result<(), KitError> {
        let mut body = serde_json::json!({ "fields": fields });
        if let (Some(name), Some(obj)) = (first_name, body.as_object_mut()) {
            obj.insert("first_name".to_string(), serde_json::json!(name));
        }

        let response = self
            .inner
            .client
            .put(format!("{BASE_URL}/subscribers/{subscriber_id}"))
            .json(&body)
            .send()
            .await?;
        let _: SubscriberEnvelope = Self::handle_response(response).await?;
        Ok(())
    }

    /// Enroll a subscriber in a sequence by email.
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails.
    #[instrument(skip(self))]
    pub async fn add_to_sequence(&self, sequence_id: &str, email: &str) -> Result<(), KitError> {
        self.enroll(&format!("/sequences/{sequence_id}/subscribers"), email)
            .await
    }

    /// Add a subscriber to a form by email.
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails.
    #[instrument(skip(self))]
    pub async fn add_to_form(&self, form_id: &str, email: &str) -> Result<(), KitError> {
        self.enroll(&format!("/forms/{form_id}/subscribers"), email)
            .await
    }

    /// Tag a subscriber by email.
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails.
    #[instrument(skip(self))]
    pub async fn tag_subscriber(&self, tag_id: &str, email: &str) -> Result<(), KitError> {
        self.enroll(&format!("/tags/{tag_id}/subscribers"), email)
            .await
    }

    async fn enroll(&self, path: &str, email: &str) -> Result<(), KitError> {
        let response = self
            .inner
            .client
            .post(format!("{BASE_URL}{path}"))
            .json(&serde_json::json!({ "email_address": email }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(KitError::Api {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_has_field() {
        let subscriber: Subscriber = serde_json::from_str(
            r#"{"id":7,"first_name":"Ada","fields":{"full_name":"Ada Lovelace","source":null,"empty":""}}"#,
        )
        .unwrap();
        assert!(subscriber.has_field("full_name"));
        assert!(!subscriber.has_field("source"));
        assert!(!subscriber.has_field("empty"));
        assert!(!subscriber.has_field("missing"));
    }

    #[test]
    fn test_subscribers_envelope_tolerates_empty() {
        let envelope: SubscribersEnvelope = serde_json::from_str("{}").unwrap();
        assert!(envelope.subscribers.is_empty());
    }

    #[test]
    fn test_custom_field_envelope() {
        let envelope: CustomFieldEnvelope =
            serde_json::from_str(r#"{"custom_field":{"id":1,"label":"Preorder Status","key":"preorder_status"}}"#)
                .unwrap();
        assert_eq!(envelope.custom_field.key, "preorder_status");
    }
}
