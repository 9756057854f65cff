//! CRM synchronizer.
//!
//! Mirrors selected order fields into the CRM subscriber record keyed
//! by email and enrolls the contact in the notification sequence for
//! the lifecycle event. The payment-side mutation is the source of
//! truth; everything here is advisory, so every public operation on
//! [`CrmSync`] returns `()` and failures are caught and logged - a CRM
//! outage can never change the response of the triggering payment-side
//! operation. The one exception is the standalone subscribe flow,
//! which has no payment side and surfaces its errors.

use std::collections::HashMap;

use preorder_core::metadata::truncate_value;
use tracing::{debug, instrument, warn};

use crate::config::KitConfig;
use crate::services::{KitClient, KitError};

/// CRM custom-field labels. The ensure call is idempotent per label,
/// so these are the stable vocabulary shared with the marketing team.
mod labels {
    pub const CUSTOMER: &str = "Customer";
    pub const FULL_NAME: &str = "Full Name";
    pub const ORDER_LABEL: &str = "Order Label";
    pub const ORDER_LINK: &str = "Order Link";
    pub const PACK: &str = "Pack";
    pub const PORTAL_LINK: &str = "Portal Link";
    pub const PREORDER_STATUS: &str = "Preorder Status";
    pub const SUBSCRIBER: &str = "Subscriber";
    pub const SUBSCRIPTION_FREQ: &str = "SubscriptionFreq";
    pub const CANCELLED_AT: &str = "Cancelled At";
    pub const CANCEL_NOTE: &str = "Cancel Note";
    pub const SOURCE: &str = "Source";
}

/// Field values mirrored when an order is placed.
#[derive(Debug, Clone, Default)]
pub struct OrderPlacedFields {
    pub full_name: String,
    pub order_label: String,
    /// Link back to the order page (keyed by session/intent id).
    pub order_link: String,
    /// Billing-portal or manage-order link; empty if portal creation
    /// failed, which is fine.
    pub portal_link: String,
    pub pack: String,
    pub subscriber_yes_no: String,
    pub subscription_freq: String,
}

/// Field values mirrored when an order is cancelled.
#[derive(Debug, Clone, Default)]
pub struct OrderCancelledFields {
    pub order_label: String,
    /// ISO 8601 cancellation timestamp.
    pub cancelled_at: String,
    pub cancel_note: String,
}

/// First word of a full name, for the CRM's first-name field.
#[must_use]
pub fn first_name(full_name: &str) -> &str {
    full_name.split_whitespace().next().unwrap_or("")
}

/// Best-effort mirror of order state into the CRM.
#[derive(Clone)]
pub struct CrmSync {
    kit: Option<KitClient>,
    sequence_order: Option<String>,
    sequence_cancelled: Option<String>,
    form_id: Option<String>,
    tag_id: Option<String>,
    /// Storefront origin, recorded as the subscriber's source.
    base_url: String,
}

impl CrmSync {
    /// Build the synchronizer. A missing CRM config disables all
    /// mirroring; payment-side operations proceed unaffected.
    ///
    /// # Errors
    ///
    /// Returns error if the CRM HTTP client fails to build.
    pub fn new(config: Option<&KitConfig>, base_url: &str) -> Result<Self, KitError> {
        let kit = config.map(KitClient::new).transpose()?;
        Ok(Self {
            sequence_order: config.and_then(|c| c.sequence_order.clone()),
            sequence_cancelled: config.and_then(|c| c.sequence_cancelled.clone()),
            form_id: config.and_then(|c| c.form_id.clone()),
            tag_id: config.and_then(|c| c.tag_id.clone()),
            base_url: base_url.to_string(),
            kit,
        })
    }

    /// Whether the CRM integration is configured at all.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.kit.is_some()
    }

    /// Mirror an order placement and enroll in the order sequence.
    /// Advisory: failures are logged and swallowed.
    #[instrument(skip(self, fields), fields(email = %email))]
    pub async fn order_placed(&self, email: &str, fields: &OrderPlacedFields) {
        let Some(kit) = &self.kit else {
            debug!("CRM not configured, skipping order-placed sync");
            return;
        };
        if let Err(e) = self.try_order_placed(kit, email, fields).await {
            warn!(error = %e, "CRM order-placed sync failed; order is unaffected");
        }
    }

    async fn try_order_placed(
        &self,
        kit: &KitClient,
        email: &str,
        fields: &OrderPlacedFields,
    ) -> Result<(), KitError> {
        // Field-handle lookups are read-only and independent; issue
        // them concurrently.
        let (
            customer_key,
            full_name_key,
            order_label_key,
            order_link_key,
            pack_key,
            portal_key,
            status_key,
            subscriber_key,
            freq_key,
        ) = tokio::try_join!(
            kit.ensure_custom_field(labels::CUSTOMER),
            kit.ensure_custom_field(labels::FULL_NAME),
            kit.ensure_custom_field(labels::ORDER_LABEL),
            kit.ensure_custom_field(labels::ORDER_LINK),
            kit.ensure_custom_field(labels::PACK),
            kit.ensure_custom_field(labels::PORTAL_LINK),
            kit.ensure_custom_field(labels::PREORDER_STATUS),
            kit.ensure_custom_field(labels::SUBSCRIBER),
            kit.ensure_custom_field(labels::SUBSCRIPTION_FREQ),
        )?;

        let mut by_key = HashMap::new();
        // "Customer" flips to Yes at fulfilment/capture, outside this
        // system's scope.
        by_key.insert(customer_key, "No".to_string());
        by_key.insert(full_name_key, fields.full_name.clone());
        by_key.insert(order_label_key, fields.order_label.clone());
        by_key.insert(order_link_key, fields.order_link.clone());
        by_key.insert(pack_key, fields.pack.clone());
        by_key.insert(portal_key, fields.portal_link.clone());
        by_key.insert(status_key, "Ordered".to_string());
        by_key.insert(subscriber_key, fields.subscriber_yes_no.clone());
        by_key.insert(freq_key, fields.subscription_freq.clone());

        self.upsert_then_overwrite(kit, email, first_name(&fields.full_name), &by_key)
            .await?;

        if let Some(sequence) = &self.sequence_order {
            kit.add_to_sequence(sequence, email).await?;
        } else {
            debug!("no order sequence configured, skipping enrollment");
        }
        Ok(())
    }

    /// Mirror a cancellation and enroll in the cancellation sequence.
    /// Advisory: failures are logged and swallowed.
    #[instrument(skip(self, fields), fields(email = %email))]
    pub async fn order_cancelled(&self, email: &str, first: &str, fields: &OrderCancelledFields) {
        let Some(kit) = &self.kit else {
            debug!("CRM not configured, skipping cancellation sync");
            return;
        };
        if let Err(e) = self.try_order_cancelled(kit, email, first, fields).await {
            warn!(error = %e, "CRM cancellation sync failed; cancellation is unaffected");
        }
    }

    async fn try_order_cancelled(
        &self,
        kit: &KitClient,
        email: &str,
        first: &str,
        fields: &OrderCancelledFields,
    ) -> Result<(), KitError> {
        let (status_key, cancelled_at_key, order_label_key, note_key) = tokio::try_join!(
            kit.ensure_custom_field(labels::PREORDER_STATUS),
            kit.ensure_custom_field(labels::CANCELLED_AT),
            kit.ensure_custom_field(labels::ORDER_LABEL),
            kit.ensure_custom_field(labels::CANCEL_NOTE),
        )?;

        let mut by_key = HashMap::new();
        by_key.insert(status_key, "cancelled".to_string());
        by_key.insert(cancelled_at_key, fields.cancelled_at.clone());
        // A record with no price snapshot has no label to write;
        // leaving the key out keeps the one written at order time.
        if !fields.order_label.is_empty() {
            by_key.insert(order_label_key, fields.order_label.clone());
        }
        by_key.insert(note_key, truncate_value(&fields.cancel_note));

        self.upsert_then_overwrite(kit, email, first, &by_key).await?;

        if let Some(sequence) = &self.sequence_cancelled {
            kit.add_to_sequence(sequence, email).await?;
        } else {
            debug!("no cancellation sequence configured, skipping enrollment");
        }
        Ok(())
    }

    /// Keep the CRM contact loosely in sync after a contact-details
    /// update. Advisory: failures are logged and swallowed.
    #[instrument(skip(self), fields(email = %email))]
    pub async fn contact_updated(&self, email: &str, name: Option<&str>) {
        let Some(kit) = &self.kit else {
            return;
        };
        let result = kit
            .create_or_update_subscriber(
                email,
                first_name(name.unwrap_or_default()),
                &HashMap::new(),
            )
            .await;
        if let Err(e) = result {
            warn!(error = %e, "CRM contact sync failed; customer update is unaffected");
        }
    }

    /// Standalone subscribe: upsert the contact, fill Full Name and
    /// Source only when absent, add to the configured form and apply
    /// the optional tag.
    ///
    /// Unlike the mirroring operations this has no payment side, so
    /// failures surface to the caller.
    ///
    /// # Errors
    ///
    /// Returns error if the CRM is not configured or a required call
    /// fails. Tagging failures are logged but do not fail the flow.
    #[instrument(skip(self), fields(email = %email))]
    pub async fn subscribe(&self, email: &str, full_name: &str) -> Result<(), KitError> {
        let Some(kit) = &self.kit else {
            return Err(KitError::Api {
                status: 500,
                message: "CRM not configured".to_string(),
            });
        };

        let (full_name_key, source_key) = tokio::try_join!(
            kit.ensure_custom_field(labels::FULL_NAME),
            kit.ensure_custom_field(labels::SOURCE),
        )?;

        // Lookup failures degrade to create (the upsert covers it).
        let existing = match kit.get_subscriber_by_email(email).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(error = %e, "subscriber lookup failed, continuing as create");
                None
            }
        };

        // Only fill fields that are blank, so repeat subscriptions keep
        // the original attribution.
        let mut by_key = HashMap::new();
        match &existing {
            Some(subscriber) => {
                if !subscriber.has_field(&full_name_key) {
                    by_key.insert(full_name_key, full_name.to_string());
                }
                if !subscriber.has_field(&source_key) {
                    by_key.insert(source_key, format!("{}/subscribe", self.base_url));
                }
            }
            None => {
                by_key.insert(full_name_key, full_name.to_string());
                by_key.insert(source_key, format!("{}/subscribe", self.base_url));
            }
        }

        match existing {
            Some(subscriber) => {
                let set_first = subscriber
                    .first_name
                    .as_deref()
                    .is_none_or(str::is_empty)
                    .then(|| first_name(full_name));
                kit.update_subscriber(subscriber.id, set_first, &by_key)
                    .await?;
            }
            None => {
                kit.create_or_update_subscriber(email, first_name(full_name), &by_key)
                    .await?;
            }
        }

        if let Some(form_id) = &self.form_id {
            kit.add_to_form(form_id, email).await?;
        }
        if let Some(tag_id) = &self.tag_id {
            if let Err(e) = kit.tag_subscriber(tag_id, email).await {
                warn!(error = %e, "tagging failed; subscription is unaffected");
            }
        }
        Ok(())
    }

    /// Upsert by email, then force an overwrite by id: some providers'
    /// create call does not reliably update existing contacts.
    async fn upsert_then_overwrite(
        &self,
        kit: &KitClient,
        email: &str,
        first: &str,
        by_key: &HashMap<String, String>,
    ) -> Result<(), KitError> {
        let created_id = kit.create_or_update_subscriber(email, first, by_key).await?;

        let subscriber_id = match created_id {
            Some(id) => Some(id),
            None => kit
                .get_subscriber_by_email(email)
                .await?
                .map(|subscriber| subscriber.id),
        };

        if let Some(id) = subscriber_id {
            kit.update_subscriber(id, None, by_key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_first_name() {
        assert_eq!(first_name("Ada Lovelace"), "Ada");
        assert_eq!(first_name("  Ada   Byron  Lovelace "), "Ada");
        assert_eq!(first_name("Ada"), "Ada");
        assert_eq!(first_name(""), "");
        assert_eq!(first_name("   "), "");
    }

    #[tokio::test]
    async fn test_unconfigured_sync_is_a_quiet_no_op() {
        let sync = CrmSync::new(None, "https://shop.example.com").unwrap();
        assert!(!sync.is_configured());
        // Must not panic, must not error, must not touch the network.
        sync.order_placed("a@b.com", &OrderPlacedFields::default())
            .await;
        sync.order_cancelled("a@b.com", "Ada", &OrderCancelledFields::default())
            .await;
        sync.contact_updated("a@b.com", Some("Ada Lovelace")).await;
    }

    #[tokio::test]
    async fn test_unconfigured_subscribe_errors() {
        let sync = CrmSync::new(None, "https://shop.example.com").unwrap();
        assert!(sync.subscribe("a@b.com", "Ada Lovelace").await.is_err());
    }
}
