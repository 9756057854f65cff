//! Codec between the preorder domain model and the gateway metadata bag.
//!
//! The gateway metadata bag is a flat string-to-string map and is the
//! only persistence mechanism in the system, so the key names here are
//! a stable contract. Two bags exist:
//!
//! - the **customer** bag holds durable preferences and the lifecycle
//!   status (plus the last confirmed price snapshot under the
//!   `last_intended_price_*` keys),
//! - the **session / setup-intent** bag holds per-checkout-attempt
//!   values (the price snapshot for this attempt, the order summary).
//!
//! Encoding never fails: every value is coerced to a string and
//! truncated to [`MAX_METADATA_VALUE_LEN`] characters to satisfy the
//! backing store's per-value size limit. Decoding never errors:
//! missing or malformed keys decode to `None`, never to zero, so
//! callers can tell "absent" from "explicitly zero".

use std::collections::{BTreeMap, HashMap};

use crate::types::{Currency, PlanMode, PreorderStatus, PriceSnapshot};

/// Per-value size limit of the gateway metadata bag.
pub const MAX_METADATA_VALUE_LEN: usize = 500;

/// Stable metadata key names.
///
/// These are persisted on live customer records; renaming one is a
/// data migration, not a refactor.
pub mod keys {
    pub const PREORDER_STATUS: &str = "preorder_status";
    pub const SELECTED_PACK: &str = "selectedPack";
    /// Legacy alias for [`SELECTED_PACK`]; read as a fallback and
    /// still written so older storefront pages keep working.
    pub const PACK_SIZE: &str = "packSize";
    pub const PEOPLE_KEY: &str = "peopleKey";
    pub const SHIP_DELAY: &str = "shipDelay";
    pub const DELAY_DAYS: &str = "delayDays";
    pub const PRICE_ID: &str = "priceId";
    pub const ORDER_NOTES: &str = "order_notes";
    pub const MODE: &str = "mode";
    pub const PLAN: &str = "plan";
    pub const ORDER_SUMMARY: &str = "order_summary";
    pub const COUPON: &str = "coupon";
    pub const PROVISIONAL: &str = "provisional";
    pub const SUBSCRIBER_YES_NO: &str = "subscriber_yes_no";
    pub const SUBSCRIPTION_FREQ: &str = "subscription_freq";

    pub const INTENDED_PRICE_PENCE: &str = "intended_price_pence";
    pub const INTENDED_PRICE_CURRENCY: &str = "intended_price_currency";
    pub const INTENDED_PRICE_DISPLAY: &str = "intended_price_display";

    pub const LAST_INTENDED_PRICE_PENCE: &str = "last_intended_price_pence";
    pub const LAST_INTENDED_PRICE_CURRENCY: &str = "last_intended_price_currency";
    pub const LAST_INTENDED_PRICE_DISPLAY: &str = "last_intended_price_display";
}

/// Truncate a metadata value to the backing store's size limit.
///
/// Truncation counts characters, not bytes, so multi-byte input never
/// splits a code point.
#[must_use]
pub fn truncate_value(value: &str) -> String {
    value.chars().take(MAX_METADATA_VALUE_LEN).collect()
}

/// Parse a non-negative integer metadata value.
///
/// Non-numeric content yields `None`, not zero.
fn parse_u64(value: Option<&String>) -> Option<u64> {
    value.and_then(|v| v.trim().parse::<u64>().ok())
}

fn get(bag: &HashMap<String, String>, key: &str) -> Option<String> {
    bag.get(key).filter(|v| !v.is_empty()).cloned()
}

fn insert(bag: &mut BTreeMap<String, String>, key: &str, value: &str) {
    bag.insert(key.to_string(), truncate_value(value));
}

fn insert_opt(bag: &mut BTreeMap<String, String>, key: &str, value: Option<&String>) {
    if let Some(v) = value {
        insert(bag, key, v);
    }
}

/// Durable preorder state carried on the customer record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CustomerMetadata {
    pub status: Option<PreorderStatus>,
    pub selected_pack: Option<String>,
    pub people_key: Option<String>,
    pub ship_delay: Option<String>,
    pub price_id: Option<String>,
    pub order_notes: Option<String>,
    /// Record was created before an email was known; never treat it as
    /// a real order until upgraded.
    pub provisional: bool,
    pub subscriber_yes_no: Option<String>,
    pub subscription_freq: Option<String>,

    // Last confirmed price snapshot.
    pub last_price_pence: Option<u64>,
    pub last_price_currency: Option<Currency>,
    pub last_price_display: Option<String>,
}

impl CustomerMetadata {
    /// Decode from a customer metadata bag. Never errors.
    #[must_use]
    pub fn decode(bag: &HashMap<String, String>) -> Self {
        Self {
            status: get(bag, keys::PREORDER_STATUS)
                .as_deref()
                .and_then(PreorderStatus::parse),
            // Legacy alias resolved once, here and nowhere else.
            selected_pack: get(bag, keys::SELECTED_PACK).or_else(|| get(bag, keys::PACK_SIZE)),
            people_key: get(bag, keys::PEOPLE_KEY),
            ship_delay: get(bag, keys::SHIP_DELAY),
            price_id: get(bag, keys::PRICE_ID),
            order_notes: get(bag, keys::ORDER_NOTES),
            provisional: bag.get(keys::PROVISIONAL).is_some_and(|v| v == "true"),
            subscriber_yes_no: get(bag, keys::SUBSCRIBER_YES_NO),
            subscription_freq: get(bag, keys::SUBSCRIPTION_FREQ),
            last_price_pence: parse_u64(bag.get(keys::LAST_INTENDED_PRICE_PENCE)),
            last_price_currency: get(bag, keys::LAST_INTENDED_PRICE_CURRENCY)
                .as_deref()
                .and_then(Currency::parse),
            last_price_display: get(bag, keys::LAST_INTENDED_PRICE_DISPLAY),
        }
    }

    /// Encode the set fields into a flat string map. Never fails.
    ///
    /// Only populated fields are written, so the result can be merged
    /// into an existing bag without blanking other keys (the gateway
    /// merges metadata updates key-by-key).
    #[must_use]
    pub fn encode(&self) -> BTreeMap<String, String> {
        let mut bag = BTreeMap::new();
        if let Some(status) = self.status {
            insert(&mut bag, keys::PREORDER_STATUS, status.as_str());
        }
        if let Some(pack) = &self.selected_pack {
            insert(&mut bag, keys::SELECTED_PACK, pack);
            insert(&mut bag, keys::PACK_SIZE, pack);
        }
        insert_opt(&mut bag, keys::PEOPLE_KEY, self.people_key.as_ref());
        insert_opt(&mut bag, keys::SHIP_DELAY, self.ship_delay.as_ref());
        insert_opt(&mut bag, keys::PRICE_ID, self.price_id.as_ref());
        insert_opt(&mut bag, keys::ORDER_NOTES, self.order_notes.as_ref());
        if self.provisional {
            insert(&mut bag, keys::PROVISIONAL, "true");
        }
        insert_opt(
            &mut bag,
            keys::SUBSCRIBER_YES_NO,
            self.subscriber_yes_no.as_ref(),
        );
        insert_opt(
            &mut bag,
            keys::SUBSCRIPTION_FREQ,
            self.subscription_freq.as_ref(),
        );
        if let Some(pence) = self.last_price_pence {
            insert(&mut bag, keys::LAST_INTENDED_PRICE_PENCE, &pence.to_string());
        }
        if let Some(currency) = self.last_price_currency {
            insert(&mut bag, keys::LAST_INTENDED_PRICE_CURRENCY, currency.code());
        }
        insert_opt(
            &mut bag,
            keys::LAST_INTENDED_PRICE_DISPLAY,
            self.last_price_display.as_ref(),
        );
        bag
    }

    /// The last confirmed price snapshot, if one was recorded.
    #[must_use]
    pub fn last_price_snapshot(&self) -> Option<PriceSnapshot> {
        self.last_price_pence.map(|pence| {
            PriceSnapshot::new(
                pence,
                self.last_price_currency.unwrap_or_default(),
                self.last_price_display.clone(),
            )
        })
    }
}

/// Per-checkout-attempt state carried on a session or setup-intent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionMetadata {
    pub mode: Option<PlanMode>,
    pub selected_pack: Option<String>,
    pub people_key: Option<String>,
    pub ship_delay: Option<String>,
    pub delay_days: Option<u64>,
    pub price_id: Option<String>,
    pub order_summary: Option<String>,
    pub coupon: Option<String>,

    pub price_pence: Option<u64>,
    pub price_currency: Option<Currency>,
    pub price_display: Option<String>,
}

impl SessionMetadata {
    /// Decode from a session or setup-intent metadata bag. Never errors.
    #[must_use]
    pub fn decode(bag: &HashMap<String, String>) -> Self {
        Self {
            // `mode` is the current key; `plan` the legacy one.
            mode: get(bag, keys::MODE)
                .or_else(|| get(bag, keys::PLAN))
                .as_deref()
                .and_then(PlanMode::parse),
            selected_pack: get(bag, keys::SELECTED_PACK).or_else(|| get(bag, keys::PACK_SIZE)),
            people_key: get(bag, keys::PEOPLE_KEY),
            ship_delay: get(bag, keys::SHIP_DELAY),
            delay_days: parse_u64(bag.get(keys::DELAY_DAYS)),
            price_id: get(bag, keys::PRICE_ID),
            order_summary: get(bag, keys::ORDER_SUMMARY),
            coupon: get(bag, keys::COUPON),
            price_pence: parse_u64(bag.get(keys::INTENDED_PRICE_PENCE)),
            price_currency: get(bag, keys::INTENDED_PRICE_CURRENCY)
                .as_deref()
                .and_then(Currency::parse),
            price_display: get(bag, keys::INTENDED_PRICE_DISPLAY),
        }
    }

    /// Encode the set fields into a flat string map. Never fails.
    #[must_use]
    pub fn encode(&self) -> BTreeMap<String, String> {
        let mut bag = BTreeMap::new();
        if let Some(mode) = self.mode {
            insert(&mut bag, keys::MODE, mode.as_str());
        }
        if let Some(pack) = &self.selected_pack {
            insert(&mut bag, keys::SELECTED_PACK, pack);
            insert(&mut bag, keys::PACK_SIZE, pack);
        }
        insert_opt(&mut bag, keys::PEOPLE_KEY, self.people_key.as_ref());
        insert_opt(&mut bag, keys::SHIP_DELAY, self.ship_delay.as_ref());
        if let Some(days) = self.delay_days {
            insert(&mut bag, keys::DELAY_DAYS, &days.to_string());
        }
        insert_opt(&mut bag, keys::PRICE_ID, self.price_id.as_ref());
        insert_opt(&mut bag, keys::ORDER_SUMMARY, self.order_summary.as_ref());
        insert_opt(&mut bag, keys::COUPON, self.coupon.as_ref());
        if let Some(pence) = self.price_pence {
            insert(&mut bag, keys::INTENDED_PRICE_PENCE, &pence.to_string());
        }
        if let Some(currency) = self.price_currency {
            insert(&mut bag, keys::INTENDED_PRICE_CURRENCY, currency.code());
        }
        insert_opt(&mut bag, keys::INTENDED_PRICE_DISPLAY, self.price_display.as_ref());
        bag
    }

    /// Merge with a second attempt bag, set fields winning. Used when
    /// one attempt is recorded in two places (a setup session and the
    /// setup intent it created): the session bag wins key-by-key, the
    /// intent bag fills the gaps. The price snapshot falls back as a
    /// unit so pence, currency and display always come from one bag.
    #[must_use]
    pub fn merged_with(self, fallback: Self) -> Self {
        let (price_pence, price_currency, price_display) = if self.price_pence.is_some() {
            (self.price_pence, self.price_currency, self.price_display)
        } else {
            (
                fallback.price_pence,
                fallback.price_currency,
                fallback.price_display,
            )
        };
        Self {
            mode: self.mode.or(fallback.mode),
            selected_pack: self.selected_pack.or(fallback.selected_pack),
            people_key: self.people_key.or(fallback.people_key),
            ship_delay: self.ship_delay.or(fallback.ship_delay),
            delay_days: self.delay_days.or(fallback.delay_days),
            price_id: self.price_id.or(fallback.price_id),
            order_summary: self.order_summary.or(fallback.order_summary),
            coupon: self.coupon.or(fallback.coupon),
            price_pence,
            price_currency,
            price_display,
        }
    }

    /// This attempt's price snapshot, if one was stamped.
    #[must_use]
    pub fn price_snapshot(&self, fallback_currency: Currency) -> Option<PriceSnapshot> {
        self.price_pence.map(|pence| {
            PriceSnapshot::new(
                pence,
                self.price_currency.unwrap_or(fallback_currency),
                self.price_display.clone(),
            )
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn to_hash(bag: BTreeMap<String, String>) -> HashMap<String, String> {
        bag.into_iter().collect()
    }

    #[test]
    fn test_customer_round_trip() {
        let meta = CustomerMetadata {
            status: Some(PreorderStatus::Active),
            selected_pack: Some("6-pack".into()),
            people_key: Some("2".into()),
            ship_delay: Some("2w".into()),
            price_id: Some("price_123".into()),
            order_notes: Some("leave at door".into()),
            provisional: false,
            subscriber_yes_no: Some("Yes".into()),
            subscription_freq: Some("monthly".into()),
            last_price_pence: Some(2621),
            last_price_currency: Some(Currency::Gbp),
            last_price_display: Some("£26.21".into()),
        };
        let decoded = CustomerMetadata::decode(&to_hash(meta.encode()));
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_session_round_trip() {
        let meta = SessionMetadata {
            mode: Some(PlanMode::Subscription),
            selected_pack: Some("12-pack".into()),
            people_key: Some("4".into()),
            ship_delay: Some("1m".into()),
            delay_days: Some(30),
            price_id: Some("price_456".into()),
            order_summary: Some("12 rolls, monthly".into()),
            coupon: Some("SAVE15".into()),
            price_pence: Some(4999),
            price_currency: Some(Currency::Gbp),
            price_display: Some("£49.99".into()),
        };
        let decoded = SessionMetadata::decode(&to_hash(meta.encode()));
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_pence_round_trip_exact_large() {
        for pence in [0u64, 1, 2621, 999_999_999, 1_000_000_000, u64::from(u32::MAX)] {
            let meta = CustomerMetadata {
                last_price_pence: Some(pence),
                ..CustomerMetadata::default()
            };
            let decoded = CustomerMetadata::decode(&to_hash(meta.encode()));
            assert_eq!(decoded.last_price_pence, Some(pence));
        }
    }

    #[test]
    fn test_malformed_numeric_decodes_to_none_not_zero() {
        let mut bag = HashMap::new();
        bag.insert(keys::LAST_INTENDED_PRICE_PENCE.to_string(), "1,234".to_string());
        assert_eq!(CustomerMetadata::decode(&bag).last_price_pence, None);

        bag.insert(keys::LAST_INTENDED_PRICE_PENCE.to_string(), "-5".to_string());
        assert_eq!(CustomerMetadata::decode(&bag).last_price_pence, None);

        // Explicit zero survives.
        bag.insert(keys::LAST_INTENDED_PRICE_PENCE.to_string(), "0".to_string());
        assert_eq!(CustomerMetadata::decode(&bag).last_price_pence, Some(0));
    }

    #[test]
    fn test_truncation_is_first_500_chars() {
        let long: String = "x".repeat(600);
        let truncated = truncate_value(&long);
        assert_eq!(truncated.chars().count(), 500);
        assert_eq!(truncated, "x".repeat(500));

        // Multi-byte input truncates on character boundaries.
        let emoji: String = "é".repeat(600);
        assert_eq!(truncate_value(&emoji).chars().count(), 500);

        let meta = CustomerMetadata {
            order_notes: Some(long.clone()),
            ..CustomerMetadata::default()
        };
        let decoded = CustomerMetadata::decode(&to_hash(meta.encode()));
        assert_eq!(decoded.order_notes.unwrap(), long.chars().take(500).collect::<String>());
    }

    #[test]
    fn test_legacy_pack_size_alias() {
        // Old records only carry packSize.
        let mut bag = HashMap::new();
        bag.insert(keys::PACK_SIZE.to_string(), "6-pack".to_string());
        assert_eq!(
            CustomerMetadata::decode(&bag).selected_pack.as_deref(),
            Some("6-pack")
        );

        // When both exist, selectedPack wins.
        bag.insert(keys::SELECTED_PACK.to_string(), "12-pack".to_string());
        assert_eq!(
            CustomerMetadata::decode(&bag).selected_pack.as_deref(),
            Some("12-pack")
        );

        // Encoding writes both for backward compatibility.
        let meta = CustomerMetadata {
            selected_pack: Some("6-pack".into()),
            ..CustomerMetadata::default()
        };
        let bag = meta.encode();
        assert_eq!(bag.get(keys::SELECTED_PACK).map(String::as_str), Some("6-pack"));
        assert_eq!(bag.get(keys::PACK_SIZE).map(String::as_str), Some("6-pack"));
    }

    #[test]
    fn test_unknown_status_decodes_to_none() {
        let mut bag = HashMap::new();
        bag.insert(keys::PREORDER_STATUS.to_string(), "shipped".to_string());
        assert_eq!(CustomerMetadata::decode(&bag).status, None);
    }

    #[test]
    fn test_provisional_marker() {
        let mut bag = HashMap::new();
        assert!(!CustomerMetadata::decode(&bag).provisional);
        bag.insert(keys::PROVISIONAL.to_string(), "true".to_string());
        assert!(CustomerMetadata::decode(&bag).provisional);
        bag.insert(keys::PROVISIONAL.to_string(), "false".to_string());
        assert!(!CustomerMetadata::decode(&bag).provisional);
    }

    #[test]
    fn test_empty_encode_produces_empty_bag() {
        assert!(CustomerMetadata::default().encode().is_empty());
        assert!(SessionMetadata::default().encode().is_empty());
    }

    #[test]
    fn test_merge_set_fields_win_and_gaps_fill() {
        let session = SessionMetadata {
            selected_pack: Some("6-pack".into()),
            ..SessionMetadata::default()
        };
        let intent = SessionMetadata {
            mode: Some(PlanMode::Payment),
            selected_pack: Some("12-pack".into()),
            order_summary: Some("6 rolls".into()),
            coupon: Some("SAVE15".into()),
            price_pence: Some(2621),
            price_currency: Some(Currency::Gbp),
            price_display: Some("£26.21".into()),
            ..SessionMetadata::default()
        };

        let merged = session.merged_with(intent);
        assert_eq!(merged.selected_pack.as_deref(), Some("6-pack"));
        assert_eq!(merged.mode, Some(PlanMode::Payment));
        assert_eq!(merged.order_summary.as_deref(), Some("6 rolls"));
        assert_eq!(merged.coupon.as_deref(), Some("SAVE15"));
        assert_eq!(merged.price_pence, Some(2621));
        assert_eq!(merged.price_display.as_deref(), Some("£26.21"));
    }

    #[test]
    fn test_merge_price_snapshot_is_all_or_nothing() {
        // A bag with its own amount keeps its own currency and display,
        // even when those are unset.
        let session = SessionMetadata {
            price_pence: Some(1999),
            ..SessionMetadata::default()
        };
        let intent = SessionMetadata {
            price_pence: Some(2621),
            price_currency: Some(Currency::Usd),
            price_display: Some("$26.21".into()),
            ..SessionMetadata::default()
        };
        let merged = session.merged_with(intent);
        assert_eq!(merged.price_pence, Some(1999));
        assert_eq!(merged.price_currency, None);
        assert_eq!(merged.price_display, None);
    }

    #[test]
    fn test_legacy_plan_key_for_mode() {
        let mut bag = HashMap::new();
        bag.insert(keys::PLAN.to_string(), "payment".to_string());
        assert_eq!(SessionMetadata::decode(&bag).mode, Some(PlanMode::Payment));
    }
}
