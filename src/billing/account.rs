//! Local account records and the provider customer snapshot they carry.
//!
//! The snapshot types deserialize straight from Stripe's JSON and serialize
//! back into a shape they can read again, so the same structs serve the wire
//! and the account store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

use super::client::Coupon;

/// Metadata key holding the customer's VAT number.
pub const META_VAT: &str = "vat";

/// A local account, keyed by email.
///
/// The customer snapshot and its refresh timestamp only change together,
/// through [`Account::set_customer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub email: String,
    pub created: DateTime<Utc>,
    #[serde(default)]
    customer: Option<Customer>,
    #[serde(default)]
    customer_refreshed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub promo: Option<Promo>,
    #[serde(default)]
    pub tracking_id: Option<String>,
}

impl Account {
    /// Create a fresh account with no provider customer.
    pub fn new(email: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            email: email.into(),
            created: now,
            customer: None,
            customer_refreshed: None,
            promo: None,
            tracking_id: Some(uuid::Uuid::new_v4().simple().to_string()),
        }
    }

    /// The cached provider customer, if one has been fetched.
    pub fn customer(&self) -> Option<&Customer> {
        self.customer.as_ref()
    }

    /// When the snapshot was last replaced.
    pub fn customer_refreshed(&self) -> Option<DateTime<Utc>> {
        self.customer_refreshed
    }

    /// Provider id of the cached customer.
    pub fn customer_id(&self) -> Option<&str> {
        self.customer.as_ref().map(|c| c.id.as_str())
    }

    /// Replace the snapshot wholesale and stamp the refresh time.
    pub fn set_customer(&mut self, customer: Customer, now: DateTime<Utc>) {
        self.customer = Some(customer);
        self.customer_refreshed = Some(now);
    }

    /// Whole days left in the current trial, if the account is trialing.
    pub fn remaining_trial_days(&self, now: DateTime<Utc>) -> Option<i64> {
        let sub = self.customer.as_ref()?.subscription()?;
        if sub.status != "trialing" || sub.trial_end <= 0 {
            return None;
        }
        let end = DateTime::from_timestamp(sub.trial_end, 0)?;
        let remaining = end - now;
        if remaining <= Duration::zero() {
            return Some(0);
        }
        // Round partial days up so the last day still shows as one.
        Some((remaining.num_seconds() + 86_399) / 86_400)
    }
}

/// Snapshot of a provider customer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "expandable_id")]
    pub default_source: Option<String>,
    #[serde(default)]
    pub invoice_settings: Option<InvoiceSettings>,
    /// The first entry is the authoritative subscription.
    #[serde(default)]
    pub subscriptions: List<SubscriptionRef>,
    #[serde(default)]
    pub shipping: Option<Shipping>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub created: i64,
}

impl Customer {
    /// The authoritative subscription.
    pub fn subscription(&self) -> Option<&SubscriptionRef> {
        self.subscriptions.data.first()
    }

    /// Whether a card or other payment method is on file.
    pub fn has_payment_source(&self) -> bool {
        self.default_source.is_some()
            || self
                .invoice_settings
                .as_ref()
                .is_some_and(|s| s.default_payment_method.is_some())
    }

    pub fn vat(&self) -> Option<&str> {
        self.metadata.get(META_VAT).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceSettings {
    #[serde(default, deserialize_with = "expandable_id")]
    pub default_payment_method: Option<String>,
}

/// A subscription as embedded in the customer snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRef {
    pub id: String,
    #[serde(default, deserialize_with = "expandable_id")]
    pub plan: Option<String>,
    /// Raw provider status string.
    #[serde(default)]
    pub status: String,
    /// Unix seconds, 0 when there is no trial.
    #[serde(default, deserialize_with = "zero_if_null")]
    pub trial_end: i64,
}

/// Stripe-style list wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct List<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            has_more: false,
        }
    }
}

impl<T> From<Vec<T>> for List<T> {
    fn from(data: Vec<T>) -> Self {
        Self {
            data,
            has_more: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Shipping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Address,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// A promotion offered to an account, built from a provider coupon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Promo {
    pub coupon: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Days the offer stays redeemable; 0 means no limit.
    #[serde(default)]
    pub redeem_within_days: u32,
    pub created: DateTime<Utc>,
}

impl Promo {
    /// Build a promo from coupon metadata (`description`, `redeem_within`).
    pub fn from_coupon(coupon: &Coupon, now: DateTime<Utc>) -> Self {
        let title = coupon.name.clone().unwrap_or_else(|| coupon.id.clone());
        let description = coupon
            .metadata
            .get("description")
            .cloned()
            .unwrap_or_default();
        let redeem_within_days = coupon
            .metadata
            .get("redeem_within")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        Self {
            coupon: coupon.id.clone(),
            title,
            description,
            redeem_within_days,
            created: now,
        }
    }

    /// End of the redemption window. A window too large to represent
    /// never expires.
    pub fn expires(&self) -> Option<DateTime<Utc>> {
        if self.redeem_within_days == 0 {
            return None;
        }
        Duration::try_days(i64::from(self.redeem_within_days))
            .and_then(|window| self.created.checked_add_signed(window))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires().is_some_and(|at| now > at)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Expandable {
    Id(String),
    Object { id: String },
}

/// Accepts either an id string or an expanded object carrying an `id`.
fn expandable_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<Expandable>::deserialize(d)?.map(|e| match e {
        Expandable::Id(id) | Expandable::Object { id } => id,
    }))
}

fn zero_if_null<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    Ok(Option::<i64>::deserialize(d)?.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_deserialize_stripe_customer() {
        let json = serde_json::json!({
            "id": "cus_123",
            "object": "customer",
            "email": "a@x",
            "default_source": {"id": "card_1", "object": "card", "brand": "Visa"},
            "subscriptions": {
                "object": "list",
                "data": [{
                    "id": "sub_1",
                    "object": "subscription",
                    "status": "trialing",
                    "trial_end": 1_700_000_000,
                    "plan": {"id": "plan_yearly", "object": "plan"}
                }],
                "has_more": false
            },
            "metadata": {"vat": "DE123"},
            "shipping": null
        });

        let customer: Customer = serde_json::from_value(json).unwrap();
        assert_eq!(customer.id, "cus_123");
        assert_eq!(customer.default_source.as_deref(), Some("card_1"));
        assert!(customer.has_payment_source());
        assert_eq!(customer.vat(), Some("DE123"));

        let sub = customer.subscription().unwrap();
        assert_eq!(sub.plan.as_deref(), Some("plan_yearly"));
        assert_eq!(sub.trial_end, 1_700_000_000);
    }

    #[test]
    fn test_null_trial_end_is_zero() {
        let sub: SubscriptionRef = serde_json::from_value(serde_json::json!({
            "id": "sub_1",
            "status": "active",
            "trial_end": null,
            "plan": "plan_monthly"
        }))
        .unwrap();
        assert_eq!(sub.trial_end, 0);
        assert_eq!(sub.plan.as_deref(), Some("plan_monthly"));
    }

    #[test]
    fn test_payment_method_counts_as_source() {
        let customer: Customer = serde_json::from_value(serde_json::json!({
            "id": "cus_1",
            "default_source": null,
            "invoice_settings": {"default_payment_method": "pm_1"}
        }))
        .unwrap();
        assert!(customer.has_payment_source());
    }

    #[test]
    fn test_stored_account_reads_back() {
        let mut account = Account::new("a@x", at(1_000));
        account.set_customer(
            Customer {
                id: "cus_1".to_string(),
                default_source: Some("card_1".to_string()),
                subscriptions: vec![SubscriptionRef {
                    id: "sub_1".to_string(),
                    plan: Some("plan_yearly".to_string()),
                    status: "active".to_string(),
                    trial_end: 0,
                }]
                .into(),
                ..Default::default()
            },
            at(2_000),
        );

        let stored = serde_json::to_string(&account).unwrap();
        let loaded: Account = serde_json::from_str(&stored).unwrap();
        assert_eq!(loaded, account);
        assert_eq!(loaded.customer_refreshed(), Some(at(2_000)));
    }

    #[test]
    fn test_set_customer_stamps_refresh_time() {
        let mut account = Account::new("a@x", at(0));
        assert!(account.customer().is_none());
        assert!(account.customer_refreshed().is_none());

        account.set_customer(
            Customer {
                id: "cus_1".to_string(),
                ..Default::default()
            },
            at(500),
        );
        assert_eq!(account.customer_id(), Some("cus_1"));
        assert_eq!(account.customer_refreshed(), Some(at(500)));
    }

    #[test]
    fn test_remaining_trial_days() {
        let mut account = Account::new("a@x", at(0));
        assert_eq!(account.remaining_trial_days(at(0)), None);

        account.set_customer(
            Customer {
                id: "cus_1".to_string(),
                subscriptions: vec![SubscriptionRef {
                    id: "sub_1".to_string(),
                    plan: None,
                    status: "trialing".to_string(),
                    trial_end: 10 * 86_400,
                }]
                .into(),
                ..Default::default()
            },
            at(0),
        );
        assert_eq!(account.remaining_trial_days(at(0)), Some(10));
        assert_eq!(account.remaining_trial_days(at(9 * 86_400 + 1)), Some(1));
        assert_eq!(account.remaining_trial_days(at(11 * 86_400)), Some(0));
    }

    #[test]
    fn test_promo_from_coupon() {
        let coupon = Coupon {
            id: "SPRING".to_string(),
            name: Some("Spring sale".to_string()),
            metadata: HashMap::from([
                ("description".to_string(), "20% off".to_string()),
                ("redeem_within".to_string(), "7".to_string()),
            ]),
            ..Default::default()
        };

        let promo = Promo::from_coupon(&coupon, at(0));
        assert_eq!(promo.coupon, "SPRING");
        assert_eq!(promo.title, "Spring sale");
        assert_eq!(promo.redeem_within_days, 7);
        assert!(!promo.is_expired(at(6 * 86_400)));
        assert!(promo.is_expired(at(8 * 86_400)));
    }

    #[test]
    fn test_promo_with_huge_window_never_expires() {
        let coupon = Coupon {
            id: "FOREVER".to_string(),
            metadata: HashMap::from([("redeem_within".to_string(), "4000000000".to_string())]),
            ..Default::default()
        };

        let promo = Promo::from_coupon(&coupon, at(1_700_000_000));
        assert_eq!(promo.redeem_within_days, 4_000_000_000);
        assert_eq!(promo.expires(), None);
        assert!(!promo.is_expired(at(1_800_000_000)));
    }
}
