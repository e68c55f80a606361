//! Subscription status derivation.
//!
//! A pure function of the cached customer snapshot. It never calls the
//! provider and never consults a clock.

use serde::{Deserialize, Serialize};

use super::account::Customer;

/// Subscription status as seen by the application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Unpaid,
    Canceled,
    /// Billing failed and there is no payment source to retry with.
    TrialExpired,
    /// No customer, or a customer with neither subscription nor source.
    #[default]
    Inactive,
    Incomplete,
    IncompleteExpired,
    Paused,
}

impl SubscriptionStatus {
    /// Parse a provider status string. Unknown values grant nothing.
    pub fn from_provider(status: &str) -> Self {
        match status {
            "active" => Self::Active,
            "trialing" => Self::Trialing,
            "past_due" => Self::PastDue,
            "unpaid" => Self::Unpaid,
            "canceled" | "cancelled" => Self::Canceled,
            "incomplete" => Self::Incomplete,
            "incomplete_expired" => Self::IncompleteExpired,
            "paused" => Self::Paused,
            _ => Self::Inactive,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Unpaid => "unpaid",
            Self::Canceled => "canceled",
            Self::TrialExpired => "trial_expired",
            Self::Inactive => "inactive",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Paused => "paused",
        }
    }

    /// Whether the status grants access to paid features.
    pub fn has_access(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }

    /// Whether an outstanding invoice should be paid right away.
    pub fn needs_payment(&self) -> bool {
        matches!(self, Self::PastDue | Self::Unpaid)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived status plus the trial end it came with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub status: SubscriptionStatus,
    /// Unix seconds, 0 when there is no trial.
    pub trial_end: i64,
}

impl StatusInfo {
    pub fn inactive() -> Self {
        Self::default()
    }

    pub fn has_access(&self) -> bool {
        self.status.has_access()
    }
}

/// Derive the status of a cached customer.
///
/// * no customer (or a deleted one): `Inactive`
/// * authoritative subscription: its reported status and trial end
/// * otherwise `Canceled` when a payment source is on file, else `Inactive`
///
/// `PastDue` and `Unpaid` without a payment source become `TrialExpired`.
pub fn derive_status(customer: Option<&Customer>) -> StatusInfo {
    let Some(customer) = customer.filter(|c| !c.deleted) else {
        return StatusInfo::inactive();
    };

    let has_source = customer.has_payment_source();
    let (status, trial_end) = match customer.subscription() {
        Some(sub) => (SubscriptionStatus::from_provider(&sub.status), sub.trial_end),
        None if has_source => (SubscriptionStatus::Canceled, 0),
        None => (SubscriptionStatus::Inactive, 0),
    };

    let status = if status.needs_payment() && !has_source {
        SubscriptionStatus::TrialExpired
    } else {
        status
    };

    StatusInfo { status, trial_end }
}
