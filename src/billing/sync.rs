//! When to reuse the cached customer snapshot and when to refetch it.

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;

use super::account::Account;
use super::client::{BillingProvider, find_customer_by_email};

/// Default snapshot lifetime.
pub const DEFAULT_MAX_AGE_HOURS: i64 = 24;

/// Staleness rule for cached customer snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    pub max_age: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::hours(DEFAULT_MAX_AGE_HOURS),
        }
    }
}

impl SyncPolicy {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    pub fn from_hours(hours: i64) -> Self {
        Self::new(Duration::hours(hours))
    }

    /// A snapshot is stale when it was never fetched or is older than
    /// `max_age`.
    pub fn is_stale(&self, account: &Account, now: DateTime<Utc>) -> bool {
        match account.customer_refreshed() {
            Some(refreshed) => now - refreshed > self.max_age,
            None => true,
        }
    }

    /// Bring the account's snapshot up to date.
    ///
    /// * no snapshot: find the customer by email, creating one when the
    ///   provider has none
    /// * stale or `force`: refetch by id (a customer deleted remotely is
    ///   replaced with a new one)
    /// * fresh: nothing, no provider call
    ///
    /// Returns whether the account changed and needs persisting. The caller
    /// must hold the account's lock.
    pub async fn refresh<P>(
        &self,
        provider: &P,
        account: &mut Account,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<bool>
    where
        P: BillingProvider + ?Sized,
    {
        let customer_id = match account.customer_id() {
            Some(id) if force || self.is_stale(account, now) => id.to_string(),
            Some(_) => return Ok(false),
            None => {
                let customer = match find_customer_by_email(provider, &account.email).await? {
                    Some(existing) => existing,
                    None => {
                        tracing::info!(
                            target: "billsync::billing::sync",
                            email = %account.email,
                            "No provider customer for account, creating one"
                        );
                        provider.create_customer(&account.email).await?
                    }
                };
                account.set_customer(customer, now);
                return Ok(true);
            }
        };

        let fetched = provider.get_customer(&customer_id).await?;
        let customer = if fetched.deleted {
            tracing::warn!(
                target: "billsync::billing::sync",
                email = %account.email,
                customer_id = %customer_id,
                "Provider customer was deleted, creating a replacement"
            );
            provider.create_customer(&account.email).await?
        } else {
            fetched
        };

        tracing::debug!(
            target: "billsync::billing::sync",
            email = %account.email,
            customer_id = %customer.id,
            forced = force,
            "Refreshed customer snapshot"
        );
        account.set_customer(customer, now);
        Ok(true)
    }
}
