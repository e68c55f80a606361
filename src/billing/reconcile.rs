//! Bulk reconciliation of local accounts against the provider's customer list.
//!
//! An operator-triggered pass. Each remote customer is handled on its own,
//! under its account's lock, so live traffic for other accounts keeps
//! flowing while the pass runs.

use chrono::{DateTime, Utc};
use futures::{StreamExt, pin_mut};
use serde::Serialize;

use crate::error::Result;

use super::account::Customer;
use super::client::{BillingProvider, CustomerListParams, DEFAULT_PAGE_SIZE, customer_stream};
use super::error::BillingError;
use super::lock::AccountLocks;
use super::storage::AccountStore;

/// Listing failures tolerated before a pass is abandoned.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;

/// Summary of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Remote customers looked at.
    pub processed: u64,
    /// Local accounts whose snapshot was replaced.
    pub updated: u64,
    /// Orphaned remote customers deleted.
    pub deleted: u64,
    /// Customers that could not be handled this pass.
    pub skipped: u64,
    /// Orphaned customers with a payment source, left for manual review.
    pub flagged: Vec<String>,
    /// Listing attempts, including the successful one.
    pub attempts: u32,
}

/// What happened to one remote customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Updated,
    Deleted,
    Flagged,
    Unchanged,
}

/// Walks every provider customer and aligns the account store with it.
pub struct CustomerReconciler<S, P> {
    store: S,
    provider: P,
    locks: AccountLocks,
    max_attempts: u32,
    page_size: u64,
}

impl<S, P> CustomerReconciler<S, P>
where
    S: AccountStore,
    P: BillingProvider,
{
    #[must_use]
    pub fn new(store: S, provider: P, locks: AccountLocks) -> Self {
        Self {
            store,
            provider,
            locks,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.clamp(1, DEFAULT_PAGE_SIZE);
        self
    }

    pub async fn run(&self) -> Result<SyncReport> {
        self.run_at(Utc::now()).await
    }

    /// Run one pass, stamping refreshed snapshots with `now`.
    ///
    /// A listing error restarts the walk after the last customer handled, so
    /// no customer is counted twice. After `max_attempts` failed listings the
    /// pass aborts with [`BillingError::RetryLimitExceeded`] carrying the
    /// counts so far.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut resume_after: Option<String> = None;

        loop {
            report.attempts += 1;
            let params = CustomerListParams {
                limit: self.page_size,
                starting_after: resume_after.clone(),
                ..Default::default()
            };

            let customers = customer_stream(&self.provider, params);
            pin_mut!(customers);

            let mut listing_error = None;
            while let Some(item) = customers.next().await {
                match item {
                    Ok(customer) => {
                        resume_after = Some(customer.id.clone());
                        self.reconcile_one(customer, now, &mut report).await;
                    }
                    Err(e) => {
                        listing_error = Some(e);
                        break;
                    }
                }
            }

            let Some(err) = listing_error else {
                tracing::info!(
                    target: "billsync::billing::reconcile",
                    processed = report.processed,
                    updated = report.updated,
                    deleted = report.deleted,
                    skipped = report.skipped,
                    flagged = report.flagged.len(),
                    attempts = report.attempts,
                    "Customer sync finished"
                );
                return Ok(report);
            };

            if report.attempts >= self.max_attempts {
                tracing::error!(
                    target: "billsync::billing::reconcile",
                    attempts = report.attempts,
                    processed = report.processed,
                    error = %err,
                    "Customer sync aborted, listing kept failing"
                );
                return Err(BillingError::RetryLimitExceeded {
                    operation: "list_customers".to_string(),
                    attempts: report.attempts,
                    processed: report.processed,
                    updated: report.updated,
                    deleted: report.deleted,
                }
                .into());
            }

            tracing::warn!(
                target: "billsync::billing::reconcile",
                attempt = report.attempts,
                resume_after = resume_after.as_deref().unwrap_or(""),
                error = %err,
                "Listing customers failed, retrying"
            );
        }
    }

    async fn reconcile_one(&self, customer: Customer, now: DateTime<Utc>, report: &mut SyncReport) {
        report.processed += 1;
        let customer_id = customer.id.clone();

        match self.apply(customer, now).await {
            Ok(Action::Updated) => report.updated += 1,
            Ok(Action::Deleted) => report.deleted += 1,
            Ok(Action::Flagged) => report.flagged.push(customer_id),
            Ok(Action::Unchanged) => {}
            Err(e) => {
                tracing::error!(
                    target: "billsync::billing::reconcile",
                    customer_id = %customer_id,
                    error = %e,
                    "Failed to reconcile customer"
                );
                report.skipped += 1;
            }
        }
    }

    async fn apply(&self, customer: Customer, now: DateTime<Utc>) -> Result<Action> {
        if customer.deleted {
            return Ok(Action::Unchanged);
        }
        let Some(email) = customer.email.clone().filter(|e| !e.is_empty()) else {
            return self.handle_orphan(customer, "no email").await;
        };

        let _guard = self.locks.lock(&email).await?;

        let Some(mut account) = self.store.get(&email).await? else {
            return self.handle_orphan(customer, "no local account").await;
        };

        match account.customer_id() {
            Some(stored) if stored != customer.id => {
                self.handle_orphan(customer, "duplicate of the account's customer")
                    .await
            }
            _ => {
                account.set_customer(customer, now);
                self.store.put(&account).await?;
                Ok(Action::Updated)
            }
        }
    }

    /// Delete an orphaned customer unless it can still be charged.
    async fn handle_orphan(&self, customer: Customer, reason: &str) -> Result<Action> {
        if customer.has_payment_source() {
            tracing::warn!(
                target: "billsync::billing::reconcile",
                customer_id = %customer.id,
                email = customer.email.as_deref().unwrap_or(""),
                reason = reason,
                "Orphaned customer has a payment source, flagged for review"
            );
            return Ok(Action::Flagged);
        }

        self.provider.delete_customer(&customer.id).await?;
        tracing::info!(
            target: "billsync::billing::reconcile",
            customer_id = %customer.id,
            email = customer.email.as_deref().unwrap_or(""),
            reason = reason,
            "Deleted orphaned customer"
        );
        Ok(Action::Deleted)
    }
}
