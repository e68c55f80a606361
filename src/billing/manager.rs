//! Request-time subscription flows.
//!
//! Every flow takes the account's lock, loads the account, talks to the
//! provider and persists only what the provider confirmed.

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{BillsyncError, Result};

use super::account::{Account, Customer, Promo, Shipping};
use super::client::{
    BillingProvider, CustomerUpdate, Invoice, InvoiceListParams, InvoiceStatus,
    SubscriptionOptions, SubscriptionUpdate, invoice_stream,
};
use super::error::BillingError;
use super::lock::AccountLocks;
use super::plans::Plans;
use super::status::{StatusInfo, SubscriptionStatus, derive_status};
use super::storage::AccountStore;
use super::sync::SyncPolicy;

/// Input to [`SubscriptionManager::subscribe`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SubscribeRequest {
    /// Plan id; the catalogue default when empty.
    #[serde(default)]
    pub plan: Option<String>,
    /// Card token to attach before subscribing.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub coupon: Option<String>,
}

/// Input to [`SubscriptionManager::update_billing`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BillingDetails {
    #[serde(default)]
    pub shipping: Option<Shipping>,
    #[serde(default)]
    pub vat: Option<String>,
}

impl BillingDetails {
    pub fn is_empty(&self) -> bool {
        self.shipping.is_none() && self.vat.is_none()
    }
}

/// Result of applying a promo to every account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PromoReport {
    pub applied: u64,
    pub failed: u64,
}

/// Orchestrates subscribe, unsubscribe and billing updates.
pub struct SubscriptionManager<S, P> {
    store: S,
    provider: P,
    locks: AccountLocks,
    policy: SyncPolicy,
    plans: Arc<Plans>,
}

impl<S: Clone, P: Clone> Clone for SubscriptionManager<S, P> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            provider: self.provider.clone(),
            locks: self.locks.clone(),
            policy: self.policy,
            plans: Arc::clone(&self.plans),
        }
    }
}

impl<S, P> SubscriptionManager<S, P>
where
    S: AccountStore,
    P: BillingProvider,
{
    #[must_use]
    pub fn new(store: S, provider: P, locks: AccountLocks, plans: Arc<Plans>) -> Self {
        Self {
            store,
            provider,
            locks,
            policy: SyncPolicy::default(),
            plans,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: SyncPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn locks(&self) -> &AccountLocks {
        &self.locks
    }

    pub fn plans(&self) -> &Plans {
        &self.plans
    }

    pub fn policy(&self) -> SyncPolicy {
        self.policy
    }

    /// Load an account, refreshing its snapshot when stale.
    ///
    /// With `create`, a missing account is created; otherwise it is a
    /// not-found error. A transient provider failure falls back to the
    /// cached snapshot when there is one.
    pub async fn account(&self, email: &str, create: bool) -> Result<Account> {
        self.account_at(email, create, Utc::now()).await
    }

    pub async fn account_at(&self, email: &str, create: bool, now: DateTime<Utc>) -> Result<Account> {
        let _guard = self.locks.lock(email).await?;
        let (mut account, created) = self.load(email, create, now).await?;

        let changed = match self.policy.refresh(&self.provider, &mut account, now, false).await {
            Ok(changed) => changed,
            Err(e) if e.is_transient() && account.customer().is_some() => {
                tracing::warn!(
                    target: "billsync::billing::manager",
                    email = %email,
                    error = %e,
                    "Provider unavailable, serving cached customer"
                );
                false
            }
            Err(e) => return Err(e),
        };

        if changed || created {
            self.store.put(&account).await?;
        }
        Ok(account)
    }

    /// Derived status for the access gate.
    pub async fn status(&self, email: &str) -> Result<StatusInfo> {
        let account = self.account(email, true).await?;
        Ok(derive_status(account.customer()))
    }

    pub async fn subscribe(&self, email: &str, request: SubscribeRequest) -> Result<Account> {
        self.subscribe_at(email, request, Utc::now()).await
    }

    /// Attach a card if one is given, then create or update the subscription
    /// with the trial ended now.
    ///
    /// When the result is past due or unpaid, outstanding invoices for the
    /// subscription are paid; a declined payment comes back as a card error.
    pub async fn subscribe_at(
        &self,
        email: &str,
        request: SubscribeRequest,
        now: DateTime<Utc>,
    ) -> Result<Account> {
        let plan = self.plans.resolve(request.plan.as_deref())?;
        let token = request.token.filter(|t| !t.is_empty());

        let _guard = self.locks.lock(email).await?;
        let (mut account, _) = self.load(email, true, now).await?;
        self.policy.refresh(&self.provider, &mut account, now, true).await?;
        self.store.put(&account).await?;

        let customer_id = require_customer(&account)?.id.clone();

        if let Some(token) = token {
            let update = CustomerUpdate {
                source: Some(token),
                ..Default::default()
            };
            let customer = self.provider.update_customer(&customer_id, update).await?;
            account.set_customer(customer, now);
            self.store.put(&account).await?;
        } else if !require_customer(&account)?.has_payment_source() {
            return Err(BillingError::NoPaymentSource {
                email: email.to_string(),
            }
            .into());
        }

        let coupon = request.coupon.filter(|c| !c.is_empty()).or_else(|| {
            account
                .promo
                .as_ref()
                .filter(|p| !p.is_expired(now))
                .map(|p| p.coupon.clone())
        });

        let current = require_customer(&account)?
            .subscription()
            .filter(|s| is_live(&s.status))
            .map(|s| s.id.clone());

        let subscription = match current {
            Some(subscription_id) => {
                let update = SubscriptionUpdate {
                    plan: Some(plan.clone()),
                    coupon,
                    trial_end_now: true,
                };
                self.provider
                    .update_subscription(&subscription_id, update)
                    .await?
            }
            None => {
                let options = SubscriptionOptions {
                    coupon,
                    trial_end_now: true,
                };
                self.provider
                    .create_subscription(&customer_id, &plan, options)
                    .await?
            }
        };

        self.refetch(&mut account, &customer_id, now).await?;

        let info = derive_status(account.customer());
        if info.status.needs_payment() {
            self.pay_outstanding(&customer_id, &subscription.id).await?;
            self.refetch(&mut account, &customer_id, now).await?;
        }

        tracing::info!(
            target: "billsync::billing::manager",
            email = %email,
            plan = %plan,
            subscription_id = %subscription.id,
            status = %derive_status(account.customer()).status,
            "Subscribed"
        );
        Ok(account)
    }

    pub async fn unsubscribe(&self, email: &str) -> Result<Account> {
        self.unsubscribe_at(email, Utc::now()).await
    }

    /// Cancel the authoritative subscription.
    pub async fn unsubscribe_at(&self, email: &str, now: DateTime<Utc>) -> Result<Account> {
        let no_subscription = || -> BillsyncError {
            BillingError::NoSubscription {
                email: email.to_string(),
            }
            .into()
        };

        let _guard = self.locks.lock(email).await?;
        let Some(mut account) = self.store.get(email).await? else {
            return Err(no_subscription());
        };
        if account.customer().is_none() {
            return Err(no_subscription());
        }
        self.policy.refresh(&self.provider, &mut account, now, true).await?;

        let customer = require_customer(&account)?;
        let customer_id = customer.id.clone();
        let subscription_id = customer
            .subscription()
            .filter(|s| is_live(&s.status))
            .map(|s| s.id.clone())
            .ok_or_else(no_subscription)?;

        self.provider.cancel_subscription(&subscription_id).await?;
        self.refetch(&mut account, &customer_id, now).await?;

        tracing::info!(
            target: "billsync::billing::manager",
            email = %email,
            subscription_id = %subscription_id,
            "Unsubscribed"
        );
        Ok(account)
    }

    pub async fn update_billing(&self, email: &str, details: BillingDetails) -> Result<Account> {
        self.update_billing_at(email, details, Utc::now()).await
    }

    /// Change shipping address and VAT number on the provider customer.
    pub async fn update_billing_at(
        &self,
        email: &str,
        details: BillingDetails,
        now: DateTime<Utc>,
    ) -> Result<Account> {
        if details.is_empty() {
            return Err(BillingError::MissingField {
                field: "shipping".to_string(),
            }
            .into());
        }

        let _guard = self.locks.lock(email).await?;
        let (mut account, _) = self.load(email, true, now).await?;
        if self.policy.refresh(&self.provider, &mut account, now, false).await? {
            self.store.put(&account).await?;
        }
        let customer_id = require_customer(&account)?.id.clone();

        let update = CustomerUpdate {
            shipping: details.shipping,
            vat: details.vat,
            ..Default::default()
        };
        let customer = self.provider.update_customer(&customer_id, update).await?;
        account.set_customer(customer, now);
        self.store.put(&account).await?;
        Ok(account)
    }

    pub async fn apply_promo(&self, email: &str, code: &str) -> Result<Account> {
        self.apply_promo_at(email, code, Utc::now()).await
    }

    /// Attach a promo built from the provider coupon `code`.
    pub async fn apply_promo_at(&self, email: &str, code: &str, now: DateTime<Utc>) -> Result<Account> {
        let promo = self.promo_for(code, now).await?;

        let _guard = self.locks.lock(email).await?;
        let (mut account, _) = self.load(email, true, now).await?;
        account.promo = Some(promo);
        self.store.put(&account).await?;
        Ok(account)
    }

    /// Attach the promo to every stored account. Failures are counted and
    /// do not stop the run.
    pub async fn apply_promo_to_all(&self, code: &str) -> Result<PromoReport> {
        let now = Utc::now();
        let promo = self.promo_for(code, now).await?;
        let mut report = PromoReport::default();

        for email in self.store.list_emails().await? {
            let result = match self.locks.lock(&email).await {
                Ok(_guard) => match self.store.get(&email).await {
                    Ok(Some(mut account)) => {
                        account.promo = Some(promo.clone());
                        self.store.put(&account).await
                    }
                    Ok(None) => continue,
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => report.applied += 1,
                Err(e) => {
                    tracing::error!(
                        target: "billsync::billing::manager",
                        email = %email,
                        error = %e,
                        "Failed to apply promo"
                    );
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            target: "billsync::billing::manager",
            coupon = code,
            applied = report.applied,
            failed = report.failed,
            "Applied promo to all accounts"
        );
        Ok(report)
    }

    /// Every invoice of the account's customer, newest first as the
    /// provider returns them.
    pub async fn invoices(&self, email: &str) -> Result<Vec<Invoice>> {
        let account = self.account(email, false).await?;
        let Some(customer_id) = account.customer_id() else {
            return Ok(Vec::new());
        };
        invoice_stream(&self.provider, InvoiceListParams::for_customer(customer_id))
            .try_collect()
            .await
    }

    /// Remove an account, deleting its provider customer on a best-effort
    /// basis. Returns whether an account existed.
    pub async fn delete_account(&self, email: &str) -> Result<bool> {
        let _guard = self.locks.lock(email).await?;
        let Some(account) = self.store.get(email).await? else {
            return Ok(false);
        };

        if let Some(customer_id) = account.customer_id() {
            if let Err(e) = self.provider.delete_customer(customer_id).await {
                tracing::warn!(
                    target: "billsync::billing::manager",
                    email = %email,
                    customer_id = customer_id,
                    error = %e,
                    "Could not delete provider customer, continuing"
                );
            }
        }

        self.store.delete(&account).await?;
        tracing::info!(target: "billsync::billing::manager", email = %email, "Deleted account");
        Ok(true)
    }

    /// Load an account, creating it when allowed. The flag is true for a new
    /// account that has not been persisted yet.
    async fn load(&self, email: &str, create: bool, now: DateTime<Utc>) -> Result<(Account, bool)> {
        if email.is_empty() {
            return Err(BillingError::MissingField {
                field: "email".to_string(),
            }
            .into());
        }
        match self.store.get(email).await? {
            Some(account) => Ok((account, false)),
            None if create => Ok((Account::new(email, now), true)),
            None => Err(BillsyncError::not_found(format!("account {}", email))),
        }
    }

    async fn refetch(&self, account: &mut Account, customer_id: &str, now: DateTime<Utc>) -> Result<()> {
        let customer = self.provider.get_customer(customer_id).await?;
        account.set_customer(customer, now);
        self.store.put(account).await
    }

    async fn pay_outstanding(&self, customer_id: &str, subscription_id: &str) -> Result<()> {
        let params = InvoiceListParams {
            subscription: Some(subscription_id.to_string()),
            status: Some(InvoiceStatus::Open),
            ..InvoiceListParams::for_customer(customer_id)
        };
        let invoices: Vec<Invoice> = invoice_stream(&self.provider, params).try_collect().await?;

        for invoice in invoices.iter().filter(|i| i.is_outstanding()) {
            tracing::info!(
                target: "billsync::billing::manager",
                invoice_id = %invoice.id,
                amount_due = invoice.amount_due,
                "Paying outstanding invoice"
            );
            self.provider.pay_invoice(&invoice.id).await?;
        }
        Ok(())
    }

    async fn promo_for(&self, code: &str, now: DateTime<Utc>) -> Result<Promo> {
        if code.is_empty() {
            return Err(BillingError::MissingField {
                field: "coupon".to_string(),
            }
            .into());
        }
        let coupon = self.provider.get_coupon(code).await?;
        if !coupon.valid {
            return Err(BillsyncError::bad_request(format!("coupon {} is no longer valid", code)));
        }
        Ok(Promo::from_coupon(&coupon, now))
    }
}

fn require_customer(account: &Account) -> Result<&Customer> {
    account.customer().ok_or_else(|| {
        BillingError::NoCustomer {
            email: account.email.clone(),
        }
        .into()
    })
}

/// Subscriptions that can still be updated or canceled.
fn is_live(status: &str) -> bool {
    !matches!(
        SubscriptionStatus::from_provider(status),
        SubscriptionStatus::Canceled | SubscriptionStatus::IncompleteExpired
    )
}
