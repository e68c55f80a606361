//! Payment provider client abstraction.
//!
//! [`BillingProvider`] is the only way the rest of the crate talks to the
//! payment provider. [`LiveStripeClient`](super::live_client::LiveStripeClient)
//! implements it over HTTP; [`test::MockBillingProvider`] implements it in
//! memory.

use crate::error::{BillsyncError, Result};
use async_trait::async_trait;
use futures::stream::{self, Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::account::{Customer, List, Shipping, SubscriptionRef};

/// Page size used when walking provider lists.
pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// Payment provider operations.
///
/// Card failures come back as [`BillingError::Card`](super::BillingError::Card);
/// everything else the provider rejects is a
/// [`BillingError::Provider`](super::BillingError::Provider).
#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn get_customer(&self, customer_id: &str) -> Result<Customer>;

    async fn create_customer(&self, email: &str) -> Result<Customer>;

    async fn update_customer(&self, customer_id: &str, update: CustomerUpdate) -> Result<Customer>;

    async fn delete_customer(&self, customer_id: &str) -> Result<()>;

    async fn create_subscription(
        &self,
        customer_id: &str,
        plan: &str,
        options: SubscriptionOptions,
    ) -> Result<SubscriptionRef>;

    async fn update_subscription(
        &self,
        subscription_id: &str,
        update: SubscriptionUpdate,
    ) -> Result<SubscriptionRef>;

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<()>;

    async fn list_customers(&self, params: CustomerListParams) -> Result<CustomerPage>;

    async fn list_invoices(&self, params: InvoiceListParams) -> Result<InvoicePage>;

    async fn pay_invoice(&self, invoice_id: &str) -> Result<Invoice>;

    async fn get_coupon(&self, code: &str) -> Result<Coupon>;

    async fn list_plans(&self) -> Result<Vec<Plan>>;
}

#[async_trait]
impl<T: BillingProvider + ?Sized> BillingProvider for Arc<T> {
    async fn get_customer(&self, customer_id: &str) -> Result<Customer> {
        (**self).get_customer(customer_id).await
    }

    async fn create_customer(&self, email: &str) -> Result<Customer> {
        (**self).create_customer(email).await
    }

    async fn update_customer(&self, customer_id: &str, update: CustomerUpdate) -> Result<Customer> {
        (**self).update_customer(customer_id, update).await
    }

    async fn delete_customer(&self, customer_id: &str) -> Result<()> {
        (**self).delete_customer(customer_id).await
    }

    async fn create_subscription(
        &self,
        customer_id: &str,
        plan: &str,
        options: SubscriptionOptions,
    ) -> Result<SubscriptionRef> {
        (**self).create_subscription(customer_id, plan, options).await
    }

    async fn update_subscription(
        &self,
        subscription_id: &str,
        update: SubscriptionUpdate,
    ) -> Result<SubscriptionRef> {
        (**self).update_subscription(subscription_id, update).await
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<()> {
        (**self).cancel_subscription(subscription_id).await
    }

    async fn list_customers(&self, params: CustomerListParams) -> Result<CustomerPage> {
        (**self).list_customers(params).await
    }

    async fn list_invoices(&self, params: InvoiceListParams) -> Result<InvoicePage> {
        (**self).list_invoices(params).await
    }

    async fn pay_invoice(&self, invoice_id: &str) -> Result<Invoice> {
        (**self).pay_invoice(invoice_id).await
    }

    async fn get_coupon(&self, code: &str) -> Result<Coupon> {
        (**self).get_coupon(code).await
    }

    async fn list_plans(&self) -> Result<Vec<Plan>> {
        (**self).list_plans().await
    }
}

/// Fields to change on a customer. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomerUpdate {
    /// Card token to attach as the default source.
    pub source: Option<String>,
    pub shipping: Option<Shipping>,
    pub vat: Option<String>,
    pub email: Option<String>,
}

/// Options for a new subscription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionOptions {
    pub coupon: Option<String>,
    /// End any trial immediately and bill now.
    pub trial_end_now: bool,
}

/// Fields to change on a subscription. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionUpdate {
    pub plan: Option<String>,
    pub coupon: Option<String>,
    pub trial_end_now: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomerListParams {
    pub email: Option<String>,
    pub limit: u64,
    pub starting_after: Option<String>,
}

impl Default for CustomerListParams {
    fn default() -> Self {
        Self {
            email: None,
            limit: DEFAULT_PAGE_SIZE,
            starting_after: None,
        }
    }
}

impl CustomerListParams {
    /// Find customers registered under `email`.
    pub fn by_email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            limit: 1,
            starting_after: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceListParams {
    pub customer: Option<String>,
    pub subscription: Option<String>,
    pub status: Option<InvoiceStatus>,
    pub limit: u64,
    pub starting_after: Option<String>,
}

impl Default for InvoiceListParams {
    fn default() -> Self {
        Self {
            customer: None,
            subscription: None,
            status: None,
            limit: DEFAULT_PAGE_SIZE,
            starting_after: None,
        }
    }
}

impl InvoiceListParams {
    pub fn for_customer(customer_id: impl Into<String>) -> Self {
        Self {
            customer: Some(customer_id.into()),
            ..Self::default()
        }
    }
}

pub type CustomerPage = List<Customer>;
pub type InvoicePage = List<Invoice>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Open,
    Paid,
    Uncollectible,
    Void,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Open => "open",
            Self::Paid => "paid",
            Self::Uncollectible => "uncollectible",
            Self::Void => "void",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub status: Option<InvoiceStatus>,
    #[serde(default)]
    pub paid: bool,
    #[serde(default)]
    pub amount_due: i64,
    #[serde(default)]
    pub amount_paid: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub hosted_invoice_url: Option<String>,
}

impl Invoice {
    /// Open and not yet paid.
    pub fn is_outstanding(&self) -> bool {
        !self.paid && matches!(self.status, Some(InvoiceStatus::Open))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub percent_off: Option<f64>,
    #[serde(default)]
    pub amount_off: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub valid: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub interval_count: Option<u32>,
    #[serde(default = "default_true")]
    pub active: bool,
}

enum Cursor<T> {
    Next(T),
    Done,
}

/// Walk every customer matching `params`, one provider page at a time.
///
/// A listing error ends the stream with that error.
pub fn customer_stream<P>(
    provider: &P,
    params: CustomerListParams,
) -> impl Stream<Item = Result<Customer>> + Send + '_
where
    P: BillingProvider + ?Sized,
{
    stream::try_unfold(Cursor::Next(params), move |cursor| async move {
        let mut params = match cursor {
            Cursor::Next(params) => params,
            Cursor::Done => return Ok::<_, BillsyncError>(None),
        };
        let page = provider.list_customers(params.clone()).await?;
        let next = match page.data.last() {
            Some(last) if page.has_more => {
                params.starting_after = Some(last.id.clone());
                Cursor::Next(params)
            }
            _ => Cursor::Done,
        };
        let items = stream::iter(page.data.into_iter().map(Ok::<_, BillsyncError>));
        Ok(Some((items, next)))
    })
    .try_flatten()
}

/// Walk every invoice matching `params`, one provider page at a time.
pub fn invoice_stream<P>(
    provider: &P,
    params: InvoiceListParams,
) -> impl Stream<Item = Result<Invoice>> + Send + '_
where
    P: BillingProvider + ?Sized,
{
    stream::try_unfold(Cursor::Next(params), move |cursor| async move {
        let mut params = match cursor {
            Cursor::Next(params) => params,
            Cursor::Done => return Ok::<_, BillsyncError>(None),
        };
        let page = provider.list_invoices(params.clone()).await?;
        let next = match page.data.last() {
            Some(last) if page.has_more => {
                params.starting_after = Some(last.id.clone());
                Cursor::Next(params)
            }
            _ => Cursor::Done,
        };
        let items = stream::iter(page.data.into_iter().map(Ok::<_, BillsyncError>));
        Ok(Some((items, next)))
    })
    .try_flatten()
}

/// Look up the first customer registered under `email`.
pub async fn find_customer_by_email<P>(provider: &P, email: &str) -> Result<Option<Customer>>
where
    P: BillingProvider + ?Sized,
{
    let page = provider
        .list_customers(CustomerListParams::by_email(email))
        .await?;
    Ok(page.data.into_iter().find(|c| !c.deleted))
}

/// Test utilities for billing.
#[cfg(any(test, feature = "test-billing"))]
pub mod test {
    use super::*;
    use crate::billing::error::BillingError;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::RwLock;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    /// In-memory provider for tests.
    ///
    /// Records every call by operation name and supports failure injection.
    #[derive(Clone, Default)]
    pub struct MockBillingProvider {
        inner: Arc<MockInner>,
    }

    #[derive(Default)]
    struct MockInner {
        customers: RwLock<BTreeMap<String, Customer>>,
        invoices: RwLock<Vec<Invoice>>,
        coupons: RwLock<HashMap<String, Coupon>>,
        plans: RwLock<Vec<Plan>>,
        calls: RwLock<Vec<String>>,
        failures: RwLock<HashMap<String, Vec<BillingError>>>,
        declined_tokens: RwLock<HashSet<String>>,
        subscription_options: RwLock<Vec<SubscriptionOptions>>,
        subscription_updates: RwLock<Vec<SubscriptionUpdate>>,
        created_status: RwLock<Option<String>>,
        latency: RwLock<Option<Duration>>,
        holds: RwLock<HashMap<String, HoldPoint>>,
        counter: AtomicU64,
    }

    struct HoldPoint {
        reached: oneshot::Sender<()>,
        release: oneshot::Receiver<()>,
    }

    /// A pending pause of one mock call. See [`MockBillingProvider::hold_next`].
    pub struct CallHold {
        reached: oneshot::Receiver<()>,
        release: oneshot::Sender<()>,
    }

    impl CallHold {
        /// Wait until the held call has read provider state and paused.
        pub async fn reached(&mut self) {
            let _ = (&mut self.reached).await;
        }

        /// Let the held call return. Dropping the hold does the same.
        pub fn release(self) {
            let _ = self.release.send(());
        }
    }

    impl MockBillingProvider {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed a customer.
        pub fn insert_customer(&self, customer: Customer) {
            self.inner
                .customers
                .write()
                .unwrap()
                .insert(customer.id.clone(), customer);
        }

        /// Seed a customer with just an id and email.
        pub fn add_customer(&self, id: &str, email: &str) -> Customer {
            let customer = Customer {
                id: id.to_string(),
                email: Some(email.to_string()),
                ..Default::default()
            };
            self.insert_customer(customer.clone());
            customer
        }

        /// Current provider-side state of a customer.
        pub fn customer(&self, id: &str) -> Option<Customer> {
            self.inner.customers.read().unwrap().get(id).cloned()
        }

        pub fn customer_ids(&self) -> Vec<String> {
            self.inner.customers.read().unwrap().keys().cloned().collect()
        }

        pub fn add_invoice(&self, invoice: Invoice) {
            self.inner.invoices.write().unwrap().push(invoice);
        }

        pub fn invoice(&self, id: &str) -> Option<Invoice> {
            self.inner
                .invoices
                .read()
                .unwrap()
                .iter()
                .find(|i| i.id == id)
                .cloned()
        }

        pub fn add_coupon(&self, coupon: Coupon) {
            self.inner
                .coupons
                .write()
                .unwrap()
                .insert(coupon.id.clone(), coupon);
        }

        pub fn add_plan(&self, plan: Plan) {
            self.inner.plans.write().unwrap().push(plan);
        }

        /// Card tokens that fail with `card_declined`.
        pub fn decline_token(&self, token: &str) {
            self.inner
                .declined_tokens
                .write()
                .unwrap()
                .insert(token.to_string());
        }

        /// Queue an error for the next `times` calls of `operation`.
        pub fn fail_next(&self, operation: &str, error: BillingError, times: usize) {
            self.inner
                .failures
                .write()
                .unwrap()
                .entry(operation.to_string())
                .or_default()
                .extend(std::iter::repeat_n(error, times));
        }

        /// Status given to subscriptions created from now on.
        pub fn set_created_status(&self, status: &str) {
            *self.inner.created_status.write().unwrap() = Some(status.to_string());
        }

        /// Delay every call by `latency`.
        pub fn set_latency(&self, latency: Duration) {
            *self.inner.latency.write().unwrap() = Some(latency);
        }

        /// Pause the next `operation` after it has read its result, until
        /// the returned hold is released. Only `get_customer` honours holds.
        pub fn hold_next(&self, operation: &str) -> CallHold {
            let (reached_tx, reached_rx) = oneshot::channel();
            let (release_tx, release_rx) = oneshot::channel();
            self.inner.holds.write().unwrap().insert(
                operation.to_string(),
                HoldPoint {
                    reached: reached_tx,
                    release: release_rx,
                },
            );
            CallHold {
                reached: reached_rx,
                release: release_tx,
            }
        }

        async fn hold(&self, operation: &str) {
            let point = self.inner.holds.write().unwrap().remove(operation);
            if let Some(point) = point {
                let _ = point.reached.send(());
                let _ = point.release.await;
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.inner.calls.read().unwrap().clone()
        }

        pub fn call_count(&self, operation: &str) -> usize {
            self.inner
                .calls
                .read()
                .unwrap()
                .iter()
                .filter(|c| c.as_str() == operation)
                .count()
        }

        pub fn clear_calls(&self) {
            self.inner.calls.write().unwrap().clear();
        }

        pub fn subscription_options(&self) -> Vec<SubscriptionOptions> {
            self.inner.subscription_options.read().unwrap().clone()
        }

        pub fn subscription_updates(&self) -> Vec<SubscriptionUpdate> {
            self.inner.subscription_updates.read().unwrap().clone()
        }

        async fn enter(&self, operation: &str) -> Result<()> {
            self.inner
                .calls
                .write()
                .unwrap()
                .push(operation.to_string());

            let latency = *self.inner.latency.read().unwrap();
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            let failure = {
                let mut failures = self.inner.failures.write().unwrap();
                failures.get_mut(operation).and_then(|queue| {
                    if queue.is_empty() {
                        None
                    } else {
                        Some(queue.remove(0))
                    }
                })
            };
            match failure {
                Some(err) => Err(err.into()),
                None => Ok(()),
            }
        }

        fn next_id(&self, prefix: &str) -> String {
            let n = self.inner.counter.fetch_add(1, Ordering::SeqCst) + 1;
            format!("{}_mock_{}", prefix, n)
        }

        fn missing(operation: &str, what: &str, id: &str) -> BillsyncError {
            BillingError::Provider {
                operation: operation.to_string(),
                message: format!("No such {}: '{}'", what, id),
                code: Some("resource_missing".to_string()),
                http_status: Some(404),
            }
            .into()
        }

        fn find_subscription_owner(&self, subscription_id: &str) -> Option<String> {
            self.inner
                .customers
                .read()
                .unwrap()
                .values()
                .find(|c| c.subscriptions.data.iter().any(|s| s.id == subscription_id))
                .map(|c| c.id.clone())
        }
    }

    #[async_trait]
    impl BillingProvider for MockBillingProvider {
        async fn get_customer(&self, customer_id: &str) -> Result<Customer> {
            self.enter("get_customer").await?;
            let customer = self
                .customer(customer_id)
                .ok_or_else(|| Self::missing("get_customer", "customer", customer_id))?;
            self.hold("get_customer").await;
            Ok(customer)
        }

        async fn create_customer(&self, email: &str) -> Result<Customer> {
            self.enter("create_customer").await?;
            let customer = Customer {
                id: self.next_id("cus"),
                email: Some(email.to_string()),
                ..Default::default()
            };
            self.insert_customer(customer.clone());
            Ok(customer)
        }

        async fn update_customer(&self, customer_id: &str, update: CustomerUpdate) -> Result<Customer> {
            self.enter("update_customer").await?;

            if let Some(token) = &update.source {
                if self.inner.declined_tokens.read().unwrap().contains(token) {
                    return Err(BillingError::Card {
                        code: "card_declined".to_string(),
                        message: "Your card was declined.".to_string(),
                    }
                    .into());
                }
            }

            let mut customers = self.inner.customers.write().unwrap();
            let customer = customers
                .get_mut(customer_id)
                .ok_or_else(|| Self::missing("update_customer", "customer", customer_id))?;
            if let Some(token) = update.source {
                customer.default_source = Some(format!("card_{}", token));
            }
            if let Some(shipping) = update.shipping {
                customer.shipping = Some(shipping);
            }
            if let Some(vat) = update.vat {
                customer
                    .metadata
                    .insert(crate::billing::account::META_VAT.to_string(), vat);
            }
            if let Some(email) = update.email {
                customer.email = Some(email);
            }
            Ok(customer.clone())
        }

        async fn delete_customer(&self, customer_id: &str) -> Result<()> {
            self.enter("delete_customer").await?;
            self.inner
                .customers
                .write()
                .unwrap()
                .remove(customer_id)
                .map(|_| ())
                .ok_or_else(|| Self::missing("delete_customer", "customer", customer_id))
        }

        async fn create_subscription(
            &self,
            customer_id: &str,
            plan: &str,
            options: SubscriptionOptions,
        ) -> Result<SubscriptionRef> {
            self.enter("create_subscription").await?;
            let status = self
                .inner
                .created_status
                .read()
                .unwrap()
                .clone()
                .unwrap_or_else(|| {
                    if options.trial_end_now { "active" } else { "trialing" }.to_string()
                });
            let subscription = SubscriptionRef {
                id: self.next_id("sub"),
                plan: Some(plan.to_string()),
                status,
                trial_end: 0,
            };
            self.inner
                .subscription_options
                .write()
                .unwrap()
                .push(options);

            let mut customers = self.inner.customers.write().unwrap();
            let customer = customers
                .get_mut(customer_id)
                .ok_or_else(|| Self::missing("create_subscription", "customer", customer_id))?;
            customer.subscriptions.data.insert(0, subscription.clone());
            Ok(subscription)
        }

        async fn update_subscription(
            &self,
            subscription_id: &str,
            update: SubscriptionUpdate,
        ) -> Result<SubscriptionRef> {
            self.enter("update_subscription").await?;
            let owner = self
                .find_subscription_owner(subscription_id)
                .ok_or_else(|| Self::missing("update_subscription", "subscription", subscription_id))?;
            self.inner
                .subscription_updates
                .write()
                .unwrap()
                .push(update.clone());

            let created_status = self.inner.created_status.read().unwrap().clone();
            let mut customers = self.inner.customers.write().unwrap();
            let customer = customers
                .get_mut(&owner)
                .ok_or_else(|| Self::missing("update_subscription", "customer", &owner))?;
            let subscription = customer
                .subscriptions
                .data
                .iter_mut()
                .find(|s| s.id == subscription_id)
                .ok_or_else(|| Self::missing("update_subscription", "subscription", subscription_id))?;
            if let Some(plan) = update.plan {
                subscription.plan = Some(plan);
            }
            if update.trial_end_now {
                subscription.trial_end = 0;
                subscription.status = created_status.unwrap_or_else(|| "active".to_string());
            }
            Ok(subscription.clone())
        }

        async fn cancel_subscription(&self, subscription_id: &str) -> Result<()> {
            self.enter("cancel_subscription").await?;
            let owner = self
                .find_subscription_owner(subscription_id)
                .ok_or_else(|| Self::missing("cancel_subscription", "subscription", subscription_id))?;
            let mut customers = self.inner.customers.write().unwrap();
            if let Some(customer) = customers.get_mut(&owner) {
                customer.subscriptions.data.retain(|s| s.id != subscription_id);
            }
            Ok(())
        }

        async fn list_customers(&self, params: CustomerListParams) -> Result<CustomerPage> {
            self.enter("list_customers").await?;
            let customers = self.inner.customers.read().unwrap();
            let mut matching = customers
                .values()
                .filter(|c| match &params.email {
                    Some(email) => c.email.as_deref() == Some(email.as_str()),
                    None => true,
                })
                .filter(|c| match &params.starting_after {
                    Some(after) => c.id.as_str() > after.as_str(),
                    None => true,
                });

            let limit = params.limit.max(1) as usize;
            let data: Vec<Customer> = matching.by_ref().take(limit).cloned().collect();
            let has_more = matching.next().is_some();
            Ok(List { data, has_more })
        }

        async fn list_invoices(&self, params: InvoiceListParams) -> Result<InvoicePage> {
            self.enter("list_invoices").await?;
            let invoices = self.inner.invoices.read().unwrap();
            let mut skipping = params.starting_after.is_some();
            let mut matching = invoices.iter().filter(|i| {
                params.customer.as_ref().is_none_or(|c| i.customer.as_ref() == Some(c))
                    && params
                        .subscription
                        .as_ref()
                        .is_none_or(|s| i.subscription.as_ref() == Some(s))
                    && params.status.is_none_or(|s| i.status == Some(s))
            });
            if let Some(after) = &params.starting_after {
                for invoice in matching.by_ref() {
                    if &invoice.id == after {
                        skipping = false;
                        break;
                    }
                }
            }
            if skipping {
                return Ok(List::default());
            }

            let limit = params.limit.max(1) as usize;
            let data: Vec<Invoice> = matching.by_ref().take(limit).cloned().collect();
            let has_more = matching.next().is_some();
            Ok(List { data, has_more })
        }

        async fn pay_invoice(&self, invoice_id: &str) -> Result<Invoice> {
            self.enter("pay_invoice").await?;
            let mut invoices = self.inner.invoices.write().unwrap();
            let invoice = invoices
                .iter_mut()
                .find(|i| i.id == invoice_id)
                .ok_or_else(|| Self::missing("pay_invoice", "invoice", invoice_id))?;
            invoice.paid = true;
            invoice.status = Some(InvoiceStatus::Paid);
            invoice.amount_paid = invoice.amount_due;
            Ok(invoice.clone())
        }

        async fn get_coupon(&self, code: &str) -> Result<Coupon> {
            self.enter("get_coupon").await?;
            self.inner
                .coupons
                .read()
                .unwrap()
                .get(code)
                .cloned()
                .ok_or_else(|| Self::missing("get_coupon", "coupon", code))
        }

        async fn list_plans(&self) -> Result<Vec<Plan>> {
            self.enter("list_plans").await?;
            Ok(self.inner.plans.read().unwrap().clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test::MockBillingProvider;
    use super::*;
    use crate::billing::error::BillingError;

    #[tokio::test]
    async fn test_customer_stream_walks_every_page() {
        let provider = MockBillingProvider::new();
        for i in 0..7 {
            provider.add_customer(&format!("cus_{i:02}"), &format!("user{i}@x"));
        }

        let params = CustomerListParams {
            limit: 3,
            ..Default::default()
        };
        let customers: Vec<Customer> = customer_stream(&provider, params)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(customers.len(), 7);
        assert_eq!(customers[0].id, "cus_00");
        assert_eq!(customers[6].id, "cus_06");
        assert_eq!(provider.call_count("list_customers"), 3);
    }

    #[tokio::test]
    async fn test_customer_stream_is_lazy() {
        let provider = MockBillingProvider::new();
        for i in 0..5 {
            provider.add_customer(&format!("cus_{i}"), &format!("user{i}@x"));
        }

        let params = CustomerListParams {
            limit: 2,
            ..Default::default()
        };
        let stream = customer_stream(&provider, params);
        futures::pin_mut!(stream);
        let first = stream.try_next().await.unwrap().unwrap();

        assert_eq!(first.id, "cus_0");
        assert_eq!(provider.call_count("list_customers"), 1);
    }

    #[tokio::test]
    async fn test_customer_stream_surfaces_listing_error() {
        let provider = MockBillingProvider::new();
        provider.add_customer("cus_1", "a@x");
        provider.fail_next(
            "list_customers",
            BillingError::provider("list_customers", "connection reset"),
            1,
        );

        let result: Result<Vec<Customer>> =
            customer_stream(&provider, CustomerListParams::default())
                .try_collect()
                .await;
        assert!(result.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_invoice_stream_filters_by_customer() {
        let provider = MockBillingProvider::new();
        for (id, customer) in [("in_1", "cus_a"), ("in_2", "cus_b"), ("in_3", "cus_a")] {
            provider.add_invoice(Invoice {
                id: id.to_string(),
                customer: Some(customer.to_string()),
                status: Some(InvoiceStatus::Paid),
                paid: true,
                ..Default::default()
            });
        }

        let params = InvoiceListParams {
            limit: 1,
            ..InvoiceListParams::for_customer("cus_a")
        };
        let invoices: Vec<Invoice> = invoice_stream(&provider, params)
            .try_collect()
            .await
            .unwrap();
        let ids: Vec<&str> = invoices.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["in_1", "in_3"]);
    }

    #[tokio::test]
    async fn test_find_customer_by_email() {
        let provider = MockBillingProvider::new();
        provider.add_customer("cus_1", "a@x");
        provider.add_customer("cus_2", "b@x");

        let found = find_customer_by_email(&provider, "b@x").await.unwrap();
        assert_eq!(found.map(|c| c.id), Some("cus_2".to_string()));
        assert!(find_customer_by_email(&provider, "c@x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mock_declined_token_is_card_error() {
        let provider = MockBillingProvider::new();
        provider.add_customer("cus_1", "a@x");
        provider.decline_token("tok_bad");

        let err = provider
            .update_customer(
                "cus_1",
                CustomerUpdate {
                    source: Some("tok_bad".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_card_error());
        assert!(provider.customer("cus_1").unwrap().default_source.is_none());
    }
}
