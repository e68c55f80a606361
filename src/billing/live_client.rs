//! Live Stripe client implementation.
//!
//! Talks to the Stripe REST API through `async-stripe`'s HTTP transport and
//! decodes responses into the crate's own snapshot types. Every call runs
//! under a timeout, and transient failures are retried with exponential
//! backoff.

use crate::error::Result;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::account::{Customer, List, Shipping, SubscriptionRef};
use super::client::{
    BillingProvider, Coupon, CustomerListParams, CustomerPage, CustomerUpdate, Invoice,
    InvoiceListParams, InvoicePage, Plan, SubscriptionOptions, SubscriptionUpdate,
};
use super::error::BillingError;

const EXPAND_SUBSCRIPTIONS: &[&str] = &["subscriptions"];
const EXPAND_LIST_SUBSCRIPTIONS: &[&str] = &["data.subscriptions"];

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the live Stripe client.
#[derive(Debug, Clone)]
pub struct LiveStripeClientConfig {
    /// Maximum number of retry attempts for transient failures.
    pub max_retries: u32,
    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for LiveStripeClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            timeout_seconds: 30,
        }
    }
}

impl LiveStripeClientConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    #[must_use]
    pub fn base_delay_ms(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    #[must_use]
    pub fn max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    #[must_use]
    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }
}

/// Error returned when an API key has the wrong shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid Stripe API key: {reason}")]
pub struct InvalidApiKeyError {
    pub reason: String,
}

fn validate_api_key(key: &str) -> std::result::Result<(), InvalidApiKeyError> {
    const PREFIXES: &[&str] = &["sk_test_", "sk_live_", "rk_test_", "rk_live_"];

    if key.is_empty() {
        return Err(InvalidApiKeyError {
            reason: "key is empty".to_string(),
        });
    }
    if !PREFIXES.iter().any(|p| key.starts_with(p)) {
        return Err(InvalidApiKeyError {
            reason: "expected a secret or restricted key (sk_* or rk_*)".to_string(),
        });
    }
    if key.len() < 20 {
        return Err(InvalidApiKeyError {
            reason: "key is too short".to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// Live Stripe Client
// ============================================================================

/// Stripe-backed [`BillingProvider`].
///
/// The API key lives in a [`SecretString`] and never shows up in debug
/// output. Mutating calls carry an idempotency key that stays the same across
/// retries of one logical call.
#[derive(Clone)]
pub struct LiveStripeClient {
    client: stripe::Client,
    config: LiveStripeClientConfig,
    api_key: SecretString,
}

impl LiveStripeClient {
    /// Create a new live Stripe client.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key format is invalid.
    pub fn new(
        api_key: impl Into<SecretString>,
        config: LiveStripeClientConfig,
    ) -> std::result::Result<Self, InvalidApiKeyError> {
        let api_key: SecretString = api_key.into();
        validate_api_key(api_key.expose_secret())?;

        let client = stripe::Client::new(api_key.expose_secret()).with_app_info(
            "billsync".to_string(),
            Some(env!("CARGO_PKG_VERSION").to_string()),
            None,
        );

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    pub fn with_default_config(
        api_key: impl Into<SecretString>,
    ) -> std::result::Result<Self, InvalidApiKeyError> {
        Self::new(api_key, LiveStripeClientConfig::default())
    }

    #[must_use]
    pub fn is_test_mode(&self) -> bool {
        let key = self.api_key.expose_secret();
        key.starts_with("sk_test_") || key.starts_with("rk_test_")
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_seconds)
    }

    fn generate_idempotency_key(operation: &str) -> String {
        format!("{}_{}", operation, uuid::Uuid::new_v4())
    }

    /// A client whose every request carries the same idempotency key.
    fn idempotent_client(&self, operation: &str) -> stripe::Client {
        let key = Self::generate_idempotency_key(operation);
        self.client
            .clone()
            .with_strategy(stripe::RequestStrategy::Idempotent(key))
    }
}

impl std::fmt::Debug for LiveStripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveStripeClient")
            .field("config", &self.config)
            .field("is_test_mode", &self.is_test_mode())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Retry Logic
// ============================================================================

/// Run `operation_fn` under a timeout, retrying 429s, 5xx and timeouts.
async fn with_retry<T, F, Fut>(
    config: &LiveStripeClientConfig,
    operation: &str,
    operation_fn: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, stripe::StripeError>>,
{
    let timeout_duration = Duration::from_secs(config.timeout_seconds);
    let mut attempts = 0;

    loop {
        match tokio::time::timeout(timeout_duration, operation_fn()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                if !is_retryable_error(&e) || attempts >= config.max_retries {
                    let err = map_stripe_error(e, operation);
                    if !err.is_card_error() {
                        tracing::error!(
                            target: "billsync::billing::stripe",
                            operation = operation,
                            attempts = attempts + 1,
                            error = %err,
                            "Stripe API call failed"
                        );
                    }
                    return Err(err.into());
                }

                let delay = calculate_backoff_delay(attempts, config.base_delay_ms, config.max_delay_ms);
                tracing::warn!(
                    target: "billsync::billing::stripe",
                    operation = operation,
                    attempt = attempts + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying Stripe API call after transient error"
                );
                tokio::time::sleep(delay).await;
                attempts += 1;
            }
            Err(_elapsed) => {
                if attempts >= config.max_retries {
                    tracing::error!(
                        target: "billsync::billing::stripe",
                        operation = operation,
                        timeout_seconds = config.timeout_seconds,
                        "Stripe API call timed out"
                    );
                    return Err(BillingError::Provider {
                        operation: operation.to_string(),
                        message: format!(
                            "Request timed out after {} seconds",
                            config.timeout_seconds
                        ),
                        code: None,
                        http_status: Some(408),
                    }
                    .into());
                }

                tracing::warn!(
                    target: "billsync::billing::stripe",
                    operation = operation,
                    attempt = attempts + 1,
                    timeout_seconds = config.timeout_seconds,
                    "Stripe API request timed out, retrying"
                );
                let delay = calculate_backoff_delay(attempts, config.base_delay_ms, config.max_delay_ms);
                tokio::time::sleep(delay).await;
                attempts += 1;
            }
        }
    }
}

fn is_retryable_error(error: &stripe::StripeError) -> bool {
    match error {
        stripe::StripeError::Stripe(request_error) => {
            let status = request_error.http_status;
            status == 429 || (500..600).contains(&status)
        }
        stripe::StripeError::Timeout => true,
        _ => false,
    }
}

/// Exponential backoff (`base * 2^attempt`, capped) plus up to 25% jitter.
fn calculate_backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let delay_ms = base_ms.saturating_mul(2_u64.saturating_pow(attempt));
    let delay_ms = delay_ms.min(max_ms);

    let jitter = if delay_ms > 0 {
        fastrand::u64(0..=delay_ms / 4)
    } else {
        0
    };
    Duration::from_millis(delay_ms.saturating_add(jitter))
}

// ============================================================================
// Error Mapping
// ============================================================================

/// Card errors keep their code so the user can be told what to fix. Anything
/// else is a provider error.
fn map_stripe_error(error: stripe::StripeError, operation: &str) -> BillingError {
    match error {
        stripe::StripeError::Stripe(request_error) => {
            let message = request_error
                .message
                .clone()
                .unwrap_or_else(|| "Unknown error".to_string());
            let code = request_error
                .code
                .as_ref()
                .map(|c| snake_case(&format!("{c:?}")));

            if matches!(request_error.error_type, stripe::ErrorType::Card) {
                let code = request_error
                    .decline_code
                    .clone()
                    .or(code)
                    .unwrap_or_else(|| "card_error".to_string());
                return BillingError::Card { code, message };
            }

            BillingError::Provider {
                operation: operation.to_string(),
                message,
                code,
                http_status: Some(request_error.http_status),
            }
        }
        stripe::StripeError::Timeout => BillingError::Provider {
            operation: operation.to_string(),
            message: "Request timed out".to_string(),
            code: None,
            http_status: Some(408),
        },
        other => BillingError::Provider {
            operation: operation.to_string(),
            message: other.to_string(),
            code: None,
            http_status: None,
        },
    }
}

/// `CardDeclined` -> `card_declined`.
fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Serialize)]
struct Expand<'a> {
    expand: &'a [&'a str],
}

#[derive(Serialize)]
struct CreateCustomerForm<'a> {
    email: &'a str,
    expand: &'a [&'a str],
}

#[derive(Serialize)]
struct UpdateCustomerForm<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    shipping: Option<&'a Shipping>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    metadata: HashMap<&'a str, &'a str>,
    expand: &'a [&'a str],
}

#[derive(Serialize)]
struct PlanItem<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    plan: &'a str,
}

#[derive(Serialize)]
struct CreateSubscriptionForm<'a> {
    customer: &'a str,
    items: [PlanItem<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    coupon: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trial_end: Option<&'a str>,
}

#[derive(Serialize)]
struct UpdateSubscriptionForm<'a> {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    items: Vec<PlanItem<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    coupon: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trial_end: Option<&'a str>,
}

#[derive(Serialize)]
struct ListCustomersQuery<'a> {
    limit: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    starting_after: Option<&'a str>,
    expand: &'a [&'a str],
}

#[derive(Serialize)]
struct ListInvoicesQuery<'a> {
    limit: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subscription: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    starting_after: Option<&'a str>,
}

#[derive(Serialize)]
struct ListPlansQuery {
    limit: u64,
    active: bool,
}

/// Subscription items, fetched to find the item a plan change applies to.
#[derive(Deserialize)]
struct SubscriptionItems {
    #[serde(default)]
    items: List<SubscriptionItem>,
}

#[derive(Deserialize)]
struct SubscriptionItem {
    id: String,
}

/// The item whose plan a plan change replaces. Without one, Stripe would add
/// a second item instead.
fn plan_item_id(
    current: SubscriptionItems,
    subscription_id: &str,
) -> std::result::Result<String, BillingError> {
    current
        .items
        .data
        .into_iter()
        .next()
        .map(|item| item.id)
        .ok_or_else(|| BillingError::Provider {
            operation: "update_subscription".to_string(),
            message: format!("Subscription {} has no items to change", subscription_id),
            code: Some("subscription_has_no_items".to_string()),
            http_status: None,
        })
}

fn customer_path(id: &str) -> String {
    format!("/customers/{}", urlencoding::encode(id))
}

fn subscription_path(id: &str) -> String {
    format!("/subscriptions/{}", urlencoding::encode(id))
}

// ============================================================================
// BillingProvider Implementation
// ============================================================================

#[async_trait]
impl BillingProvider for LiveStripeClient {
    async fn get_customer(&self, customer_id: &str) -> Result<Customer> {
        let path = customer_path(customer_id);
        let query = Expand {
            expand: EXPAND_SUBSCRIPTIONS,
        };
        with_retry(&self.config, "get_customer", || {
            self.client.get_query::<Customer, _>(&path, &query)
        })
        .await
    }

    async fn create_customer(&self, email: &str) -> Result<Customer> {
        let client = self.idempotent_client("create_customer");
        let form = CreateCustomerForm {
            email,
            expand: EXPAND_SUBSCRIPTIONS,
        };
        let customer: Customer = with_retry(&self.config, "create_customer", || {
            client.post_form::<Customer, _>("/customers", &form)
        })
        .await?;

        tracing::info!(
            target: "billsync::billing::stripe",
            customer_id = %customer.id,
            "Created Stripe customer"
        );
        Ok(customer)
    }

    async fn update_customer(&self, customer_id: &str, update: CustomerUpdate) -> Result<Customer> {
        let client = self.idempotent_client("update_customer");
        let path = customer_path(customer_id);
        let mut metadata = HashMap::new();
        if let Some(vat) = update.vat.as_deref() {
            metadata.insert(super::account::META_VAT, vat);
        }
        let form = UpdateCustomerForm {
            source: update.source.as_deref(),
            email: update.email.as_deref(),
            shipping: update.shipping.as_ref(),
            metadata,
            expand: EXPAND_SUBSCRIPTIONS,
        };
        with_retry(&self.config, "update_customer", || {
            client.post_form::<Customer, _>(&path, &form)
        })
        .await
    }

    async fn delete_customer(&self, customer_id: &str) -> Result<()> {
        let path = customer_path(customer_id);
        with_retry(&self.config, "delete_customer", || {
            self.client.delete::<serde_json::Value>(&path)
        })
        .await?;

        tracing::info!(
            target: "billsync::billing::stripe",
            customer_id = customer_id,
            "Deleted Stripe customer"
        );
        Ok(())
    }

    async fn create_subscription(
        &self,
        customer_id: &str,
        plan: &str,
        options: SubscriptionOptions,
    ) -> Result<SubscriptionRef> {
        // One key for every retry, so a lost response cannot create a second
        // subscription.
        let client = self.idempotent_client("create_subscription");
        let form = CreateSubscriptionForm {
            customer: customer_id,
            items: [PlanItem { id: None, plan }],
            coupon: options.coupon.as_deref(),
            trial_end: options.trial_end_now.then_some("now"),
        };
        let subscription: SubscriptionRef = with_retry(&self.config, "create_subscription", || {
            client.post_form::<SubscriptionRef, _>("/subscriptions", &form)
        })
        .await?;

        tracing::info!(
            target: "billsync::billing::stripe",
            customer_id = customer_id,
            subscription_id = %subscription.id,
            plan = plan,
            status = %subscription.status,
            "Created subscription"
        );
        Ok(subscription)
    }

    async fn update_subscription(
        &self,
        subscription_id: &str,
        update: SubscriptionUpdate,
    ) -> Result<SubscriptionRef> {
        let path = subscription_path(subscription_id);

        let item_id = match update.plan {
            Some(_) => {
                let current: SubscriptionItems =
                    with_retry(&self.config, "get_subscription", || {
                        self.client.get::<SubscriptionItems>(&path)
                    })
                    .await?;
                Some(plan_item_id(current, subscription_id)?)
            }
            None => None,
        };

        let client = self.idempotent_client("update_subscription");
        let items = match update.plan.as_deref() {
            Some(plan) => vec![PlanItem {
                id: item_id.as_deref(),
                plan,
            }],
            None => Vec::new(),
        };
        let form = UpdateSubscriptionForm {
            items,
            coupon: update.coupon.as_deref(),
            trial_end: update.trial_end_now.then_some("now"),
        };
        with_retry(&self.config, "update_subscription", || {
            client.post_form::<SubscriptionRef, _>(&path, &form)
        })
        .await
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<()> {
        let path = subscription_path(subscription_id);
        with_retry(&self.config, "cancel_subscription", || {
            self.client.delete::<SubscriptionRef>(&path)
        })
        .await?;

        tracing::info!(
            target: "billsync::billing::stripe",
            subscription_id = subscription_id,
            "Canceled subscription"
        );
        Ok(())
    }

    async fn list_customers(&self, params: CustomerListParams) -> Result<CustomerPage> {
        let query = ListCustomersQuery {
            limit: params.limit.clamp(1, 100),
            email: params.email.as_deref(),
            starting_after: params.starting_after.as_deref(),
            expand: EXPAND_LIST_SUBSCRIPTIONS,
        };
        with_retry(&self.config, "list_customers", || {
            self.client.get_query::<CustomerPage, _>("/customers", &query)
        })
        .await
    }

    async fn list_invoices(&self, params: InvoiceListParams) -> Result<InvoicePage> {
        let query = ListInvoicesQuery {
            limit: params.limit.clamp(1, 100),
            customer: params.customer.as_deref(),
            subscription: params.subscription.as_deref(),
            status: params.status.map(|s| s.as_str()),
            starting_after: params.starting_after.as_deref(),
        };
        with_retry(&self.config, "list_invoices", || {
            self.client.get_query::<InvoicePage, _>("/invoices", &query)
        })
        .await
    }

    async fn pay_invoice(&self, invoice_id: &str) -> Result<Invoice> {
        let client = self.idempotent_client("pay_invoice");
        let path = format!("/invoices/{}/pay", urlencoding::encode(invoice_id));
        with_retry(&self.config, "pay_invoice", || client.post::<Invoice>(&path)).await
    }

    async fn get_coupon(&self, code: &str) -> Result<Coupon> {
        let path = format!("/coupons/{}", urlencoding::encode(code));
        with_retry(&self.config, "get_coupon", || self.client.get::<Coupon>(&path)).await
    }

    async fn list_plans(&self) -> Result<Vec<Plan>> {
        let query = ListPlansQuery {
            limit: 100,
            active: true,
        };
        let page: List<Plan> = with_retry(&self.config, "list_plans", || {
            self.client.get_query::<List<Plan>, _>("/plans", &query)
        })
        .await?;
        Ok(page.data)
    }
}
