use axum::{
    Form, Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::billing::{
    AccountCreation, AccountLocks, AccountStore, AccountView, BillingDetails, BillingProvider,
    DashboardView, InvoiceView, Plans, StatusHeaders, SubscribeRequest, SubscriptionManager,
    SyncPolicy, WebhookConsumer, project_account, project_dashboard,
};
use crate::config::BillingConfig;
use crate::error::Result;

use super::extract::{AuthenticatedEmail, require_subscription};

pub type DynStore = Arc<dyn AccountStore>;
pub type DynProvider = Arc<dyn BillingProvider>;

/// Header carrying the Stripe webhook signature.
pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

/// Shared state for every route.
///
/// The manager and the webhook consumer share one lock registry, so a
/// webhook and a user request for the same email never interleave.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SubscriptionManager<DynStore, DynProvider>>,
    pub webhooks: Arc<WebhookConsumer<DynStore, DynProvider>>,
}

impl AppState {
    pub fn new(store: DynStore, provider: DynProvider, plans: Arc<Plans>) -> Self {
        Self::from_config(store, provider, plans, &BillingConfig::default())
    }

    pub fn from_config(
        store: DynStore,
        provider: DynProvider,
        plans: Arc<Plans>,
        config: &BillingConfig,
    ) -> Self {
        Self::with_locks(store, provider, plans, config, AccountLocks::new())
    }

    /// Like [`AppState::from_config`], with a lock registry shared with
    /// other writers of the same store, e.g. [`FileAccountStore::locks`].
    ///
    /// [`FileAccountStore::locks`]: crate::billing::FileAccountStore::locks
    pub fn with_locks(
        store: DynStore,
        provider: DynProvider,
        plans: Arc<Plans>,
        config: &BillingConfig,
        locks: AccountLocks,
    ) -> Self {
        let manager = SubscriptionManager::new(
            Arc::clone(&store),
            Arc::clone(&provider),
            locks.clone(),
            plans,
        )
        .with_policy(SyncPolicy::from_hours(config.max_age_hours));

        let mut webhooks = WebhookConsumer::new(store, provider, locks)
            .with_account_creation(config.webhook_accounts);
        if let Some(secret) = &config.webhook_secret {
            webhooks = webhooks.with_signing_secret(secret.clone());
        }

        Self {
            manager: Arc::new(manager),
            webhooks: Arc::new(webhooks),
        }
    }

    pub fn account_creation(&self) -> AccountCreation {
        self.webhooks.account_creation()
    }
}

/// Build the billing router.
pub fn router(state: AppState) -> Router {
    let gated = Router::new()
        .route("/subscription/check", get(check_subscription))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_subscription,
        ));

    Router::new()
        .route("/account", get(show_account).delete(delete_account))
        .route("/dashboard", get(dashboard))
        .route("/subscription", post(subscribe).delete(unsubscribe))
        .route("/billing", put(update_billing))
        .route("/invoices", get(list_invoices))
        .route("/promo", post(apply_promo))
        .route("/webhooks/stripe", post(stripe_webhook))
        .merge(gated)
        .with_state(state)
}

type AccountResponse = (StatusHeaders, Json<AccountView>);

fn account_response(state: &AppState, account: &crate::billing::Account) -> AccountResponse {
    let view = project_account(account, state.manager.plans(), chrono::Utc::now());
    (StatusHeaders::for_account(account), Json(view))
}

async fn show_account(
    State(state): State<AppState>,
    email: AuthenticatedEmail,
) -> Result<AccountResponse> {
    let account = state.manager.account(email.as_str(), true).await?;
    Ok(account_response(&state, &account))
}

async fn delete_account(
    State(state): State<AppState>,
    email: AuthenticatedEmail,
) -> Result<StatusCode> {
    if state.manager.delete_account(email.as_str()).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

#[derive(Debug, Default, Deserialize)]
struct DashboardQuery {
    coupon: Option<String>,
}

/// The dashboard applies a coupon passed as `?coupon=` before rendering.
async fn dashboard(
    State(state): State<AppState>,
    email: AuthenticatedEmail,
    Query(query): Query<DashboardQuery>,
) -> Result<(StatusHeaders, Json<DashboardView>)> {
    if let Some(code) = query.coupon.as_deref().filter(|c| !c.is_empty()) {
        if let Err(e) = state.manager.apply_promo(email.as_str(), code).await {
            tracing::info!(
                target: "billsync::http",
                email = %email.as_str(),
                coupon = code,
                error = %e,
                "Ignoring coupon from dashboard link"
            );
        }
    }

    let account = state.manager.account(email.as_str(), true).await?;
    let invoices = state.manager.invoices(email.as_str()).await?;
    let view = project_dashboard(&account, &invoices, state.manager.plans(), chrono::Utc::now());
    Ok((StatusHeaders::for_account(&account), Json(view)))
}

async fn subscribe(
    State(state): State<AppState>,
    email: AuthenticatedEmail,
    Form(request): Form<SubscribeRequest>,
) -> Result<AccountResponse> {
    let account = state.manager.subscribe(email.as_str(), request).await?;
    Ok(account_response(&state, &account))
}

async fn unsubscribe(
    State(state): State<AppState>,
    email: AuthenticatedEmail,
) -> Result<AccountResponse> {
    let account = state.manager.unsubscribe(email.as_str()).await?;
    Ok(account_response(&state, &account))
}

async fn update_billing(
    State(state): State<AppState>,
    email: AuthenticatedEmail,
    Json(details): Json<BillingDetails>,
) -> Result<AccountResponse> {
    let account = state.manager.update_billing(email.as_str(), details).await?;
    Ok(account_response(&state, &account))
}

async fn list_invoices(
    State(state): State<AppState>,
    email: AuthenticatedEmail,
) -> Result<Json<Vec<InvoiceView>>> {
    let invoices = state.manager.invoices(email.as_str()).await?;
    Ok(Json(invoices.iter().map(InvoiceView::from).collect()))
}

#[derive(Debug, Deserialize)]
struct PromoForm {
    coupon: String,
}

async fn apply_promo(
    State(state): State<AppState>,
    email: AuthenticatedEmail,
    Form(form): Form<PromoForm>,
) -> Result<AccountResponse> {
    let account = state.manager.apply_promo(email.as_str(), &form.coupon).await?;
    Ok(account_response(&state, &account))
}

/// Reached only through [`require_subscription`].
async fn check_subscription() -> StatusCode {
    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize)]
struct WebhookAck {
    received: bool,
    outcome: &'static str,
}

/// Events the consumer cannot act on still get a 200 so Stripe stops
/// redelivering them; only malformed or unsigned payloads are rejected.
async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>> {
    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let outcome = state.webhooks.handle_payload(&body, signature).await?;
    Ok(Json(WebhookAck {
        received: true,
        outcome: outcome.as_str(),
    }))
}
