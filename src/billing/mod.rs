//! Subscription state reconciliation against Stripe.
//!
//! The provider is the source of truth for payment state. Each local
//! [`Account`] keeps a cached customer snapshot, and every path that changes
//! it goes through the per-account lock:
//!
//! - [`SubscriptionManager`] for request-time flows (subscribe, unsubscribe,
//!   billing details, promos)
//! - [`WebhookConsumer`] for provider-pushed events
//! - [`CustomerReconciler`] for the operator-run bulk sync
//!
//! Status is derived from the snapshot by [`derive_status`], a pure function.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use billsync::billing::{
//!     AccountLocks, FileAccountStore, LiveStripeClient, Plans, SubscribeRequest,
//!     SubscriptionManager,
//! };
//!
//! let provider = Arc::new(LiveStripeClient::with_default_config(&secret_key)?);
//! let store = Arc::new(FileAccountStore::open("./accounts").await?);
//! let plans = Arc::new(Plans::from_provider(&provider).await?);
//!
//! let manager = SubscriptionManager::new(store, provider, AccountLocks::new(), plans);
//! let account = manager
//!     .subscribe("a@example.com", SubscribeRequest {
//!         plan: Some("plan_yearly".into()),
//!         token: Some("tok_visa".into()),
//!         coupon: None,
//!     })
//!     .await?;
//! ```

pub mod account;
pub mod client;
pub mod error;
pub mod live_client;
pub mod lock;
pub mod manager;
pub mod plans;
pub mod reconcile;
pub mod status;
pub mod storage;
pub mod sync;
pub mod view;
pub mod webhook;

pub use account::{Account, Address, Customer, List, Promo, Shipping, SubscriptionRef};
pub use client::{
    BillingProvider, Coupon, CustomerListParams, CustomerUpdate, Invoice, InvoiceListParams,
    InvoiceStatus, Plan, SubscriptionOptions, SubscriptionUpdate, customer_stream,
    find_customer_by_email, invoice_stream,
};
pub use error::BillingError;
pub use live_client::{InvalidApiKeyError, LiveStripeClient, LiveStripeClientConfig};
pub use lock::{AccountGuard, AccountLocks};
pub use manager::{BillingDetails, PromoReport, SubscribeRequest, SubscriptionManager};
pub use plans::{Plans, PlansBuilder};
pub use reconcile::{CustomerReconciler, SyncReport};
pub use status::{StatusInfo, SubscriptionStatus, derive_status};
pub use storage::{AccountStore, FileAccountStore, InMemoryAccountStore};
pub use sync::SyncPolicy;
pub use view::{
    AccountView, DashboardView, InvoiceView, StatusHeaders, project_account, project_dashboard,
};
pub use webhook::{AccountCreation, WebhookConsumer, WebhookEvent, WebhookEventData, WebhookOutcome};

#[cfg(any(test, feature = "test-billing"))]
pub use client::test::{CallHold, MockBillingProvider};
