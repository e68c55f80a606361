//! Billsync - subscription state reconciliation for Stripe-backed accounts
//!
//! Keeps a local, per-email account record consistent with the payment
//! provider, which stays the source of truth. Status is derived from a
//! cached customer snapshot; the snapshot is refreshed when stale, on
//! webhooks and by an operator-run bulk sync. Every write to an account runs
//! under that account's lock.
//!
//! # Features
//!
//! - **Status derivation**: pure mapping from a customer snapshot to a status
//! - **Sync policy**: 24 hour staleness window for cached snapshots
//! - **Webhooks**: identity-checked, idempotent customer updates
//! - **Bulk reconciliation**: orphan cleanup with bounded retries
//! - **HTTP**: axum routes plus a subscription gate middleware
//! - **Testing**: mock provider and Alba-style HTTP scenarios
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use billsync::billing::{InMemoryAccountStore, LiveStripeClient, Plans};
//! use billsync::http::{AppState, app, serve};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     billsync::init_tracing();
//!
//!     let config = billsync::ConfigBuilder::new().from_env().build()?;
//!     let key = config
//!         .billing
//!         .stripe_secret_key
//!         .clone()
//!         .ok_or_else(|| anyhow::anyhow!("STRIPE_SECRET_KEY is not set"))?;
//!     let provider = Arc::new(LiveStripeClient::with_default_config(key)?);
//!     let plans = Arc::new(Plans::from_provider(&provider).await?);
//!     let state = AppState::from_config(
//!         Arc::new(InMemoryAccountStore::new()),
//!         provider,
//!         plans,
//!         &config.billing,
//!     );
//!
//!     serve(app(state, &config.server), &config.server).await?;
//!     Ok(())
//! }
//! ```

pub mod billing;
mod config;
mod error;
pub mod http;
pub mod testing;
mod utils;

pub use config::{BillingConfig, Config, ConfigBuilder, LoggingConfig, ServerConfig};
pub use error::{BillsyncError, ErrorResponse, Result};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging with sensible defaults
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "debug", "billsync=debug")
/// - `BILLSYNC_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = utils::get_env_with_prefix("LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Initialize tracing with a custom configuration
pub fn init_tracing_with_config(config: &Config) {
    let env_filter = EnvFilter::new(&config.logging.level);

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
