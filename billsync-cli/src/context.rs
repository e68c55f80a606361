//! Shared wiring: configuration, the Stripe client and the account store.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use billsync::billing::{
    FileAccountStore, LiveStripeClient, LiveStripeClientConfig, Plans, SubscriptionManager,
    SyncPolicy,
};
use billsync::{BillingConfig, Config, ConfigBuilder};

/// Configuration from `BILLSYNC_*` variables, with the global `--data-dir`
/// taking precedence.
pub fn builder(data_dir: Option<String>) -> ConfigBuilder {
    let builder = ConfigBuilder::new().from_env();
    match data_dir {
        Some(dir) => builder.with_data_dir(dir),
        None => builder,
    }
}

pub fn load(data_dir: Option<String>) -> Result<Config> {
    let config = builder(data_dir)
        .build()
        .context("Invalid configuration")?;
    billsync::init_tracing_with_config(&config);
    Ok(config)
}

pub fn provider(config: &BillingConfig) -> Result<Arc<LiveStripeClient>> {
    let Some(key) = config.stripe_secret_key.clone() else {
        bail!("BILLSYNC_STRIPE_SECRET_KEY (or STRIPE_SECRET_KEY) is not set");
    };

    let client_config = LiveStripeClientConfig::new()
        .timeout_seconds(config.request_timeout_seconds)
        .max_retries(config.max_retries);
    let client = LiveStripeClient::new(key, client_config)?;

    if client.is_test_mode() {
        crate::print_info("Using a Stripe test mode key");
    }
    Ok(Arc::new(client))
}

pub async fn store(config: &BillingConfig) -> Result<Arc<FileAccountStore>> {
    let store = FileAccountStore::open(&config.data_dir)
        .await
        .with_context(|| format!("Cannot open account directory {}", config.data_dir))?;
    Ok(Arc::new(store))
}

pub type Manager = SubscriptionManager<Arc<FileAccountStore>, Arc<LiveStripeClient>>;

/// A manager for one-off operator commands.
///
/// Commands run beside the server, so account locks go through the store's
/// lock files rather than an in-process registry.
pub async fn manager(config: &BillingConfig) -> Result<Manager> {
    let provider = provider(config)?;
    let store = store(config).await?;
    let plans = Arc::new(
        Plans::from_provider(&provider)
            .await
            .context("Cannot list plans")?,
    );

    let locks = store.locks();
    Ok(SubscriptionManager::new(store, provider, locks, plans)
        .with_policy(SyncPolicy::from_hours(config.max_age_hours)))
}
