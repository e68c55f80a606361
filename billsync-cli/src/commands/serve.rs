//! Serve command - run the account and webhook routes.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::HeaderName;
use billsync::billing::{AccountCreation, Plans};
use billsync::http::{self, AppState, email_from_header};

use crate::cli::ServeArgs;
use crate::context;
use crate::{print_info, print_success, print_warning};

pub async fn run(args: ServeArgs, data_dir: Option<String>) -> Result<()> {
    let mut builder = context::builder(data_dir);
    if let Some(host) = args.host {
        builder = builder.with_host(host);
    }
    if let Some(port) = args.port {
        builder = builder.with_port(port);
    }
    let config = builder.build().context("Invalid configuration")?;
    billsync::init_tracing_with_config(&config);

    let email_header = HeaderName::try_from(args.email_header.as_str())
        .with_context(|| format!("Invalid header name: {}", args.email_header))?;

    let provider = context::provider(&config.billing)?;
    let store = context::store(&config.billing).await?;
    let plans = Plans::from_provider(&provider)
        .await
        .context("Cannot list plans")?;
    if plans.is_empty() {
        print_warning("No active plans on the Stripe account; subscribe requests will fail");
    }

    // Shares lock files with sync-customers, apply-promo and show-account.
    let locks = store.locks();
    let state = AppState::with_locks(store, provider, Arc::new(plans), &config.billing, locks);
    if config.billing.webhook_secret.is_none() {
        print_warning("No webhook secret configured; webhook signatures are not checked");
    }
    match state.account_creation() {
        AccountCreation::ExistingOnly => print_info("Webhooks only update existing accounts"),
        AccountCreation::CreateMissing => {
            print_info("Webhooks create accounts for unknown emails")
        }
    }

    let app = http::app(state, &config.server).layer(axum::middleware::from_fn_with_state(
        email_header,
        email_from_header,
    ));

    print_success(&format!(
        "Listening on http://{}:{}",
        config.server.host, config.server.port
    ));
    http::serve(app, &config.server).await?;
    Ok(())
}
