//! Sync command - reconcile every Stripe customer with the local store.

use anyhow::{Context, Result};
use billsync::billing::CustomerReconciler;
use colored::Colorize;

use crate::cli::SyncArgs;
use crate::context;
use crate::{print_info, print_success, print_warning};

pub async fn run(args: SyncArgs, data_dir: Option<String>) -> Result<()> {
    let config = context::load(data_dir)?;
    let provider = context::provider(&config.billing)?;
    let store = context::store(&config.billing).await?;

    let max_attempts = args.max_attempts.unwrap_or(config.billing.sync_max_attempts);
    print_info(&format!(
        "Reconciling customers into {} (up to {} attempts)",
        config.billing.data_dir, max_attempts
    ));

    let locks = store.locks();
    let report = CustomerReconciler::new(store, provider, locks)
        .with_max_attempts(max_attempts)
        .with_page_size(args.page_size)
        .run()
        .await
        .context("Customer sync aborted")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("\n{}\n", "Sync report".cyan().bold());
    println!("  processed   {}", report.processed);
    println!("  updated     {}", report.updated);
    println!("  deleted     {}", report.deleted);
    println!("  skipped     {}", report.skipped);
    println!("  attempts    {}", report.attempts);
    println!();

    for id in &report.flagged {
        print_warning(&format!(
            "{} has a payment source but no matching account; review it in Stripe",
            id
        ));
    }
    if report.skipped > 0 {
        print_warning(&format!(
            "{} customers were skipped; see the log for details",
            report.skipped
        ));
    }
    print_success("Sync complete");
    Ok(())
}
