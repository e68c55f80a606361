//! Show command - print one account.

use anyhow::{Result, bail};
use billsync::billing::{AccountStore, project_account};
use chrono::Utc;
use colored::Colorize;

use crate::cli::ShowAccountArgs;
use crate::context;
use crate::print_warning;

pub async fn run(args: ShowAccountArgs, data_dir: Option<String>) -> Result<()> {
    let config = context::load(data_dir)?;
    let manager = context::manager(&config.billing).await?;

    if manager.store().get(&args.email).await?.is_none() {
        bail!("No account for {}", args.email);
    }

    let account = if args.refresh {
        let _guard = manager.locks().lock(&args.email).await?;
        let mut account = match manager.store().get(&args.email).await? {
            Some(account) => account,
            None => bail!("No account for {}", args.email),
        };
        let now = Utc::now();
        if manager
            .policy()
            .refresh(manager.provider(), &mut account, now, true)
            .await?
        {
            manager.store().put(&account).await?;
        }
        account
    } else {
        manager.account(&args.email, false).await?
    };

    let view = project_account(&account, manager.plans(), Utc::now());

    println!("\n{}\n", account.email.cyan().bold());
    println!("  status      {}", view.status.to_string().bold());
    if view.trial_end > 0 {
        println!("  trial end   {}", view.trial_end);
    }
    if let Some(days) = view.trial_days_left {
        println!("  trial days  {}", days);
    }
    if let Some(plan) = &view.plan {
        println!(
            "  plan        {} {}",
            plan.id,
            plan.name.as_deref().unwrap_or_default().dimmed()
        );
    }
    println!("  customer    {}", account.customer_id().unwrap_or("-"));
    println!("  card        {}", if view.has_payment_source { "yes" } else { "no" });
    if let Some(vat) = &view.vat {
        println!("  vat         {}", vat);
    }
    if let Some(promo) = &view.promo {
        println!("  promo       {} ({})", promo.coupon, promo.title);
    }
    if let Some(refreshed) = account.customer_refreshed() {
        println!("  refreshed   {}", refreshed.to_rfc3339());
    }
    println!();

    if !view.status.has_access() {
        print_warning("This account has no paid access");
    }
    Ok(())
}
