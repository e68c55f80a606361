//! Plans command - list the plan catalogue.

use anyhow::{Context, Result};
use billsync::billing::{Plans, view::format_currency};
use colored::Colorize;

use crate::context;
use crate::print_warning;

pub async fn run() -> Result<()> {
    let config = context::load(None)?;
    let provider = context::provider(&config.billing)?;
    let plans = Plans::from_provider(&provider)
        .await
        .context("Cannot list plans")?;

    if plans.is_empty() {
        print_warning("No active plans");
        return Ok(());
    }

    println!("\n{}\n", "Plans".cyan().bold());
    for plan in plans.iter() {
        let price = plan
            .amount
            .map(|amount| format_currency(amount, plan.currency.as_deref()))
            .unwrap_or_else(|| "-".to_string());
        let interval = plan.interval.as_deref().unwrap_or("-");
        let default = if plans.default_plan() == Some(plan.id.as_str()) {
            " (default)".dimmed().to_string()
        } else {
            String::new()
        };
        println!(
            "  {:<24} {:>12} / {:<6} {}{}",
            plan.id,
            price,
            interval,
            plan.nickname.as_deref().unwrap_or_default(),
            default
        );
    }
    println!();
    Ok(())
}
