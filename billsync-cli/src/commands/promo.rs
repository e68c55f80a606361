//! Promo command - apply a coupon to one or every account.

use anyhow::{Context, Result};

use crate::cli::ApplyPromoArgs;
use crate::context;
use crate::{print_info, print_success, print_warning};

pub async fn run(args: ApplyPromoArgs, data_dir: Option<String>) -> Result<()> {
    let config = context::load(data_dir)?;
    let manager = context::manager(&config.billing).await?;

    match args.email {
        Some(email) => {
            manager
                .apply_promo(&email, &args.code)
                .await
                .with_context(|| format!("Cannot apply {} to {}", args.code, email))?;
            print_success(&format!("Applied {} to {}", args.code, email));
        }
        None => {
            print_info(&format!("Applying {} to every account", args.code));
            let report = manager.apply_promo_to_all(&args.code).await?;
            if report.failed > 0 {
                print_warning(&format!(
                    "{} accounts failed; see the log for details",
                    report.failed
                ));
            }
            print_success(&format!("Applied {} to {} accounts", args.code, report.applied));
        }
    }
    Ok(())
}
