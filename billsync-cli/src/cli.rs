//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "billsync")]
#[command(version)]
#[command(about = "Keep local accounts in step with Stripe", long_about = None)]
pub struct Cli {
    /// Directory holding one JSON document per account
    #[arg(long, global = true, env = "BILLSYNC_DATA_DIR")]
    pub data_dir: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the account and webhook routes
    Serve(ServeArgs),

    /// Reconcile every Stripe customer against local accounts
    SyncCustomers(SyncArgs),

    /// Print an account and its derived subscription status
    ShowAccount(ShowAccountArgs),

    /// Apply a coupon to one account, or to every account
    ApplyPromo(ApplyPromoArgs),

    /// List the plans available on the Stripe account
    Plans,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind (overrides BILLSYNC_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind (overrides BILLSYNC_PORT)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Request header carrying the email of the signed-in user, set by a
    /// trusted proxy in front of this server
    #[arg(long, default_value = "x-authenticated-email")]
    pub email_header: String,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Give up after this many failed listing attempts
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Customers fetched per page (1-100)
    #[arg(long, default_value = "100")]
    pub page_size: u64,

    /// Print the report as JSON
    #[arg(long, default_value = "false")]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ShowAccountArgs {
    /// Account email
    pub email: String,

    /// Refetch the customer from Stripe even if the snapshot is fresh
    #[arg(long, default_value = "false")]
    pub refresh: bool,
}

#[derive(Args, Debug)]
pub struct ApplyPromoArgs {
    /// Coupon code
    pub code: String,

    /// Only this account; every stored account when omitted
    #[arg(long)]
    pub email: Option<String>,
}
