//! Billsync CLI - operate a billsync deployment.
//!
//! Usage:
//!   billsync serve --port 8000
//!   billsync sync-customers
//!   billsync show-account a@example.com
//!   billsync apply-promo SPRING --email a@example.com
//!   billsync plans

mod cli;
mod commands;
mod context;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use colored::Colorize;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve(args) => commands::serve::run(args, cli.data_dir).await,
        Commands::SyncCustomers(args) => commands::sync::run(args, cli.data_dir).await,
        Commands::ShowAccount(args) => commands::show::run(args, cli.data_dir).await,
        Commands::ApplyPromo(args) => commands::promo::run(args, cli.data_dir).await,
        Commands::Plans => commands::plans::run().await,
    };

    if let Err(e) = &result {
        print_error(&format!("{:#}", e));
    }
    result
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "→".blue(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "!".yellow().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}
