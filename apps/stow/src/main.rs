//! # stow
//!
//! Command-line and HTTP front end for the stow record store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               apps/stow (THE BINARY)         │
//! │                                              │
//! │  ┌─────────────┐        ┌─────────────┐      │
//! │  │    CLI      │        │  HTTP API   │      │
//! │  │   (clap)    │        │   (axum)    │      │
//! │  └──────┬──────┘        └──────┬──────┘      │
//! │         └───────────┬──────────┘             │
//! │                     ▼                        │
//! │             ┌───────────────┐                │
//! │             │   stow-core   │                │
//! │             └───────────────┘                │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! stow --schema stow.toml import -t User -f users.json
//! stow --schema stow.toml get -t User -k 1
//! stow --schema stow.toml server --port 8080
//! ```

use clap::Parser;
use stow::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // STOW_LOG_FORMAT=json switches to machine-parseable output.
    let log_format = std::env::var("STOW_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_env("STOW_LOG")
        .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| "stow=info,stow_core=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if cli.verbose && !cli.quiet {
        eprintln!("stow v{}", env!("CARGO_PKG_VERSION"));
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
