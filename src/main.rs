//! mm-forge CLI entry point.
//!
//! Initializes logging and delegates to the CLI module for command handling.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = mm_forge::cli::parse_cli();

    // Priority: RUST_LOG env var > --debug > --log-level
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.debug {
            "debug".to_string()
        } else {
            cli.log_level.clone()
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    mm_forge::cli::run_with_cli(cli).await
}
