//! xvdkit binary entry point.
//!
//! Parses arguments, initializes logging, validates configuration and runs
//! the selected subcommand. For library usage, see the xvdkit-cli crate.

use anyhow::Result;
use xvdkit_cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    cli.validate()?;
    xvdkit_cli::run(&cli).await?;

    Ok(())
}
