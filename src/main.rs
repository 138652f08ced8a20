//! glasswave command-line player.

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use glasswave::cli;

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive("glasswave=info".parse()?))
        .init();

    cli::run_command(&args)
}
