//! Photon - unified CLI entrypoint.
//!
//! Usage:
//!   photon subscribe --topic greeting
//!   photon publish --topic greeting --message "Hello MQTT!"

use anyhow::Result;
use clap::Parser;
use photon::cli::commands::{run_publish, run_subscribe};
use photon::cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Subscribe(args) => run_subscribe(args),
        Commands::Publish(args) => run_publish(args),
    }
}

/// Plain-text logging to stderr, filtered by RUST_LOG (default: info).
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
