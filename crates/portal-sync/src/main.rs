#![warn(missing_docs)]

//! Portal sync daemon and operator CLI

use clap::Parser;
use portal_sync::cli::Cli;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    tracing::info!("Portal sync starting...");

    Cli::parse().run().await
}
