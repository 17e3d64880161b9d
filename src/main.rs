//! # Batch Relayer
//!
//! Distributes large batches of token payments across many ephemeral
//! relayer wallets submitting in parallel, then reconciles and recovers
//! funds afterwards.

use batch_relayer::cli::Args;
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    Args::parse().run().await
}
