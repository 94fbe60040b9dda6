//! AgentCost - LLM usage and cost tracking
//!
//! CLI entry point for inspecting pricing, replaying usage logs and checking
//! backend connectivity.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = cli::Cli::parse();

    let default_filter = if cli.debug {
        "agentcost=debug,agentcost_core=debug,agentcost_pricing=debug"
    } else {
        "agentcost=info,agentcost_core=info,agentcost_pricing=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    debug!("AgentCost CLI v{}", env!("CARGO_PKG_VERSION"));

    cli::run(cli).await
}
