//! CLI module for AgentCost
//!
//! Provides commands:
//! - `pricing`: Show, refresh, publish and apply model pricing
//! - `replay`: Track usage records from a JSON Lines file
//! - `doctor`: Configuration and connectivity checks

use crate::config::load_config;
use agentcost_core::TrackerConfig;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod doctor;
pub mod pricing;
pub mod replay;

/// AgentCost CLI
#[derive(Parser, Debug)]
#[command(name = "agentcost")]
#[command(about = "LLM usage and cost tracking")]
#[command(version)]
pub struct Cli {
    /// Extra configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging and debug-mode tracker
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Model pricing
    #[command(subcommand)]
    Pricing(pricing::PricingCommand),
    /// Track usage records from a JSON Lines file (or stdin)
    Replay(replay::ReplayArgs),
    /// Check configuration and backend connectivity
    Doctor,
}

/// Run the CLI command
pub async fn run(cli: Cli) -> Result<()> {
    let Some(command) = cli.command else {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        cmd.print_help()?;
        println!();
        return Ok(());
    };

    let mut config =
        load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    config.debug |= cli.debug;

    match command {
        Commands::Pricing(cmd) => pricing::run(cmd, config).await,
        Commands::Replay(args) => replay::run(args, config).await,
        Commands::Doctor => doctor::run(config).await,
    }
}

/// API key and project id, or an error naming what is missing
pub(crate) fn cloud_credentials(config: &TrackerConfig) -> Result<(&str, &str)> {
    let api_key = config
        .api_key
        .as_deref()
        .filter(|k| !k.is_empty())
        .context("api_key is not set (AGENTCOST_API_KEY)")?;
    let project_id = config
        .project_id
        .as_deref()
        .filter(|p| !p.is_empty())
        .context("project_id is not set (AGENTCOST_PROJECT_ID)")?;
    Ok((api_key, project_id))
}
