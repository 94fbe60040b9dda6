//! Configuration loading
//!
//! Handles loading configuration from embedded defaults, files, and environment.

use agentcost_core::TrackerConfig;
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use std::path::Path;

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Load configuration from files and environment
pub fn load_config(path: Option<&Path>) -> Result<TrackerConfig> {
    let mut builder = Config::builder()
        // 1. Embedded defaults (always available)
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        // 2. Local overrides (optional)
        .add_source(File::with_name("config/local").required(false));

    // 3. Explicit file from --config
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }

    let config = builder
        // 4. Environment variables (highest priority), e.g. AGENTCOST_API_KEY
        .add_source(
            Environment::with_prefix("AGENTCOST")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}
