//! CLI command: `agentcost pricing`
//!
//! Shows the effective pricing table, refreshes it from the backend,
//! publishes rates (admin) and prices a hypothetical call.

use super::cloud_credentials;
use agentcost_pricing::{
    CostCalculator, HttpPricingSource, ModelRates, PricingSource, PricingStore, PricingTable,
    RefreshOutcome, Resolution,
};
use agentcost_core::TrackerConfig;
use anyhow::{bail, Context, Result};
use clap::Subcommand;
use std::sync::Arc;

#[derive(Subcommand, Debug)]
pub enum PricingCommand {
    /// Print the pricing table (built-in defaults plus custom rates)
    Show {
        /// Only models whose id contains this text
        #[arg(long)]
        filter: Option<String>,
        /// Fetch remote pricing first
        #[arg(long)]
        remote: bool,
        /// JSON output for scripting
        #[arg(long)]
        json: bool,
    },
    /// Fetch remote pricing and report what changed
    Refresh {
        /// Fetch a single model
        #[arg(long)]
        model: Option<String>,
    },
    /// Publish rates for a model to the backend (admin)
    Set {
        /// Model id
        model: String,
        /// USD per 1K input tokens
        input: f64,
        /// USD per 1K output tokens
        output: f64,
    },
    /// Price a call without tracking it
    Cost {
        /// Model id
        model: String,
        /// Input tokens
        input_tokens: u64,
        /// Output tokens
        output_tokens: u64,
        /// Price a conversation of this many turns
        #[arg(long)]
        turns: Option<u32>,
    },
}

/// Run the pricing subcommand.
pub async fn run(cmd: PricingCommand, config: TrackerConfig) -> Result<()> {
    match cmd {
        PricingCommand::Show {
            filter,
            remote,
            json,
        } => {
            let store = build_store(&config, remote)?;
            if remote {
                report(&store.refresh().await)?;
            }
            show(&store, filter.as_deref(), json)
        }
        PricingCommand::Refresh { model } => {
            let store = build_store(&config, true)?;
            let outcome = match model {
                Some(ref model) => store.refresh_model(model).await,
                None => store.refresh().await,
            };
            report(&outcome)?;
            println!("  {} models in table", store.model_count());
            Ok(())
        }
        PricingCommand::Set {
            model,
            input,
            output,
        } => {
            let rates = ModelRates::new(input, output);
            if !rates.is_valid() {
                bail!("Rates must be finite and non-negative");
            }
            let (api_key, _) = cloud_credentials(&config)?;
            let source = http_source(&config)?.with_api_key(api_key);
            source
                .publish(&PricingTable::new().with(model.clone(), rates))
                .await
                .context("Failed to publish pricing")?;
            println!("  Published {model}: ${input}/1K input, ${output}/1K output");
            Ok(())
        }
        PricingCommand::Cost {
            model,
            input_tokens,
            output_tokens,
            turns,
        } => {
            let calculator = CostCalculator::new(Arc::new(build_store(&config, false)?));
            let cost = calculator.compute(&model, input_tokens, output_tokens);
            let breakdown = calculator.breakdown(&model, input_tokens, output_tokens);

            println!();
            println!("  {model}");
            println!("  {}", "-".repeat(48));
            println!(
                "  Input   {:>10} tokens  ${:>12.8}  (${}/1K)",
                input_tokens, breakdown.input_cost, breakdown.input_price_per_1k
            );
            println!(
                "  Output  {:>10} tokens  ${:>12.8}  (${}/1K)",
                output_tokens, breakdown.output_cost, breakdown.output_price_per_1k
            );
            println!("  Total                     ${:>12.8}", cost.total);
            if let Some(turns) = turns {
                let estimate =
                    calculator.estimate_conversation(&model, input_tokens, output_tokens, turns);
                println!("  x {turns} turns               ${estimate:>12.6}");
            }
            match cost.resolution {
                Resolution::Default => {
                    println!("  (unknown model: default rates applied)");
                }
                Resolution::Fuzzy(ref key) => println!("  (matched pricing for '{key}')"),
                Resolution::Custom | Resolution::Exact => {}
            }
            println!();
            Ok(())
        }
    }
}

fn http_source(config: &TrackerConfig) -> Result<HttpPricingSource> {
    Ok(HttpPricingSource::new(&config.base_url)
        .context("Invalid base_url")?
        .with_timeout(config.request_timeout()))
}

fn build_store(config: &TrackerConfig, remote: bool) -> Result<PricingStore> {
    let mut builder = PricingStore::builder()
        .overrides(config.custom_pricing.clone())
        .default_rates(config.default_rates)
        .verbose(config.debug);
    if remote {
        builder = builder.source(Arc::new(http_source(config)?));
    }
    Ok(builder.build())
}

fn report(outcome: &RefreshOutcome) -> Result<()> {
    match outcome {
        RefreshOutcome::Updated { models } => {
            println!("  Fetched pricing for {models} models");
            Ok(())
        }
        RefreshOutcome::Failed(reason) => bail!("Pricing refresh failed: {reason}"),
        other => {
            println!("  Pricing not refreshed: {other:?}");
            Ok(())
        }
    }
}

fn show(store: &PricingStore, filter: Option<&str>, json: bool) -> Result<()> {
    let table = store.snapshot();
    let filter = filter.map(str::to_lowercase);
    let mut rows: Vec<(String, ModelRates, bool)> = table
        .iter()
        .map(|(model, rates)| (model.clone(), *rates, false))
        .chain(
            store
                .overrides()
                .iter()
                .map(|(model, rates)| (model.clone(), *rates, true)),
        )
        .filter(|(model, _, _)| {
            filter
                .as_deref()
                .map_or(true, |f| model.to_lowercase().contains(f))
        })
        .collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0).then(a.2.cmp(&b.2)));

    if json {
        let entries: Vec<serde_json::Value> = rows
            .iter()
            .map(|(model, rates, custom)| {
                serde_json::json!({
                    "model": model,
                    "input": rates.input,
                    "output": rates.output,
                    "custom": custom,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).context("Failed to serialize pricing")?
        );
        return Ok(());
    }

    println!();
    println!("  {:<36} {:>12} {:>12}", "Model", "Input/1K", "Output/1K");
    println!("  {}", "-".repeat(62));
    if rows.is_empty() {
        println!("  (no matching models)");
    }
    for (model, rates, custom) in &rows {
        let marker = if *custom { " *" } else { "" };
        println!(
            "  {:<36} {:>12.6} {:>12.6}{}",
            model, rates.input, rates.output, marker
        );
    }
    if rows.iter().any(|(_, _, custom)| *custom) {
        println!("  * custom rate (takes precedence)");
    }
    println!();
    Ok(())
}
