//! CLI command: `agentcost doctor`
//!
//! Validates the configuration and checks that the backend is reachable,
//! the credentials are accepted and pricing can be fetched.

use super::cloud_credentials;
use agentcost_core::config::mask_key;
use agentcost_core::{HttpTransport, Transport, TrackerConfig};
use agentcost_pricing::{HttpPricingSource, PricingSource};

pub async fn run(config: TrackerConfig) -> anyhow::Result<()> {
    println!("AgentCost Doctor\n");

    let mut all_ok = check_config(&config);

    if config.is_local() {
        println!("Mode... local (network checks skipped)");
    } else if all_ok {
        all_ok &= check_backend(&config).await;
        all_ok &= check_pricing(&config).await;
    }

    println!();
    if all_ok {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Please fix the issues above.");
        std::process::exit(1);
    }

    Ok(())
}

fn check_config(config: &TrackerConfig) -> bool {
    print!("Checking configuration... ");

    match config.validate() {
        Ok(()) => {
            println!("ok");
            if let Some(ref key) = config.api_key {
                println!("  api_key     {}", mask_key(key));
            }
            if let Some(ref project) = config.project_id {
                println!("  project_id  {project}");
            }
            println!("  base_url    {}", config.base_url);
            println!(
                "  batching    {} events / {}s",
                config.batch_size, config.flush_interval_secs
            );
            true
        }
        Err(e) => {
            println!("failed");
            println!("  {e}");
            false
        }
    }
}

async fn check_backend(config: &TrackerConfig) -> bool {
    print!("Checking backend health... ");

    let Ok((api_key, project_id)) = cloud_credentials(config) else {
        println!("skipped (missing credentials)");
        return false;
    };
    let transport = match HttpTransport::new(
        &config.base_url,
        api_key,
        project_id,
        config.request_timeout(),
    ) {
        Ok(transport) => transport,
        Err(e) => {
            println!("failed: {e}");
            return false;
        }
    };

    if !transport.health_check().await {
        println!("unreachable ({})", config.base_url);
        return false;
    }
    println!("ok");

    print!("Checking project access... ");
    match transport.project_info().await {
        Ok(info) => {
            let name = info
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or(project_id);
            println!("ok ({name})");
            true
        }
        Err(e) => {
            println!("failed: {e}");
            false
        }
    }
}

async fn check_pricing(config: &TrackerConfig) -> bool {
    print!("Checking pricing endpoint... ");

    let source = match HttpPricingSource::new(&config.base_url) {
        Ok(source) => source.with_timeout(config.request_timeout()),
        Err(e) => {
            println!("failed: {e}");
            return false;
        }
    };

    match source.fetch_all().await {
        Ok(payload) => {
            println!("ok ({} models)", payload.pricing.len());
            if payload.discarded > 0 {
                println!("  {} entries discarded (invalid rates)", payload.discarded);
            }
            true
        }
        Err(e) => {
            println!("unavailable: {e}");
            println!("  Built-in pricing will be used");
            true
        }
    }
}
