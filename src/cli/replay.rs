//! CLI command: `agentcost replay`
//!
//! Reads usage records as JSON Lines and tracks each one, then flushes and
//! prints the resulting stats. Useful for backfilling logs captured offline
//! and for dry runs in local mode.

use agentcost_core::{Tracker, TrackerConfig, UsageRecord};
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::warn;

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// JSON Lines file of usage records ("-" or omitted for stdin)
    pub file: Option<PathBuf>,

    /// Keep events in memory instead of sending them
    #[arg(long)]
    pub local: bool,

    /// Print the priced events (local mode only)
    #[arg(long)]
    pub print_events: bool,

    /// Agent name for records that do not carry one
    #[arg(long)]
    pub agent: Option<String>,
}

/// Run the replay subcommand.
pub async fn run(args: ReplayArgs, mut config: TrackerConfig) -> Result<()> {
    config.local_mode |= args.local;
    if let Some(agent) = args.agent {
        config.default_agent_name = agent;
    }

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match args.file {
        Some(ref path) if path.as_os_str() != "-" => Box::new(BufReader::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?,
        )),
        _ => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let tracker = Tracker::init(config).context("Failed to start tracker")?;

    let skipped = track_lines(reader, &tracker).await?;

    tracker.shutdown().await;

    if args.print_events {
        for event in tracker.get_local_events() {
            println!(
                "{}",
                serde_json::to_string(&event).context("Failed to serialize event")?
            );
        }
    }

    let stats = tracker.get_stats();
    eprintln!(
        "{}",
        serde_json::to_string_pretty(&stats).context("Failed to serialize stats")?
    );
    if skipped > 0 {
        eprintln!("Skipped {skipped} records");
    }

    Ok(())
}

/// Track every well-formed record read from `reader`. Returns how many
/// lines were skipped.
async fn track_lines<R: AsyncBufRead + Unpin>(reader: R, tracker: &Tracker) -> Result<usize> {
    let mut skipped = 0usize;
    let mut lines = reader.lines();
    let mut index = 0usize;
    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        index += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record: UsageRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) => {
                warn!(line = index, error = %e, "Skipping malformed record");
                skipped += 1;
                continue;
            }
        };

        if let Err(e) = tracker.track(record) {
            // backpressure: let the batcher catch up, then try once more
            tracker.flush().await;
            warn!(line = index, error = %e, "Queue full, flushed before continuing");
            skipped += usize::from(tracker.track(serde_json::from_str(line)?).is_err());
        }
    }

    Ok(skipped)
}
