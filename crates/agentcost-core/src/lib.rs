//! AgentCost Core - Usage Tracking Pipeline
//!
//! This crate provides the runtime side of AgentCost:
//! - Tracker: The handle hosts hold; prices, tags and enqueues usage records
//! - Batcher: Size- and time-triggered batching with background delivery
//! - Transport: HTTP delivery with transient/permanent failure classification
//! - Local: Bounded in-memory event log for offline use
//! - Context: Thread- and task-scoped agent names and metadata
//! - Instrument: Wrapping host calls and timing them by hand
//! - Stats: Process-lifetime delivery counters
//! - Utils: Retry with backoff and a send throttle
//!
//! ```ignore
//! let tracker = Tracker::init(TrackerConfig::cloud(api_key, project_id))?;
//! tracker.track(UsageRecord::new("gpt-4o", 1200, 350).with_latency_ms(840))?;
//! tracker.shutdown().await;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod batcher;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod instrument;
pub mod local;
pub mod stats;
pub mod tracker;
pub mod transport;
pub mod utils;

pub use batcher::{BatcherConfig, BatcherState, EventBatcher, Sink};
pub use config::TrackerConfig;
pub use context::{agent_scope, metadata_scope, with_agent, with_metadata, AgentScope, MetadataScope};
pub use error::{Error, Result, SendError};
pub use event::{hash_input, Batch, Metadata, MetadataValue, PricedEvent, UsageRecord};
pub use instrument::{CallGuard, UsageReport};
pub use local::LocalEventLog;
pub use stats::{StatsRegistry, StatsSnapshot};
pub use tracker::{Tracker, TrackerBuilder, TrackerStats};
pub use transport::{HttpTransport, Transport, SDK_VERSION};

pub use agentcost_pricing as pricing;
pub use agentcost_pricing::{ModelRates, PricingTable, RefreshOutcome};
