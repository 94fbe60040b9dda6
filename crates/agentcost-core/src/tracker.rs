//! Tracker - The handle hosts hold
//!
//! A [`Tracker`] owns the whole pipeline: pricing store and calculator, the
//! event batcher with its transport or local log, and the background pricing
//! refresh. It is cheap to clone; all clones share one pipeline. Call
//! [`Tracker::shutdown`] before the runtime stops to flush what is buffered.

use crate::batcher::{BatcherConfig, EventBatcher, Sink};
use crate::config::TrackerConfig;
use crate::context;
use crate::error::Result;
use crate::event::{Metadata, MetadataValue, PricedEvent, UsageRecord};
use crate::local::LocalEventLog;
use crate::stats::{StatsRegistry, StatsSnapshot};
use crate::transport::{HttpTransport, Transport};
use agentcost_pricing::{
    CostCalculator, HttpPricingSource, PricingSource, PricingStore, PricingTable, RefreshOutcome,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Counters plus current gauges
#[derive(Debug, Clone, Serialize)]
pub struct TrackerStats {
    /// Delivery counters
    #[serde(flatten)]
    pub counters: StatsSnapshot,
    /// Events accepted but not yet delivered or dropped
    pub pending_events: usize,
    /// Events held in the local log
    pub local_events: usize,
    /// Running in local mode
    pub local_mode: bool,
    /// Tracking enabled
    pub enabled: bool,
    /// Running and not yet shut down
    pub initialized: bool,
    /// Models in the pricing table
    pub pricing_models: usize,
    /// Last successful pricing refresh
    pub pricing_last_refresh: Option<DateTime<Utc>>,
}

/// Builder for [`Tracker`] with injectable transport and pricing source
pub struct TrackerBuilder {
    config: TrackerConfig,
    transport: Option<Arc<dyn Transport>>,
    pricing_source: Option<Arc<dyn PricingSource>>,
}

impl TrackerBuilder {
    /// Deliver batches through `transport` instead of HTTP
    ///
    /// No HTTP pricing source is created for an injected transport; supply
    /// one with [`TrackerBuilder::pricing_source`] if refreshes are wanted.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Fetch remote pricing from `source`
    #[must_use]
    pub fn pricing_source(mut self, source: Arc<dyn PricingSource>) -> Self {
        self.pricing_source = Some(source);
        self
    }

    /// Validate the configuration and start the pipeline
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Result<Tracker> {
        let TrackerBuilder {
            config,
            transport,
            pricing_source,
        } = self;
        config.validate()?;

        let http = transport.is_none() && !config.is_local();

        let mut store = PricingStore::builder()
            .overrides(config.custom_pricing.clone())
            .default_rates(config.default_rates)
            .ttl(config.pricing_ttl())
            .verbose(config.debug);
        if let Some(source) = pricing_source {
            store = store.source(source);
        } else if http {
            let mut source = HttpPricingSource::new(&config.base_url)?
                .with_timeout(config.request_timeout());
            if let Some(ref key) = config.api_key {
                source = source.with_api_key(key.clone());
            }
            store = store.source(Arc::new(source));
        }
        let store = Arc::new(store.build());

        let sink = match transport {
            Some(transport) => Sink::Remote(transport),
            None if config.is_local() => {
                Sink::Local(Arc::new(LocalEventLog::new(config.max_local_events)))
            }
            None => {
                let transport = HttpTransport::new(
                    &config.base_url,
                    config.api_key.as_deref().unwrap_or_default(),
                    config.project_id.clone().unwrap_or_default(),
                    config.request_timeout(),
                )?
                .with_max_requests_per_second(config.max_requests_per_second);
                Sink::Remote(Arc::new(transport))
            }
        };

        let stats = Arc::new(StatsRegistry::new());
        let batcher = EventBatcher::start(BatcherConfig::from(&config), sink, stats.clone())?;

        let cancel = CancellationToken::new();
        let pricing_task = store.has_source().then(|| {
            tokio::spawn(pricing_loop(
                store.clone(),
                cancel.clone(),
                config.flush_interval(),
            ))
        });

        let mode = if config.is_local() { "local" } else { "cloud" };
        if config.debug {
            info!(mode, batch_size = config.batch_size, enabled = config.enabled, "AgentCost tracker initialized");
        } else {
            debug!(mode, batch_size = config.batch_size, enabled = config.enabled, "AgentCost tracker initialized");
        }

        Ok(Tracker {
            inner: Arc::new(Inner {
                default_agent: RwLock::new(config.default_agent_name.clone()),
                global_metadata: RwLock::new(config.global_metadata.clone()),
                calculator: CostCalculator::new(store),
                config,
                batcher,
                stats,
                cancel,
                pricing_task: Mutex::new(pricing_task),
            }),
        })
    }
}

struct Inner {
    config: TrackerConfig,
    calculator: CostCalculator,
    batcher: EventBatcher,
    stats: Arc<StatsRegistry>,
    default_agent: RwLock<String>,
    global_metadata: RwLock<Metadata>,
    cancel: CancellationToken,
    pricing_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Usage tracker handle
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("config", &self.inner.config)
            .field("batcher", &self.inner.batcher)
            .finish()
    }
}

impl Tracker {
    /// Start a tracker from configuration
    pub fn init(config: TrackerConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Start a tracker that delivers through `transport`
    pub fn with_transport(config: TrackerConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::builder(config).transport(transport).build()
    }

    /// Builder for injecting a transport or pricing source
    #[must_use]
    pub fn builder(config: TrackerConfig) -> TrackerBuilder {
        TrackerBuilder {
            config,
            transport: None,
            pricing_source: None,
        }
    }

    /// Price a record, tag it and hand it to the batcher
    ///
    /// Returns immediately. Fails only with backpressure or after shutdown;
    /// a disabled tracker accepts and discards.
    pub fn track(&self, record: UsageRecord) -> Result<()> {
        let inner = &self.inner;
        if !inner.config.enabled {
            return Ok(());
        }

        let agent = {
            let default = inner.default_agent.read();
            context::resolve_agent(record.agent_name(), &default)
        };
        let metadata = {
            let global = inner.global_metadata.read();
            context::resolve_metadata(&global, record.metadata())
        };

        let cost = inner
            .calculator
            .compute(record.model(), record.input_tokens(), record.output_tokens());
        inner.stats.record_pricing(!cost.is_estimate());

        inner
            .batcher
            .enqueue(PricedEvent::from_record(record, agent, metadata, cost.total))
    }

    /// Deliver everything buffered now
    pub async fn flush(&self) {
        self.inner.batcher.flush().await;
    }

    /// Stop background work and flush, bounded by the shutdown timeout.
    /// Later `track` calls fail with `ShutDown` (local mode keeps storing).
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let task = self.inner.pricing_task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        self.inner.batcher.shutdown().await;
    }

    /// Counters and gauges
    #[must_use]
    pub fn get_stats(&self) -> TrackerStats {
        let inner = &self.inner;
        let store = inner.calculator.store();
        TrackerStats {
            counters: inner.stats.snapshot(),
            pending_events: inner.batcher.pending(),
            local_events: inner.batcher.local_log().map_or(0, |log| log.len()),
            local_mode: inner.config.is_local(),
            enabled: inner.config.enabled,
            initialized: !inner.batcher.is_closed(),
            pricing_models: store.model_count(),
            pricing_last_refresh: store.last_refresh(),
        }
    }

    /// Raw counters
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Events stored in local mode, oldest first (empty in cloud mode)
    #[must_use]
    pub fn get_local_events(&self) -> Vec<PricedEvent> {
        self.inner
            .batcher
            .local_log()
            .map(|log| log.snapshot())
            .unwrap_or_default()
    }

    /// Empty the local log, returning how many events were removed
    pub fn clear_local_events(&self) -> usize {
        self.inner.batcher.local_log().map_or(0, |log| log.clear())
    }

    /// Fetch remote pricing now
    pub async fn refresh_pricing(&self) -> RefreshOutcome {
        self.inner.calculator.store().refresh().await
    }

    /// Merge rates into the pricing table
    pub fn update_pricing(&self, table: &PricingTable) {
        self.inner.calculator.store().update(table);
    }

    /// Cost of a call at current rates, without tracking it
    #[must_use]
    pub fn cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self.inner
            .calculator
            .compute(model, input_tokens, output_tokens)
            .total
    }

    /// Cost calculator over the tracker's pricing
    #[must_use]
    pub fn calculator(&self) -> &CostCalculator {
        &self.inner.calculator
    }

    /// Replace the fallback agent name
    pub fn set_agent_name(&self, name: impl Into<String>) {
        *self.inner.default_agent.write() = name.into();
    }

    /// Current fallback agent name
    #[must_use]
    pub fn agent_name(&self) -> String {
        self.inner.default_agent.read().clone()
    }

    /// Add a metadata entry attached to every subsequent event
    pub fn add_metadata(&self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.inner
            .global_metadata
            .write()
            .insert(key.into(), value.into());
    }

    /// Remove all global metadata
    pub fn clear_metadata(&self) {
        self.inner.global_metadata.write().clear();
    }

    /// Whether `track` currently records events
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.config.enabled && !self.inner.batcher.is_closed()
    }

    /// Configuration the tracker was started with
    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }
}

/// Re-check pricing staleness once per period; the first tick fires at once
async fn pricing_loop(store: Arc<PricingStore>, cancel: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let outcome = store.refresh_if_stale().await;
                debug!(?outcome, "Pricing staleness check");
            }
        }
    }
}
