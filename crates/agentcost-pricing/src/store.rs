//! Pricing Store - Atomically swapped pricing cache
//!
//! Readers load the current table through an [`ArcSwap`] and never block.
//! Writers build a new table and swap it in, so a reader sees either the old
//! or the new table, never a mix. Remote refreshes are coalesced: while one
//! fetch is running, other callers return [`RefreshOutcome::InFlight`] and
//! keep using the table they have.

use crate::error::Result;
use crate::source::{PricingPayload, PricingSource};
use crate::table::{default_pricing, ModelRates, PricingTable, RateLookup, Resolution};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Minimum wait after a failed fetch before a stale check tries again
const DEFAULT_RETRY_COOLDOWN_SECS: u64 = 300;

/// Result of a refresh attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Remote pricing merged
    Updated {
        /// Number of entries merged
        models: usize,
    },
    /// Another refresh is running; current table kept
    InFlight,
    /// Table is within its TTL
    Fresh,
    /// Last attempt failed recently; waiting before trying again
    CoolingDown,
    /// No remote source configured
    NoSource,
    /// Fetch failed; current table kept
    Failed(String),
}

impl RefreshOutcome {
    /// Whether new pricing was merged
    #[must_use]
    pub fn is_updated(&self) -> bool {
        matches!(self, Self::Updated { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct Stamp {
    at: Instant,
    wall: DateTime<Utc>,
}

impl Stamp {
    fn now() -> Self {
        Self {
            at: Instant::now(),
            wall: Utc::now(),
        }
    }
}

/// Builder for [`PricingStore`]
pub struct PricingStoreBuilder {
    seed: PricingTable,
    overrides: PricingTable,
    default_rates: ModelRates,
    source: Option<Arc<dyn PricingSource>>,
    ttl: Duration,
    retry_cooldown: Duration,
    verbose: bool,
}

impl Default for PricingStoreBuilder {
    fn default() -> Self {
        Self {
            seed: default_pricing(),
            overrides: PricingTable::new(),
            default_rates: ModelRates::ZERO,
            source: None,
            ttl: Duration::from_secs(crate::DEFAULT_PRICING_TTL_SECS),
            retry_cooldown: Duration::from_secs(DEFAULT_RETRY_COOLDOWN_SECS),
            verbose: false,
        }
    }
}

impl PricingStoreBuilder {
    /// Replace the built-in seed table
    #[must_use]
    pub fn seed(mut self, table: PricingTable) -> Self {
        self.seed = table;
        self
    }

    /// Custom per-model rates, consulted before the table
    #[must_use]
    pub fn overrides(mut self, table: PricingTable) -> Self {
        self.overrides = table;
        self
    }

    /// Rates applied to unknown models
    #[must_use]
    pub fn default_rates(mut self, rates: ModelRates) -> Self {
        if rates.is_valid() {
            self.default_rates = rates;
        }
        self
    }

    /// Remote pricing source
    #[must_use]
    pub fn source(mut self, source: Arc<dyn PricingSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Time-to-live of fetched pricing
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Wait after a failed fetch before stale checks retry
    #[must_use]
    pub fn retry_cooldown(mut self, cooldown: Duration) -> Self {
        self.retry_cooldown = cooldown;
        self
    }

    /// Log fetch failures at warn instead of debug
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Build the store
    #[must_use]
    pub fn build(self) -> PricingStore {
        PricingStore {
            table: ArcSwap::from_pointee(self.seed.clone()),
            seed: self.seed,
            overrides: self.overrides,
            default_rates: self.default_rates,
            source: self.source,
            ttl: self.ttl,
            retry_cooldown: self.retry_cooldown,
            verbose: self.verbose,
            refresh_lock: tokio::sync::Mutex::new(()),
            last_refresh: Mutex::new(None),
            last_failure: Mutex::new(None),
        }
    }
}

/// Model pricing cache with remote refresh
pub struct PricingStore {
    table: ArcSwap<PricingTable>,
    seed: PricingTable,
    overrides: PricingTable,
    default_rates: ModelRates,
    source: Option<Arc<dyn PricingSource>>,
    ttl: Duration,
    retry_cooldown: Duration,
    verbose: bool,
    refresh_lock: tokio::sync::Mutex<()>,
    last_refresh: Mutex<Option<Stamp>>,
    last_failure: Mutex<Option<Instant>>,
}

impl std::fmt::Debug for PricingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PricingStore")
            .field("models", &self.model_count())
            .field("overrides", &self.overrides.len())
            .field("has_source", &self.source.is_some())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl Default for PricingStore {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PricingStore {
    /// Start building a store seeded with the built-in defaults
    #[must_use]
    pub fn builder() -> PricingStoreBuilder {
        PricingStoreBuilder::default()
    }

    /// Look up rates for a model. Never fails; unknown models get the
    /// default rates with [`Resolution::Default`].
    #[must_use]
    pub fn get(&self, model: &str) -> RateLookup {
        if let Some(rates) = self.overrides.get(model) {
            return RateLookup {
                rates: *rates,
                resolution: Resolution::Custom,
            };
        }

        self.table.load().resolve(model).unwrap_or(RateLookup {
            rates: self.default_rates,
            resolution: Resolution::Default,
        })
    }

    /// Current table
    #[must_use]
    pub fn snapshot(&self) -> Arc<PricingTable> {
        self.table.load_full()
    }

    /// Custom overrides
    #[must_use]
    pub fn overrides(&self) -> &PricingTable {
        &self.overrides
    }

    /// Number of models in the current table
    #[must_use]
    pub fn model_count(&self) -> usize {
        self.table.load().len()
    }

    /// Wall-clock time of the last successful refresh or manual update
    #[must_use]
    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        (*self.last_refresh.lock()).map(|s| s.wall)
    }

    /// Whether a remote source is configured
    #[must_use]
    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Merge entries into the table, overwriting existing keys
    pub fn update(&self, partial: &PricingTable) {
        self.merge(partial);
        *self.last_refresh.lock() = Some(Stamp::now());
        debug!(models = partial.len(), "Pricing updated");
    }

    fn merge(&self, partial: &PricingTable) {
        self.table.rcu(|current| {
            let mut next = PricingTable::clone(current);
            next.merge(partial);
            next
        });
    }

    /// Restore the built-in table and forget the last refresh
    pub fn reset(&self) {
        self.table.store(Arc::new(self.seed.clone()));
        *self.last_refresh.lock() = None;
        *self.last_failure.lock() = None;
        debug!("Pricing reset to defaults");
    }

    /// Whether the table has never been refreshed or has outlived its TTL
    #[must_use]
    pub fn is_stale(&self) -> bool {
        match *self.last_refresh.lock() {
            Some(stamp) => stamp.at.elapsed() > self.ttl,
            None => true,
        }
    }

    /// Refresh only when stale, respecting the failure cooldown
    pub async fn refresh_if_stale(&self) -> RefreshOutcome {
        if self.source.is_none() {
            return RefreshOutcome::NoSource;
        }
        if !self.is_stale() {
            return RefreshOutcome::Fresh;
        }
        if let Some(failed_at) = *self.last_failure.lock() {
            if failed_at.elapsed() < self.retry_cooldown {
                return RefreshOutcome::CoolingDown;
            }
        }
        self.refresh().await
    }

    /// Fetch the full table and merge it. Failures keep the current table.
    pub async fn refresh(&self) -> RefreshOutcome {
        let Some(source) = self.source.clone() else {
            return RefreshOutcome::NoSource;
        };
        let Ok(_guard) = self.refresh_lock.try_lock() else {
            debug!("Pricing refresh already in flight");
            return RefreshOutcome::InFlight;
        };

        let result = source.fetch_all().await;
        self.apply(result, None)
    }

    /// Fetch and merge the entry for one model
    pub async fn refresh_model(&self, model: &str) -> RefreshOutcome {
        let Some(source) = self.source.clone() else {
            return RefreshOutcome::NoSource;
        };
        let Ok(_guard) = self.refresh_lock.try_lock() else {
            return RefreshOutcome::InFlight;
        };

        let result = source.fetch_model(model).await;
        self.apply(result, Some(model))
    }

    /// A single-model fetch merges its entry but does not reset the TTL.
    fn apply(&self, result: Result<PricingPayload>, model: Option<&str>) -> RefreshOutcome {
        let scope = model.unwrap_or("all");
        match result {
            Ok(payload) => {
                let models = payload.pricing.len();
                if model.is_some() {
                    self.merge(&payload.pricing);
                } else {
                    self.update(&payload.pricing);
                }
                *self.last_failure.lock() = None;

                let source = payload.source.as_deref().unwrap_or("unknown");
                if self.verbose {
                    info!(models, source, scope, "Fetched pricing");
                } else {
                    debug!(models, source, scope, "Fetched pricing");
                }
                RefreshOutcome::Updated { models }
            }
            Err(e) => {
                *self.last_failure.lock() = Some(Instant::now());
                if self.verbose {
                    warn!(error = %e, scope, "Could not fetch pricing, keeping current table");
                } else {
                    debug!(error = %e, scope, "Could not fetch pricing, keeping current table");
                }
                RefreshOutcome::Failed(e.to_string())
            }
        }
    }
}
