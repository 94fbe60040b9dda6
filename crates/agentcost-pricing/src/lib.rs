//! AgentCost Pricing - Model Rates and Cost Calculation
//!
//! This crate provides the pricing side of AgentCost:
//! - Table: Per-model rates (USD per 1K tokens) and built-in defaults
//! - Store: Atomically swapped pricing cache with TTL-driven remote refresh
//! - Source: Remote pricing endpoint (`/v1/pricing`) over HTTP
//! - Calculator: Deterministic cost computation with unknown-model fallback

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod calculator;
pub mod error;
pub mod source;
pub mod store;
pub mod table;

pub use calculator::{compute_cost, Cost, CostBreakdown, CostCalculator};
pub use error::{Error, Result};
pub use source::{HttpPricingSource, PricingPayload, PricingSource};
pub use store::{PricingStore, PricingStoreBuilder, RefreshOutcome};
pub use table::{default_pricing, ModelRates, PricingTable, RateLookup, Resolution};

/// Default time-to-live for remotely fetched pricing (24 hours)
pub const DEFAULT_PRICING_TTL_SECS: u64 = 86_400;

/// Default timeout for a pricing fetch in seconds
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
