//! Cost Calculator - Token usage to USD
//!
//! Pure arithmetic over a [`PricingStore`] lookup. Costs are rounded to
//! eight decimal places; conversation estimates to six.

use crate::store::PricingStore;
use crate::table::{ModelRates, Resolution};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Cost of one call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cost {
    /// Total cost in USD
    pub total: f64,
    /// How the model's rates were found
    #[serde(skip)]
    pub resolution: Resolution,
}

impl Cost {
    /// True when the model was unknown and default rates were applied
    #[must_use]
    pub fn is_estimate(&self) -> bool {
        self.resolution == Resolution::Default
    }
}

/// Itemised cost of one call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostBreakdown {
    /// Cost of input tokens
    pub input_cost: f64,
    /// Cost of output tokens
    pub output_cost: f64,
    /// Sum of both
    pub total_cost: f64,
    /// Input rate applied (per 1K tokens)
    pub input_price_per_1k: f64,
    /// Output rate applied (per 1K tokens)
    pub output_price_per_1k: f64,
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Cost for a token count at the given rates, rounded to 8 places
#[must_use]
pub fn compute_cost(rates: &ModelRates, input_tokens: u64, output_tokens: u64) -> f64 {
    let cost = input_tokens as f64 * rates.input_per_token()
        + output_tokens as f64 * rates.output_per_token();
    round_to(cost.max(0.0), 8)
}

/// Calculator bound to a pricing store
#[derive(Debug, Clone)]
pub struct CostCalculator {
    store: Arc<PricingStore>,
}

impl Default for CostCalculator {
    fn default() -> Self {
        Self::new(Arc::new(PricingStore::default()))
    }
}

impl CostCalculator {
    /// Create a calculator reading from `store`
    #[must_use]
    pub fn new(store: Arc<PricingStore>) -> Self {
        Self { store }
    }

    /// Underlying store
    #[must_use]
    pub fn store(&self) -> &Arc<PricingStore> {
        &self.store
    }

    /// Cost of a call. Unknown models fall back to the store's default
    /// rates and are flagged as estimates.
    #[must_use]
    pub fn compute(&self, model: &str, input_tokens: u64, output_tokens: u64) -> Cost {
        let lookup = self.store.get(model);
        if !lookup.is_hit() {
            debug!(model, "Unknown model, using default rates");
        }

        Cost {
            total: compute_cost(&lookup.rates, input_tokens, output_tokens),
            resolution: lookup.resolution,
        }
    }

    /// Itemised cost of a call
    #[must_use]
    pub fn breakdown(&self, model: &str, input_tokens: u64, output_tokens: u64) -> CostBreakdown {
        let rates = self.store.get(model).rates;
        let input_cost = input_tokens as f64 * rates.input_per_token();
        let output_cost = output_tokens as f64 * rates.output_per_token();

        CostBreakdown {
            input_cost: round_to(input_cost, 8),
            output_cost: round_to(output_cost, 8),
            total_cost: round_to(input_cost + output_cost, 8),
            input_price_per_1k: rates.input,
            output_price_per_1k: rates.output,
        }
    }

    /// Estimated cost of a multi-turn conversation
    #[must_use]
    pub fn estimate_conversation(
        &self,
        model: &str,
        avg_input_tokens: u64,
        avg_output_tokens: u64,
        turns: u32,
    ) -> f64 {
        let per_turn = self.compute(model, avg_input_tokens, avg_output_tokens).total;
        round_to(per_turn * f64::from(turns), 6)
    }
}

#[cfg(test)]
mod tests;
