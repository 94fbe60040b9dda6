//! Pricing Table - Per-model rates
//!
//! Rates are USD per 1,000 tokens, the unit used both by the built-in
//! defaults and by the remote `/v1/pricing` endpoint.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Default Rates (USD per 1K tokens)
// ============================================================================

/// Built-in fallback rates used when the backend is unreachable.
const DEFAULT_RATES: &[(&str, f64, f64)] = &[
    // OpenAI
    ("gpt-4", 0.03, 0.06),
    ("gpt-4-turbo", 0.01, 0.03),
    ("gpt-4-turbo-preview", 0.01, 0.03),
    ("gpt-4o", 0.0025, 0.01),
    ("gpt-4o-mini", 0.00015, 0.0006),
    ("gpt-3.5-turbo", 0.0005, 0.0015),
    ("gpt-3.5-turbo-16k", 0.003, 0.004),
    ("o1", 0.015, 0.06),
    ("o1-preview", 0.015, 0.06),
    ("o1-mini", 0.003, 0.012),
    // Anthropic
    ("claude-3-opus", 0.015, 0.075),
    ("claude-3-sonnet", 0.003, 0.015),
    ("claude-3-haiku", 0.00025, 0.00125),
    ("claude-3-5-sonnet", 0.003, 0.015),
    ("claude-3-5-haiku", 0.0008, 0.004),
    ("claude-4-opus", 0.015, 0.075),
    // Groq
    ("llama-3.1-8b-instant", 0.00005, 0.00008),
    ("llama-3.1-70b-versatile", 0.00059, 0.00079),
    ("llama-3.2-3b-preview", 0.00006, 0.00006),
    ("llama-3.3-70b-versatile", 0.00059, 0.00079),
    ("mixtral-8x7b-32768", 0.00024, 0.00024),
    // Google
    ("gemini-pro", 0.00025, 0.0005),
    ("gemini-1.5-pro", 0.00125, 0.005),
    ("gemini-1.5-flash", 0.000075, 0.0003),
    ("gemini-2.0-flash", 0.0001, 0.0004),
    // DeepSeek
    ("deepseek-chat", 0.00014, 0.00028),
    ("deepseek-coder", 0.00014, 0.00028),
    ("deepseek-reasoner", 0.00055, 0.00219),
    // Mistral
    ("mistral-small", 0.001, 0.003),
    ("mistral-medium", 0.00275, 0.0081),
    ("mistral-large", 0.004, 0.012),
    // Cohere
    ("command", 0.001, 0.002),
    ("command-light", 0.0003, 0.0006),
    ("command-r", 0.0005, 0.0015),
    ("command-r-plus", 0.003, 0.015),
    // Together AI
    ("meta-llama/Llama-3-70b-chat-hf", 0.0009, 0.0009),
    ("meta-llama/Llama-3-8b-chat-hf", 0.0002, 0.0002),
];

// ============================================================================
// Rates
// ============================================================================

/// Input/output rates for one model, in USD per 1K tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRates {
    /// Cost per 1K input tokens
    #[serde(default)]
    pub input: f64,
    /// Cost per 1K output tokens
    #[serde(default)]
    pub output: f64,
}

impl ModelRates {
    /// Zero rates, used for unknown models unless a default is configured
    pub const ZERO: ModelRates = ModelRates {
        input: 0.0,
        output: 0.0,
    };

    /// Create rates from per-1K values
    #[must_use]
    pub const fn new(input: f64, output: f64) -> Self {
        Self { input, output }
    }

    /// Rates must be finite and non-negative to be accepted into a table
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.input.is_finite() && self.output.is_finite() && self.input >= 0.0 && self.output >= 0.0
    }

    /// Cost of a single input token
    #[must_use]
    pub fn input_per_token(&self) -> f64 {
        self.input / 1000.0
    }

    /// Cost of a single output token
    #[must_use]
    pub fn output_per_token(&self) -> f64 {
        self.output / 1000.0
    }
}

// ============================================================================
// Table
// ============================================================================

/// Mapping from model identifier to rates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "HashMap<String, ModelRates>",
    into = "HashMap<String, ModelRates>"
)]
pub struct PricingTable {
    models: HashMap<String, ModelRates>,
}

impl PricingTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a model's rates. Invalid rates are ignored and
    /// `false` is returned.
    pub fn insert(&mut self, model: impl Into<String>, rates: ModelRates) -> bool {
        if !rates.is_valid() {
            return false;
        }
        self.models.insert(model.into(), rates);
        true
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, model: impl Into<String>, rates: ModelRates) -> Self {
        self.insert(model, rates);
        self
    }

    /// Exact lookup
    #[must_use]
    pub fn get(&self, model: &str) -> Option<&ModelRates> {
        self.models.get(model)
    }

    /// Whether the table has an exact entry for `model`
    #[must_use]
    pub fn contains(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    /// Merge `other` into this table, overwriting existing keys
    pub fn merge(&mut self, other: &PricingTable) {
        for (model, rates) in &other.models {
            self.models.insert(model.clone(), *rates);
        }
    }

    /// Number of models
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Iterate over `(model, rates)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ModelRates)> {
        self.models.iter()
    }

    /// Resolve a model id against this table.
    ///
    /// Exact match first, then the longest known id contained in the
    /// lower-cased request (so `gpt-4o-mini-2024-07-18` resolves to
    /// `gpt-4o-mini`, not `gpt-4`).
    #[must_use]
    pub fn resolve(&self, model: &str) -> Option<RateLookup> {
        if let Some(rates) = self.models.get(model) {
            return Some(RateLookup {
                rates: *rates,
                resolution: Resolution::Exact,
            });
        }

        let wanted = model.to_lowercase();
        self.models
            .iter()
            .filter(|(known, _)| wanted.contains(&known.to_lowercase()))
            .max_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| b.0.cmp(a.0)))
            .map(|(known, rates)| RateLookup {
                rates: *rates,
                resolution: Resolution::Fuzzy(known.clone()),
            })
    }
}

impl FromIterator<(String, ModelRates)> for PricingTable {
    fn from_iter<I: IntoIterator<Item = (String, ModelRates)>>(iter: I) -> Self {
        let mut table = PricingTable::new();
        for (model, rates) in iter {
            table.insert(model, rates);
        }
        table
    }
}

impl From<HashMap<String, ModelRates>> for PricingTable {
    fn from(models: HashMap<String, ModelRates>) -> Self {
        models.into_iter().collect()
    }
}

impl From<PricingTable> for HashMap<String, ModelRates> {
    fn from(table: PricingTable) -> Self {
        table.models
    }
}

/// Default pricing for common models
#[must_use]
pub fn default_pricing() -> PricingTable {
    DEFAULT_RATES
        .iter()
        .map(|(model, input, output)| ((*model).to_string(), ModelRates::new(*input, *output)))
        .collect()
}

// ============================================================================
// Lookup Result
// ============================================================================

/// How a model id was resolved to rates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// User-supplied override
    Custom,
    /// Exact entry in the pricing table
    Exact,
    /// Matched a known model id contained in the requested one
    Fuzzy(String),
    /// Not found; default rates applied
    Default,
}

/// Rates returned by a pricing lookup
#[derive(Debug, Clone, PartialEq)]
pub struct RateLookup {
    /// Resolved rates
    pub rates: ModelRates,
    /// How they were found
    pub resolution: Resolution,
}

impl RateLookup {
    /// Whether the lookup found the model (anything but the default entry)
    #[must_use]
    pub fn is_hit(&self) -> bool {
        self.resolution != Resolution::Default
    }
}
