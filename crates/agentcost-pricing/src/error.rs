//! Error types for agentcost-pricing

use thiserror::Error;

/// Pricing fetch error type
///
/// Only [`crate::PricingSource`] implementations surface these. The store
/// logs them and keeps serving the table it already has.
#[derive(Debug, Error)]
pub enum Error {
    /// No remote pricing source configured
    #[error("pricing source not configured")]
    NotConfigured,

    /// Base URL could not be parsed or extended
    #[error("invalid pricing url: {0}")]
    InvalidUrl(String),

    /// Network error
    #[error("network error: {0}")]
    Network(String),

    /// Timeout
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// Non-2xx response from the pricing endpoint
    #[error("pricing endpoint returned HTTP {0}")]
    Status(u16),

    /// Invalid response body
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
