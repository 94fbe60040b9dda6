//! Tracker configuration
//!
//! Durations are stored as seconds so the struct maps one-to-one onto TOML
//! files and `AGENTCOST_*` environment variables.

use crate::error::{Error, Result};
use crate::event::{Metadata, MetadataValue};
use agentcost_pricing::{ModelRates, PricingTable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default ingestion and pricing backend
pub const DEFAULT_BASE_URL: &str = "https://api.agentcost.dev";

/// Environment variable overriding the backend URL
pub const ENV_API_URL: &str = "AGENTCOST_API_URL";

/// Default batch size before sending events
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default flush interval in seconds
pub const DEFAULT_FLUSH_INTERVAL_SECS: f64 = 5.0;

/// Default HTTP request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: f64 = 10.0;

/// Default number of retries after the first failed send
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default first retry delay in seconds
pub const DEFAULT_INITIAL_BACKOFF_SECS: f64 = 1.0;

/// Default retry delay cap in seconds
pub const DEFAULT_MAX_BACKOFF_SECS: f64 = 30.0;

/// Maximum queued events before backpressure
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;

/// Maximum events kept in the local log
pub const DEFAULT_MAX_LOCAL_EVENTS: usize = 10_000;

/// Default shutdown flush budget in seconds
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: f64 = 5.0;

/// Default send throttle
pub const DEFAULT_MAX_REQUESTS_PER_SECOND: u32 = 10;

/// Default agent name
pub const DEFAULT_AGENT_NAME: &str = "default";

/// Tracker configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// API key (cloud mode)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Project identifier (cloud mode)
    #[serde(default)]
    pub project_id: Option<String>,

    /// Backend URL (default: `AGENTCOST_API_URL` or `https://api.agentcost.dev`)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Events per batch (default: 10)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Time-based flush interval in seconds (default: 5)
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: f64,

    /// Log delivery and pricing problems at warn/info instead of debug
    #[serde(default)]
    pub debug: bool,

    /// Agent name used when nothing more specific is set
    #[serde(default = "default_agent_name")]
    pub default_agent_name: String,

    /// Keep events in memory instead of sending them
    #[serde(default)]
    pub local_mode: bool,

    /// Master switch; a disabled tracker accepts and discards records
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Per-model rates that take precedence over the pricing table
    #[serde(default)]
    pub custom_pricing: PricingTable,

    /// Rates applied to unknown models (default: zero)
    #[serde(default)]
    pub default_rates: ModelRates,

    /// Metadata attached to every event
    #[serde(default)]
    pub global_metadata: Metadata,

    /// HTTP request timeout in seconds (default: 10)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: f64,

    /// Retries after the first failed send (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay in seconds (default: 1)
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: f64,

    /// Retry delay cap in seconds (default: 30)
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: f64,

    /// Hard cap on buffered events (default: 10 000)
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Local log capacity, oldest dropped first (default: 10 000)
    #[serde(default = "default_max_local_events")]
    pub max_local_events: usize,

    /// Pricing time-to-live in seconds (default: 24h)
    #[serde(default = "default_pricing_ttl")]
    pub pricing_ttl_secs: u64,

    /// Budget for the final flush on shutdown in seconds (default: 5)
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: f64,

    /// Send throttle (default: 10 requests per second)
    #[serde(default = "default_max_requests_per_second")]
    pub max_requests_per_second: u32,
}

/// Returns the backend URL from `AGENTCOST_API_URL` or the default.
pub fn default_base_url() -> String {
    std::env::var(ENV_API_URL)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_flush_interval() -> f64 {
    DEFAULT_FLUSH_INTERVAL_SECS
}

fn default_agent_name() -> String {
    DEFAULT_AGENT_NAME.to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_request_timeout() -> f64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_initial_backoff() -> f64 {
    DEFAULT_INITIAL_BACKOFF_SECS
}

fn default_max_backoff() -> f64 {
    DEFAULT_MAX_BACKOFF_SECS
}

fn default_max_queue_size() -> usize {
    DEFAULT_MAX_QUEUE_SIZE
}

fn default_max_local_events() -> usize {
    DEFAULT_MAX_LOCAL_EVENTS
}

fn default_pricing_ttl() -> u64 {
    agentcost_pricing::DEFAULT_PRICING_TTL_SECS
}

fn default_shutdown_timeout() -> f64 {
    DEFAULT_SHUTDOWN_TIMEOUT_SECS
}

fn default_max_requests_per_second() -> u32 {
    DEFAULT_MAX_REQUESTS_PER_SECOND
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            project_id: None,
            base_url: default_base_url(),
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            debug: false,
            default_agent_name: default_agent_name(),
            local_mode: false,
            enabled: true,
            custom_pricing: PricingTable::new(),
            default_rates: ModelRates::ZERO,
            global_metadata: Metadata::new(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff_secs: DEFAULT_INITIAL_BACKOFF_SECS,
            max_backoff_secs: DEFAULT_MAX_BACKOFF_SECS,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_local_events: DEFAULT_MAX_LOCAL_EVENTS,
            pricing_ttl_secs: agentcost_pricing::DEFAULT_PRICING_TTL_SECS,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            max_requests_per_second: DEFAULT_MAX_REQUESTS_PER_SECOND,
        }
    }
}

impl std::fmt::Debug for TrackerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let masked_key = self.api_key.as_deref().map(mask_key);
        f.debug_struct("TrackerConfig")
            .field("api_key", &masked_key)
            .field("project_id", &self.project_id)
            .field("base_url", &self.base_url)
            .field("local_mode", &self.local_mode)
            .field("enabled", &self.enabled)
            .field("batch_size", &self.batch_size)
            .field("flush_interval_secs", &self.flush_interval_secs)
            .field("max_queue_size", &self.max_queue_size)
            .finish_non_exhaustive()
    }
}

/// Mask an API key for logs: first 8 characters, or `***` for short keys
#[must_use]
pub fn mask_key(key: &str) -> String {
    if key.chars().count() > 8 {
        let prefix: String = key.chars().take(8).collect();
        format!("{prefix}...")
    } else {
        "***".to_string()
    }
}

/// Upper bound for any configured duration (one year)
pub const MAX_DURATION_SECS: f64 = 31_536_000.0;

fn secs(value: f64) -> Duration {
    if value > 0.0 {
        Duration::try_from_secs_f64(value.min(MAX_DURATION_SECS)).unwrap_or(Duration::ZERO)
    } else {
        Duration::ZERO
    }
}

/// Reject durations that are not finite, out of range or (unless
/// `allow_zero`) zero
fn check_secs(field: &str, value: f64, allow_zero: bool) -> Result<()> {
    let duration = Duration::try_from_secs_f64(value)
        .map_err(|e| Error::config(field, format!("invalid duration {value}: {e}")))?;
    if duration.is_zero() && !allow_zero {
        return Err(Error::config(field, "must be positive"));
    }
    if value > MAX_DURATION_SECS {
        return Err(Error::config(
            field,
            format!("must be at most {MAX_DURATION_SECS} seconds"),
        ));
    }
    Ok(())
}

impl TrackerConfig {
    /// Local-mode configuration: events stay in memory
    #[must_use]
    pub fn local() -> Self {
        Self {
            local_mode: true,
            ..Self::default()
        }
    }

    /// Cloud-mode configuration
    #[must_use]
    pub fn cloud(api_key: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            project_id: Some(project_id.into()),
            ..Self::default()
        }
    }

    /// Set backend URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set batch size
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set flush interval
    #[must_use]
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval_secs = interval.as_secs_f64();
        self
    }

    /// Enable debug logging
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set default agent name
    #[must_use]
    pub fn with_default_agent_name(mut self, name: impl Into<String>) -> Self {
        self.default_agent_name = name.into();
        self
    }

    /// Enable or disable tracking
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Add a custom rate override
    #[must_use]
    pub fn with_custom_pricing(mut self, model: impl Into<String>, rates: ModelRates) -> Self {
        self.custom_pricing.insert(model, rates);
        self
    }

    /// Rates for unknown models
    #[must_use]
    pub fn with_default_rates(mut self, rates: ModelRates) -> Self {
        self.default_rates = rates;
        self
    }

    /// Add a global metadata entry
    #[must_use]
    pub fn with_global_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Self {
        self.global_metadata.insert(key.into(), value.into());
        self
    }

    /// Set request timeout
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs_f64();
        self
    }

    /// Set retry policy
    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, initial: Duration, max: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_backoff_secs = initial.as_secs_f64();
        self.max_backoff_secs = max.as_secs_f64();
        self
    }

    /// Set queue capacity
    #[must_use]
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Set local log capacity
    #[must_use]
    pub fn with_max_local_events(mut self, size: usize) -> Self {
        self.max_local_events = size;
        self
    }

    /// Set pricing TTL
    #[must_use]
    pub fn with_pricing_ttl(mut self, ttl: Duration) -> Self {
        self.pricing_ttl_secs = ttl.as_secs();
        self
    }

    /// Set shutdown flush budget
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_secs = timeout.as_secs_f64();
        self
    }

    /// Set send throttle
    #[must_use]
    pub fn with_max_requests_per_second(mut self, max: u32) -> Self {
        self.max_requests_per_second = max;
        self
    }

    /// Whether events stay in memory
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.local_mode
    }

    /// Flush interval as a duration
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        secs(self.flush_interval_secs)
    }

    /// Request timeout as a duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        secs(self.request_timeout_secs)
    }

    /// First retry delay
    #[must_use]
    pub fn initial_backoff(&self) -> Duration {
        secs(self.initial_backoff_secs)
    }

    /// Retry delay cap
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        secs(self.max_backoff_secs)
    }

    /// Shutdown flush budget
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        secs(self.shutdown_timeout_secs)
    }

    /// Pricing TTL
    #[must_use]
    pub fn pricing_ttl(&self) -> Duration {
        Duration::from_secs(self.pricing_ttl_secs)
    }

    /// Check the configuration. Errors here are fatal at init.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::config("batch_size", "must be at least 1"));
        }
        if self.max_queue_size < self.batch_size {
            return Err(Error::config(
                "max_queue_size",
                format!("must be at least batch_size ({})", self.batch_size),
            ));
        }
        check_secs("flush_interval_secs", self.flush_interval_secs, false)?;
        check_secs("request_timeout_secs", self.request_timeout_secs, false)?;
        check_secs("shutdown_timeout_secs", self.shutdown_timeout_secs, false)?;
        check_secs("initial_backoff_secs", self.initial_backoff_secs, true)?;
        check_secs("max_backoff_secs", self.max_backoff_secs, true)?;
        if self.max_backoff_secs < self.initial_backoff_secs {
            return Err(Error::config(
                "max_backoff_secs",
                "must be at least initial_backoff_secs",
            ));
        }
        if !self.default_rates.is_valid() {
            return Err(Error::config("default_rates", "rates must be finite and >= 0"));
        }

        if self.local_mode {
            return Ok(());
        }

        if self.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            return Err(Error::config(
                "api_key",
                "required in cloud mode (use local mode for offline tracking)",
            ));
        }
        if self.project_id.as_deref().map_or(true, |p| p.trim().is_empty()) {
            return Err(Error::config("project_id", "required in cloud mode"));
        }
        match reqwest::Url::parse(&self.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
            Ok(url) => Err(Error::config(
                "base_url",
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            Err(e) => Err(Error::config("base_url", e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::local();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.flush_interval(), Duration::from_secs(5));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_backoff(), Duration::from_secs(1));
        assert_eq!(config.max_backoff(), Duration::from_secs(30));
        assert_eq!(config.max_queue_size, 10_000);
        assert_eq!(config.pricing_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.default_agent_name, "default");
        assert!(config.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cloud_requires_credentials() {
        let err = TrackerConfig::default().validate().unwrap_err();
        assert!(matches!(err, Error::Configuration { ref field, .. } if field == "api_key"));

        let mut config = TrackerConfig::cloud("sk_test_123456789", "proj");
        config.project_id = None;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Configuration { ref field, .. } if field == "project_id"));
    }

    #[test]
    fn test_cloud_rejects_bad_url() {
        let config = TrackerConfig::cloud("sk_test_123456789", "proj").with_base_url("not a url");
        assert!(config.validate().is_err());

        let config =
            TrackerConfig::cloud("sk_test_123456789", "proj").with_base_url("ftp://example.com");
        assert!(config.validate().is_err());

        let config = TrackerConfig::cloud("sk_test_123456789", "proj")
            .with_base_url("http://localhost:8080");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_sizes() {
        assert!(TrackerConfig::local().with_batch_size(0).validate().is_err());
        assert!(TrackerConfig::local()
            .with_batch_size(100)
            .with_max_queue_size(50)
            .validate()
            .is_err());
        assert!(TrackerConfig::local()
            .with_flush_interval(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_rejects_out_of_range_durations() {
        let mut config = TrackerConfig::local();
        config.flush_interval_secs = 1e30;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("flush_interval_secs"));

        let mut config = TrackerConfig::local();
        config.request_timeout_secs = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::local();
        config.shutdown_timeout_secs = -1.0;
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::local();
        config.max_backoff_secs = f64::INFINITY;
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::local();
        config.flush_interval_secs = MAX_DURATION_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_masks_api_key() {
        let config = TrackerConfig::cloud("sk_live_abcdefghijklmnop", "proj");
        let debug = format!("{config:?}");
        assert!(debug.contains("sk_live_..."));
        assert!(!debug.contains("abcdefghijklmnop"));
        assert_eq!(mask_key("short"), "***");
    }

    #[test]
    fn test_deserialize_partial() {
        let config: TrackerConfig = serde_json::from_value(serde_json::json!({
            "local_mode": true,
            "batch_size": 25,
            "custom_pricing": {"my-model": {"input": 0.1, "output": 0.2}},
            "global_metadata": {"env": "staging", "replica": 3}
        }))
        .unwrap();

        assert_eq!(config.batch_size, 25);
        assert_eq!(config.flush_interval_secs, 5.0);
        assert!(config.custom_pricing.contains("my-model"));
        assert_eq!(
            config.global_metadata.get("replica"),
            Some(&MetadataValue::Int(3))
        );
    }
}
