//! Usage records, priced events and batches

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Scalar metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// JSON null
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// String
    String(String),
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for MetadataValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for MetadataValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl<T: Into<MetadataValue>> From<Option<T>> for MetadataValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Event metadata (ordered for stable serialization)
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Hex SHA-256 of a prompt after lower-casing and trimming
#[must_use]
pub fn hash_input(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.trim().to_lowercase().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// One model call as reported by the host
///
/// Build with [`UsageRecord::new`] and the `with_*` methods; the record is
/// read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    #[serde(default)]
    agent_name: Option<String>,
    model: String,
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    latency_ms: u64,
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    streaming: bool,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
    #[serde(default)]
    input_hash: Option<String>,
}

fn default_success() -> bool {
    true
}

impl UsageRecord {
    /// Successful call with the given token counts, timestamped now
    #[must_use]
    pub fn new(model: impl Into<String>, input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            agent_name: None,
            model: model.into(),
            input_tokens,
            output_tokens,
            latency_ms: 0,
            success: true,
            error: None,
            streaming: false,
            metadata: Metadata::new(),
            timestamp: Utc::now(),
            input_hash: None,
        }
    }

    /// Explicit agent name (wins over scopes and defaults)
    #[must_use]
    pub fn with_agent_name(mut self, name: impl Into<String>) -> Self {
        self.agent_name = Some(name.into());
        self
    }

    /// Call latency
    #[must_use]
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Mark the call failed
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    /// Mark the call as streamed
    #[must_use]
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Add a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Override the timestamp
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Precomputed input hash
    #[must_use]
    pub fn with_input_hash(mut self, hash: impl Into<String>) -> Self {
        self.input_hash = Some(hash.into());
        self
    }

    /// Hash the prompt text for caching-pattern detection
    #[must_use]
    pub fn with_input_text(self, text: &str) -> Self {
        self.with_input_hash(hash_input(text))
    }

    /// Explicit agent name, if any
    #[must_use]
    pub fn agent_name(&self) -> Option<&str> {
        self.agent_name.as_deref()
    }

    /// Model identifier
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Input tokens
    #[must_use]
    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    /// Output tokens
    #[must_use]
    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }

    /// Latency in milliseconds
    #[must_use]
    pub fn latency_ms(&self) -> u64 {
        self.latency_ms
    }

    /// Whether the call succeeded
    #[must_use]
    pub fn success(&self) -> bool {
        self.success
    }

    /// Error message for failed calls
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether the call was streamed
    #[must_use]
    pub fn streaming(&self) -> bool {
        self.streaming
    }

    /// Record-level metadata
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// When the call happened
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Input hash, if supplied
    #[must_use]
    pub fn input_hash(&self) -> Option<&str> {
        self.input_hash.as_deref()
    }
}

/// A usage record with resolved tags and a cost, as sent on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedEvent {
    /// Resolved agent name
    pub agent_name: String,
    /// Model identifier
    pub model: String,
    /// Input tokens
    pub input_tokens: u64,
    /// Output tokens
    pub output_tokens: u64,
    /// Input + output
    pub total_tokens: u64,
    /// Cost in USD
    pub cost: f64,
    /// Latency in milliseconds
    pub latency_ms: u64,
    /// RFC 3339 UTC
    pub timestamp: DateTime<Utc>,
    /// Whether the call succeeded
    pub success: bool,
    /// Error message
    pub error: Option<String>,
    /// Streamed response
    #[serde(default)]
    pub streaming: bool,
    /// Merged metadata
    #[serde(default)]
    pub metadata: Metadata,
    /// Prompt hash
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_hash: Option<String>,
}

impl PricedEvent {
    /// Combine a record with its resolved agent, merged metadata and cost
    #[must_use]
    pub fn from_record(record: UsageRecord, agent_name: String, metadata: Metadata, cost: f64) -> Self {
        Self {
            agent_name,
            total_tokens: record.input_tokens.saturating_add(record.output_tokens),
            model: record.model,
            input_tokens: record.input_tokens,
            output_tokens: record.output_tokens,
            cost: if cost.is_finite() { cost.max(0.0) } else { 0.0 },
            latency_ms: record.latency_ms,
            timestamp: record.timestamp,
            success: record.success,
            error: record.error,
            streaming: record.streaming,
            metadata,
            input_hash: record.input_hash,
        }
    }
}

/// Ordered group of events sent in one request
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Batch identifier
    pub id: Uuid,
    /// When the batch was sealed
    pub created_at: DateTime<Utc>,
    /// Events in enqueue order
    pub events: Vec<PricedEvent>,
}

impl Batch {
    /// Seal events into a batch
    #[must_use]
    pub fn new(events: Vec<PricedEvent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            events,
        }
    }

    /// Number of events
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the batch has no events
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Request body for `POST /v1/events/batch`
#[derive(Debug, Serialize)]
pub struct BatchPayload<'a> {
    /// Project identifier
    pub project_id: &'a str,
    /// Events
    pub events: &'a [PricedEvent],
}
