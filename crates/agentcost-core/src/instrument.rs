//! Instrumentation - Tracking calls without touching their results
//!
//! Hosts either wrap a call future with [`Tracker::instrument`], which times
//! it and tracks success or failure, or time a call by hand with
//! [`Tracker::start_call`]. Tracking problems are logged and never change
//! what the host's call returns.

use crate::event::{MetadataValue, UsageRecord};
use crate::tracker::Tracker;
use std::future::Future;
use std::time::Instant;
use tracing::debug;

/// Token usage reported by a model response
pub trait UsageReport {
    /// Prompt tokens
    fn input_tokens(&self) -> u64;

    /// Completion tokens
    fn output_tokens(&self) -> u64;

    /// Whether the response was streamed
    fn streaming(&self) -> bool {
        false
    }
}

impl Tracker {
    /// Await `call`, then track it under `model` with its latency
    ///
    /// On error the call is tracked as failed with zero tokens. The result
    /// is returned unchanged either way.
    ///
    /// ```ignore
    /// let response = tracker.instrument("gpt-4o", client.chat(request)).await?;
    /// ```
    pub async fn instrument<T, E, F>(&self, model: &str, call: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        T: UsageReport,
        E: std::fmt::Display,
    {
        let guard = self.start_call(model);
        let result = call.await;
        match result {
            Ok(ref response) => guard
                .with_streaming(response.streaming())
                .finish(response.input_tokens(), response.output_tokens()),
            Err(ref e) => guard.fail(e.to_string(), 0, 0),
        }
        result
    }

    /// Start timing a call; nothing is tracked until the guard is finished
    #[must_use = "dropping the guard without finishing records nothing"]
    pub fn start_call(&self, model: impl Into<String>) -> CallGuard {
        CallGuard {
            tracker: self.clone(),
            record: UsageRecord::new(model, 0, 0),
            started: Instant::now(),
        }
    }
}

/// A call being timed by hand
#[derive(Debug)]
pub struct CallGuard {
    tracker: Tracker,
    record: UsageRecord,
    started: Instant,
}

impl CallGuard {
    /// Tag the call with an explicit agent
    #[must_use]
    pub fn with_agent_name(mut self, name: impl Into<String>) -> Self {
        self.record = self.record.with_agent_name(name);
        self
    }

    /// Attach a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.record = self.record.with_metadata(key, value);
        self
    }

    /// Mark the call as streamed
    #[must_use]
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.record = self.record.with_streaming(streaming);
        self
    }

    /// Hash the prompt for caching-pattern detection
    #[must_use]
    pub fn with_input_text(mut self, text: &str) -> Self {
        self.record = self.record.with_input_text(text);
        self
    }

    /// Track a successful call
    pub fn finish(self, input_tokens: u64, output_tokens: u64) {
        let record = self.seal(input_tokens, output_tokens);
        self.submit(record);
    }

    /// Track a failed call; token counts are host estimates, if any
    pub fn fail(self, error: impl Into<String>, input_tokens: u64, output_tokens: u64) {
        let record = self.seal(input_tokens, output_tokens).with_error(error);
        self.submit(record);
    }

    fn seal(&self, input_tokens: u64, output_tokens: u64) -> UsageRecord {
        let latency_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let mut record = UsageRecord::new(self.record.model(), input_tokens, output_tokens)
            .with_latency_ms(latency_ms)
            .with_streaming(self.record.streaming())
            .with_timestamp(self.record.timestamp());
        if let Some(agent) = self.record.agent_name() {
            record = record.with_agent_name(agent);
        }
        if let Some(hash) = self.record.input_hash() {
            record = record.with_input_hash(hash);
        }
        for (key, value) in self.record.metadata() {
            record = record.with_metadata(key.clone(), value.clone());
        }
        record
    }

    fn submit(self, record: UsageRecord) {
        if let Err(e) = self.tracker.track(record) {
            debug!(error = %e, model = self.record.model(), "Instrumented call not tracked");
        }
    }
}
