//! Pricing Source - Remote pricing endpoint
//!
//! The backend serves `GET /v1/pricing` (full table), `GET /v1/pricing/<model>`
//! (single entry) and accepts `POST /v1/pricing` for admin updates. All three
//! share the `{"pricing": {model: {"input": r, "output": r}}}` body.

use crate::error::{Error, Result};
use crate::table::{ModelRates, PricingTable};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// User agent sent with pricing requests
const USER_AGENT: &str = concat!("agentcost-rs/", env!("CARGO_PKG_VERSION"));

/// Pricing returned by a source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PricingPayload {
    /// Valid entries only
    pub pricing: PricingTable,
    /// Backend-reported origin of the data (e.g. `litellm`)
    pub source: Option<String>,
    /// Entries discarded for negative or non-finite rates
    pub discarded: usize,
}

/// Where remote pricing comes from
#[async_trait]
pub trait PricingSource: Send + Sync {
    /// Fetch the full pricing table
    async fn fetch_all(&self) -> Result<PricingPayload>;

    /// Fetch the entry for one model
    async fn fetch_model(&self, model: &str) -> Result<PricingPayload>;

    /// Push entries to the backend (admin)
    async fn publish(&self, table: &PricingTable) -> Result<()> {
        let _ = table;
        Err(Error::NotConfigured)
    }
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    #[serde(default)]
    pricing: HashMap<String, ModelRates>,
    #[serde(default)]
    source: Option<String>,
}

#[derive(Serialize)]
struct PublishBody<'a> {
    pricing: &'a PricingTable,
}

impl RawPayload {
    fn validate(self) -> PricingPayload {
        let mut pricing = PricingTable::new();
        let mut discarded = 0;

        for (model, rates) in self.pricing {
            if !pricing.insert(model.clone(), rates) {
                warn!(model = %model, input = rates.input, output = rates.output, "Discarding invalid pricing entry");
                discarded += 1;
            }
        }

        PricingPayload {
            pricing,
            source: self.source,
            discarded,
        }
    }
}

/// HTTP pricing source backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpPricingSource {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpPricingSource {
    /// Create a source for `base_url` (e.g. `https://api.agentcost.dev`)
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidUrl(base_url.to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            api_key: None,
            timeout: Duration::from_secs(crate::DEFAULT_FETCH_TIMEOUT_SECS),
        })
    }

    /// Bearer token for admin publishing
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Per-request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reuse an existing client
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Base URL this source talks to
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, model: Option<&str>) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| Error::InvalidUrl(self.base_url.to_string()))?;
            segments.pop_if_empty().extend(["v1", "pricing"]);
            if let Some(model) = model {
                segments.push(model);
            }
        }
        Ok(url)
    }

    fn map_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout(self.timeout.as_millis() as u64)
        } else if err.is_decode() {
            Error::InvalidResponse(err.to_string())
        } else {
            Error::Network(err.to_string())
        }
    }

    async fn get(&self, url: Url) -> Result<PricingPayload> {
        debug!(url = %url, "Fetching pricing");

        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(|e| self.map_error(e))?;
        let raw: RawPayload =
            serde_json::from_str(&body).map_err(|e| Error::InvalidResponse(e.to_string()))?;

        Ok(raw.validate())
    }
}

#[async_trait]
impl PricingSource for HttpPricingSource {
    async fn fetch_all(&self) -> Result<PricingPayload> {
        let url = self.endpoint(None)?;
        self.get(url).await
    }

    async fn fetch_model(&self, model: &str) -> Result<PricingPayload> {
        let url = self.endpoint(Some(model))?;
        self.get(url).await
    }

    async fn publish(&self, table: &PricingTable) -> Result<()> {
        let url = self.endpoint(None)?;
        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(self.timeout)
            .json(&PublishBody { pricing: table });

        if let Some(ref api_key) = self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status(status.as_u16()));
        }

        debug!(models = table.len(), "Published pricing");
        Ok(())
    }
}
