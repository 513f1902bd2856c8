use async_trait::async_trait;
use common::config::ContextConfig;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use url::Url;

use crate::analyzers::LegitimacyProvider;
use crate::error::{ProviderError, ScoringError, ScoringResult};
use crate::model::{BusinessContext, LegitimacyFacets, LegitimacyJudgement};

#[derive(Serialize)]
struct LegitimacyRequest<'a> {
    text: &'a str,
    business_context: &'a BusinessContext,
}

/// Legitimacy judge reached over HTTP; the service answers with the facets as JSON.
pub struct HttpLegitimacyProvider {
    client: Client,
    endpoint: Url,
    timeout: Duration,
}

impl HttpLegitimacyProvider {
    pub fn new(config: &ContextConfig) -> ScoringResult<Self> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| ScoringError::Config(format!("context.endpoint '{}': {}", config.endpoint, e)))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ScoringError::Config(format!(
                "context.endpoint must be http(s), got '{}'",
                endpoint.scheme()
            )));
        }
        let client = Client::builder()
            .build()
            .map_err(|e| ScoringError::Config(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            endpoint,
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Server errors and throttling are worth retrying, other statuses are not.
pub fn classify_status(status: StatusCode) -> Option<ProviderError> {
    if status.is_success() {
        None
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Some(ProviderError::Transient(format!("status {}", status)))
    } else {
        Some(ProviderError::Rejected(format!("status {}", status)))
    }
}

fn classify_transport(error: &reqwest::Error, timeout: Duration) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout(timeout.as_millis() as u64)
    } else if error.is_connect() || error.is_request() {
        ProviderError::Transient(error.to_string())
    } else {
        ProviderError::Rejected(error.to_string())
    }
}

#[async_trait]
impl LegitimacyProvider for HttpLegitimacyProvider {
    async fn analyze(
        &self,
        text: &str,
        business_context: &BusinessContext,
    ) -> Result<LegitimacyJudgement, ProviderError> {
        let started = Instant::now();
        trace!(endpoint = %self.endpoint, chars = text.len(), "requesting legitimacy judgement");

        let response = self
            .client
            .post(self.endpoint.clone())
            .timeout(self.timeout)
            .json(&LegitimacyRequest { text, business_context })
            .send()
            .await
            .map_err(|e| classify_transport(&e, self.timeout))?;

        if let Some(error) = classify_status(response.status()) {
            return Err(error);
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| classify_transport(&e, self.timeout))?;
        let facets: LegitimacyFacets = serde_json::from_value(raw.clone())
            .map_err(|e| ProviderError::Rejected(format!("malformed judgement: {}", e)))?;

        let latency_ms = started.elapsed().as_millis() as u64;
        debug!(latency_ms, language = %facets.language, "legitimacy judgement received");
        Ok(LegitimacyJudgement {
            facets,
            raw,
            latency_ms,
        })
    }
}
