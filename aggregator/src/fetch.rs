//! Outbound HTTP for every upstream source.
//!
//! Two fetch flavours exist, both of which turn failures into values:
//! - [`Fetcher::fetch_json`] makes one attempt and falls back to the
//!   canonical error value on any transport, status or decode failure.
//! - [`Fetcher::fetch_text_with_retry`] retries a text fetch a fixed number
//!   of times with a fixed pause and falls back to an error marker naming
//!   the URL.

use crate::config::{RetryConfig, Timeouts};
use crate::errors::{AggregatorError, Result};
use crate::metrics_defs::{UPSTREAM_FAILURES, XML_FETCH_ATTEMPTS};
use crate::payload::SourceResult;
use http::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value as JsonValue;
use std::time::Duration;
use url::Url;

/// Browser user agent; the dwelling type WMS rejects unknown clients.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36";

/// Returned by the retrying fetcher, followed by the URL, once every attempt failed.
pub const XML_RETRY_EXHAUSTED: &str =
    "<error>Failed to fetch XML data after multiple retries</error>";

/// Whether a request carries the EP-Online token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Credentials {
    Anonymous,
    Token,
}

/// HTTP client shared by all stages of a request.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    auth_token: Option<HeaderValue>,
}

impl Fetcher {
    pub fn new(timeouts: &Timeouts, auth_token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.http_timeout_secs))
            .build()?;

        let auth_token = auth_token
            .map(|token| {
                let mut value = HeaderValue::from_str(&token).map_err(|e| {
                    AggregatorError::InternalError(format!("Invalid auth token: {e}"))
                })?;
                value.set_sensitive(true);
                Ok::<_, AggregatorError>(value)
            })
            .transpose()?;

        if auth_token.is_none() {
            tracing::warn!("No auth token configured, energy label requests will be anonymous");
        }

        Ok(Self { client, auth_token })
    }

    fn json_headers(&self, credentials: Credentials) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let (Credentials::Token, Some(token)) = (credentials, &self.auth_token) {
            headers.insert(AUTHORIZATION, token.clone());
        }
        headers
    }

    /// Sends a GET and rejects non-2xx responses.
    async fn get(&self, url: &Url, headers: HeaderMap) -> Result<reqwest::Response> {
        let upstream = upstream_identifier(url);

        let response = self
            .client
            .get(url.clone())
            .headers(headers)
            .send()
            .await
            .map_err(|e| classify(&upstream, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AggregatorError::UpstreamStatus(upstream, status));
        }

        Ok(response)
    }

    /// Fetches and decodes a JSON document, propagating any failure.
    pub async fn try_fetch_json(&self, url: &Url, credentials: Credentials) -> Result<JsonValue> {
        let response = self.get(url, self.json_headers(credentials)).await?;
        response.json::<JsonValue>().await.map_err(|e| {
            AggregatorError::ResponseBodyError(upstream_identifier(url), e.to_string())
        })
    }

    /// Fetches a JSON document, never failing.
    ///
    /// Any failure is logged and counted against `source`, and the canonical
    /// error value is returned in place of the document.
    pub async fn fetch_json(
        &self,
        source: &'static str,
        url: &Url,
        credentials: Credentials,
    ) -> SourceResult {
        match self.try_fetch_json(url, credentials).await {
            Ok(json) => SourceResult::Json(json),
            Err(e) => {
                tracing::error!(source, url = %url, error = %e, "Error fetching upstream");
                shared::counter!(UPSTREAM_FAILURES, "source" => source).increment(1);
                SourceResult::fallback()
            }
        }
    }

    async fn try_fetch_text(&self, url: &Url) -> Result<String> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));

        let response = self.get(url, headers).await?;
        response.text().await.map_err(|e| {
            AggregatorError::ResponseBodyError(upstream_identifier(url), e.to_string())
        })
    }

    /// Fetches a text document with up to `policy.retries` additional attempts.
    ///
    /// Attempts run one after another with `policy.delay()` in between. When
    /// all of them fail the result is an error holding [`XML_RETRY_EXHAUSTED`]
    /// followed by the URL.
    pub async fn fetch_text_with_retry(&self, url: &Url, policy: &RetryConfig) -> SourceResult {
        let attempts = policy.retries.saturating_add(1);

        for attempt in 1..=attempts {
            shared::counter!(XML_FETCH_ATTEMPTS).increment(1);

            match self.try_fetch_text(url).await {
                Ok(text) => return SourceResult::Text(text),
                Err(e) => {
                    tracing::warn!(url = %url, attempt, error = %e, "Error fetching XML");
                    if attempt < attempts {
                        tokio::time::sleep(policy.delay()).await;
                    }
                }
            }
        }

        shared::counter!(UPSTREAM_FAILURES, "source" => "xml").increment(1);
        SourceResult::Error(format!("{XML_RETRY_EXHAUSTED}{url}"))
    }
}

/// Use host as identifier for error messages
fn upstream_identifier(url: &Url) -> String {
    url.host_str().unwrap_or(url.as_str()).to_string()
}

fn classify(upstream: &str, error: reqwest::Error) -> AggregatorError {
    if error.is_timeout() {
        AggregatorError::UpstreamTimeout(upstream.to_string())
    } else {
        AggregatorError::UpstreamRequestFailed(upstream.to_string(), error.to_string())
    }
}
