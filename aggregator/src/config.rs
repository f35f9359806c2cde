use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Endpoint path must start with '/': {0}")]
    InvalidPath(String),

    #[error("Enrichment concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("Search radius must be greater than 0")]
    InvalidRadius,

    #[error("Upstream {0} must be a hierarchical URL: {1}")]
    InvalidUpstream(&'static str, String),
}

/// How the combined payload is written back to the client.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// A single JSON document; the raw XML source is not fetched.
    Json,
    /// A well-formed `multipart/mixed` body: JSON part followed by the XML part.
    #[default]
    Multipart,
    /// The historical framing: bare `boundary` lines with no part headers.
    LegacyMultipart,
}

/// Aggregator configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for incoming requests
    pub listener: Listener,
    /// Admin listener for health and readiness probes
    pub admin_listener: Listener,
    /// Request path the aggregation endpoint is served on
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub response_mode: ResponseMode,
    /// Radius in meters of the dwelling object and building footprint searches
    #[serde(default = "default_search_radius")]
    pub search_radius_m: u32,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub xml_retry: RetryConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub upstreams: Upstreams,
}

fn default_path() -> String {
    "/api/get".to_string()
}

fn default_search_radius() -> u32 {
    70
}

impl Config {
    /// Validates the aggregator configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if !self.path.starts_with('/') {
            return Err(ValidationError::InvalidPath(self.path.clone()));
        }

        if self.enrichment.max_concurrency == 0 {
            return Err(ValidationError::InvalidConcurrency);
        }

        if self.search_radius_m == 0 {
            return Err(ValidationError::InvalidRadius);
        }

        // Object ids are appended to this one as a path segment
        if self.upstreams.ep_online.cannot_be_a_base() {
            return Err(ValidationError::InvalidUpstream(
                "ep_online",
                self.upstreams.ep_online.to_string(),
            ));
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    /// Validates the listener configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Timeouts {
    /// Applies to every outbound request, from connect to the end of the body
    pub http_timeout_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            http_timeout_secs: 30,
        }
    }
}

/// Retry policy of the raw XML source.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Additional attempts after the first one
    pub retries: u32,
    /// Fixed pause between attempts
    pub delay_ms: u64,
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 2,
            delay_ms: 1000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Upper bound on simultaneous per-object energy label requests
    pub max_concurrency: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
        }
    }
}

/// Where the EP-Online token comes from.
///
/// An inline `token` wins over `token_env`. Resolved once at startup.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    pub token: Option<String>,
    pub token_env: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token: None,
            token_env: "AUTH_TOKEN".to_string(),
        }
    }
}

impl AuthConfig {
    pub fn resolve(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var(&self.token_env).ok())
            .filter(|token| !token.is_empty())
    }
}

/// Base URLs of every upstream service.
///
/// Every entry defaults to the production endpoint. `national_label` and
/// `statistics` are optional registries; a `null` disables the bucket.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Upstreams {
    /// PDOK Locatieserver lookup
    pub locatieserver: Url,
    /// EP-Online energy label by addressable object, the id is appended as a path segment
    pub ep_online: Url,
    /// Utility network polygons WFS
    pub polygonentool: Url,
    /// BAG WFS (verblijfsobject and pand)
    pub bag_wfs: Url,
    /// Kadaster cadastral map WMS
    pub kadaster_wms: Url,
    /// Forwarding service, the target is passed in the `url` query parameter
    pub forward_proxy: Url,
    /// Dwelling type WMS serving the raw XML part
    pub woningtype_wms: Url,
    /// National energy label address check, fetched through the forwarding service
    pub national_label: Option<Url>,
    /// CBS neighbourhood statistics WFS
    pub statistics: Option<Url>,
}

impl Default for Upstreams {
    fn default() -> Self {
        Self {
            locatieserver: production_url("https://api.pdok.nl/bzk/locatieserver/search/v3_1/lookup"),
            ep_online: production_url(
                "https://public.ep-online.nl/api/v5/PandEnergielabel/AdresseerbaarObject",
            ),
            polygonentool: production_url("https://opendata.polygonentool.nl/wfs"),
            bag_wfs: production_url("https://service.pdok.nl/lv/bag/wfs/v2_0"),
            kadaster_wms: production_url(
                "https://service.pdok.nl/kadaster/kadastralekaart/wms/v5_0",
            ),
            forward_proxy: production_url("https://yxorp-pi.vercel.app/api/handler"),
            woningtype_wms: production_url("https://pico.geodan.nl/cgi-bin/qgis_mapserv.fcgi"),
            national_label: Some(production_url(
                "https://nationaalenergielabel.com/_next/data/INvAVGHNI6bLrkG05py1s/adrescheck.json",
            )),
            statistics: None,
        }
    }
}

fn production_url(raw: &'static str) -> Url {
    // The literals above are fixed and well-formed
    Url::parse(raw).unwrap_or_else(|e| panic!("invalid built-in upstream url {raw}: {e}"))
}
