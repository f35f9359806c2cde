use thiserror::Error;

/// Result type alias for aggregator operations
pub type Result<T, E = AggregatorError> = std::result::Result<T, E>;

/// Errors that can occur while aggregating a request
#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("Upstream request failed for {0}: {1}")]
    UpstreamRequestFailed(String, String),

    #[error("Upstream {0} returned status {1}")]
    UpstreamStatus(String, http::StatusCode),

    #[error("Upstream timeout for {0}")]
    UpstreamTimeout(String),

    #[error("Failed to decode response body from {0}: {1}")]
    ResponseBodyError(String, String),

    /// A cadastral or radius search came back as an error value
    #[error("Error fetching data from the bbox or WFS API")]
    DependentStageFailed { source_name: &'static str },

    #[error("Response serialization error: {0}")]
    ResponseSerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClientError(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
