//! The combined payload and its wire formats.

use crate::config::ResponseMode;
use crate::errors::Result;
use crate::merge::MergedFeature;
use hyper::body::Bytes;
use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;

/// Message carried by every error produced by `Fetcher::fetch_json`.
pub const FALLBACK_ERROR: &str = "error";

/// Outcome of a single upstream fetch. Failures are values, never raised.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceResult {
    Json(JsonValue),
    Text(String),
    Error(String),
}

impl SourceResult {
    /// The canonical error value, serialized as `{"error": "error"}`.
    pub fn fallback() -> Self {
        SourceResult::Error(FALLBACK_ERROR.to_string())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SourceResult::Error(_))
    }

    /// A successful fetch whose document is `null`, `false`, `0` or empty text.
    pub fn is_falsy(&self) -> bool {
        match self {
            SourceResult::Json(JsonValue::Null | JsonValue::Bool(false)) => true,
            SourceResult::Json(JsonValue::Number(n)) => n.as_f64() == Some(0.0),
            SourceResult::Json(JsonValue::String(s)) | SourceResult::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            SourceResult::Json(json) => Some(json),
            _ => None,
        }
    }

    /// Text to place verbatim in a raw response part.
    pub fn as_raw_text(&self) -> String {
        match self {
            SourceResult::Json(json) => json.to_string(),
            SourceResult::Text(text) | SourceResult::Error(text) => text.clone(),
        }
    }
}

impl Serialize for SourceResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SourceResult::Json(json) => json.serialize(serializer),
            SourceResult::Text(text) => serializer.serialize_str(text),
            SourceResult::Error(message) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", message)?;
                map.end()
            }
        }
    }
}

/// Named buckets of the combined payload, in output order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Bucket {
    /// Locatieserver lookup
    Lookup,
    /// EP-Online energy label
    Epon,
    /// Utility network polygons
    Netb,
    /// Cadastral parcel
    Kadas,
    /// BAG object by identifier
    Object,
    /// National energy label registry
    Natlab,
    /// CBS neighbourhood statistics
    Cbs,
}

/// Everything gathered for one request.
#[derive(Debug, Default, Serialize)]
pub struct CombinedPayload {
    #[serde(flatten)]
    buckets: IndexMap<Bucket, SourceResult>,
    #[serde(rename = "MERGED")]
    merged: Vec<MergedFeature>,
}

impl CombinedPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a bucket, replacing any previous value. Buckets are always
    /// written in `Bucket` order, whatever the insertion order.
    pub fn insert(&mut self, bucket: Bucket, result: SourceResult) {
        self.buckets.insert(bucket, result);
        self.buckets.sort_keys();
    }

    pub fn set_merged(&mut self, merged: Vec<MergedFeature>) {
        self.merged = merged;
    }

    pub fn get(&self, bucket: Bucket) -> Option<&SourceResult> {
        self.buckets.get(&bucket)
    }

    pub fn merged(&self) -> &[MergedFeature] {
        &self.merged
    }
}

const MULTIPART_BOUNDARY: &str = "geofuse-boundary";
const MULTIPART_CONTENT_TYPE: &str = "multipart/mixed; boundary=\"geofuse-boundary\"";
const LEGACY_BOUNDARY: &str = "boundary";
const LEGACY_CONTENT_TYPE: &str = "multipart/mixed; boundary=\"boundary\"";

/// A rendered response body and the content type describing it.
#[derive(Debug)]
pub struct AssembledResponse {
    pub content_type: &'static str,
    pub body: Bytes,
}

/// Renders the payload, with `raw_part` as the second part in the multipart modes.
///
/// `raw_part` is ignored in `ResponseMode::Json`.
pub fn assemble(
    mode: ResponseMode,
    payload: &CombinedPayload,
    raw_part: Option<&SourceResult>,
) -> Result<AssembledResponse> {
    let json = serde_json::to_string(payload)?;
    let raw = raw_part.map(SourceResult::as_raw_text).unwrap_or_default();

    let response = match mode {
        ResponseMode::Json => AssembledResponse {
            content_type: "application/json",
            body: Bytes::from(json),
        },
        ResponseMode::Multipart => {
            let mut body = String::with_capacity(json.len() + raw.len() + 160);
            body.push_str(&format!("--{MULTIPART_BOUNDARY}\r\n"));
            body.push_str("Content-Type: application/json\r\n\r\n");
            body.push_str(&json);
            body.push_str(&format!("\r\n--{MULTIPART_BOUNDARY}\r\n"));
            body.push_str("Content-Type: text/xml; charset=utf-8\r\n\r\n");
            body.push_str(&raw);
            body.push_str(&format!("\r\n--{MULTIPART_BOUNDARY}--\r\n"));
            AssembledResponse {
                content_type: MULTIPART_CONTENT_TYPE,
                body: Bytes::from(body),
            }
        }
        // Consumers of the historical endpoint split on the bare token.
        ResponseMode::LegacyMultipart => AssembledResponse {
            content_type: LEGACY_CONTENT_TYPE,
            body: Bytes::from(format!(
                "{LEGACY_BOUNDARY}\r\n{json}\r\n{LEGACY_BOUNDARY}\r\n{raw}\r\n{LEGACY_BOUNDARY}--\r\n"
            )),
        },
    };

    Ok(response)
}
