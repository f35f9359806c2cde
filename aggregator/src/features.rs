//! GeoJSON features returned by the BAG WFS.
//!
//! Only the members the join needs are typed. Everything else a feature
//! carries (`type`, `id`, `bbox`, ...) is kept in `other` and written back
//! unchanged.

use crate::payload::SourceResult;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// A single GeoJSON feature: a dwelling object (`verblijfsobject`) or a
/// building footprint (`pand`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// `None` when absent; an explicit `null` is kept as `Some(Null)`
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub geometry: Option<JsonValue>,

    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub properties: Option<JsonValue>,

    #[serde(flatten)]
    pub other: JsonMap<String, JsonValue>,
}

impl Feature {
    /// The feature's own BAG identifier.
    pub fn identificatie(&self) -> Option<String> {
        self.property_id("identificatie")
    }

    /// The BAG identifier of the building a dwelling object belongs to.
    pub fn pandidentificatie(&self) -> Option<String> {
        self.property_id("pandidentificatie")
    }

    // Identifiers are strings in the BAG JSON output, but numeric ids are
    // accepted too. Empty strings count as missing.
    fn property_id(&self, name: &str) -> Option<String> {
        match self.properties.as_ref()?.get(name)? {
            JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<JsonValue>, D::Error> {
    JsonValue::deserialize(deserializer).map(Some)
}

/// Extracts the `features` array from a WFS response.
///
/// Error results, responses without a `features` array, and array entries
/// that are not features all contribute nothing.
pub fn features_of(result: &SourceResult) -> Vec<Feature> {
    let Some(features) = result
        .as_json()
        .and_then(|json| json.get("features"))
        .and_then(JsonValue::as_array)
    else {
        return Vec::new();
    };

    features
        .iter()
        .filter_map(|raw| match Feature::deserialize(raw) {
            Ok(feature) => Some(feature),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed feature");
                None
            }
        })
        .collect()
}
