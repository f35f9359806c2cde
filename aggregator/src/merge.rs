//! Joins dwelling objects with their energy labels and building footprints.
//!
//! A dwelling object (`verblijfsobject`) makes it into the output only when
//! all of the following hold:
//! - an enrichment record exists for its `identificatie`
//! - that record holds data rather than an error
//! - a building footprint (`pand`) exists whose `identificatie` equals the
//!   object's `pandidentificatie`
//!
//! Anything else is dropped without a trace in the response. The join only
//! borrows its inputs, so repeating it gives the same result.

use crate::enrichment::{EnrichmentIndex, EnrichmentRecord};
use crate::features::Feature;
use serde::Serialize;
use serde_json::Value as JsonValue;

/// A dwelling object with its energy label and its building's geometry attached.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MergedFeature {
    #[serde(flatten)]
    pub feature: Feature,

    /// Energy label data of the dwelling object
    #[serde(rename = "additionalData")]
    pub additional_data: JsonValue,

    /// Always a single entry holding the footprint geometry
    #[serde(rename = "additionalData2")]
    pub additional_data2: Vec<FootprintGeometry>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FootprintGeometry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<JsonValue>,
}

/// Joins `objects` against `enrichments` and `footprints`, preserving the
/// order of `objects`.
pub fn merge_features(
    objects: &[Feature],
    enrichments: &EnrichmentIndex,
    footprints: &[Feature],
) -> Vec<MergedFeature> {
    objects
        .iter()
        .filter_map(|object| merge_one(object, enrichments, footprints))
        .collect()
}

fn merge_one(
    object: &Feature,
    enrichments: &EnrichmentIndex,
    footprints: &[Feature],
) -> Option<MergedFeature> {
    let identificatie = object.identificatie()?;
    let EnrichmentRecord::Data(data) = enrichments.get(&identificatie)? else {
        return None;
    };

    let pand_id = object.pandidentificatie()?;
    // Radius searches return at most a few hundred footprints.
    let footprint = footprints
        .iter()
        .find(|pand| pand.identificatie().as_deref() == Some(pand_id.as_str()))?;

    Some(MergedFeature {
        feature: object.clone(),
        additional_data: data.clone(),
        additional_data2: vec![FootprintGeometry {
            geometry: footprint.geometry.clone(),
        }],
    })
}
