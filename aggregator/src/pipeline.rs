//! Fan-out-and-join pipeline
//!
//! One request runs through the stages below. Each stage starts only after
//! the previous one has fully settled.
//!
//! ```text
//!  RequestContext
//!        │
//!        ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │ 1. Primary fan-out (concurrent)                            │
//! │    LOOKUP · EPON · NETB · OBJECT · [NATLAB] · [CBS]         │
//! └──────────────────────────┬─────────────────────────────────┘
//!                            ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │ 2. Dependent stage (in order)                              │
//! │    KADAS → verblijfsobject radius → pand radius            │
//! │    any error value here fails the request                  │
//! └──────────────────────────┬─────────────────────────────────┘
//!                            ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │ 3. Enrichment (concurrent, capped)                         │
//! │    one energy label lookup per verblijfsobject             │
//! └──────────────────────────┬─────────────────────────────────┘
//!                            ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │ 4. Join: verblijfsobject + label + pand geometry → MERGED  │
//! └──────────────────────────┬─────────────────────────────────┘
//!                            ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │ 5. Assembly (+ dwelling type XML with retries, multipart)  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Upstream failures in stage 1 only affect their own bucket: they show up
//! in the payload as `{"error": "error"}`.

use crate::config::{Config, ResponseMode, RetryConfig};
use crate::enrichment::EnrichmentStage;
use crate::errors::{AggregatorError, Result};
use crate::features::features_of;
use crate::fetch::{Credentials, Fetcher};
use crate::merge::merge_features;
use crate::metrics_defs::MERGED_FEATURES;
use crate::payload::{AssembledResponse, Bucket, CombinedPayload, SourceResult, assemble};
use crate::upstreams::{Coordinate, UpstreamUrls};
use std::sync::Arc;

/// The four identifiers every request must carry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    /// Locatieserver id of the address
    pub location_id: String,
    /// BAG id of the addressable object (verblijfsobject)
    pub object_id: String,
    /// `"x,y"` in the radius search reference system
    pub coordinates: String,
    /// Four-number extent used by the bbox-filtered sources
    pub bbox: String,
}

/// Results of the primary fan-out.
#[derive(Debug)]
pub struct PrimaryResults {
    pub lookup: SourceResult,
    pub energy_label: SourceResult,
    pub network: SourceResult,
    pub object: SourceResult,
    pub national_label: Option<SourceResult>,
    pub statistics: Option<SourceResult>,
}

/// Results of the dependent stage.
#[derive(Debug)]
pub struct DependentResults {
    pub cadastral: SourceResult,
    pub dwelling_objects: SourceResult,
    pub footprints: SourceResult,
}

/// Runs the whole pipeline for a request.
///
/// Cheap to clone and safe to share between connections: it holds no
/// per-request state.
#[derive(Clone)]
pub struct Aggregator {
    fetcher: Fetcher,
    urls: Arc<UpstreamUrls>,
    enrichment: EnrichmentStage,
    response_mode: ResponseMode,
    xml_retry: RetryConfig,
}

impl Aggregator {
    pub fn new(config: &Config, auth_token: Option<String>) -> Result<Self> {
        let fetcher = Fetcher::new(&config.timeouts, auth_token)?;
        let urls = Arc::new(UpstreamUrls::new(
            config.upstreams.clone(),
            config.search_radius_m,
        ));
        let enrichment = EnrichmentStage::new(
            fetcher.clone(),
            urls.clone(),
            config.enrichment.max_concurrency,
        );

        Ok(Self {
            fetcher,
            urls,
            enrichment,
            response_mode: config.response_mode,
            xml_retry: config.xml_retry.clone(),
        })
    }

    /// Runs all stages and renders the response body.
    pub async fn respond(&self, request: &RequestContext) -> Result<AssembledResponse> {
        let payload = self.aggregate(request).await?;

        let raw_xml = match self.response_mode {
            ResponseMode::Json => None,
            ResponseMode::Multipart | ResponseMode::LegacyMultipart => {
                let url = self.urls.dwelling_type_xml(&request.bbox);
                Some(self.fetcher.fetch_text_with_retry(&url, &self.xml_retry).await)
            }
        };

        assemble(self.response_mode, &payload, raw_xml.as_ref())
    }

    /// Runs the fetch stages and the join, producing the combined payload.
    pub async fn aggregate(&self, request: &RequestContext) -> Result<CombinedPayload> {
        let primary = self.primary_fan_out(request).await?;
        let dependent = self.dependent_stage(request).await?;

        let objects = features_of(&dependent.dwelling_objects);
        let footprints = features_of(&dependent.footprints);
        let enrichments = self.enrichment.run(&objects).await;
        let merged = merge_features(&objects, &enrichments, &footprints);

        tracing::debug!(
            objects = objects.len(),
            footprints = footprints.len(),
            enriched = enrichments.len(),
            merged = merged.len(),
            "Joined dwelling objects"
        );
        shared::histogram!(MERGED_FEATURES).record(merged.len() as f64);

        let mut payload = CombinedPayload::new();
        payload.insert(Bucket::Lookup, primary.lookup);
        payload.insert(Bucket::Epon, primary.energy_label);
        payload.insert(Bucket::Netb, primary.network);
        payload.insert(Bucket::Kadas, dependent.cadastral);
        payload.insert(Bucket::Object, primary.object);
        if let Some(national_label) = primary.national_label {
            payload.insert(Bucket::Natlab, national_label);
        }
        if let Some(statistics) = primary.statistics {
            payload.insert(Bucket::Cbs, statistics);
        }
        payload.set_merged(merged);

        Ok(payload)
    }

    /// Issues the independent lookups together and waits for all of them.
    pub async fn primary_fan_out(&self, request: &RequestContext) -> Result<PrimaryResults> {
        // Build every URL first so nothing is sent when one of them is invalid
        let lookup_url = self.urls.lookup(&request.location_id);
        let energy_label_url = self.urls.energy_label(&request.object_id)?;
        let network_url = self.urls.network_polygons(&request.bbox);
        let object_url = self.urls.object_by_id(&request.object_id);
        let national_label_url = self.urls.national_label(&request.object_id);
        let statistics_url = self.urls.statistics(&request.bbox);

        let (lookup, energy_label, network, object, national_label, statistics) = tokio::join!(
            self.fetcher
                .fetch_json("lookup", &lookup_url, Credentials::Anonymous),
            self.fetcher
                .fetch_json("epon", &energy_label_url, Credentials::Token),
            self.fetcher
                .fetch_json("netb", &network_url, Credentials::Anonymous),
            self.fetcher
                .fetch_json("object", &object_url, Credentials::Anonymous),
            self.fetch_optional("natlab", national_label_url.as_ref()),
            self.fetch_optional("cbs", statistics_url.as_ref()),
        );

        Ok(PrimaryResults {
            lookup,
            energy_label,
            network,
            object,
            national_label,
            statistics,
        })
    }

    async fn fetch_optional(
        &self,
        source: &'static str,
        url: Option<&url::Url>,
    ) -> Option<SourceResult> {
        match url {
            Some(url) => Some(
                self.fetcher
                    .fetch_json(source, url, Credentials::Anonymous)
                    .await,
            ),
            None => None,
        }
    }

    /// Cadastral parcel, then dwelling objects, then footprints, one at a time.
    ///
    /// Fails with [`AggregatorError::DependentStageFailed`] as soon as one of
    /// them comes back as an error value or a falsy document (`null`,
    /// `false`, `0`, `""`).
    pub async fn dependent_stage(&self, request: &RequestContext) -> Result<DependentResults> {
        let point = Coordinate::parse(&request.coordinates);

        let cadastral = self
            .fetch_required("kadas", &self.urls.cadastral_parcel(&request.bbox))
            .await?;
        let dwelling_objects = self
            .fetch_required("verblijfsobject", &self.urls.dwelling_objects_near(point))
            .await?;
        let footprints = self
            .fetch_required("pand", &self.urls.footprints_near(point))
            .await?;

        Ok(DependentResults {
            cadastral,
            dwelling_objects,
            footprints,
        })
    }

    async fn fetch_required(&self, source: &'static str, url: &url::Url) -> Result<SourceResult> {
        let result = self
            .fetcher
            .fetch_json(source, url, Credentials::Anonymous)
            .await;
        if result.is_error() || result.is_falsy() {
            return Err(AggregatorError::DependentStageFailed {
                source_name: source,
            });
        }
        Ok(result)
    }
}
