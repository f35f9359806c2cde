//! Per-object energy label lookups for the dwelling objects of a radius search.

use crate::errors::AggregatorError;
use crate::features::Feature;
use crate::fetch::{Credentials, Fetcher};
use crate::metrics_defs::ENRICHMENT_REQUESTS;
use crate::upstreams::UpstreamUrls;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Energy label lookup outcome for one dwelling object.
#[derive(Clone, Debug, PartialEq)]
pub enum EnrichmentRecord {
    Data(JsonValue),
    Failed(String),
}

impl EnrichmentRecord {
    fn from_result(result: Result<JsonValue, AggregatorError>) -> Self {
        match result {
            Ok(data) => EnrichmentRecord::Data(data),
            // Status failures are recorded by their reason phrase alone
            Err(AggregatorError::UpstreamStatus(_, status)) => EnrichmentRecord::Failed(
                status
                    .canonical_reason()
                    .unwrap_or(status.as_str())
                    .to_string(),
            ),
            Err(e) => EnrichmentRecord::Failed(e.to_string()),
        }
    }
}

/// Enrichment records by dwelling object `identificatie`. Later inserts win.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnrichmentIndex(HashMap<String, EnrichmentRecord>);

impl EnrichmentIndex {
    pub fn insert(&mut self, identificatie: String, record: EnrichmentRecord) {
        self.0.insert(identificatie, record);
    }

    pub fn get(&self, identificatie: &str) -> Option<&EnrichmentRecord> {
        self.0.get(identificatie)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, EnrichmentRecord)> for EnrichmentIndex {
    fn from_iter<I: IntoIterator<Item = (String, EnrichmentRecord)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Fans out one energy label request per dwelling object.
///
/// At most `max_concurrency` requests are in flight at once. Objects without
/// an `identificatie` are skipped. A failed lookup only affects its own
/// record.
#[derive(Clone)]
pub struct EnrichmentStage {
    fetcher: Fetcher,
    urls: Arc<UpstreamUrls>,
    max_concurrency: usize,
}

impl EnrichmentStage {
    pub fn new(fetcher: Fetcher, urls: Arc<UpstreamUrls>, max_concurrency: usize) -> Self {
        Self {
            fetcher,
            urls,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub async fn run(&self, objects: &[Feature]) -> EnrichmentIndex {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut join_set = JoinSet::new();

        let identifiers: Vec<String> = objects.iter().filter_map(Feature::identificatie).collect();
        for (position, identificatie) in identifiers.iter().enumerate() {
            let url = match self.urls.forwarded_energy_label(identificatie) {
                Ok(url) => url,
                Err(e) => {
                    join_set.spawn(async move { (position, Err(e)) });
                    continue;
                }
            };

            let fetcher = self.fetcher.clone();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                // The semaphore is never closed
                let _permit = semaphore.acquire_owned().await;
                shared::counter!(ENRICHMENT_REQUESTS).increment(1);
                let result = fetcher.try_fetch_json(&url, Credentials::Token).await;
                (position, result)
            });
        }

        // Slots are filled as tasks finish, but applied in input order so a
        // repeated identifier resolves to its last occurrence.
        let mut records: Vec<Option<EnrichmentRecord>> = vec![None; identifiers.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((position, result)) => {
                    if let Err(e) = &result {
                        tracing::debug!(identificatie = %identifiers[position], error = %e, "Energy label lookup failed");
                    }
                    records[position] = Some(EnrichmentRecord::from_result(result));
                }
                Err(e) => tracing::error!("Enrichment task panicked: {}", e),
            }
        }

        identifiers
            .into_iter()
            .zip(records)
            .filter_map(|(identificatie, record)| Some((identificatie, record?)))
            .collect()
    }
}
