//! Quay to stop-place reference mapping, refreshed from Tiamat.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::anshar::FeedFetcher;
use crate::metrics::Metrics;

/// Process-wide mapping from quay ids to their parent stop-place ids.
/// Replaced wholesale on every successful refresh; readers see either the
/// old or the new mapping, never a mix.
#[derive(Debug, Default)]
pub struct QuayStopPlaceMap {
    inner: RwLock<HashMap<String, String>>,
}

impl QuayStopPlaceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, quay_ref: &str) -> Option<String> {
        self.inner
            .read()
            .expect("quay map lock poisoned")
            .get(quay_ref)
            .cloned()
    }

    pub fn replace_all(&self, mapping: HashMap<String, String>) {
        *self.inner.write().expect("quay map lock poisoned") = mapping;
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("quay map lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tiamat publishes the mapping as a JSON document of stop-place id to
/// its quay ids; the lookup direction here is quay to stop place.
pub fn parse_stop_place_quays(body: &str) -> Result<HashMap<String, String>, serde_json::Error> {
    let stop_places: HashMap<String, Vec<String>> = serde_json::from_str(body)?;
    let mut quay_to_stop_place = HashMap::new();
    for (stop_place, quays) in stop_places {
        for quay in quays {
            quay_to_stop_place.insert(quay, stop_place.clone());
        }
    }
    Ok(quay_to_stop_place)
}

/// Scheduled workflow that pulls the mapping and swaps it in.
pub struct TiamatRefresh {
    fetcher: Arc<dyn FeedFetcher>,
    url: String,
    map: Arc<QuayStopPlaceMap>,
    metrics: Arc<Metrics>,
}

impl TiamatRefresh {
    pub fn new(
        fetcher: Arc<dyn FeedFetcher>,
        url: String,
        map: Arc<QuayStopPlaceMap>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            fetcher,
            url,
            map,
            metrics,
        }
    }

    pub async fn run(&self) {
        let body = match self.fetcher.fetch_document(&self.url).await {
            Ok(body) => body,
            Err(e) => {
                self.metrics.record_upstream_error();
                warn!(url = %self.url, error = %e, "Tiamat refresh failed, retrying on next tick");
                return;
            }
        };

        match parse_stop_place_quays(&body) {
            Ok(mapping) => {
                let quays = mapping.len();
                self.map.replace_all(mapping);
                info!(quays, "Refreshed quay to stop-place mapping from Tiamat");
            }
            Err(e) => {
                self.metrics.record_malformed_payload();
                warn!(bytes = body.len(), error = %e, "Discarding unparseable Tiamat document");
            }
        }
    }
}
