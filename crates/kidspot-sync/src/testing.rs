//! In-test fakes for sources and enrichment.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kidspot_adapters::{
    AdapterContext, AdapterError, FetchedPage, PlaceMatch, SearchArea, SourceAccess, SourceAdapter,
    SpotEnricher,
};
use kidspot_core::{CandidateSpot, SpotSource};
use kidspot_storage::HttpFetcher;

/// Serves canned candidates, or fails, without touching the network.
pub struct CannedAdapter {
    pub source: SpotSource,
    pub spots: Result<Vec<CandidateSpot>, String>,
    pub delay: Option<Duration>,
    /// Raised as a side effect of collecting.
    pub raise_on_collect: Option<Arc<AtomicBool>>,
}

impl CannedAdapter {
    pub fn serving(source: SpotSource, spots: Vec<CandidateSpot>) -> Self {
        Self {
            source,
            spots: Ok(spots),
            delay: None,
            raise_on_collect: None,
        }
    }

    pub fn failing(source: SpotSource) -> Self {
        Self {
            source,
            spots: Err("connection reset".into()),
            delay: None,
            raise_on_collect: None,
        }
    }
}

pub fn canned(source: SpotSource, spots: Vec<CandidateSpot>) -> Arc<dyn SourceAdapter> {
    Arc::new(CannedAdapter::serving(source, spots))
}

#[async_trait]
impl SourceAdapter for CannedAdapter {
    fn source(&self) -> SpotSource {
        self.source
    }

    fn access(&self) -> SourceAccess {
        SourceAccess::Synthetic
    }

    async fn fetch(
        &self,
        _http: &HttpFetcher,
        _ctx: &AdapterContext,
        _area: &SearchArea,
    ) -> Result<Vec<FetchedPage>, AdapterError> {
        Ok(Vec::new())
    }

    fn parse(&self, _page: &FetchedPage, _ctx: &AdapterContext) -> Result<Vec<CandidateSpot>, AdapterError> {
        Ok(Vec::new())
    }

    async fn collect(
        &self,
        _http: &HttpFetcher,
        _ctx: &AdapterContext,
        _area: &SearchArea,
    ) -> Result<Vec<CandidateSpot>, AdapterError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(flag) = &self.raise_on_collect {
            flag.store(true, Ordering::SeqCst);
        }
        self.spots.clone().map_err(AdapterError::Message)
    }
}

/// Answers every lookup with the same outcome and counts calls.
pub struct ScriptedEnricher {
    pub outcome: fn(&CandidateSpot) -> Result<Option<PlaceMatch>, AdapterError>,
    pub calls: AtomicUsize,
}

impl ScriptedEnricher {
    pub fn new(outcome: fn(&CandidateSpot) -> Result<Option<PlaceMatch>, AdapterError>) -> Self {
        Self {
            outcome,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpotEnricher for ScriptedEnricher {
    fn is_configured(&self) -> bool {
        true
    }

    async fn enrich(
        &self,
        _http: &HttpFetcher,
        _ctx: &AdapterContext,
        spot: &CandidateSpot,
    ) -> Result<Option<PlaceMatch>, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.outcome)(spot)
    }
}
