use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use kidspot_adapters::{AdapterContext, SearchArea, SourceAdapter};
use kidspot_core::{CandidateSpot, Category, GeoPoint};
use kidspot_storage::{cache_key, HttpFetcher, SearchCache};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::dedup::dedup_by_name;

pub const DEFAULT_MIN_CHILD_SCORE: u8 = 30;
pub const MAX_RESULTS: usize = 100;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid search input: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub categories: Option<Vec<Category>>,
    pub min_child_score: Option<u8>,
}

impl SearchFilters {
    pub fn min_score(&self) -> u8 {
        self.min_child_score.unwrap_or(DEFAULT_MIN_CHILD_SCORE)
    }

    fn fingerprint(&self) -> String {
        let mut categories: Vec<&str> = self
            .categories
            .iter()
            .flatten()
            .map(Category::as_str)
            .collect();
        categories.sort_unstable();
        format!("{}|{}", categories.join(","), self.min_score())
    }
}

/// Fans a search out to every adapter, then filters, dedups and orders the
/// merged candidates. A failing adapter only shrinks the result.
pub struct AggregationEngine {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    http: Arc<HttpFetcher>,
    cache: Option<Arc<SearchCache>>,
    utc_offset_hours: i32,
}

impl AggregationEngine {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, http: Arc<HttpFetcher>) -> Self {
        Self {
            adapters,
            http,
            cache: None,
            utc_offset_hours: 9,
        }
    }

    pub fn with_cache(mut self, cache: Arc<SearchCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_utc_offset(mut self, hours: i32) -> Self {
        self.utc_offset_hours = hours;
        self
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    pub async fn search(
        &self,
        lat: f64,
        lon: f64,
        radius_m: f64,
        filters: &SearchFilters,
    ) -> Result<Vec<CandidateSpot>, SearchError> {
        self.search_at(Utc::now(), lat, lon, radius_m, filters).await
    }

    /// `search` with the clock pinned, for reproducible hours and crowd fields.
    pub async fn search_at(
        &self,
        now: DateTime<Utc>,
        lat: f64,
        lon: f64,
        radius_m: f64,
        filters: &SearchFilters,
    ) -> Result<Vec<CandidateSpot>, SearchError> {
        let area = validate(lat, lon, radius_m)?;

        let key = cache_key(lat, lon, area.radius_m, &filters.fingerprint());
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&key).await {
                debug!(results = hit.len(), "search served from cache");
                return Ok(hit);
            }
        }

        let ctx = AdapterContext::new(Uuid::new_v4(), now, self.utc_offset_hours);
        let span = info_span!("search", run_id = %ctx.run_id, lat, lon, radius_m = area.radius_m);
        let merged = self.collect_all(&ctx, &area).instrument(span).await;
        let results = merge_candidates(merged, filters);

        if let Some(cache) = &self.cache {
            cache.insert(key, results.clone()).await;
        }
        Ok(results)
    }

    async fn collect_all(&self, ctx: &AdapterContext, area: &SearchArea) -> Vec<CandidateSpot> {
        let calls = self.adapters.iter().map(|adapter| async move {
            match adapter.collect(&self.http, ctx, area).await {
                Ok(spots) => {
                    debug!(source = %adapter.source(), count = spots.len(), "source returned candidates");
                    spots
                }
                Err(err) => {
                    warn!(source = %adapter.source(), error = %err, "source fetch failed; continuing without it");
                    Vec::new()
                }
            }
        });
        join_all(calls).await.into_iter().flatten().collect()
    }
}

fn validate(lat: f64, lon: f64, radius_m: f64) -> Result<SearchArea, SearchError> {
    if !GeoPoint::new(lat, lon).is_valid() {
        return Err(SearchError::InvalidInput(format!(
            "coordinates ({lat}, {lon}) are not a valid WGS84 position"
        )));
    }
    if !radius_m.is_finite() || radius_m <= 0.0 {
        return Err(SearchError::InvalidInput(format!("radius {radius_m} must be positive")));
    }
    Ok(SearchArea::new(lat, lon, radius_m.round().min(f64::from(u32::MAX)) as u32))
}

/// Category filter, score floor, name dedup, then trending-first ordering by
/// descending score, capped at [`MAX_RESULTS`].
pub fn merge_candidates(candidates: Vec<CandidateSpot>, filters: &SearchFilters) -> Vec<CandidateSpot> {
    let min_score = filters.min_score();
    let kept: Vec<CandidateSpot> = candidates
        .into_iter()
        .filter(|s| {
            filters
                .categories
                .as_ref()
                .map_or(true, |wanted| wanted.contains(&s.category))
        })
        .filter(|s| s.child_friendly_score >= min_score)
        .collect();

    let mut results = dedup_by_name(kept);
    results.sort_by(|a, b| {
        b.is_trending
            .cmp(&a.is_trending)
            .then(b.child_friendly_score.cmp(&a.child_friendly_score))
    });
    results.truncate(MAX_RESULTS);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kidspot_adapters::{buzz_candidate, candidate_from_tags};
    use kidspot_core::{SpotSource, TagBag};
    use kidspot_storage::HttpClientConfig;

    use crate::testing::{canned, CannedAdapter};

    fn broken(source: SpotSource) -> Arc<dyn SourceAdapter> {
        Arc::new(CannedAdapter::failing(source))
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 4, 3, 0, 0).unwrap()
    }

    fn ctx() -> AdapterContext {
        AdapterContext::new(Uuid::nil(), now(), 9)
    }

    fn engine(adapters: Vec<Arc<dyn SourceAdapter>>) -> AggregationEngine {
        let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        AggregationEngine::new(adapters, Arc::new(http))
    }

    fn tagged(name: &str, pairs: &[(&str, &str)]) -> CandidateSpot {
        let tags: TagBag = pairs.iter().copied().collect();
        candidate_from_tags(name, &tags, SpotSource::Osm, GeoPoint::new(34.97, 138.38), &ctx())
    }

    fn scored(name: &str, score: u8, trending: bool) -> CandidateSpot {
        let mut spot = CandidateSpot::new(name, Category::Cafe, SpotSource::Osm, now());
        spot.child_friendly_score = score;
        spot.is_trending = trending;
        spot
    }

    #[tokio::test]
    async fn playground_and_trending_duplicate_collapse() {
        let playground = tagged("こどもの広場", &[("leisure", "park"), ("changing_table", "yes")]);
        let geo = canned(SpotSource::Osm, vec![playground, scored("ひまわり食堂", 70, false)]);
        let buzz = canned(
            SpotSource::Trending,
            vec![
                buzz_candidate("こどもの広場", Category::Playground, SpotSource::Trending, now()),
                scored("話題のキッズカフェ", 70, true),
            ],
        );

        let filters = SearchFilters {
            min_child_score: Some(50),
            ..Default::default()
        };
        let results = engine(vec![geo, buzz])
            .search_at(now(), 34.97, 138.38, 5000.0, &filters)
            .await
            .unwrap();

        let playgrounds: Vec<&CandidateSpot> = results.iter().filter(|s| s.name == "こどもの広場").collect();
        assert_eq!(playgrounds.len(), 1);
        assert_eq!(playgrounds[0].source, SpotSource::Osm);
        assert!(playgrounds[0].child_friendly_score >= 50);

        let names: Vec<&str> = results.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["話題のキッズカフェ", "ひまわり食堂", "こどもの広場"]);
    }

    #[tokio::test]
    async fn failing_source_degrades_to_fewer_results() {
        let results = engine(vec![
            broken(SpotSource::Wikipedia),
            canned(SpotSource::Osm, vec![scored("さくら公園", 60, false)]),
        ])
        .search_at(now(), 34.97, 138.38, 1000.0, &SearchFilters::default())
        .await
        .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn invalid_coordinates_fail_outright() {
        let engine = engine(vec![canned(SpotSource::Osm, Vec::new())]);
        let filters = SearchFilters::default();
        for (lat, lon, radius) in [(f64::NAN, 138.0, 1000.0), (95.0, 138.0, 1000.0), (34.97, 138.38, 0.0)] {
            let err = engine.search_at(now(), lat, lon, radius, &filters).await.unwrap_err();
            assert!(matches!(err, SearchError::InvalidInput(_)));
        }
    }

    #[tokio::test]
    async fn repeated_search_is_stable() {
        let engine = engine(vec![
            canned(SpotSource::Osm, vec![scored("a", 40, false), scored("b", 90, false), scored("c", 40, false)]),
            canned(SpotSource::Trending, vec![scored("d", 40, true), scored("b店", 95, true)]),
        ]);
        let filters = SearchFilters::default();
        let first = engine.search_at(now(), 34.97, 138.38, 800.0, &filters).await.unwrap();
        let second = engine.search_at(now(), 34.97, 138.38, 800.0, &filters).await.unwrap();
        assert_eq!(first, second);
        let names: Vec<&str> = first.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["d", "b", "a", "c"]);
    }

    #[tokio::test]
    async fn cached_results_are_reused() {
        let cache = Arc::new(SearchCache::new());
        let engine = engine(vec![canned(SpotSource::Osm, vec![scored("さくら公園", 60, false)])])
            .with_cache(cache.clone());
        let filters = SearchFilters::default();
        engine.search_at(now(), 34.97, 138.38, 1000.0, &filters).await.unwrap();
        engine.search_at(now(), 34.97, 138.38, 1000.0, &filters).await.unwrap();
        assert_eq!(cache.len().await, 1);
    }

    #[test]
    fn category_filter_and_cap() {
        let mut many: Vec<CandidateSpot> = (0..150).map(|i| scored(&format!("cafe {i}"), 50, false)).collect();
        let mut park = scored("park", 80, false);
        park.category = Category::Park;
        many.push(park);

        assert_eq!(merge_candidates(many.clone(), &SearchFilters::default()).len(), MAX_RESULTS);
        let parks = merge_candidates(
            many,
            &SearchFilters {
                categories: Some(vec![Category::Park]),
                ..Default::default()
            },
        );
        assert_eq!(parks.len(), 1);
    }
}
