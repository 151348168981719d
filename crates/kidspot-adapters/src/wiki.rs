//! Nearby Wikipedia articles as tourist spots.
//!
//! Articles carry no facility data, so every hit gets the same flat score and
//! age triple.

use async_trait::async_trait;
use kidspot_core::{AgeAppropriate, CandidateSpot, Category, SpotSource};
use kidspot_storage::{HttpFetcher, HttpRequest};
use serde::Deserialize;

use crate::availability::predict_crowd;
use crate::{fetch_page, AdapterContext, AdapterError, FetchedPage, SearchArea, SourceAccess, SourceAdapter};

pub const DEFAULT_WIKI_ENDPOINT: &str = "https://ja.wikipedia.org/w/api.php";
pub const WIKI_SCORE: u8 = 60;
/// The geosearch API rejects radii above 10 km.
const MAX_RADIUS_M: u32 = 10_000;
const RESULT_LIMIT: u32 = 50;

pub fn wiki_age_appropriate() -> AgeAppropriate {
    AgeAppropriate::from_raw(40, 50, 70)
}

#[derive(Debug, Deserialize)]
struct GeoSearchResponse {
    #[serde(default)]
    query: Option<GeoSearchQuery>,
}

#[derive(Debug, Deserialize)]
struct GeoSearchQuery {
    #[serde(default)]
    geosearch: Vec<GeoSearchHit>,
}

#[derive(Debug, Deserialize)]
struct GeoSearchHit {
    pageid: u64,
    title: String,
    lat: f64,
    lon: f64,
}

#[derive(Debug, Clone)]
pub struct WikiGeoAdapter {
    endpoint: String,
}

impl WikiGeoAdapter {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_WIKI_ENDPOINT.to_string()),
        }
    }

    fn article_url(&self, pageid: u64) -> String {
        let base = self.endpoint.trim_end_matches("/w/api.php");
        format!("{base}/?curid={pageid}")
    }
}

#[async_trait]
impl SourceAdapter for WikiGeoAdapter {
    fn source(&self) -> SpotSource {
        SpotSource::Wikipedia
    }

    fn access(&self) -> SourceAccess {
        SourceAccess::OpenApi
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        area: &SearchArea,
    ) -> Result<Vec<FetchedPage>, AdapterError> {
        let request = HttpRequest::get(self.endpoint.clone())
            .query("action", "query")
            .query("list", "geosearch")
            .query("gscoord", format!("{}|{}", area.center.lat, area.center.lon))
            .query("gsradius", area.radius_m.min(MAX_RADIUS_M))
            .query("gslimit", RESULT_LIMIT)
            .query("format", "json");
        Ok(vec![fetch_page(http, ctx, self.source(), &request).await?])
    }

    fn parse(&self, page: &FetchedPage, ctx: &AdapterContext) -> Result<Vec<CandidateSpot>, AdapterError> {
        let response: GeoSearchResponse = page.json()?;
        let hits = response.query.map(|q| q.geosearch).unwrap_or_default();
        Ok(hits
            .into_iter()
            .filter(|hit| !hit.title.trim().is_empty())
            .map(|hit| {
                let mut spot = CandidateSpot::new(
                    hit.title.trim(),
                    Category::TouristSpot,
                    SpotSource::Wikipedia,
                    ctx.fetched_at,
                )
                .with_location(hit.lat, hit.lon);
                spot.child_friendly_score = WIKI_SCORE;
                spot.age_appropriate = wiki_age_appropriate();
                spot.crowd_level = predict_crowd(Category::TouristSpot, ctx.local_now);
                spot.source_url = Some(self.article_url(hit.pageid));
                spot.external_id = Some(hit.pageid.to_string());
                spot
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn page(body: &str) -> FetchedPage {
        FetchedPage {
            url: DEFAULT_WIKI_ENDPOINT.into(),
            content_type: "application/json".into(),
            body: body.as_bytes().to_vec(),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn every_hit_is_a_flat_scored_tourist_spot() {
        let body = r#"{"batchcomplete": "", "query": {"geosearch": [
            {"pageid": 1234, "ns": 0, "title": "駿府城", "lat": 34.9786, "lon": 138.3831, "dist": 812.3, "primary": ""},
            {"pageid": 99, "ns": 0, "title": "日本平動物園", "lat": 34.9927, "lon": 138.4275, "dist": 4200.0, "primary": ""}
        ]}}"#;
        let ctx = AdapterContext::new(Uuid::nil(), Utc::now(), 9);
        let spots = WikiGeoAdapter::new(None).parse(&page(body), &ctx).unwrap();
        assert_eq!(spots.len(), 2);
        for spot in &spots {
            assert_eq!(spot.category, Category::TouristSpot);
            assert_eq!(spot.child_friendly_score, 60);
            assert_eq!(spot.age_appropriate, AgeAppropriate::from_raw(40, 50, 70));
        }
        assert_eq!(spots[0].source_url.as_deref(), Some("https://ja.wikipedia.org/?curid=1234"));
    }

    #[test]
    fn missing_query_block_is_empty() {
        let ctx = AdapterContext::new(Uuid::nil(), Utc::now(), 9);
        let spots = WikiGeoAdapter::new(None)
            .parse(&page(r#"{"batchcomplete": ""}"#), &ctx)
            .unwrap();
        assert!(spots.is_empty());
    }
}
