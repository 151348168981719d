//! Buzz-flagged candidates: a deterministic demo generator or a live feed.
//!
//! Trending spots get fixed elevated scores on the assumption that popular
//! places skew family-friendly. The numbers are unvalidated heuristics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kidspot_core::{AgeAppropriate, CandidateSpot, Category, SpotSource};
use kidspot_storage::{HttpFetcher, HttpRequest};
use serde::{Deserialize, Serialize};

use crate::availability::predict_crowd;
use crate::tags::category_from_text;
use crate::{fetch_page, AdapterContext, AdapterError, FetchedPage, SearchArea, SourceAccess, SourceAdapter};

pub const BUZZ_SCORE: u8 = 85;
const METERS_PER_DEGREE: f64 = 111_000.0;

pub fn buzz_age_appropriate() -> AgeAppropriate {
    AgeAppropriate::from_raw(70, 80, 75)
}

/// A candidate carrying the buzz defaults.
pub fn buzz_candidate(
    name: impl Into<String>,
    category: Category,
    source: SpotSource,
    fetched_at: DateTime<Utc>,
) -> CandidateSpot {
    let mut spot = CandidateSpot::new(name, category, source, fetched_at);
    spot.is_trending = true;
    spot.child_friendly_score = BUZZ_SCORE;
    spot.age_appropriate = buzz_age_appropriate();
    spot
}

/// Wire shape shared by the live feed and the generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuzzFeed {
    #[serde(default)]
    pub items: Vec<BuzzItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuzzItem {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub popularity: Option<f64>,
    #[serde(default)]
    pub url: Option<String>,
}

/// `(name, category, description, north offset, east offset, popularity)`;
/// offsets are fractions of the search radius.
const DEMO_SPOTS: &[(&str, Category, &str, f64, f64, f64)] = &[
    ("話題のキッズカフェ", Category::Cafe, "子連れに人気のキッズスペース付きカフェ", 0.2, 0.1, 82.0),
    ("ふわふわドーム公園", Category::Park, "大型遊具が話題の公園。駐車場あり", -0.3, 0.25, 76.0),
    ("親子で楽しむ科学館", Category::Museum, "雨の日でも家族で楽しめる体験型展示", 0.1, -0.35, 68.0),
    ("ファミリーレストランひだまり", Category::Restaurant, "お子様メニューと座敷あり", -0.15, -0.2, 64.0),
    ("屋内あそびランド", Category::Entertainment, "赤ちゃんから遊べる屋内施設。授乳室完備", 0.4, 0.05, 71.0),
];

/// Demo feed placed around the search centre. Same area in, same feed out.
pub fn synthetic_feed(area: &SearchArea) -> BuzzFeed {
    let radius_deg = f64::from(area.radius_m) / METERS_PER_DEGREE;
    let items = DEMO_SPOTS
        .iter()
        .map(|(name, category, description, north, east, popularity)| BuzzItem {
            name: (*name).to_string(),
            category: Some(category.as_str().to_string()),
            lat: Some(area.center.lat + north * radius_deg),
            lon: Some(area.center.lon + east * radius_deg),
            description: Some((*description).to_string()),
            popularity: Some(*popularity),
            url: None,
        })
        .collect();
    BuzzFeed { items }
}

#[derive(Debug, Clone)]
enum TrendingMode {
    Synthetic,
    Feed(Option<String>),
}

#[derive(Debug, Clone)]
pub struct TrendingAdapter {
    mode: TrendingMode,
}

impl TrendingAdapter {
    pub fn synthetic() -> Self {
        Self {
            mode: TrendingMode::Synthetic,
        }
    }

    pub fn feed(endpoint: Option<String>) -> Self {
        Self {
            mode: TrendingMode::Feed(endpoint),
        }
    }
}

#[async_trait]
impl SourceAdapter for TrendingAdapter {
    fn source(&self) -> SpotSource {
        SpotSource::Trending
    }

    fn access(&self) -> SourceAccess {
        match self.mode {
            TrendingMode::Synthetic => SourceAccess::Synthetic,
            TrendingMode::Feed(_) => SourceAccess::OpenApi,
        }
    }

    fn is_configured(&self) -> bool {
        match &self.mode {
            TrendingMode::Synthetic => true,
            TrendingMode::Feed(endpoint) => endpoint.is_some(),
        }
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        area: &SearchArea,
    ) -> Result<Vec<FetchedPage>, AdapterError> {
        match &self.mode {
            TrendingMode::Synthetic => {
                let body = serde_json::to_vec(&synthetic_feed(area))
                    .map_err(|e| AdapterError::Message(format!("encoding demo feed: {e}")))?;
                Ok(vec![FetchedPage {
                    url: "synthetic://trending".to_string(),
                    content_type: "application/json".to_string(),
                    body,
                    fetched_at: ctx.fetched_at,
                }])
            }
            TrendingMode::Feed(Some(endpoint)) => {
                let request = HttpRequest::get(endpoint.clone())
                    .query("lat", area.center.lat)
                    .query("lon", area.center.lon)
                    .query("radius", area.radius_m);
                Ok(vec![fetch_page(http, ctx, self.source(), &request).await?])
            }
            TrendingMode::Feed(None) => Err(AdapterError::NotConfigured(self.source().to_string())),
        }
    }

    fn parse(&self, page: &FetchedPage, ctx: &AdapterContext) -> Result<Vec<CandidateSpot>, AdapterError> {
        let feed: BuzzFeed = page.json()?;
        Ok(feed
            .items
            .into_iter()
            .filter(|item| !item.name.trim().is_empty())
            .map(|item| {
                let category = item
                    .category
                    .as_deref()
                    .and_then(|c| c.parse::<Category>().ok())
                    .or_else(|| category_from_text(&item.name))
                    .unwrap_or(Category::TouristSpot);
                let mut spot = buzz_candidate(item.name.trim(), category, SpotSource::Trending, ctx.fetched_at);
                if let (Some(lat), Some(lon)) = (item.lat, item.lon) {
                    spot = spot.with_location(lat, lon);
                }
                spot.description = item.description;
                spot.popularity_score = item.popularity.unwrap_or(0.0).clamp(0.0, 100.0);
                spot.source_url = item.url;
                spot.crowd_level = predict_crowd(category, ctx.local_now);
                spot
            })
            .collect())
    }
}
