//! Social collectors: venue names pulled out of hashtags on Instagram and
//! Twitter posts.
//!
//! A hashtag counts as a venue when it ends in a venue keyword and has
//! something in front of it (`#さくらカフェ` yes, `#カフェ` no). Engagement of
//! every post mentioning a venue is summed into its popularity.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use kidspot_core::{CandidateSpot, Category, GeoPoint, SpotSource};
use kidspot_storage::{HttpFetcher, HttpRequest};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::tags::category_from_text;
use crate::trending::buzz_candidate;
use crate::{fetch_page, AdapterContext, AdapterError, FetchedPage, SearchArea, SourceAccess, SourceAdapter};

pub const DEFAULT_INSTAGRAM_ENDPOINT: &str = "https://graph.facebook.com/v18.0";
pub const DEFAULT_TWITTER_ENDPOINT: &str = "https://api.twitter.com/2";
pub const DEFAULT_HASHTAGS: [&str; 5] = ["子連れカフェ", "キッズカフェ", "子連れランチ", "公園デビュー", "親子でお出かけ"];

const VENUE_SUFFIXES: [&str; 14] = [
    "カフェ", "公園", "水族館", "動物園", "博物館", "美術館", "科学館", "遊園地", "児童館", "レストラン", "食堂", "パーク",
    "広場", "モール",
];
const DESCRIPTION_CHARS: usize = 200;
const MAX_RESULTS: u32 = 50;

static HASHTAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[#＃]([^\s#＃、。,.!！?？]+)").expect("hashtag regex"));

fn bare_tag(tag: &str) -> String {
    tag.trim().trim_start_matches(['#', '＃']).to_lowercase()
}

/// Venue names found in a post, in order of first appearance, minus the tags
/// that were searched for.
pub fn extract_spot_names(text: &str, searched: &[String]) -> Vec<String> {
    let searched: Vec<String> = searched.iter().map(|t| bare_tag(t)).collect();
    let mut names: Vec<String> = Vec::new();
    for caps in HASHTAG.captures_iter(text) {
        let tag = caps[1].trim();
        let is_venue = VENUE_SUFFIXES
            .iter()
            .any(|suffix| tag.ends_with(suffix) && tag.chars().count() > suffix.chars().count());
        if !is_venue || searched.contains(&tag.to_lowercase()) {
            continue;
        }
        if !names.iter().any(|n| n == tag) {
            names.push(tag.to_string());
        }
    }
    names
}

pub fn engagement_popularity(engagement: u64) -> f64 {
    (engagement as f64 / 10.0).min(100.0)
}

fn excerpt(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(DESCRIPTION_CHARS).collect())
}

/// One post reduced to what the collectors need.
struct SocialPost {
    id: String,
    text: String,
    engagement: u64,
    location: Option<GeoPoint>,
    url: Option<String>,
}

/// Folds posts into one buzz candidate per venue name.
fn posts_to_candidates(
    posts: Vec<SocialPost>,
    searched: &[String],
    source: SpotSource,
    ctx: &AdapterContext,
) -> Vec<CandidateSpot> {
    let mut order: Vec<String> = Vec::new();
    let mut by_name: HashMap<String, (CandidateSpot, u64)> = HashMap::new();
    for post in posts {
        for name in extract_spot_names(&post.text, searched) {
            match by_name.get_mut(&name) {
                Some((spot, engagement)) => {
                    *engagement += post.engagement;
                    if spot.location.is_none() {
                        spot.location = post.location;
                    }
                }
                None => {
                    let category = category_from_text(&name).unwrap_or(Category::TouristSpot);
                    let mut spot = buzz_candidate(name.clone(), category, source, ctx.fetched_at);
                    spot.location = post.location;
                    spot.description = excerpt(&post.text);
                    spot.source_url = post.url.clone();
                    spot.external_id = Some(post.id.clone());
                    order.push(name.clone());
                    by_name.insert(name, (spot, post.engagement));
                }
            }
        }
    }
    order
        .into_iter()
        .filter_map(|name| by_name.remove(&name))
        .map(|(mut spot, engagement)| {
            spot.popularity_score = engagement_popularity(engagement);
            spot
        })
        .collect()
}

fn hashtags_or_default(hashtags: Vec<String>) -> Vec<String> {
    let tags: Vec<String> = hashtags
        .into_iter()
        .map(|t| t.trim().trim_start_matches(['#', '＃']).to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if tags.is_empty() {
        DEFAULT_HASHTAGS.iter().map(|t| t.to_string()).collect()
    } else {
        tags
    }
}

#[derive(Debug, Deserialize)]
struct GraphList<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct HashtagId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct InstagramMedia {
    id: String,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    like_count: Option<u64>,
    #[serde(default)]
    comments_count: Option<u64>,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    location: Option<InstagramLocation>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct InstagramLocation {
    latitude: f64,
    longitude: f64,
}

/// Recent media for each configured hashtag via the Instagram Graph API.
#[derive(Debug, Clone)]
pub struct InstagramCollector {
    access_token: Option<String>,
    account_id: Option<String>,
    hashtags: Vec<String>,
    endpoint: String,
}

impl InstagramCollector {
    pub fn new(
        access_token: Option<String>,
        account_id: Option<String>,
        hashtags: Vec<String>,
        endpoint: Option<String>,
    ) -> Self {
        Self {
            access_token: access_token.filter(|t| !t.trim().is_empty()),
            account_id: account_id.filter(|a| !a.trim().is_empty()),
            hashtags: hashtags_or_default(hashtags),
            endpoint: endpoint
                .unwrap_or_else(|| DEFAULT_INSTAGRAM_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }

    fn credentials(&self) -> Result<(&str, &str), AdapterError> {
        match (&self.access_token, &self.account_id) {
            (Some(token), Some(account)) => Ok((token, account)),
            _ => Err(AdapterError::NotConfigured(SpotSource::Instagram.to_string())),
        }
    }
}

#[async_trait]
impl SourceAdapter for InstagramCollector {
    fn source(&self) -> SpotSource {
        SpotSource::Instagram
    }

    fn access(&self) -> SourceAccess {
        SourceAccess::CredentialedApi
    }

    fn is_configured(&self) -> bool {
        self.credentials().is_ok()
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        _area: &SearchArea,
    ) -> Result<Vec<FetchedPage>, AdapterError> {
        let (token, account) = self.credentials()?;
        let mut pages = Vec::new();
        for tag in &self.hashtags {
            let lookup = HttpRequest::get(format!("{}/ig_hashtag_search", self.endpoint))
                .query("user_id", account)
                .query("q", tag)
                .query("access_token", token);
            let ids: GraphList<HashtagId> = fetch_page(http, ctx, self.source(), &lookup).await?.json()?;
            let Some(hashtag) = ids.data.first() else {
                continue;
            };
            let media = HttpRequest::get(format!("{}/{}/recent_media", self.endpoint, hashtag.id))
                .query("user_id", account)
                .query("fields", "id,caption,like_count,comments_count,permalink,timestamp")
                .query("limit", MAX_RESULTS)
                .query("access_token", token);
            pages.push(fetch_page(http, ctx, self.source(), &media).await?);
        }
        Ok(pages)
    }

    fn parse(&self, page: &FetchedPage, ctx: &AdapterContext) -> Result<Vec<CandidateSpot>, AdapterError> {
        let media: GraphList<InstagramMedia> = page.json()?;
        let posts = media
            .data
            .into_iter()
            .map(|m| SocialPost {
                id: m.id,
                text: m.caption.unwrap_or_default(),
                engagement: m.like_count.unwrap_or(0) + m.comments_count.unwrap_or(0),
                location: m.location.map(|l| GeoPoint::new(l.latitude, l.longitude)),
                url: m.permalink,
            })
            .collect();
        Ok(posts_to_candidates(posts, &self.hashtags, SpotSource::Instagram, ctx))
    }
}

#[derive(Debug, Deserialize)]
struct TweetSearch {
    #[serde(default)]
    data: Vec<Tweet>,
    #[serde(default)]
    includes: Option<TweetIncludes>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id: String,
    text: String,
    #[serde(default)]
    public_metrics: Option<TweetMetrics>,
    #[serde(default)]
    geo: Option<TweetGeo>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
struct TweetMetrics {
    #[serde(default)]
    retweet_count: u64,
    #[serde(default)]
    reply_count: u64,
    #[serde(default)]
    like_count: u64,
    #[serde(default)]
    quote_count: u64,
}

#[derive(Debug, Deserialize)]
struct TweetGeo {
    #[serde(default)]
    place_id: Option<String>,
    #[serde(default)]
    coordinates: Option<TweetPoint>,
}

#[derive(Debug, Deserialize)]
struct TweetPoint {
    /// GeoJSON order: `[lon, lat]`.
    coordinates: [f64; 2],
}

#[derive(Debug, Deserialize)]
struct TweetIncludes {
    #[serde(default)]
    places: Vec<TweetPlace>,
}

#[derive(Debug, Deserialize)]
struct TweetPlace {
    id: String,
    #[serde(default)]
    geo: Option<TweetPlaceGeo>,
}

#[derive(Debug, Deserialize)]
struct TweetPlaceGeo {
    /// `[west, south, east, north]`.
    bbox: [f64; 4],
}

impl TweetPlaceGeo {
    fn center(&self) -> GeoPoint {
        let [west, south, east, north] = self.bbox;
        GeoPoint::new((south + north) / 2.0, (west + east) / 2.0)
    }
}

/// Recent-search over the configured hashtags via the Twitter v2 API.
#[derive(Debug, Clone)]
pub struct TwitterCollector {
    bearer_token: Option<String>,
    hashtags: Vec<String>,
    endpoint: String,
}

impl TwitterCollector {
    pub fn new(bearer_token: Option<String>, hashtags: Vec<String>, endpoint: Option<String>) -> Self {
        Self {
            bearer_token: bearer_token.filter(|t| !t.trim().is_empty()),
            hashtags: hashtags_or_default(hashtags),
            endpoint: endpoint
                .unwrap_or_else(|| DEFAULT_TWITTER_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }

    pub fn search_query(&self) -> String {
        let tags = self
            .hashtags
            .iter()
            .map(|t| format!("#{t}"))
            .collect::<Vec<_>>()
            .join(" OR ");
        format!("({tags}) -is:retweet lang:ja")
    }
}

#[async_trait]
impl SourceAdapter for TwitterCollector {
    fn source(&self) -> SpotSource {
        SpotSource::Twitter
    }

    fn access(&self) -> SourceAccess {
        SourceAccess::CredentialedApi
    }

    fn is_configured(&self) -> bool {
        self.bearer_token.is_some()
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        _area: &SearchArea,
    ) -> Result<Vec<FetchedPage>, AdapterError> {
        let token = self
            .bearer_token
            .as_deref()
            .ok_or_else(|| AdapterError::NotConfigured(self.source().to_string()))?;
        let request = HttpRequest::get(format!("{}/tweets/search/recent", self.endpoint))
            .query("query", self.search_query())
            .query("max_results", MAX_RESULTS)
            .query("tweet.fields", "public_metrics,geo,created_at")
            .query("expansions", "geo.place_id")
            .query("place.fields", "geo,full_name")
            .bearer(token);
        Ok(vec![fetch_page(http, ctx, self.source(), &request).await?])
    }

    fn parse(&self, page: &FetchedPage, ctx: &AdapterContext) -> Result<Vec<CandidateSpot>, AdapterError> {
        let search: TweetSearch = page.json()?;
        let places: BTreeMap<String, GeoPoint> = search
            .includes
            .map(|inc| inc.places)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| p.geo.map(|g| (p.id, g.center())))
            .collect();

        let posts = search
            .data
            .into_iter()
            .map(|tweet| {
                let metrics = tweet.public_metrics.unwrap_or_default();
                let location = tweet.geo.as_ref().and_then(|geo| {
                    geo.coordinates
                        .as_ref()
                        .map(|p| GeoPoint::new(p.coordinates[1], p.coordinates[0]))
                        .or_else(|| geo.place_id.as_ref().and_then(|id| places.get(id).copied()))
                });
                SocialPost {
                    url: Some(format!("https://twitter.com/i/web/status/{}", tweet.id)),
                    id: tweet.id,
                    text: tweet.text,
                    engagement: metrics.like_count
                        + metrics.retweet_count
                        + metrics.reply_count
                        + metrics.quote_count,
                    location,
                }
            })
            .collect();
        Ok(posts_to_candidates(posts, &self.hashtags, SpotSource::Twitter, ctx))
    }
}
