//! Source adapter contracts, tag interpretation and the adapter variants.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use kidspot_core::{CandidateSpot, GeoPoint, SpotSource, TagBag};
use kidspot_storage::{FetchError, FetchedResponse, HttpFetcher, HttpRequest};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub mod availability;
pub mod osm;
pub mod places;
pub mod scoring;
pub mod social;
pub mod tags;
pub mod trending;
pub mod wiki;

pub use osm::OverpassAdapter;
pub use places::{PlaceMatch, PlacesAdapter};
pub use social::{InstagramCollector, TwitterCollector};
pub use trending::{buzz_candidate, TrendingAdapter};
pub use wiki::WikiGeoAdapter;

pub const CRATE_NAME: &str = "kidspot-adapters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceAccess {
    OpenApi,
    CredentialedApi,
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,
    pub content_type: String,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchedPage {
    pub fn from_response(response: FetchedResponse, fetched_at: DateTime<Utc>) -> Self {
        Self {
            url: response.final_url,
            content_type: "application/json".to_string(),
            body: response.body,
            fetched_at,
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, AdapterError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| AdapterError::Parse(format!("{}: {e}", self.url)))
    }
}

/// Per-call context. `local_now` is the wall clock used for opening hours and
/// crowd prediction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
    pub local_now: NaiveDateTime,
}

impl AdapterContext {
    pub fn new(run_id: Uuid, now: DateTime<Utc>, utc_offset_hours: i32) -> Self {
        let local_now = FixedOffset::east_opt(utc_offset_hours * 3600)
            .map(|tz| now.with_timezone(&tz).naive_local())
            .unwrap_or_else(|| now.naive_utc());
        Self {
            run_id,
            fetched_at: now,
            local_now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchArea {
    pub center: GeoPoint,
    pub radius_m: u32,
}

impl SearchArea {
    pub fn new(lat: f64, lon: f64, radius_m: u32) -> Self {
        Self {
            center: GeoPoint::new(lat, lon),
            radius_m,
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("unreadable source payload: {0}")]
    Parse(String),
    #[error("source {0} is not configured")]
    NotConfigured(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AdapterError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AdapterError::Fetch(err) if err.is_rate_limited())
    }
}

/// One external source. `fetch` does the network work, `parse` is pure so
/// recorded pages replay through the same mapping.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> SpotSource;
    fn access(&self) -> SourceAccess;

    /// Credentialed sources without a credential collect nothing.
    fn is_configured(&self) -> bool {
        true
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        area: &SearchArea,
    ) -> Result<Vec<FetchedPage>, AdapterError>;

    fn parse(&self, page: &FetchedPage, ctx: &AdapterContext) -> Result<Vec<CandidateSpot>, AdapterError>;

    async fn collect(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        area: &SearchArea,
    ) -> Result<Vec<CandidateSpot>, AdapterError> {
        if !self.is_configured() {
            debug!(source = %self.source(), "source not configured, skipping");
            return Ok(Vec::new());
        }
        let pages = self.fetch(http, ctx, area).await?;
        let mut out = Vec::new();
        for page in &pages {
            out.extend(self.parse(page, ctx)?);
        }
        Ok(out)
    }
}

/// Looks a candidate up in a richer directory to fill rating, reviews and address.
#[async_trait]
pub trait SpotEnricher: Send + Sync {
    fn is_configured(&self) -> bool;

    async fn enrich(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        spot: &CandidateSpot,
    ) -> Result<Option<PlaceMatch>, AdapterError>;
}

/// Shared mapping for sources that hand us a tag bag: category, facilities,
/// scores, address, hours and crowd level all derive from the same tags.
pub fn candidate_from_tags(
    name: &str,
    tags: &TagBag,
    source: SpotSource,
    location: GeoPoint,
    ctx: &AdapterContext,
) -> CandidateSpot {
    let category = tags::map_category(tags);
    let mut spot = CandidateSpot::new(name.trim(), category, source, ctx.fetched_at)
        .with_location(location.lat, location.lon);
    spot.address = Some(tags::format_address(tags));
    spot.description = tags.get("description").map(str::to_string);
    spot.facilities = tags::extract_facilities(tags);
    spot.child_friendly_score = scoring::score(tags);
    spot.age_appropriate = scoring::age_appropriate(tags);
    spot.opening_hours = tags.get("opening_hours").map(str::to_string);
    spot.open_now = availability::open_now(spot.opening_hours.as_deref(), ctx.local_now);
    spot.crowd_level = availability::predict_crowd(category, ctx.local_now);
    spot
}

/// Issues one request and wraps the body as a page.
pub(crate) async fn fetch_page(
    http: &HttpFetcher,
    ctx: &AdapterContext,
    source: SpotSource,
    request: &HttpRequest,
) -> Result<FetchedPage, AdapterError> {
    let response = http.fetch(ctx.run_id, source.as_str(), request).await?;
    Ok(FetchedPage::from_response(response, ctx.fetched_at))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureBundle {
    pub fixture_id: String,
    pub source_id: String,
    pub captured_from_url: String,
    pub fetched_at: DateTime<Utc>,
    pub raw_artifact: FixtureRawArtifact,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureRawArtifact {
    pub content_type: String,
    pub path: Option<String>,
    pub inline_text: Option<String>,
}

impl FixtureBundle {
    pub fn to_page(&self) -> Result<FetchedPage, AdapterError> {
        let text = self.raw_artifact.inline_text.as_deref().ok_or_else(|| {
            AdapterError::Message(format!("fixture {} has no raw artifact", self.fixture_id))
        })?;
        Ok(FetchedPage {
            url: self.captured_from_url.clone(),
            content_type: self.raw_artifact.content_type.clone(),
            body: text.as_bytes().to_vec(),
            fetched_at: self.fetched_at,
        })
    }
}

pub fn load_fixture_bundle(path: impl AsRef<Path>) -> Result<FixtureBundle> {
    let path = path.as_ref();
    let mut bundle: FixtureBundle = read_json_file(path)?;
    hydrate_inline_raw_artifact(path, &mut bundle)?;
    Ok(bundle)
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

fn hydrate_inline_raw_artifact(bundle_path: &Path, bundle: &mut FixtureBundle) -> Result<()> {
    if bundle.raw_artifact.inline_text.is_some() {
        return Ok(());
    }
    let Some(rel_path) = &bundle.raw_artifact.path else {
        return Ok(());
    };
    let raw_path = bundle_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(rel_path);
    let raw = fs::read_to_string(&raw_path)
        .with_context(|| format!("reading fixture raw artifact {}", raw_path.display()))?;
    bundle.raw_artifact.inline_text = Some(raw);
    Ok(())
}

/// Serves a recorded bundle instead of hitting the network, then parses it
/// with the wrapped adapter.
pub struct FixtureReplayAdapter {
    inner: Box<dyn SourceAdapter>,
    bundle_path: PathBuf,
}

impl FixtureReplayAdapter {
    pub fn new(inner: Box<dyn SourceAdapter>, bundle_path: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            bundle_path: bundle_path.into(),
        }
    }
}

#[async_trait]
impl SourceAdapter for FixtureReplayAdapter {
    fn source(&self) -> SpotSource {
        self.inner.source()
    }

    fn access(&self) -> SourceAccess {
        self.inner.access()
    }

    async fn fetch(
        &self,
        _http: &HttpFetcher,
        _ctx: &AdapterContext,
        _area: &SearchArea,
    ) -> Result<Vec<FetchedPage>, AdapterError> {
        let bundle = load_fixture_bundle(&self.bundle_path)?;
        if bundle.source_id != self.inner.source().as_str() {
            return Err(AdapterError::Message(format!(
                "bundle source_id={} does not match adapter source={}",
                bundle.source_id,
                self.inner.source()
            )));
        }
        Ok(vec![bundle.to_page()?])
    }

    fn parse(&self, page: &FetchedPage, ctx: &AdapterContext) -> Result<Vec<CandidateSpot>, AdapterError> {
        self.inner.parse(page, ctx)
    }
}

/// Per-source knobs read from the source registry and the environment.
#[derive(Debug, Clone, Default)]
pub struct AdapterSettings {
    pub endpoint: Option<String>,
    pub credential: Option<String>,
    pub hashtags: Vec<String>,
    pub account_id: Option<String>,
    pub synthetic: bool,
}

pub fn adapter_for_source(source_id: &str, settings: &AdapterSettings) -> Option<Box<dyn SourceAdapter>> {
    let source: SpotSource = source_id.parse().ok()?;
    match source {
        SpotSource::Osm => Some(Box::new(OverpassAdapter::new(settings.endpoint.clone()))),
        SpotSource::Wikipedia => Some(Box::new(WikiGeoAdapter::new(settings.endpoint.clone()))),
        SpotSource::Trending if settings.synthetic => Some(Box::new(TrendingAdapter::synthetic())),
        SpotSource::Trending => Some(Box::new(TrendingAdapter::feed(settings.endpoint.clone()))),
        SpotSource::GooglePlaces => Some(Box::new(PlacesAdapter::new(
            settings.credential.clone(),
            settings.endpoint.clone(),
        ))),
        SpotSource::Instagram => Some(Box::new(InstagramCollector::new(
            settings.credential.clone(),
            settings.account_id.clone(),
            settings.hashtags.clone(),
            settings.endpoint.clone(),
        ))),
        SpotSource::Twitter => Some(Box::new(TwitterCollector::new(
            settings.credential.clone(),
            settings.hashtags.clone(),
            settings.endpoint.clone(),
        ))),
        SpotSource::Manual => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn context_shifts_wall_clock_by_offset() {
        let now = Utc.with_ymd_and_hms(2026, 4, 5, 3, 0, 0).unwrap();
        let ctx = AdapterContext::new(Uuid::nil(), now, 9);
        assert_eq!(ctx.local_now.hour(), 12);
        assert_eq!(ctx.fetched_at, now);
    }

    #[test]
    fn candidate_from_tags_runs_every_extractor() {
        let now = Utc.with_ymd_and_hms(2026, 4, 4, 3, 0, 0).unwrap();
        let ctx = AdapterContext::new(Uuid::nil(), now, 9);
        let tags: TagBag = [
            ("leisure", "park"),
            ("changing_table", "yes"),
            ("opening_hours", "09:00-17:00"),
            ("addr:city", "静岡市"),
        ]
        .into_iter()
        .collect();
        let spot = candidate_from_tags(" 駿府城公園 ", &tags, SpotSource::Osm, GeoPoint::new(34.98, 138.38), &ctx);
        assert_eq!(spot.name, "駿府城公園");
        assert_eq!(spot.category, kidspot_core::Category::Park);
        assert_eq!(spot.child_friendly_score, 60);
        assert!(spot.facilities.diaper_changing);
        assert_eq!(spot.open_now, Some(true));
        assert_eq!(spot.address.as_deref(), Some("静岡市"));
        assert_eq!(spot.crowd_level, kidspot_core::CrowdLevel::Crowded);
    }

    #[test]
    fn registry_knows_every_remote_source() {
        let settings = AdapterSettings::default();
        for id in ["osm", "wikipedia", "trending", "google_places", "instagram", "twitter"] {
            let adapter = adapter_for_source(id, &settings).unwrap();
            assert_eq!(adapter.source().as_str(), id);
        }
        assert!(adapter_for_source("manual", &settings).is_none());
        assert!(adapter_for_source("unknown", &settings).is_none());
    }

    #[test]
    fn credentialed_sources_need_a_credential() {
        let bare = AdapterSettings::default();
        assert!(!adapter_for_source("google_places", &bare).unwrap().is_configured());
        assert!(!adapter_for_source("twitter", &bare).unwrap().is_configured());
        assert!(!adapter_for_source("trending", &bare).unwrap().is_configured());

        let keyed = AdapterSettings {
            credential: Some("key".into()),
            ..Default::default()
        };
        assert!(adapter_for_source("google_places", &keyed).unwrap().is_configured());
        assert!(adapter_for_source("twitter", &keyed).unwrap().is_configured());
    }

    #[test]
    fn fixture_bundle_without_artifact_is_an_error() {
        let bundle = FixtureBundle {
            fixture_id: "empty".into(),
            source_id: "osm".into(),
            captured_from_url: "https://overpass-api.de/api/interpreter".into(),
            fetched_at: Utc::now(),
            raw_artifact: FixtureRawArtifact {
                content_type: "application/json".into(),
                path: None,
                inline_text: None,
            },
            notes: None,
        };
        assert!(bundle.to_page().is_err());
    }
}
