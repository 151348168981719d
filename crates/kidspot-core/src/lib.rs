//! Core domain model for kid-friendly spot discovery.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "kidspot-core";

/// Clamp an additive point total into the 0..=100 band all scores live in.
pub fn clamp_score(raw: i32) -> u8 {
    raw.clamp(0, 100) as u8
}

/// Closed venue taxonomy shared by every source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Restaurant,
    Cafe,
    Playground,
    Park,
    Museum,
    Shopping,
    Entertainment,
    TouristSpot,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Restaurant,
        Category::Cafe,
        Category::Playground,
        Category::Park,
        Category::Museum,
        Category::Shopping,
        Category::Entertainment,
        Category::TouristSpot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Restaurant => "restaurant",
            Category::Cafe => "cafe",
            Category::Playground => "playground",
            Category::Park => "park",
            Category::Museum => "museum",
            Category::Shopping => "shopping",
            Category::Entertainment => "entertainment",
            Category::TouristSpot => "tourist_spot",
        }
    }

    /// Japanese display label, also used for keyword matching against seasonal features.
    pub fn label_ja(&self) -> &'static str {
        match self {
            Category::Restaurant => "レストラン",
            Category::Cafe => "カフェ",
            Category::Playground => "遊び場",
            Category::Park => "公園",
            Category::Museum => "博物館",
            Category::Shopping => "ショッピング",
            Category::Entertainment => "レジャー施設",
            Category::TouristSpot => "観光スポット",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| format!("unknown category: {s}"))
    }
}

/// Child-friendly facility flags. Unknown always means `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FacilityFlags {
    pub kids_menu: bool,
    pub high_chair: bool,
    pub nursing_room: bool,
    pub stroller_friendly: bool,
    pub diaper_changing: bool,
    pub play_area: bool,
}

impl FacilityFlags {
    pub fn count(&self) -> usize {
        [
            self.kids_menu,
            self.high_chair,
            self.nursing_room,
            self.stroller_friendly,
            self.diaper_changing,
            self.play_area,
        ]
        .into_iter()
        .filter(|f| *f)
        .count()
    }
}

/// Independent 0..=100 suitability estimates per age bucket.
///
/// The buckets are not a distribution; they never need to sum to anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeAppropriate {
    pub baby: u8,
    pub toddler: u8,
    pub child: u8,
}

impl AgeAppropriate {
    pub fn from_raw(baby: i32, toddler: i32, child: i32) -> Self {
        Self {
            baby: clamp_score(baby),
            toddler: clamp_score(toddler),
            child: clamp_score(child),
        }
    }
}

impl Default for AgeAppropriate {
    fn default() -> Self {
        Self {
            baby: 50,
            toddler: 50,
            child: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CrowdLevel {
    Crowded,
    SomewhatCrowded,
    #[default]
    Quiet,
}

/// Provenance tag of a candidate. Drives trust weighting and dedup tie-breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpotSource {
    Osm,
    Wikipedia,
    Trending,
    GooglePlaces,
    Instagram,
    Twitter,
    Manual,
}

impl SpotSource {
    pub const ALL: [SpotSource; 7] = [
        SpotSource::Osm,
        SpotSource::Wikipedia,
        SpotSource::Trending,
        SpotSource::GooglePlaces,
        SpotSource::Instagram,
        SpotSource::Twitter,
        SpotSource::Manual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpotSource::Osm => "osm",
            SpotSource::Wikipedia => "wikipedia",
            SpotSource::Trending => "trending",
            SpotSource::GooglePlaces => "google_places",
            SpotSource::Instagram => "instagram",
            SpotSource::Twitter => "twitter",
            SpotSource::Manual => "manual",
        }
    }

    pub fn is_social(&self) -> bool {
        matches!(self, SpotSource::Instagram | SpotSource::Twitter)
    }
}

impl fmt::Display for SpotSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpotSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        SpotSource::ALL
            .into_iter()
            .find(|src| src.as_str() == wanted)
            .ok_or_else(|| format!("unknown source: {s}"))
    }
}

/// WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Finite and inside the legal latitude/longitude ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Axis-aligned box test, `epsilon` in degrees on both axes.
    pub fn within_box(&self, other: &GeoPoint, epsilon: f64) -> bool {
        (self.lat - other.lat).abs() <= epsilon && (self.lon - other.lon).abs() <= epsilon
    }

    pub fn squared_degree_distance(&self, other: &GeoPoint) -> f64 {
        (self.lat - other.lat).powi(2) + (self.lon - other.lon).powi(2)
    }
}

/// Configured service region. Defaults to the Japanese archipelago.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl Default for RegionBounds {
    fn default() -> Self {
        Self {
            min_lat: 24.0,
            max_lat: 46.0,
            min_lon: 122.0,
            max_lon: 154.0,
        }
    }
}

impl RegionBounds {
    pub fn contains(&self, point: &GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lon..=self.max_lon).contains(&point.lon)
    }
}

/// Loosely typed key/value attribute bag as returned by open geodata sources.
///
/// Accessors are total: a missing key, an empty value and a malformed value
/// all read as "absent".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagBag(BTreeMap<String, String>);

impl TagBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn has(&self, key: &str, value: &str) -> bool {
        self.get(key).is_some_and(|v| v.eq_ignore_ascii_case(value))
    }

    pub fn has_any(&self, key: &str, values: &[&str]) -> bool {
        values.iter().any(|v| self.has(key, v))
    }

    /// The `== "yes"` truthiness rule used for facility tags.
    pub fn is_yes(&self, key: &str) -> bool {
        self.has(key, "yes")
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagBag {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Result of interpreting an opening-hours string at a given local time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpeningStatus {
    pub is_open: bool,
    pub next_change: Option<String>,
    pub today_hours: Option<String>,
}

/// Transient venue record produced by a source adapter, before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSpot {
    pub name: String,
    pub location: Option<GeoPoint>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub category: Category,
    pub facilities: FacilityFlags,
    /// Facilities were guessed from category/rating rather than read from the source.
    pub facilities_inferred: bool,
    pub child_friendly_score: u8,
    pub age_appropriate: AgeAppropriate,
    pub crowd_level: CrowdLevel,
    pub open_now: Option<bool>,
    pub opening_hours: Option<String>,
    pub source: SpotSource,
    pub source_url: Option<String>,
    pub external_id: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
    pub is_trending: bool,
    pub popularity_score: f64,
    pub weekly_rank: Option<u32>,
    #[serde(default)]
    pub seasonal_tags: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

impl CandidateSpot {
    /// A candidate with every derived field at its neutral default.
    pub fn new(
        name: impl Into<String>,
        category: Category,
        source: SpotSource,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            location: None,
            address: None,
            description: None,
            category,
            facilities: FacilityFlags::default(),
            facilities_inferred: false,
            child_friendly_score: 0,
            age_appropriate: AgeAppropriate::default(),
            crowd_level: CrowdLevel::default(),
            open_now: None,
            opening_hours: None,
            source,
            source_url: None,
            external_id: None,
            rating: None,
            review_count: None,
            is_trending: false,
            popularity_score: 0.0,
            weekly_rank: None,
            seasonal_tags: Vec::new(),
            fetched_at,
        }
    }

    pub fn with_location(mut self, lat: f64, lon: f64) -> Self {
        self.location = Some(GeoPoint::new(lat, lon));
        self
    }
}

/// Store-owned record: a candidate plus a stable id and audit timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSpot {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub spot: CandidateSpot,
}

/// Field-level replacement applied to an existing store record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpotDelta {
    pub description: Option<String>,
    pub address: Option<String>,
    pub location: Option<GeoPoint>,
    pub opening_hours: Option<String>,
    pub category: Option<Category>,
    pub facilities: Option<FacilityFlags>,
    pub child_friendly_score: Option<u8>,
    pub age_appropriate: Option<AgeAppropriate>,
    pub source: Option<SpotSource>,
    pub source_url: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
    pub popularity_score: Option<f64>,
    pub is_trending: Option<bool>,
}

impl SpotDelta {
    /// Everything the candidate knows; absent candidate fields leave the record alone.
    pub fn from_candidate(candidate: &CandidateSpot) -> Self {
        Self {
            description: candidate.description.clone(),
            address: candidate.address.clone(),
            location: candidate.location,
            opening_hours: candidate.opening_hours.clone(),
            category: Some(candidate.category),
            facilities: Some(candidate.facilities),
            child_friendly_score: Some(candidate.child_friendly_score),
            age_appropriate: Some(candidate.age_appropriate),
            source: Some(candidate.source),
            source_url: candidate.source_url.clone(),
            rating: candidate.rating,
            review_count: candidate.review_count,
            popularity_score: Some(candidate.popularity_score),
            is_trending: Some(candidate.is_trending),
        }
    }

    pub fn apply_to(&self, spot: &mut CandidateSpot) {
        if let Some(v) = &self.description {
            spot.description = Some(v.clone());
        }
        if let Some(v) = &self.address {
            spot.address = Some(v.clone());
        }
        if let Some(v) = self.location {
            spot.location = Some(v);
        }
        if let Some(v) = &self.opening_hours {
            spot.opening_hours = Some(v.clone());
        }
        if let Some(v) = self.category {
            spot.category = v;
        }
        if let Some(v) = self.facilities {
            spot.facilities = v;
        }
        if let Some(v) = self.child_friendly_score {
            spot.child_friendly_score = v;
        }
        if let Some(v) = self.age_appropriate {
            spot.age_appropriate = v;
        }
        if let Some(v) = self.source {
            spot.source = v;
        }
        if let Some(v) = &self.source_url {
            spot.source_url = Some(v.clone());
        }
        if let Some(v) = self.rating {
            spot.rating = Some(v);
        }
        if let Some(v) = self.review_count {
            spot.review_count = Some(v);
        }
        if let Some(v) = self.popularity_score {
            spot.popularity_score = v;
        }
        if let Some(v) = self.is_trending {
            spot.is_trending = v;
        }
    }
}

/// What the ingestion core wants done to the store; the caller applies it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UpsertIntent {
    Create { spot: CandidateSpot },
    Update { id: Uuid, name: String, delta: SpotDelta },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 5, 3, 0, 0).single().unwrap()
    }

    #[test]
    fn clamp_score_bounds_both_ends() {
        assert_eq!(clamp_score(-40), 0);
        assert_eq!(clamp_score(55), 55);
        assert_eq!(clamp_score(180), 100);
    }

    #[test]
    fn tag_bag_accessors_are_total() {
        let tags: TagBag = [("highchair", "yes"), ("kids_menu", "  "), ("smoking", "No")]
            .into_iter()
            .collect();
        assert!(tags.is_yes("highchair"));
        assert!(!tags.is_yes("kids_menu"));
        assert_eq!(tags.get("kids_menu"), None);
        assert_eq!(tags.get("missing"), None);
        assert!(tags.has("smoking", "no"));
    }

    #[test]
    fn category_and_source_round_trip_through_str() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
        assert_eq!("tourist-spot".parse::<Category>().unwrap(), Category::TouristSpot);
        assert_eq!("google_places".parse::<SpotSource>().unwrap(), SpotSource::GooglePlaces);
        assert!("bogus".parse::<Category>().is_err());
    }

    #[test]
    fn geo_point_validity_and_region() {
        assert!(GeoPoint::new(34.97, 138.38).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 138.38).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        let japan = RegionBounds::default();
        assert!(japan.contains(&GeoPoint::new(34.97, 138.38)));
        assert!(!japan.contains(&GeoPoint::new(51.5, -0.12)));
    }

    #[test]
    fn delta_only_overwrites_present_fields() {
        let mut existing = CandidateSpot::new("さくら公園", Category::Park, SpotSource::Osm, ts())
            .with_location(34.97, 138.38);
        existing.description = Some("old".into());
        existing.address = Some("静岡市".into());

        let mut incoming = CandidateSpot::new("さくら公園", Category::Park, SpotSource::Instagram, ts());
        incoming.description = Some("new description".into());
        incoming.rating = Some(4.4);

        SpotDelta::from_candidate(&incoming).apply_to(&mut existing);
        assert_eq!(existing.description.as_deref(), Some("new description"));
        assert_eq!(existing.address.as_deref(), Some("静岡市"));
        assert_eq!(existing.location, Some(GeoPoint::new(34.97, 138.38)));
        assert_eq!(existing.source, SpotSource::Instagram);
        assert_eq!(existing.rating, Some(4.4));
    }

    #[test]
    fn persisted_spot_serializes_flat() {
        let spot = PersistedSpot {
            id: Uuid::nil(),
            created_at: ts(),
            updated_at: ts(),
            spot: CandidateSpot::new("児童館", Category::Playground, SpotSource::Manual, ts()),
        };
        let value = serde_json::to_value(&spot).unwrap();
        assert_eq!(value["name"], "児童館");
        assert_eq!(value["category"], "playground");
        assert_eq!(value["crowd_level"], "quiet");
        let back: PersistedSpot = serde_json::from_value(value).unwrap();
        assert_eq!(back, spot);
    }
}
