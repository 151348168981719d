//! Commercial places directory (Google Places style): nearby search and
//! name lookup for enrichment.
//!
//! The directory reports no facility data. Facilities are inferred from the
//! category and rating and the candidate is marked `facilities_inferred` so
//! consumers can treat them as low confidence.

use async_trait::async_trait;
use kidspot_core::{CandidateSpot, Category, FacilityFlags, GeoPoint, SpotSource, TagBag};
use kidspot_storage::{HttpFetcher, HttpRequest};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::availability::predict_crowd;
use crate::scoring::{age_appropriate, score, tags_for_inferred};
use crate::tags::NO_ADDRESS;
use crate::{
    fetch_page, AdapterContext, AdapterError, FetchedPage, SearchArea, SourceAccess, SourceAdapter,
    SpotEnricher,
};

pub const DEFAULT_PLACES_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/place";
/// One nearby search per type; the API accepts a single type per call.
pub const NEARBY_TYPES: [&str; 8] = [
    "restaurant",
    "cafe",
    "park",
    "museum",
    "zoo",
    "aquarium",
    "amusement_park",
    "shopping_mall",
];
const ENRICH_BIAS_RADIUS_M: u32 = 500;
const INFERENCE_RATING: f64 = 4.0;

const TYPE_RULES: &[(Category, &[&str])] = &[
    (Category::Restaurant, &["restaurant", "meal_takeaway", "meal_delivery", "food"]),
    (Category::Cafe, &["cafe", "bakery"]),
    (Category::Park, &["park", "campground"]),
    (Category::Museum, &["museum", "art_gallery", "library"]),
    (Category::Entertainment, &["zoo", "aquarium", "amusement_park", "bowling_alley"]),
    (Category::Shopping, &["shopping_mall", "department_store", "store"]),
    (Category::TouristSpot, &["tourist_attraction", "point_of_interest"]),
];

/// Place types that carry a scoring rule of their own beyond the category.
const TYPE_TAGS: &[(&str, (&str, &str))] = &[
    ("zoo", ("tourism", "zoo")),
    ("aquarium", ("tourism", "aquarium")),
    ("playground", ("leisure", "playground")),
];

/// The tag bag a place would have carried had it come from open geodata.
pub fn tags_for_place<S: AsRef<str>>(types: &[S], category: Category, facilities: &FacilityFlags) -> TagBag {
    let mut tags = tags_for_inferred(category, facilities);
    for (place_type, (key, value)) in TYPE_TAGS {
        if types.iter().any(|t| t.as_ref() == *place_type) {
            tags.insert(*key, *value);
        }
    }
    tags
}

/// First rule with any matching type wins.
pub fn category_for_types<S: AsRef<str>>(types: &[S]) -> Category {
    TYPE_RULES
        .iter()
        .find(|(_, wanted)| types.iter().any(|t| wanted.contains(&t.as_ref())))
        .map(|(category, _)| *category)
        .unwrap_or(Category::TouristSpot)
}

/// Guessed facilities. Well-rated restaurants are assumed to have a kids menu.
pub fn infer_facilities(category: Category, rating: Option<f64>) -> FacilityFlags {
    let well_rated = rating.is_some_and(|r| r >= INFERENCE_RATING);
    let mut flags = FacilityFlags::default();
    match category {
        Category::Restaurant => {
            flags.kids_menu = well_rated;
            flags.high_chair = well_rated;
        }
        Category::Cafe => flags.high_chair = well_rated,
        Category::Park | Category::Playground => {
            flags.play_area = true;
            flags.stroller_friendly = true;
        }
        Category::Shopping => {
            flags.nursing_room = true;
            flags.diaper_changing = true;
            flags.stroller_friendly = true;
        }
        Category::Museum | Category::Entertainment => {
            flags.stroller_friendly = well_rated;
            flags.diaper_changing = well_rated;
        }
        Category::TouristSpot => {}
    }
    flags
}

#[derive(Debug, Deserialize)]
struct NearbyResponse {
    #[serde(default)]
    results: Vec<PlaceResult>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FindPlaceResponse {
    #[serde(default)]
    candidates: Vec<PlaceResult>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct PlaceResult {
    place_id: String,
    name: String,
    geometry: Option<PlaceGeometry>,
    #[serde(default)]
    vicinity: Option<String>,
    #[serde(default)]
    formatted_address: Option<String>,
    #[serde(default)]
    types: Vec<String>,
    rating: Option<f64>,
    user_ratings_total: Option<u32>,
    opening_hours: Option<PlaceOpeningHours>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct PlaceGeometry {
    location: PlaceLatLng,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct PlaceLatLng {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct PlaceOpeningHours {
    open_now: Option<bool>,
}

fn check_status(status: Option<&str>, error_message: Option<&str>) -> Result<(), AdapterError> {
    match status {
        None | Some("OK") | Some("ZERO_RESULTS") => Ok(()),
        Some(other) => Err(AdapterError::Message(format!(
            "places API returned {other}: {}",
            error_message.unwrap_or("no message")
        ))),
    }
}

impl PlaceResult {
    fn location(&self) -> Option<GeoPoint> {
        self.geometry.map(|g| GeoPoint::new(g.location.lat, g.location.lng))
    }

    fn address(&self) -> Option<String> {
        self.formatted_address
            .as_deref()
            .or(self.vicinity.as_deref())
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
    }
}

/// What a directory lookup found for an existing candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceMatch {
    pub place_id: String,
    pub name: String,
    pub location: Option<GeoPoint>,
    pub address: Option<String>,
    pub category: Category,
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
}

impl PlaceMatch {
    /// Fills what the candidate lacks. The category is only replaced when the
    /// candidate holds the generic fallback.
    pub fn apply_to(&self, spot: &mut CandidateSpot) {
        if self.rating.is_some() {
            spot.rating = self.rating;
        }
        if self.review_count.is_some() {
            spot.review_count = self.review_count;
        }
        let has_address = spot
            .address
            .as_deref()
            .is_some_and(|a| !a.trim().is_empty() && a != NO_ADDRESS);
        if !has_address {
            if let Some(address) = &self.address {
                spot.address = Some(address.clone());
            }
        }
        if spot.location.is_none() {
            spot.location = self.location;
        }
        if spot.category == Category::TouristSpot && self.category != Category::TouristSpot {
            spot.category = self.category;
        }
        if spot.external_id.is_none() {
            spot.external_id = Some(self.place_id.clone());
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlacesAdapter {
    api_key: Option<String>,
    endpoint: String,
}

impl PlacesAdapter {
    pub fn new(api_key: Option<String>, endpoint: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            endpoint: endpoint
                .unwrap_or_else(|| DEFAULT_PLACES_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }

    fn key(&self) -> Result<&str, AdapterError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| AdapterError::NotConfigured(SpotSource::GooglePlaces.to_string()))
    }

    fn to_candidate(&self, place: &PlaceResult, ctx: &AdapterContext) -> Option<CandidateSpot> {
        let location = place.location()?;
        let name = place.name.trim();
        if name.is_empty() {
            return None;
        }
        let category = category_for_types(place.types.as_slice());
        let facilities = infer_facilities(category, place.rating);
        let tags = tags_for_place(place.types.as_slice(), category, &facilities);

        let mut spot = CandidateSpot::new(name, category, SpotSource::GooglePlaces, ctx.fetched_at)
            .with_location(location.lat, location.lon);
        spot.address = place.address();
        spot.facilities = facilities;
        spot.facilities_inferred = true;
        spot.child_friendly_score = score(&tags);
        spot.age_appropriate = age_appropriate(&tags);
        spot.open_now = place.opening_hours.and_then(|h| h.open_now);
        spot.crowd_level = predict_crowd(category, ctx.local_now);
        spot.rating = place.rating;
        spot.review_count = place.user_ratings_total;
        spot.source_url = Some(format!(
            "https://www.google.com/maps/place/?q=place_id:{}",
            place.place_id
        ));
        spot.external_id = Some(place.place_id.clone());
        Some(spot)
    }

    pub fn parse_find_place(&self, page: &FetchedPage) -> Result<Option<PlaceMatch>, AdapterError> {
        let response: FindPlaceResponse = page.json()?;
        check_status(response.status.as_deref(), response.error_message.as_deref())?;
        Ok(response.candidates.first().map(|place| PlaceMatch {
            place_id: place.place_id.clone(),
            name: place.name.clone(),
            location: place.location(),
            address: place.address(),
            category: category_for_types(place.types.as_slice()),
            rating: place.rating,
            review_count: place.user_ratings_total,
        }))
    }
}

/// Drops the type searches that failed. Only a total outage is an adapter
/// failure.
fn keep_fetched_pages(
    results: Vec<(&str, Result<FetchedPage, AdapterError>)>,
) -> Result<Vec<FetchedPage>, AdapterError> {
    let mut pages = Vec::with_capacity(results.len());
    let mut last_err = None;
    for (place_type, result) in results {
        match result {
            Ok(page) => pages.push(page),
            Err(err) => {
                warn!(place_type, error = %err, "places nearby search failed for type");
                last_err = Some(err);
            }
        }
    }
    match last_err {
        Some(err) if pages.is_empty() => Err(err),
        _ => Ok(pages),
    }
}

#[async_trait]
impl SourceAdapter for PlacesAdapter {
    fn source(&self) -> SpotSource {
        SpotSource::GooglePlaces
    }

    fn access(&self) -> SourceAccess {
        SourceAccess::CredentialedApi
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        area: &SearchArea,
    ) -> Result<Vec<FetchedPage>, AdapterError> {
        let key = self.key()?;
        let url = format!("{}/nearbysearch/json", self.endpoint);
        let mut results = Vec::with_capacity(NEARBY_TYPES.len());
        for place_type in NEARBY_TYPES {
            let request = HttpRequest::get(url.clone())
                .query("location", format!("{},{}", area.center.lat, area.center.lon))
                .query("radius", area.radius_m)
                .query("type", place_type)
                .query("language", "ja")
                .query("key", key);
            results.push((place_type, fetch_page(http, ctx, self.source(), &request).await));
        }
        keep_fetched_pages(results)
    }

    fn parse(&self, page: &FetchedPage, ctx: &AdapterContext) -> Result<Vec<CandidateSpot>, AdapterError> {
        let response: NearbyResponse = page.json()?;
        check_status(response.status.as_deref(), response.error_message.as_deref())?;
        Ok(response
            .results
            .iter()
            .filter_map(|place| self.to_candidate(place, ctx))
            .collect())
    }
}

#[async_trait]
impl SpotEnricher for PlacesAdapter {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn enrich(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        spot: &CandidateSpot,
    ) -> Result<Option<PlaceMatch>, AdapterError> {
        let key = self.key()?;
        let Some(location) = spot.location else {
            return Ok(None);
        };
        let request = HttpRequest::get(format!("{}/findplacefromtext/json", self.endpoint))
            .query("input", spot.name.trim())
            .query("inputtype", "textquery")
            .query(
                "fields",
                "place_id,name,geometry,formatted_address,rating,user_ratings_total,types",
            )
            .query(
                "locationbias",
                format!("circle:{ENRICH_BIAS_RADIUS_M}@{},{}", location.lat, location.lon),
            )
            .query("language", "ja")
            .query("key", key);
        let page = fetch_page(http, ctx, SpotSource::GooglePlaces, &request).await?;
        self.parse_find_place(&page)
    }
}
