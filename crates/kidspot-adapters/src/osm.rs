//! OpenStreetMap via an Overpass interpreter.

use async_trait::async_trait;
use kidspot_core::{CandidateSpot, GeoPoint, SpotSource, TagBag};
use kidspot_storage::{HttpFetcher, HttpRequest};
use serde::Deserialize;

use crate::{
    candidate_from_tags, fetch_page, AdapterContext, AdapterError, FetchedPage, SearchArea,
    SourceAccess, SourceAdapter,
};

pub const DEFAULT_OVERPASS_ENDPOINT: &str = "https://overpass-api.de/api/interpreter";

/// Tag values worth asking Overpass for. Anything outside this list is never fetched.
const TAG_ALLOWLIST: &[(&str, &[&str])] = &[
    ("amenity", &["restaurant", "cafe", "fast_food", "ice_cream", "playground", "food_court"]),
    ("leisure", &["playground", "park", "garden", "water_park", "indoor_play"]),
    ("tourism", &["museum", "zoo", "aquarium", "theme_park", "attraction"]),
    ("shop", &["mall", "department_store", "toys", "baby_goods"]),
];

pub fn build_overpass_query(area: &SearchArea) -> String {
    let around = format!(
        "(around:{},{},{})",
        area.radius_m, area.center.lat, area.center.lon
    );
    let mut query = String::from("[out:json][timeout:25];\n(\n");
    for (key, values) in TAG_ALLOWLIST {
        let pattern = values.join("|");
        for kind in ["node", "way"] {
            query.push_str(&format!("  {kind}[\"{key}\"~\"^({pattern})$\"]{around};\n"));
        }
    }
    query.push_str(");\nout center tags;\n");
    query
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(rename = "type")]
    kind: String,
    id: i64,
    lat: Option<f64>,
    lon: Option<f64>,
    center: Option<OverpassCenter>,
    #[serde(default)]
    tags: TagBag,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct OverpassCenter {
    lat: f64,
    lon: f64,
}

impl OverpassElement {
    /// Nodes carry their own coordinates; ways and relations only a center.
    fn location(&self) -> Option<GeoPoint> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
            _ => self.center.map(|c| GeoPoint::new(c.lat, c.lon)),
        }
    }

    fn name(&self) -> Option<&str> {
        self.tags.get("name").or_else(|| self.tags.get("name:ja"))
    }
}

#[derive(Debug, Clone)]
pub struct OverpassAdapter {
    endpoint: String,
}

impl OverpassAdapter {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_OVERPASS_ENDPOINT.to_string()),
        }
    }
}

#[async_trait]
impl SourceAdapter for OverpassAdapter {
    fn source(&self) -> SpotSource {
        SpotSource::Osm
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
        let request = HttpRequest::post_form(
            self.endpoint.clone(),
            vec![("data".to_string(), build_overpass_query(area))],
        );
        Ok(vec![fetch_page(http, ctx, self.source(), &request).await?])
    }

    fn parse(&self, page: &FetchedPage, ctx: &AdapterContext) -> Result<Vec<CandidateSpot>, AdapterError> {
        let response: OverpassResponse = page.json()?;
        Ok(response
            .elements
            .iter()
            .filter_map(|el| {
                let name = el.name()?;
                let location = el.location()?;
                let mut spot = candidate_from_tags(name, &el.tags, SpotSource::Osm, location, ctx);
                spot.source_url = Some(format!("https://www.openstreetmap.org/{}/{}", el.kind, el.id));
                spot.external_id = Some(format!("{}/{}", el.kind, el.id));
                Some(spot)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use kidspot_core::Category;
    use uuid::Uuid;

    fn ctx() -> AdapterContext {
        AdapterContext::new(Uuid::nil(), Utc.with_ymd_and_hms(2026, 4, 6, 1, 0, 0).unwrap(), 9)
    }

    fn page(body: &str) -> FetchedPage {
        FetchedPage {
            url: DEFAULT_OVERPASS_ENDPOINT.into(),
            content_type: "application/json".into(),
            body: body.as_bytes().to_vec(),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn query_covers_allowlist_around_center() {
        let query = build_overpass_query(&SearchArea::new(34.97, 138.38, 5000));
        assert!(query.starts_with("[out:json]"));
        assert!(query.contains("node[\"leisure\"~\"^(playground|park|garden|water_park|indoor_play)$\"](around:5000,34.97,138.38);"));
        assert!(query.contains("way[\"shop\"~"));
        assert!(query.trim_end().ends_with("out center tags;"));
    }

    #[test]
    fn parses_nodes_and_way_centers_and_drops_unnamed() {
        let body = r#"{
          "elements": [
            {"type": "node", "id": 1, "lat": 34.971, "lon": 138.381,
             "tags": {"name": "こどもの広場", "leisure": "playground", "wheelchair": "yes"}},
            {"type": "way", "id": 2, "center": {"lat": 34.98, "lon": 138.39},
             "tags": {"name:ja": "駿府城公園", "leisure": "park"}},
            {"type": "node", "id": 3, "lat": 34.9, "lon": 138.3, "tags": {"amenity": "cafe"}},
            {"type": "way", "id": 4, "tags": {"name": "座標なし", "amenity": "cafe"}}
          ]
        }"#;
        let spots = OverpassAdapter::new(None).parse(&page(body), &ctx()).unwrap();
        assert_eq!(spots.len(), 2);

        assert_eq!(spots[0].name, "こどもの広場");
        assert_eq!(spots[0].category, Category::Playground);
        assert_eq!(spots[0].child_friendly_score, 65);
        assert!(spots[0].facilities.stroller_friendly);
        assert_eq!(spots[0].source_url.as_deref(), Some("https://www.openstreetmap.org/node/1"));

        assert_eq!(spots[1].name, "駿府城公園");
        assert_eq!(spots[1].location, Some(GeoPoint::new(34.98, 138.39)));
        assert_eq!(spots[1].external_id.as_deref(), Some("way/2"));
    }

    #[test]
    fn empty_or_missing_elements_yield_nothing() {
        let adapter = OverpassAdapter::new(None);
        assert!(adapter.parse(&page("{}"), &ctx()).unwrap().is_empty());
        assert!(adapter.parse(&page("not json"), &ctx()).is_err());
    }
}
