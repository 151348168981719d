use std::collections::HashMap;
use std::time::Duration;

use kidspot_core::{CandidateSpot, SpotSource};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// How long results from a source stay fresh. Social signal goes stale fastest.
pub fn source_ttl(source: SpotSource) -> Duration {
    match source {
        SpotSource::Osm | SpotSource::Wikipedia | SpotSource::Manual => Duration::from_secs(24 * 3600),
        SpotSource::GooglePlaces => Duration::from_secs(3600),
        SpotSource::Trending | SpotSource::Instagram | SpotSource::Twitter => Duration::from_secs(15 * 60),
    }
}

/// Stable key for a search: coordinates rounded to ~10 m plus radius and a filter fingerprint.
pub fn cache_key(lat: f64, lon: f64, radius_m: u32, filter_fingerprint: &str) -> String {
    let raw = format!("{lat:.4}:{lon:.4}:{radius_m}:{filter_fingerprint}");
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
struct CacheEntry {
    spots: Vec<CandidateSpot>,
    expires_at: Instant,
}

/// In-process memo of search results with source-aware expiry.
#[derive(Debug, Default)]
pub struct SearchCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl SearchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Vec<CandidateSpot>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.spots.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Entry lives as long as the shortest-lived contributing source allows.
    pub async fn insert(&self, key: impl Into<String>, spots: Vec<CandidateSpot>) {
        let ttl = spots
            .iter()
            .map(|s| source_ttl(s.source))
            .min()
            .unwrap_or_else(|| source_ttl(SpotSource::Trending));
        self.insert_with_ttl(key, spots, ttl).await;
    }

    pub async fn insert_with_ttl(&self, key: impl Into<String>, spots: Vec<CandidateSpot>, ttl: Duration) {
        let entry = CacheEntry {
            spots,
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().await.insert(key.into(), entry);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kidspot_core::Category;

    #[test]
    fn cache_key_is_stable_and_rounds_coordinates() {
        let a = cache_key(34.970001, 138.380001, 5000, "min=30");
        let b = cache_key(34.970004, 138.380004, 5000, "min=30");
        let c = cache_key(34.97, 138.38, 3000, "min=30");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test(start_paused = true)]
    async fn trending_results_expire_before_geodata() {
        let cache = SearchCache::new();
        let now = Utc::now();
        let osm = CandidateSpot::new("公園", Category::Park, SpotSource::Osm, now);
        let buzz = CandidateSpot::new("話題のカフェ", Category::Cafe, SpotSource::Trending, now);

        cache.insert("geo", vec![osm.clone()]).await;
        cache.insert("mixed", vec![osm, buzz]).await;

        tokio::time::advance(Duration::from_secs(16 * 60)).await;
        assert!(cache.get("geo").await.is_some());
        assert!(cache.get("mixed").await.is_none());
        assert_eq!(cache.len().await, 1);
    }
}
