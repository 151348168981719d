use async_trait::async_trait;
use chrono::Utc;
use kidspot_core::{CandidateSpot, GeoPoint, PersistedSpot, SpotDelta};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("spot {0} not found")]
    NotFound(Uuid),
    #[error("store backend failed: {0}")]
    Backend(String),
    #[error("spot payload could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persistence port. The core reads through it and hands back upsert intents;
/// only the ingestion caller writes.
#[async_trait]
pub trait SpotStore: Send + Sync {
    /// Exact (trimmed) name match.
    async fn find_by_name(&self, name: &str) -> Result<Option<PersistedSpot>, StoreError>;

    /// Records inside a `±epsilon` degree box around `point`.
    async fn find_near(&self, point: GeoPoint, epsilon: f64) -> Result<Vec<PersistedSpot>, StoreError>;

    async fn create(&self, spot: &CandidateSpot) -> Result<PersistedSpot, StoreError>;

    async fn update(&self, id: Uuid, delta: &SpotDelta) -> Result<PersistedSpot, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    /// Name match first, otherwise the closest record inside the proximity box.
    async fn find_by_name_or_proximity(
        &self,
        name: &str,
        point: Option<GeoPoint>,
        epsilon: f64,
    ) -> Result<Option<PersistedSpot>, StoreError> {
        if let Some(found) = self.find_by_name(name).await? {
            return Ok(Some(found));
        }
        let Some(point) = point.filter(GeoPoint::is_valid) else {
            return Ok(None);
        };
        let nearby = self.find_near(point, epsilon).await?;
        Ok(nearby.into_iter().min_by(|a, b| {
            let da = a
                .spot
                .location
                .map(|p| p.squared_degree_distance(&point))
                .unwrap_or(f64::MAX);
            let db = b
                .spot
                .location
                .map(|p| p.squared_degree_distance(&point))
                .unwrap_or(f64::MAX);
            da.total_cmp(&db)
        }))
    }
}

/// Process-local store used when no database is configured, and by tests.
#[derive(Debug, Default)]
pub struct InMemorySpotStore {
    spots: RwLock<Vec<PersistedSpot>>,
}

impl InMemorySpotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spots(spots: Vec<PersistedSpot>) -> Self {
        Self {
            spots: RwLock::new(spots),
        }
    }

    pub async fn snapshot(&self) -> Vec<PersistedSpot> {
        self.spots.read().await.clone()
    }
}

#[async_trait]
impl SpotStore for InMemorySpotStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<PersistedSpot>, StoreError> {
        let wanted = name.trim();
        if wanted.is_empty() {
            return Ok(None);
        }
        let spots = self.spots.read().await;
        Ok(spots.iter().find(|s| s.spot.name.trim() == wanted).cloned())
    }

    async fn find_near(&self, point: GeoPoint, epsilon: f64) -> Result<Vec<PersistedSpot>, StoreError> {
        let spots = self.spots.read().await;
        Ok(spots
            .iter()
            .filter(|s| s.spot.location.is_some_and(|p| p.within_box(&point, epsilon)))
            .cloned()
            .collect())
    }

    async fn create(&self, spot: &CandidateSpot) -> Result<PersistedSpot, StoreError> {
        let now = Utc::now();
        let record = PersistedSpot {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            spot: spot.clone(),
        };
        self.spots.write().await.push(record.clone());
        Ok(record)
    }

    async fn update(&self, id: Uuid, delta: &SpotDelta) -> Result<PersistedSpot, StoreError> {
        let mut spots = self.spots.write().await;
        let record = spots
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(StoreError::NotFound(id))?;
        delta.apply_to(&mut record.spot);
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.spots.read().await.len() as u64)
    }
}
