use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kidspot_core::{CandidateSpot, GeoPoint, PersistedSpot, SpotDelta};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::store::{SpotStore, StoreError};

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Backend(format!("migration failed: {err}"))
    }
}

/// Postgres-backed store. The full candidate lives in a JSONB payload; name and
/// coordinates are mirrored into columns for the lookup queries.
#[derive(Debug, Clone)]
pub struct PgSpotStore {
    pool: PgPool,
}

impl PgSpotStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn row_to_spot(row: &PgRow) -> Result<PersistedSpot, StoreError> {
    let id: Uuid = row.try_get("id")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    let payload: serde_json::Value = row.try_get("payload")?;
    let spot: CandidateSpot = serde_json::from_value(payload)?;
    Ok(PersistedSpot {
        id,
        created_at,
        updated_at,
        spot,
    })
}

#[async_trait]
impl SpotStore for PgSpotStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<PersistedSpot>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, created_at, updated_at, payload
              FROM spots
             WHERE name = $1
             ORDER BY created_at
             LIMIT 1
            "#,
        )
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_spot).transpose()
    }

    async fn find_near(&self, point: GeoPoint, epsilon: f64) -> Result<Vec<PersistedSpot>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, created_at, updated_at, payload
              FROM spots
             WHERE lat BETWEEN $1 AND $2
               AND lon BETWEEN $3 AND $4
             ORDER BY created_at
            "#,
        )
        .bind(point.lat - epsilon)
        .bind(point.lat + epsilon)
        .bind(point.lon - epsilon)
        .bind(point.lon + epsilon)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_spot).collect()
    }

    async fn create(&self, spot: &CandidateSpot) -> Result<PersistedSpot, StoreError> {
        let now = Utc::now();
        let record = PersistedSpot {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            spot: spot.clone(),
        };
        sqlx::query(
            r#"
            INSERT INTO spots (id, name, lat, lon, payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(record.spot.name.trim())
        .bind(record.spot.location.map(|p| p.lat))
        .bind(record.spot.location.map(|p| p.lon))
        .bind(serde_json::to_value(&record.spot)?)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(record)
    }

    async fn update(&self, id: Uuid, delta: &SpotDelta) -> Result<PersistedSpot, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"
            SELECT id, created_at, updated_at, payload
              FROM spots
             WHERE id = $1
               FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        let mut record = row_to_spot(&row)?;
        delta.apply_to(&mut record.spot);
        record.updated_at = Utc::now();

        sqlx::query(
            r#"
            UPDATE spots
               SET lat = $2,
                   lon = $3,
                   payload = $4,
                   updated_at = $5
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(record.spot.location.map(|p| p.lat))
        .bind(record.spot.location.map(|p| p.lon))
        .bind(serde_json::to_value(&record.spot)?)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM spots")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
