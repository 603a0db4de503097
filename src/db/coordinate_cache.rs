use super::fact::{
    CacheStats, Coordinates, LocalityFact, LocalityRow, PutOutcome, RegionFact, RegionRow,
};
use super::region_name::RegionNormalizer;
use super::util::{create_coordinates_db, get_db_pool};
use itertools::Itertools;
use sqlx::{SqliteConnection, SqlitePool};
use std::path::Path;
use std::sync::Arc;

/// Persistent locality and region coordinates.
///
/// Every method acquires one pooled connection, runs a short sequence of
/// statements and returns the connection when the guard drops. Region names are
/// always passed through the normalizer before they reach SQL.
#[derive(Clone)]
pub struct CoordinateCache {
    pool: SqlitePool,
    normalizer: Arc<dyn RegionNormalizer>,
}

impl CoordinateCache {
    pub async fn open(
        db_path: &Path,
        pool_size: u32,
        normalizer: Arc<dyn RegionNormalizer>,
    ) -> Result<Self, sqlx::Error> {
        let pool = get_db_pool(db_path, pool_size).await?;
        create_coordinates_db(&pool).await?;
        tracing::info!("Coordinate store ready: {}", db_path.display());

        Ok(Self { pool, normalizer })
    }

    /// Exact match on the stored region form first, then any row for the same
    /// locality whose region shares the key (rows stored under older casing).
    pub async fn get_locality(
        &self,
        name: &str,
        region: &str,
    ) -> Result<Option<LocalityFact>, sqlx::Error> {
        let normalized = self.normalizer.normalize(region);
        let mut conn = self.pool.acquire().await?;
        let mut row: Option<LocalityRow> = sqlx::query_as(
            "SELECT id, city_name, region_name, latitude, longitude, confidence, source
             FROM cities WHERE city_name = ? AND region_name = ?",
        )
        .bind(name.trim())
        .bind(&normalized)
        .fetch_optional(&mut *conn)
        .await?;

        if row.is_none() {
            let key = self.normalizer.key(region);
            let candidates: Vec<LocalityRow> = sqlx::query_as(
                "SELECT id, city_name, region_name, latitude, longitude, confidence, source
                 FROM cities WHERE city_name = ? ORDER BY id DESC",
            )
            .bind(name.trim())
            .fetch_all(&mut *conn)
            .await?;
            row = candidates
                .into_iter()
                .find(|(_, _, stored, ..)| self.normalizer.key(stored) == key);
        }

        if row.is_some() {
            tracing::debug!("Found in store: {}, {}", name, region);
        }
        Ok(row.map(LocalityFact::from))
    }

    /// Upserts a locality. A later write with the same `(name, region)` replaces
    /// the coordinates of the existing row.
    pub async fn put_locality(
        &self,
        name: &str,
        region: &str,
        coordinates: Coordinates,
        confidence: f64,
        origin: &str,
    ) -> Result<PutOutcome, sqlx::Error> {
        if !coordinates.in_bounds() {
            tracing::warn!(
                "Locality {} ({}) out of bounds: {}, {}",
                name,
                region,
                coordinates.latitude,
                coordinates.longitude
            );
            return Ok(PutOutcome::Rejected);
        }

        let region = self.normalizer.normalize(region);
        let mut conn = self.pool.acquire().await?;
        sqlx::query(
            "INSERT INTO cities (city_name, region_name, latitude, longitude, confidence, source)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(city_name, region_name) DO UPDATE SET
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                confidence = excluded.confidence,
                source = excluded.source",
        )
        .bind(name.trim())
        .bind(&region)
        .bind(coordinates.latitude)
        .bind(coordinates.longitude)
        .bind(confidence)
        .bind(origin)
        .execute(&mut *conn)
        .await?;

        Ok(PutOutcome::Stored)
    }

    pub async fn get_region(&self, region: &str) -> Result<Option<RegionFact>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        let fact = self.find_region(&mut conn, region).await?;
        if fact.is_some() {
            tracing::debug!("Found region in store: {}", region);
        }

        Ok(fact)
    }

    /// Inserts a region unless one with the same key already exists, in which
    /// case the write is a successful no-op.
    pub async fn put_region(
        &self,
        region: &str,
        coordinates: Coordinates,
        confidence: f64,
        origin: &str,
    ) -> Result<PutOutcome, sqlx::Error> {
        if !coordinates.in_bounds() {
            tracing::warn!(
                "Region {} out of bounds: {}, {}",
                region,
                coordinates.latitude,
                coordinates.longitude
            );
            return Ok(PutOutcome::Rejected);
        }

        let normalized = self.normalizer.normalize(region);
        let mut conn = self.pool.acquire().await?;
        if self.find_region(&mut conn, &normalized).await?.is_some() {
            tracing::debug!("Region {} already stored, skipping", normalized);
            return Ok(PutOutcome::AlreadyPresent);
        }

        let inserted = sqlx::query(
            "INSERT INTO regions (region_name, latitude, longitude, confidence, source)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(region_name) DO NOTHING",
        )
        .bind(&normalized)
        .bind(coordinates.latitude)
        .bind(coordinates.longitude)
        .bind(confidence)
        .bind(origin)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        match inserted {
            0 => Ok(PutOutcome::AlreadyPresent),
            _ => {
                tracing::info!(
                    "Saved region: {} -> {}, {}",
                    normalized,
                    coordinates.latitude,
                    coordinates.longitude
                );
                Ok(PutOutcome::Stored)
            }
        }
    }

    /// Collapses regions whose names share a key onto the most recently inserted
    /// row. Returns the number of rows deleted.
    pub async fn reconcile_region_duplicates(&self) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, region_name FROM regions ORDER BY id")
                .fetch_all(&mut *tx)
                .await?;

        let groups = rows
            .into_iter()
            .into_group_map_by(|(_, name)| self.normalizer.key(name));

        let mut removed = 0;
        for (key, group) in groups.into_iter().filter(|(_, group)| group.len() > 1) {
            let names = group.iter().map(|(_, name)| name.as_str()).join(", ");
            let Some((latest_id, latest_name)) = group.iter().max_by_key(|(id, _)| *id) else {
                continue;
            };
            tracing::info!("Found {} variations for region {}: {}", group.len(), key, names);

            for (id, _) in group.iter().filter(|(id, _)| id != latest_id) {
                sqlx::query("DELETE FROM regions WHERE id = ?")
                    .bind(*id)
                    .execute(&mut *tx)
                    .await?;
                removed += 1;
            }

            let normalized = self.normalizer.normalize(latest_name);
            sqlx::query("UPDATE regions SET region_name = ? WHERE id = ?")
                .bind(&normalized)
                .bind(*latest_id)
                .execute(&mut *tx)
                .await?;
            tracing::info!("Kept {} (id: {})", normalized, latest_id);
        }

        tx.commit().await?;
        if removed > 0 {
            tracing::info!("Region duplicates removed: {}", removed);
        }

        Ok(removed)
    }

    pub async fn stats(&self) -> Result<CacheStats, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        let (total_localities,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cities")
            .fetch_one(&mut *conn)
            .await?;
        let (distinct_regions,): (i64,) =
            sqlx::query_as("SELECT COUNT(DISTINCT region_name) FROM cities")
                .fetch_one(&mut *conn)
                .await?;
        let (total_region_facts,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM regions")
            .fetch_one(&mut *conn)
            .await?;
        let origins: Vec<(Option<String>, i64)> =
            sqlx::query_as("SELECT source, COUNT(*) FROM cities GROUP BY source")
                .fetch_all(&mut *conn)
                .await?;

        Ok(CacheStats {
            total_localities,
            distinct_regions,
            total_region_facts,
            origin_histogram: origins
                .into_iter()
                .map(|(origin, count)| (origin.unwrap_or_else(|| "unknown".to_string()), count))
                .collect(),
        })
    }

    /// Exact match on the storage form first; rows written before reconciliation
    /// may carry other casing, so fall back to comparing keys, newest first.
    async fn find_region(
        &self,
        conn: &mut SqliteConnection,
        region: &str,
    ) -> Result<Option<RegionFact>, sqlx::Error> {
        let normalized = self.normalizer.normalize(region);
        let exact: Option<RegionRow> = sqlx::query_as(
            "SELECT id, region_name, latitude, longitude, confidence, source
             FROM regions WHERE region_name = ?",
        )
        .bind(&normalized)
        .fetch_optional(&mut *conn)
        .await?;
        if let Some(row) = exact {
            return Ok(Some(row.into()));
        }

        let key = self.normalizer.key(region);
        let rows: Vec<RegionRow> = sqlx::query_as(
            "SELECT id, region_name, latitude, longitude, confidence, source
             FROM regions ORDER BY id DESC",
        )
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows
            .into_iter()
            .find(|(_, name, ..)| self.normalizer.key(name) == key)
            .map(RegionFact::from))
    }
}
