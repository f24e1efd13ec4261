//! Airspace geometry persistence.

use airspace_core::AirspacePolygon;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// Upsert polygons in one transaction, keyed by external id.
pub async fn upsert_airspaces(
    pool: &SqlitePool,
    polygons: &[(&AirspacePolygon, DateTime<Utc>)],
) -> Result<()> {
    if polygons.is_empty() {
        return Ok(());
    }
    let mut tx = pool.begin().await?;
    for (polygon, stored_at) in polygons {
        let record = serde_json::to_string(polygon)?;
        sqlx::query(
            r#"
            INSERT INTO airspaces (id, content_hash, record, stored_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                content_hash = ?2, record = ?3, stored_at = ?4
            "#,
        )
        .bind(&polygon.id)
        .bind(format!("{:016x}", polygon.content_hash))
        .bind(&record)
        .bind(stored_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Load every stored polygon. Rows that no longer validate are skipped.
pub async fn load_all_airspaces(pool: &SqlitePool) -> Result<Vec<(AirspacePolygon, DateTime<Utc>)>> {
    let rows = sqlx::query_as::<_, AirspaceRow>("SELECT id, record, stored_at FROM airspaces")
        .fetch_all(pool)
        .await?;

    let mut polygons = Vec::with_capacity(rows.len());
    for row in rows {
        let id = row.id.clone();
        match row.into_polygon() {
            Ok(loaded) => polygons.push(loaded),
            Err(err) => tracing::warn!(polygon_id = %id, error = %err, "Skipping unreadable airspace row"),
        }
    }
    Ok(polygons)
}

pub async fn delete_airspaces(pool: &SqlitePool, ids: &[String]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut removed = 0;
    for id in ids {
        let result = sqlx::query("DELETE FROM airspaces WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        removed += result.rows_affected();
    }
    tx.commit().await?;
    Ok(removed)
}

#[derive(sqlx::FromRow)]
struct AirspaceRow {
    id: String,
    record: String,
    stored_at: String,
}

impl AirspaceRow {
    fn into_polygon(self) -> Result<(AirspacePolygon, DateTime<Utc>)> {
        let stored: AirspacePolygon =
            serde_json::from_str(&self.record).context("decoding airspace record")?;
        // Rebuild so the bounding box and hash are derived by this build.
        let polygon = AirspacePolygon::new(
            self.id,
            stored.name,
            stored.category,
            stored.icao_class,
            stored.lower,
            stored.upper,
            stored.rings,
        )?;
        let stored_at = DateTime::parse_from_rfc3339(&self.stored_at)
            .context("parsing stored_at")?
            .with_timezone(&Utc);
        Ok((polygon, stored_at))
    }
}
