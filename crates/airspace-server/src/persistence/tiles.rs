//! Tile index persistence.

use airspace_core::TileKey;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::BTreeSet;

use crate::store::TileEntry;

pub async fn upsert_tiles(pool: &SqlitePool, entries: &[TileEntry]) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    let mut tx = pool.begin().await?;
    for entry in entries {
        let ids = serde_json::to_string(&entry.polygon_ids)?;
        sqlx::query(
            r#"
            INSERT INTO tiles (zoom, x, y, polygon_ids, fetched_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(zoom, x, y) DO UPDATE SET
                polygon_ids = ?4, fetched_at = ?5
            "#,
        )
        .bind(entry.tile.zoom as i64)
        .bind(entry.tile.x as i64)
        .bind(entry.tile.y as i64)
        .bind(&ids)
        .bind(entry.fetched_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Load tiles at `zoom`. Tiles written under another grid resolution are ignored.
pub async fn load_tiles(
    pool: &SqlitePool,
    zoom: u8,
) -> Result<Vec<(TileKey, BTreeSet<String>, DateTime<Utc>)>> {
    let rows = sqlx::query_as::<_, TileRow>(
        "SELECT zoom, x, y, polygon_ids, fetched_at FROM tiles WHERE zoom = ?1",
    )
    .bind(zoom as i64)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TileRow::into_entry).collect()
}

#[derive(sqlx::FromRow)]
struct TileRow {
    zoom: i64,
    x: i64,
    y: i64,
    polygon_ids: String,
    fetched_at: String,
}

impl TileRow {
    fn into_entry(self) -> Result<(TileKey, BTreeSet<String>, DateTime<Utc>)> {
        let tile = TileKey::new(
            u8::try_from(self.zoom).context("tile zoom")?,
            u32::try_from(self.x).context("tile x")?,
            u32::try_from(self.y).context("tile y")?,
        );
        let ids: BTreeSet<String> =
            serde_json::from_str(&self.polygon_ids).context("decoding tile polygon ids")?;
        let fetched_at = DateTime::parse_from_rfc3339(&self.fetched_at)
            .context("parsing fetched_at")?
            .with_timezone(&Utc);
        Ok((tile, ids, fetched_at))
    }
}
