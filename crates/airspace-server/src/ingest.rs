//! Raw airspace records into the geometry store and tile index.

use airspace_core::{
    AirspacePolygon, AltitudeDatum, AltitudeLimit, AltitudeUnit, IcaoClass, Ring, TileGrid,
    TileKey, ValidationError,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::store::{GeometryStore, PutOutcome, TileIndex};

/// Numeric code or text label; the API uses codes, hand-written data labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawCode {
    Code(i64),
    Label(String),
}

impl fmt::Display for RawCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawCode::Code(code) => write!(f, "{code}"),
            RawCode::Label(label) => f.write_str(label),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLimit {
    pub value: f64,
    pub unit: RawCode,
    #[serde(default)]
    pub reference_datum: Option<RawCode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub coordinates: Value,
}

/// Airspace record as served by the aviation-data API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAirspaceRecord {
    #[serde(rename = "_id", alias = "id", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<RawCode>,
    #[serde(default)]
    pub icao_class: Option<RawCode>,
    #[serde(default)]
    pub lower_limit: Option<RawLimit>,
    #[serde(default)]
    pub upper_limit: Option<RawLimit>,
    #[serde(default)]
    pub geometry: Option<RawGeometry>,
}

impl RawAirspaceRecord {
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        serde_json::from_value(value).map_err(|err| ValidationError::Malformed(err.to_string()))
    }

    /// Convert into validated polygons. A MultiPolygon yields one polygon
    /// per part, with ids `"{id}#{n}"`.
    pub fn validate(&self) -> Result<Vec<AirspacePolygon>, ValidationError> {
        let id = self
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(ValidationError::MissingId)?;
        let lower = parse_limit(self.lower_limit.as_ref(), "lower")?;
        let upper = parse_limit(self.upper_limit.as_ref(), "upper")?;
        let category = self.kind.as_ref().map(category_label).unwrap_or_else(|| "OTHER".to_string());
        let icao_class = match &self.icao_class {
            Some(RawCode::Code(code)) => u8::try_from(*code)
                .map(IcaoClass::from_code)
                .unwrap_or(IcaoClass::Unclassified),
            Some(RawCode::Label(label)) => IcaoClass::parse(label).unwrap_or(IcaoClass::Unclassified),
            None => IcaoClass::Unclassified,
        };
        let name = self.name.clone().unwrap_or_else(|| id.to_string());

        let geometry = self.geometry.as_ref().ok_or(ValidationError::MissingGeometry)?;
        let parts = match geometry.kind.as_str() {
            "Polygon" => vec![parse_polygon(&geometry.coordinates)?],
            "MultiPolygon" => {
                let parts: Vec<Value> = serde_json::from_value(geometry.coordinates.clone())
                    .map_err(|err| ValidationError::Malformed(err.to_string()))?;
                parts.iter().map(parse_polygon).collect::<Result<Vec<_>, _>>()?
            }
            other => return Err(ValidationError::UnsupportedGeometry(other.to_string())),
        };
        if parts.is_empty() {
            return Err(ValidationError::MissingGeometry);
        }

        let single = parts.len() == 1;
        parts
            .into_iter()
            .enumerate()
            .map(|(index, rings)| {
                let part_id = if single { id.to_string() } else { format!("{id}#{index}") };
                AirspacePolygon::new(part_id, name.clone(), category.clone(), icao_class, lower, upper, rings)
            })
            .collect()
    }
}

fn parse_limit(limit: Option<&RawLimit>, which: &'static str) -> Result<AltitudeLimit, ValidationError> {
    let limit = limit.ok_or(ValidationError::MissingAltitude(which))?;
    if !limit.value.is_finite() {
        return Err(ValidationError::Malformed(format!("{which} limit is not a number")));
    }
    let unit = match &limit.unit {
        RawCode::Code(code) => u8::try_from(*code).ok().and_then(AltitudeUnit::from_code),
        RawCode::Label(label) => AltitudeUnit::parse(label),
    }
    .ok_or_else(|| ValidationError::UnknownUnit(limit.unit.to_string()))?;
    let datum = match &limit.reference_datum {
        None => Some(AltitudeDatum::MeanSeaLevel),
        Some(RawCode::Code(code)) => u8::try_from(*code).ok().and_then(AltitudeDatum::from_code),
        Some(RawCode::Label(label)) => AltitudeDatum::parse(label),
    }
    .ok_or_else(|| {
        ValidationError::UnknownDatum(
            limit
                .reference_datum
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
        )
    })?;
    Ok(AltitudeLimit::new(limit.value, unit, datum))
}

/// GeoJSON polygon coordinates (`[lon, lat]`) into `[lat, lon]` rings.
fn parse_polygon(coordinates: &Value) -> Result<Vec<Ring>, ValidationError> {
    let rings: Vec<Vec<Vec<f64>>> = serde_json::from_value(coordinates.clone())
        .map_err(|err| ValidationError::Malformed(err.to_string()))?;
    if rings.is_empty() {
        return Err(ValidationError::MissingGeometry);
    }
    rings
        .into_iter()
        .map(|ring| {
            ring.into_iter()
                .map(|position| match position.as_slice() {
                    [lon, lat, ..] => Ok([*lat, *lon]),
                    _ => Err(ValidationError::Malformed("position needs two numbers".to_string())),
                })
                .collect()
        })
        .collect()
}

/// Label for an aviation-data API airspace type code.
pub fn category_label(kind: &RawCode) -> String {
    let code = match kind {
        RawCode::Label(label) => return label.trim().to_ascii_uppercase(),
        RawCode::Code(code) => *code,
    };
    let label = match code {
        1 => "RESTRICTED",
        2 => "DANGER",
        3 => "PROHIBITED",
        4 => "CTR",
        5 => "TMZ",
        6 => "RMZ",
        7 => "TMA",
        8 => "TRA",
        9 => "TSA",
        10 => "FIR",
        11 => "UIR",
        12 => "ADIZ",
        13 => "ATZ",
        14 => "MATZ",
        15 => "AIRWAY",
        16 => "MTR",
        17 => "ALERT",
        18 => "WARNING",
        19 => "PROTECTED",
        20 => "HTZ",
        21 => "GLIDING_SECTOR",
        22 => "TRP",
        23 => "TIZ",
        24 => "TIA",
        25 => "MTA",
        26 => "CTA",
        27 => "ACC_SECTOR",
        28 => "SPORT",
        29 => "LOW_OVERFLIGHT_RESTRICTION",
        _ => "OTHER",
    };
    label.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub id: Option<String>,
    pub reason: String,
}

/// Outcome of one ingestion run. Counts are per stored polygon, so a
/// MultiPolygon record contributes one count per part.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestionReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Records that failed validation, counted per record.
    pub rejected: usize,
    pub rejections: Vec<Rejection>,
    pub tiles_written: usize,
    /// Inserted or updated ids.
    pub changed_ids: BTreeSet<String>,
    /// Parts an earlier version of a record produced and this one no longer does.
    pub removed_ids: BTreeSet<String>,
    #[serde(skip)]
    pub stored_ids: BTreeSet<String>,
    #[serde(skip)]
    pub tiles: Vec<TileKey>,
}

impl IngestionReport {
    pub fn merge(&mut self, other: IngestionReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.rejected += other.rejected;
        self.rejections.extend(other.rejections);
        self.tiles_written += other.tiles_written;
        self.changed_ids.extend(other.changed_ids);
        self.removed_ids.extend(other.removed_ids);
        self.stored_ids.extend(other.stored_ids);
        self.tiles.extend(other.tiles);
    }
}

/// Sole writer of the geometry store and tile index.
pub struct IngestionPipeline {
    geometry: Arc<GeometryStore>,
    tiles: Arc<TileIndex>,
    grid: TileGrid,
}

impl IngestionPipeline {
    pub fn new(geometry: Arc<GeometryStore>, tiles: Arc<TileIndex>, grid: TileGrid) -> Self {
        Self { geometry, tiles, grid }
    }

    pub fn grid(&self) -> TileGrid {
        self.grid
    }

    /// Validate and store `records`, then replace every tile in `covered`
    /// with the ids that now fall inside it. Bad records are skipped.
    pub fn ingest(&self, records: Vec<Value>, covered: &[TileKey]) -> IngestionReport {
        let mut report = IngestionReport::default();
        let mut accepted: Vec<Arc<AirspacePolygon>> = Vec::new();
        let mut updated = HashSet::new();

        for value in records {
            let record_id = value
                .get("_id")
                .or_else(|| value.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string);
            let polygons = match RawAirspaceRecord::from_value(value).and_then(|record| record.validate()) {
                Ok(polygons) => polygons,
                Err(err) => {
                    tracing::warn!(record_id = ?record_id, error = %err, "Rejected airspace record");
                    report.rejected += 1;
                    report.rejections.push(Rejection {
                        id: record_id,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            if let Some(record_id) = record_id.as_deref().map(str::trim) {
                for id in self.drop_retired_parts(record_id, polygons.len()) {
                    updated.insert(id.clone());
                    report.removed_ids.insert(id);
                }
            }

            for polygon in polygons {
                let id = polygon.id.clone();
                match self.geometry.put(polygon) {
                    PutOutcome::Inserted => {
                        report.inserted += 1;
                        report.changed_ids.insert(id.clone());
                    }
                    PutOutcome::Updated => {
                        report.updated += 1;
                        report.changed_ids.insert(id.clone());
                        updated.insert(id.clone());
                    }
                    PutOutcome::Unchanged => report.unchanged += 1,
                }
                if let Some(stored) = self.geometry.get(&id) {
                    accepted.push(stored);
                }
                report.stored_ids.insert(id);
            }
        }

        let marked = self.tiles.mark_stale_referencing(&updated);
        if marked > 0 {
            tracing::debug!(tiles = marked, "Marked tiles referencing updated airspace as stale");
        }

        let fetched_at = Utc::now();
        // Same clamped mapping as viewport lookups, so polar polygons land
        // on the edge rows.
        for tile in covered {
            let ids: BTreeSet<String> = accepted
                .iter()
                .filter(|polygon| self.grid.covers(&polygon.bounding_box, tile))
                .map(|polygon| polygon.id.clone())
                .collect();
            self.tiles.put_tile(*tile, ids, fetched_at);
        }
        report.tiles_written = covered.len();
        report.tiles = covered.to_vec();

        tracing::info!(
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            rejected = report.rejected,
            removed = report.removed_ids.len(),
            tiles = report.tiles_written,
            "Ingested airspace batch"
        );
        report
    }

    /// Remove ids a record no longer produces: the bare id once it became a
    /// MultiPolygon, or trailing `#n` parts once it has fewer of them.
    fn drop_retired_parts(&self, record_id: &str, parts: usize) -> Vec<String> {
        let mut dropped = Vec::new();
        let first_retired = if parts == 1 {
            0
        } else {
            if self.geometry.remove(record_id) {
                dropped.push(record_id.to_string());
            }
            parts
        };
        for index in first_retired.. {
            let id = format!("{record_id}#{index}");
            if !self.geometry.remove(&id) {
                break;
            }
            dropped.push(id);
        }
        dropped
    }
}
