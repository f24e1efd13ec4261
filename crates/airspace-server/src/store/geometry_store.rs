//! Deduplicated airspace geometry keyed by external id.

use airspace_core::AirspacePolygon;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Result of an upsert, decided by content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PutOutcome {
    Inserted,
    Updated,
    /// Same rings as before. Metadata may still have been replaced.
    Unchanged,
}

#[derive(Debug, Clone)]
struct StoredAirspace {
    polygon: Arc<AirspacePolygon>,
    stored_at: DateTime<Utc>,
}

/// Single owner of every polygon. Readers get `Arc`s of immutable records,
/// so a concurrent replace never exposes a half-written polygon.
#[derive(Default)]
pub struct GeometryStore {
    records: DashMap<String, StoredAirspace>,
}

impl GeometryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert by id, replacing the whole record.
    pub fn put(&self, polygon: AirspacePolygon) -> PutOutcome {
        self.put_at(polygon, Utc::now())
    }

    fn put_at(&self, polygon: AirspacePolygon, stored_at: DateTime<Utc>) -> PutOutcome {
        let record = StoredAirspace {
            polygon: Arc::new(polygon),
            stored_at,
        };
        match self.records.entry(record.polygon.id.clone()) {
            Entry::Occupied(mut entry) => {
                let outcome = if entry.get().polygon.content_hash == record.polygon.content_hash {
                    PutOutcome::Unchanged
                } else {
                    PutOutcome::Updated
                };
                entry.insert(record);
                outcome
            }
            Entry::Vacant(entry) => {
                entry.insert(record);
                PutOutcome::Inserted
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<AirspacePolygon>> {
        self.records.get(id).map(|record| record.polygon.clone())
    }

    /// Fetch every id that is present. Missing ids are skipped silently.
    pub fn get_many<'a, I>(&self, ids: I) -> Vec<Arc<AirspacePolygon>>
    where
        I: IntoIterator<Item = &'a String>,
    {
        ids.into_iter().filter_map(|id| self.get(id)).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn stored_at(&self, id: &str) -> Option<DateTime<Utc>> {
        self.records.get(id).map(|record| record.stored_at)
    }

    /// Remove records older than `retention`. Tile entries still pointing at
    /// them are cleaned up lazily by the query engine.
    pub fn purge_expired(&self, retention: Duration) -> Vec<String> {
        match cutoff(retention) {
            Some(cutoff) => self.purge_before(cutoff),
            None => Vec::new(),
        }
    }

    pub fn purge_before(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        let mut purged = Vec::new();
        self.records.retain(|id, record| {
            if record.stored_at < cutoff {
                purged.push(id.clone());
                false
            } else {
                true
            }
        });
        purged.sort();
        purged
    }

    /// Insert a record loaded from disk, keeping its original timestamp.
    pub fn restore(&self, polygon: AirspacePolygon, stored_at: DateTime<Utc>) {
        self.put_at(polygon, stored_at);
    }

    /// Drop a single record. Returns whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        self.records.remove(id).is_some()
    }

    /// Drop every record.
    pub fn clear(&self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Oldest timestamp still inside `age`, or `None` if `age` reaches before the epoch.
pub(crate) fn cutoff(age: Duration) -> Option<DateTime<Utc>> {
    let age = chrono::Duration::from_std(age).ok()?;
    Utc::now().checked_sub_signed(age)
}

#[cfg(test)]
mod tests {
    use super::*;
    use airspace_core::{AltitudeDatum, AltitudeLimit, AltitudeUnit, IcaoClass, Ring};

    fn square(lat: f64, lon: f64, size: f64) -> Ring {
        vec![
            [lat, lon],
            [lat, lon + size],
            [lat + size, lon + size],
            [lat + size, lon],
            [lat, lon],
        ]
    }

    fn polygon(id: &str, name: &str, ring: Ring) -> AirspacePolygon {
        AirspacePolygon::new(
            id,
            name,
            "CTR",
            IcaoClass::D,
            AltitudeLimit::ground(),
            AltitudeLimit::new(2500.0, AltitudeUnit::Feet, AltitudeDatum::MeanSeaLevel),
            vec![ring],
        )
        .unwrap()
    }

    #[test]
    fn put_reports_insert_update_and_unchanged() {
        let store = GeometryStore::new();
        assert_eq!(store.put(polygon("a", "A", square(45.0, 6.0, 0.1))), PutOutcome::Inserted);
        assert_eq!(store.put(polygon("a", "A renamed", square(45.0, 6.0, 0.1))), PutOutcome::Unchanged);
        assert_eq!(store.get("a").unwrap().name, "A renamed");
        assert_eq!(store.put(polygon("a", "A", square(45.0, 6.0, 0.2))), PutOutcome::Updated);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn get_many_skips_missing_ids() {
        let store = GeometryStore::new();
        store.put(polygon("a", "A", square(45.0, 6.0, 0.1)));
        let ids = vec!["a".to_string(), "gone".to_string()];
        let found = store.get_many(&ids);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "a");
    }

    #[test]
    fn purge_removes_only_old_records() {
        let store = GeometryStore::new();
        let old = Utc::now() - chrono::Duration::days(10);
        store.restore(polygon("old", "Old", square(45.0, 6.0, 0.1)), old);
        store.put(polygon("new", "New", square(46.0, 6.0, 0.1)));

        let purged = store.purge_expired(Duration::from_secs(7 * 86_400));
        assert_eq!(purged, vec!["old".to_string()]);
        assert!(store.get("old").is_none());
        assert!(store.contains("new"));
    }
}
