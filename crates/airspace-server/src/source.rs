//! Where raw airspace records come from.

use airspace_core::BoundingBox;
use airspace_openaip::{FetchError, OpenAipClient};
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::ingest::RawAirspaceRecord;

/// A bounding-box-filtered feed of raw airspace records.
pub trait AirspaceSource: Send + Sync {
    fn fetch<'a>(&'a self, bounds: &'a BoundingBox) -> BoxFuture<'a, Result<Vec<Value>, FetchError>>;

    fn name(&self) -> &str;
}

impl AirspaceSource for OpenAipClient {
    fn fetch<'a>(&'a self, bounds: &'a BoundingBox) -> BoxFuture<'a, Result<Vec<Value>, FetchError>> {
        Box::pin(self.fetch_airspaces(bounds))
    }

    fn name(&self) -> &str {
        "openaip"
    }
}

/// Fixed in-memory record set, for tests, demos and offline use.
///
/// Records whose geometry cannot be read are always returned so the
/// ingestion pipeline gets to reject them.
#[derive(Default)]
pub struct MemorySource {
    records: Vec<Value>,
    delay: Option<Duration>,
    /// Calls before this index are served immediately, later ones are delayed.
    delay_after: usize,
    calls: AtomicUsize,
}

impl MemorySource {
    pub fn new(records: Vec<Value>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    /// Delay every call from the `after`-th on by `delay`.
    pub fn with_delay(mut self, delay: Duration, after: usize) -> Self {
        self.delay = Some(delay);
        self.delay_after = after;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn matching(&self, bounds: &BoundingBox) -> Vec<Value> {
        self.records
            .iter()
            .filter(|value| {
                let polygons = RawAirspaceRecord::from_value((*value).clone())
                    .and_then(|record| record.validate());
                match polygons {
                    Ok(polygons) => polygons
                        .iter()
                        .any(|polygon| polygon.bounding_box.intersects(bounds)),
                    Err(_) => true,
                }
            })
            .cloned()
            .collect()
    }
}

impl AirspaceSource for MemorySource {
    fn fetch<'a>(&'a self, bounds: &'a BoundingBox) -> BoxFuture<'a, Result<Vec<Value>, FetchError>> {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                if call >= self.delay_after {
                    tokio::time::sleep(delay).await;
                }
            }
            Ok(self.matching(bounds))
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_source_filters_by_bounds() {
        let source = MemorySource::new(vec![
            json!({
                "_id": "a",
                "lowerLimit": { "value": 0, "unit": 1 },
                "upperLimit": { "value": 1000, "unit": 1 },
                "geometry": { "type": "Polygon", "coordinates": [[[6.0, 46.0], [6.1, 46.0], [6.1, 46.1], [6.0, 46.0]]] }
            }),
            json!({ "_id": "broken" }),
        ]);

        let near = source.fetch(&BoundingBox::new(45.9, 5.9, 46.2, 6.2)).await.unwrap();
        assert_eq!(near.len(), 2);
        let far = source.fetch(&BoundingBox::new(10.0, 10.0, 11.0, 11.0)).await.unwrap();
        assert_eq!(far.len(), 1);
        assert_eq!(source.calls(), 2);
    }
}
