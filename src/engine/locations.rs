use tracing::debug;

use super::Engine;
use crate::error::PolyDbError;
use crate::geo;
use crate::request::RequestOptions;
use crate::results::NextToken;
use crate::types::{Record, RowValues};

/// A radius search around a point.
///
/// Rows must carry a full-precision geohash in `geohash_column` plus their coordinates; the
/// search scans the cell around the point and its neighbours by geohash prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub distance_km: f64,
    pub count: usize,
    /// Extra equality conditions, e.g. a partition key.
    pub conditions: Record,
    pub geohash_column: String,
    pub latitude_column: String,
    pub longitude_column: String,
    /// Column added to every returned row.
    pub distance_column: String,
}

impl GeoQuery {
    #[must_use]
    pub fn new(latitude: f64, longitude: f64, distance_km: f64) -> Self {
        Self {
            latitude,
            longitude,
            distance_km,
            count: 10,
            conditions: Record::new(),
            geohash_column: "geohash".into(),
            latitude_column: "latitude".into(),
            longitude_column: "longitude".into(),
            distance_column: "distance".into(),
        }
    }

    #[must_use]
    pub fn count(mut self, count: usize) -> Self {
        self.count = count.max(1);
        self
    }

    #[must_use]
    pub fn condition(mut self, name: impl Into<String>, value: impl Into<RowValues>) -> Self {
        self.conditions.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn geohash_column(mut self, name: impl Into<String>) -> Self {
        self.geohash_column = name.into();
        self
    }

    /// The cells to scan, center first.
    #[must_use]
    pub fn buckets(&self) -> Vec<String> {
        let center = geo::encode(self.latitude, self.longitude, geo::precision_for(self.distance_km));
        let mut buckets = vec![center.clone()];
        buckets.extend(geo::neighbors(&center));
        buckets
    }
}

/// Where the next page of a location search resumes.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoCursor {
    pub buckets: Vec<String>,
    pub bucket: usize,
    pub start: Option<NextToken>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationsPage {
    /// Rows within the radius, nearest first.
    pub rows: Vec<Record>,
    pub next: Option<GeoCursor>,
}

fn coordinate(row: &Record, name: &str) -> Option<f64> {
    row.get(name).and_then(RowValues::to_number)
}

impl Engine {
    /// Records within `query.distance_km` of a point, up to `query.count` per page.
    ///
    /// Each bucket is paged with the standard continuation token until the page is full or
    /// every bucket is exhausted; rows outside the radius are dropped. Pass `next` back as
    /// `cursor` for the following page.
    ///
    /// # Errors
    /// Pool, compile or backend errors of the underlying selects.
    pub async fn get_locations(
        &self,
        table: &str,
        query: &GeoQuery,
        cursor: Option<GeoCursor>,
        opts: &RequestOptions,
    ) -> Result<LocationsPage, PolyDbError> {
        let mut cursor = cursor.unwrap_or_else(|| GeoCursor {
            buckets: query.buckets(),
            bucket: 0,
            start: None,
        });
        let mut rows: Vec<Record> = Vec::new();

        while cursor.bucket < cursor.buckets.len() && rows.len() < query.count {
            let mut obj = query.conditions.clone();
            obj.insert(
                query.geohash_column.clone(),
                RowValues::Text(cursor.buckets[cursor.bucket].clone()),
            );
            let select = RequestOptions {
                count: Some(query.count - rows.len()),
                start: cursor.start.take(),
                page: None,
                ..opts.clone()
            }
            .op(query.geohash_column.clone(), "begins_with");
            let result = self.select(table, &obj, &select).await?;

            for mut row in result.rows {
                let (Some(lat), Some(lon)) = (
                    coordinate(&row, &query.latitude_column),
                    coordinate(&row, &query.longitude_column),
                ) else {
                    continue;
                };
                let distance = geo::distance_km(query.latitude, query.longitude, lat, lon);
                if distance <= query.distance_km {
                    row.insert(query.distance_column.clone(), RowValues::Float(distance));
                    rows.push(row);
                }
            }
            match result.info.next_token {
                Some(token) => cursor.start = Some(token),
                None => {
                    cursor.bucket += 1;
                    cursor.start = None;
                }
            }
        }
        debug!(
            "locations: {table}: {} rows, bucket {}/{}",
            rows.len(),
            cursor.bucket,
            cursor.buckets.len()
        );

        rows.sort_by(|a, b| {
            let d = |r: &Record| coordinate(r, &query.distance_column).unwrap_or(f64::MAX);
            d(a).total_cmp(&d(b))
        });
        let next = (cursor.bucket < cursor.buckets.len()).then_some(cursor);
        Ok(LocationsPage { rows, next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_cover_the_radius() {
        let query = GeoQuery::new(37.7749, -122.4194, 2.0);
        let buckets = query.buckets();
        assert_eq!(buckets[0], "9q8yy");
        assert_eq!(buckets.len(), 9);
        assert!(buckets.iter().all(|b| b.len() == 5));
    }
}
