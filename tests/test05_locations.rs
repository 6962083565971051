#![cfg(feature = "sqlite")]

use std::collections::BTreeSet;

use polydb::geo;
use polydb::prelude::*;
use tempfile::TempDir;

const CENTER: (f64, f64) = (37.7749, -122.4194);

async fn open(dir: &TempDir) -> Result<Engine, PolyDbError> {
    let path = dir.path().join("geo.db");
    let config = EngineConfig::new()
        .pool(PoolConfig::new("main", BackendKind::Sqlite).url(path.to_string_lossy()))
        .table(
            "places",
            TableDef::new()
                .column(ColumnDef::new("id").primary())
                .column(ColumnDef::new("geohash").indexed())
                .column(ColumnDef::new("latitude").with_type(ColumnType::Real))
                .column(ColumnDef::new("longitude").with_type(ColumnType::Real)),
        );
    Engine::builder(config).build().await
}

async fn add_place(db: &Engine, id: &str, lat: f64, lon: f64) -> Result<(), PolyDbError> {
    let rec = record! {
        "id" => id,
        "geohash" => geo::encode(lat, lon, 9),
        "latitude" => lat,
        "longitude" => lon,
    };
    db.add("places", &rec, &RequestOptions::new()).await?;
    Ok(())
}

async fn engine(dir: &TempDir) -> Result<Engine, PolyDbError> {
    let db = open(dir).await?;
    let places = [
        ("a", CENTER.0, CENTER.1),
        ("b", 37.7839, -122.4194),
        ("c", 37.8019, -122.4194),
        ("far", 37.3382, -121.8863),
    ];
    for (id, lat, lon) in places {
        add_place(&db, id, lat, lon).await?;
    }
    Ok(db)
}

#[tokio::test]
async fn rows_inside_the_radius_nearest_first() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let db = engine(&dir).await?;
    let query = GeoQuery::new(CENTER.0, CENTER.1, 2.0).count(10);

    let page = db.get_locations("places", &query, None, &RequestOptions::new()).await?;
    let ids: Vec<&str> = page.rows.iter().filter_map(|r| r.get("id")?.as_text()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    let distances: Vec<f64> = page.rows.iter().filter_map(|r| r.get("distance")?.as_float()).collect();
    assert!(distances[0] < 0.01);
    assert!((distances[1] - 1.0).abs() < 0.1);
    assert!(page.next.is_none());
    Ok(())
}

#[tokio::test]
async fn cursors_resume_where_the_page_ended() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let db = engine(&dir).await?;
    let query = GeoQuery::new(CENTER.0, CENTER.1, 2.0).count(1);

    let mut seen = BTreeSet::new();
    let mut cursor = None;
    for _ in 0..20 {
        let page = db
            .get_locations("places", &query, cursor.take(), &RequestOptions::new())
            .await?;
        assert!(page.rows.len() <= 1);
        for row in &page.rows {
            if let Some(id) = row.get("id").and_then(RowValues::as_text) {
                assert!(seen.insert(id.to_string()), "{id} returned twice");
            }
        }
        match page.next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    assert!(cursor.is_none());
    assert_eq!(seen.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    Ok(())
}

#[tokio::test]
async fn cursors_carry_the_search_across_buckets() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let db = open(&dir).await?;

    // search from just inside the south-west corner of a cell, so the cells to the west and
    // south start a few metres away
    let (lat_min, _, lon_min, _) = geo::bounds("9q8yy").ok_or("bad geohash")?;
    let (lat, lon) = (lat_min + 0.0005, lon_min + 0.0005);
    let query = GeoQuery::new(lat, lon, 2.0).count(1);
    let buckets = query.buckets();
    assert_eq!(buckets[0], "9q8yy");

    // two places per bucket, on the point of the cell nearest the search and a little inside
    let mut expected = BTreeSet::new();
    let mut bucket_of = std::collections::HashMap::new();
    for (index, bucket) in buckets.iter().enumerate() {
        let (y0, y1, x0, x1) = geo::bounds(bucket).ok_or("bad geohash")?;
        let near = (lat.clamp(y0 + 1e-6, y1 - 1e-6), lon.clamp(x0 + 1e-6, x1 - 1e-6));
        let inner = (
            near.0 + ((y0 + y1) / 2.0 - near.0) * 0.01,
            near.1 + ((x0 + x1) / 2.0 - near.1) * 0.01,
        );
        for (n, (y, x)) in [near, inner].into_iter().enumerate() {
            if geo::distance_km(lat, lon, y, x) > 1.5 {
                continue;
            }
            assert_eq!(&geo::encode(y, x, 5), bucket);
            let id = format!("{index}-{n}");
            add_place(&db, &id, y, x).await?;
            bucket_of.insert(id.clone(), index);
            expected.insert(id);
        }
    }
    let reached: BTreeSet<usize> = bucket_of.values().copied().collect();
    assert!(reached.len() >= 4, "only {reached:?} buckets near the corner");

    let mut seen = Vec::new();
    let mut furthest_bucket = 0;
    let mut cursor: Option<GeoCursor> = None;
    for _ in 0..50 {
        let page = db
            .get_locations("places", &query, cursor.take(), &RequestOptions::new())
            .await?;
        assert!(page.rows.len() <= 1);
        seen.extend(
            page.rows
                .iter()
                .filter_map(|r| r.get("id")?.as_text().map(str::to_string)),
        );
        match page.next {
            Some(next) => {
                assert_eq!(next.buckets, buckets);
                furthest_bucket = furthest_bucket.max(next.bucket);
                cursor = Some(next);
            }
            None => break,
        }
    }
    assert!(cursor.is_none());
    assert!(furthest_bucket > 0);

    let order: Vec<usize> = seen.iter().map(|id| bucket_of[id]).collect();
    assert!(order.windows(2).all(|w| w[0] <= w[1]), "buckets out of order: {order:?}");
    assert_eq!(seen.len(), expected.len());
    assert_eq!(seen.into_iter().collect::<BTreeSet<_>>(), expected);
    Ok(())
}
