#![cfg(feature = "sqlite")]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use polydb::prelude::*;
use tempfile::TempDir;

fn jobs() -> TableDef {
    TableDef::new()
        .column(ColumnDef::new("id").primary())
        .column(ColumnDef::new("status"))
        .column(ColumnDef::new("n").with_type(ColumnType::Int))
}

async fn engine(dir: &TempDir) -> Result<Engine, PolyDbError> {
    let path = dir.path().join("bulk.db");
    let config = EngineConfig::new()
        .pool(PoolConfig::new("main", BackendKind::Sqlite).url(path.to_string_lossy()))
        .table("jobs", jobs());
    Engine::builder(config).build().await
}

async fn seed(db: &Engine, count: i64) -> Result<(), PolyDbError> {
    let items: Vec<BatchItem> = (1..=count)
        .map(|n| {
            let status = if n % 2 == 0 { "done" } else { "new" };
            BatchItem::new(Op::Add, "jobs", record! { "id" => format!("j{n:02}"), "status" => status, "n" => n })
        })
        .collect();
    let results = db.batch(&items, &RequestOptions::new().concurrency(4_usize)).await?;
    assert_eq!(results.len(), items.len());
    Ok(())
}

#[tokio::test]
async fn batch_keeps_order_and_rejects_tableless_ops() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let db = engine(&dir).await?;
    seed(&db, 6).await?;

    let reads = vec![
        BatchItem::new(Op::Get, "jobs", record! { "id" => "j03" }),
        BatchItem::new(Op::Get, "jobs", record! { "id" => "j01" }),
        BatchItem::new(Op::Get, "jobs", record! { "id" => "j99" }),
    ];
    let results = db.batch(&reads, &RequestOptions::new()).await?;
    let ns: Vec<Option<i64>> = results
        .iter()
        .map(|r| r.first().and_then(|row| row.get("n")?.as_int().copied()))
        .collect();
    assert_eq!(ns, vec![Some(3), Some(1), None]);

    let bad = vec![BatchItem::new(Op::Create, "jobs", Record::new())];
    let err = db.batch(&bad, &RequestOptions::new()).await.unwrap_err();
    assert!(matches!(err, PolyDbError::InvalidRequest(_)));
    Ok(())
}

#[tokio::test]
async fn scan_visits_every_row_once() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let db = engine(&dir).await?;
    seed(&db, 25).await?;

    let seen = AtomicUsize::new(0);
    let opts = RequestOptions::new().count(10_usize).concurrency(3_usize);
    let total = db
        .scan("jobs", &Record::new(), &opts, |_row| {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Ok::<(), PolyDbError>(()) }
        })
        .await?;
    assert_eq!(total, 25);
    assert_eq!(seen.load(Ordering::SeqCst), 25);
    Ok(())
}

#[tokio::test]
async fn update_all_and_del_all_cover_every_match() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let db = engine(&dir).await?;
    seed(&db, 12).await?;

    // matches change status, so paging must not depend on the condition still holding
    let opts = RequestOptions::new().count(4_usize).concurrency(2_usize);
    let updated = db
        .update_all("jobs", &record! { "status" => "new" }, &record! { "status" => "queued" }, &opts)
        .await?;
    assert_eq!(updated, 6);
    let queued = db
        .select("jobs", &record! { "status" => "queued" }, &RequestOptions::new())
        .await?;
    assert_eq!(queued.rows.len(), 6);

    let deleted = db.del_all("jobs", &record! { "status" => "done" }, &opts).await?;
    assert_eq!(deleted, 6);
    let left = db.select("jobs", &Record::new(), &RequestOptions::new()).await?;
    assert_eq!(left.rows.len(), 6);
    Ok(())
}

#[tokio::test]
async fn migrate_rebuilds_the_table_with_its_rows() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let db = engine(&dir).await?;
    seed(&db, 5).await?;

    let def = jobs().column(ColumnDef::new("owner").default_value("system"));
    let migrated = db.migrate("jobs", &def, &RequestOptions::new()).await?;
    assert_eq!(migrated, 5);
    assert!(db.table_def("jobs").is_some_and(|t| t.columns.iter().any(|c| c.name == "owner")));

    db.add("jobs", &record! { "id" => "new", "owner" => "ann" }, &RequestOptions::new())
        .await?;
    let rows = db.select("jobs", &Record::new(), &RequestOptions::new()).await?.rows;
    assert_eq!(rows.len(), 6);
    let tmp = db.schema("jobs", &RequestOptions::new())?;
    assert!(!tmp.is_live("jobs_tmp"));
    Ok(())
}

#[tokio::test]
async fn migrate_keeps_rows_hidden_by_hooks() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let db = engine(&dir).await?;
    seed(&db, 3).await?;

    let hiding = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&hiding);
    db.add_hook("jobs", move |row, _| {
        flag.load(Ordering::SeqCst) && row.get("id") == Some(&RowValues::Text("j02".into()))
    });
    assert_eq!(db.select("jobs", &Record::new(), &RequestOptions::new()).await?.rows.len(), 2);

    let def = jobs().column(ColumnDef::new("owner"));
    assert_eq!(db.migrate("jobs", &def, &RequestOptions::new()).await?, 3);

    hiding.store(false, Ordering::SeqCst);
    let rows = db.select("jobs", &Record::new(), &RequestOptions::new()).await?.rows;
    let mut ids: Vec<&str> = rows.iter().filter_map(|r| r.get("id")?.as_text()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["j01", "j02", "j03"]);
    Ok(())
}

#[tokio::test]
async fn migrate_can_drop_a_column() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let db = engine(&dir).await?;
    seed(&db, 4).await?;

    let narrow = TableDef::new()
        .column(ColumnDef::new("id").primary())
        .column(ColumnDef::new("status"));
    assert_eq!(db.migrate("jobs", &narrow, &RequestOptions::new()).await?, 4);

    let rows = db.select("jobs", &Record::new(), &RequestOptions::new()).await?.rows;
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|r| r.get("n").is_none() && r.get("status").is_some()));
    Ok(())
}
