#![cfg(feature = "sqlite")]

use polydb::prelude::*;
use tempfile::TempDir;

fn items() -> TableDef {
    TableDef::new()
        .column(ColumnDef::new("id").primary())
        .column(ColumnDef::new("name"))
        .column(ColumnDef::new("n").with_type(ColumnType::Int))
        .column(ColumnDef::new("secret").hidden())
}

async fn engine(dir: &TempDir) -> Result<Engine, PolyDbError> {
    // RUST_LOG=polydb=debug shows every executed statement
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let path = dir.path().join("crud.db");
    let config = EngineConfig::new()
        .pool(PoolConfig::new("main", BackendKind::Sqlite).url(path.to_string_lossy()))
        .table("items", items());
    Engine::builder(config).build().await
}

#[tokio::test]
async fn add_put_update_incr_del() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let db = engine(&dir).await?;
    let opts = RequestOptions::new();

    let added = db
        .add("items", &record! { "id" => "1", "name" => "first", "n" => 1_i64 }, &opts)
        .await?;
    assert_eq!(added.info.affected_rows, 1);
    assert!(db.add("items", &record! { "id" => "1", "name" => "again" }, &opts).await.is_err());

    db.put("items", &record! { "id" => "1", "name" => "replaced", "n" => 5_i64 }, &opts)
        .await?;
    let row = db.get("items", &record! { "id" => "1" }, &opts).await?.into_first();
    let row = row.expect("row after put");
    assert_eq!(row.get("name"), Some(&RowValues::Text("replaced".into())));
    assert_eq!(row.get("n"), Some(&RowValues::Int(5)));

    db.incr("items", &record! { "id" => "1", "n" => 2_i64 }, &opts).await?;
    let updated = db
        .update("items", &record! { "id" => "1", "name" => "updated" }, &opts)
        .await?;
    assert_eq!(updated.info.affected_rows, 1);
    let row = db.get("items", &record! { "id" => "1" }, &opts).await?.into_first().unwrap();
    assert_eq!(row.get("n"), Some(&RowValues::Int(7)));
    assert_eq!(row.get("name"), Some(&RowValues::Text("updated".into())));

    let missing = db.update("items", &record! { "id" => "9", "name" => "x" }, &opts).await?;
    assert_eq!(missing.info.affected_rows, 0);

    db.del("items", &record! { "id" => "1" }, &opts).await?;
    let gone = db.get("items", &record! { "id" => "1" }, &opts).await?;
    assert!(gone.rows.is_empty());
    Ok(())
}

#[tokio::test]
async fn select_pages_with_offset_tokens() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let db = engine(&dir).await?;
    for n in 1..=5_i64 {
        db.add("items", &record! { "id" => format!("k{n}"), "n" => n }, &RequestOptions::new())
            .await?;
    }

    let mut opts = RequestOptions::new().count(2_usize).sort("n");
    let mut pages: Vec<Vec<i64>> = Vec::new();
    loop {
        let page = db.select("items", &Record::new(), &opts).await?;
        pages.push(page.rows.iter().filter_map(|r| r.get("n")?.as_int().copied()).collect());
        match page.info.next_token {
            Some(token) => opts = opts.start(token),
            None => break,
        }
    }
    assert_eq!(pages, vec![vec![1, 2], vec![3, 4], vec![5]]);
    Ok(())
}

#[tokio::test]
async fn empty_requests_are_empty_successes() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let db = engine(&dir).await?;
    let opts = RequestOptions::new();
    db.add("items", &record! { "id" => "1", "name" => "a" }, &opts).await?;

    let none = db.select("items", &record! { "name" => "zzz" }, &opts).await?;
    assert!(none.rows.is_empty());
    assert!(none.info.next_token.is_none());

    // a required filter without a value never reaches the database
    let required = RequestOptions::new().filter_column(FilterColumn::new("name").required());
    let skipped = db.select("items", &Record::new(), &required).await?;
    assert!(skipped.rows.is_empty());

    // nothing to update
    let nothing = db.update("items", &record! { "id" => "1" }, &opts).await?;
    assert_eq!(nothing.info.affected_rows, 0);
    Ok(())
}

#[tokio::test]
async fn hidden_columns_and_hooks() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let db = engine(&dir).await?;
    let opts = RequestOptions::new();
    db.add("items", &record! { "id" => "1", "secret" => "s1" }, &opts).await?;
    db.add("items", &record! { "id" => "2", "secret" => "s2" }, &opts).await?;

    let rows = db.select("items", &Record::new(), &opts).await?.rows;
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| !r.contains_key("secret")));
    let all = db
        .select("items", &Record::new(), &RequestOptions::new().all_columns(true))
        .await?
        .rows;
    assert!(all.iter().all(|r| r.contains_key("secret")));

    db.add_hook("items", |row, _| row.get("id") == Some(&RowValues::Text("2".into())));
    let rows = db.select("items", &Record::new(), &opts).await?.rows;
    assert_eq!(rows.len(), 1);
    Ok(())
}

#[tokio::test]
async fn init_tables_is_idempotent_and_upgrades() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let db = engine(&dir).await?;
    assert_eq!(db.init_tables("main").await?, 0);

    db.declare_table("items", items().column(ColumnDef::new("extra")));
    assert_eq!(db.init_tables("main").await?, 1);
    db.add("items", &record! { "id" => "1", "extra" => "x" }, &RequestOptions::new())
        .await?;
    let row = db
        .get("items", &record! { "id" => "1" }, &RequestOptions::new())
        .await?
        .into_first()
        .unwrap();
    assert_eq!(row.get("extra"), Some(&RowValues::Text("x".into())));
    assert_eq!(db.init_tables("main").await?, 0);
    Ok(())
}

#[tokio::test]
async fn unknown_pool_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let db = engine(&dir).await?;
    let err = db
        .get("items", &record! { "id" => "1" }, &RequestOptions::new().pool("nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, PolyDbError::PoolNotFound(_)));
    Ok(())
}
