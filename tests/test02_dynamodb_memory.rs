#![cfg(feature = "dynamodb")]

use std::sync::Arc;

use polydb::prelude::*;

async fn engine(page_size: usize) -> Result<Engine, PolyDbError> {
    let config = EngineConfig::new()
        .pool(PoolConfig::new("ddb", BackendKind::DynamoDb))
        .table(
            "events",
            TableDef::new()
                .column(ColumnDef::new("id").primary())
                .column(ColumnDef::new("n").with_type(ColumnType::Int).primary())
                .column(ColumnDef::new("tag")),
        );
    Engine::builder(config)
        .dynamo_api("ddb", Arc::new(MemoryDynamo::new().with_page_size(page_size)))
        .build()
        .await
}

async fn seed(db: &Engine) -> Result<(), PolyDbError> {
    for n in 1..=7_i64 {
        let tag = if n % 2 == 0 { "even" } else { "odd" };
        db.add("events", &record! { "id" => "a", "n" => n, "tag" => tag }, &RequestOptions::new())
            .await?;
    }
    Ok(())
}

#[tokio::test]
async fn key_tokens_chain_native_pages() -> Result<(), Box<dyn std::error::Error>> {
    let db = engine(2).await?;
    seed(&db).await?;

    let mut opts = RequestOptions::new().count(3_usize);
    let mut pages: Vec<Vec<i64>> = Vec::new();
    loop {
        let page = db.select("events", &record! { "id" => "a" }, &opts).await?;
        pages.push(page.rows.iter().filter_map(|r| r.get("n")?.as_int().copied()).collect());
        match page.info.next_token {
            Some(token) => {
                assert!(matches!(token, NextToken::Key(_)));
                opts = opts.start(token);
            }
            None => break,
        }
    }
    assert_eq!(pages, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);
    Ok(())
}

#[tokio::test]
async fn filters_apply_across_pages() -> Result<(), Box<dyn std::error::Error>> {
    let db = engine(2).await?;
    seed(&db).await?;
    let opts = RequestOptions::new().count(3_usize);
    let page = db
        .select("events", &record! { "id" => "a", "tag" => "even" }, &opts)
        .await?;
    let ns: Vec<i64> = page.rows.iter().filter_map(|r| r.get("n")?.as_int().copied()).collect();
    assert_eq!(ns, vec![2, 4, 6]);
    Ok(())
}

#[tokio::test]
async fn writes_follow_record_semantics() -> Result<(), Box<dyn std::error::Error>> {
    let db = engine(100).await?;
    seed(&db).await?;
    let opts = RequestOptions::new();

    let err = db
        .add("events", &record! { "id" => "a", "n" => 1_i64 }, &opts)
        .await
        .unwrap_err();
    assert!(err.is_condition_failed());

    let missing = db
        .update("events", &record! { "id" => "b", "n" => 1_i64, "tag" => "x" }, &opts)
        .await?;
    assert_eq!(missing.info.affected_rows, 0);

    db.put("events", &record! { "id" => "a", "n" => 1_i64, "tag" => "first" }, &opts)
        .await?;
    let row = db
        .get("events", &record! { "id" => "a", "n" => 1_i64 }, &opts)
        .await?
        .into_first()
        .unwrap();
    assert_eq!(row.get("tag"), Some(&RowValues::Text("first".into())));

    db.del("events", &record! { "id" => "a", "n" => 1_i64 }, &opts).await?;
    let rows = db.select("events", &record! { "id" => "a" }, &opts).await?.rows;
    assert_eq!(rows.len(), 6);
    Ok(())
}
