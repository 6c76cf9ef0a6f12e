//! Loader and registry behaviour against a real PostgreSQL container
//!
//! Run explicitly: cargo test --test postgres_integration_test -- --ignored

mod common;

use anyhow::Result;
use common::{file_id, init_tracing, sales_rows, test_settings, TestPostgres, TestStaging};
use retail_etl::{
    store::{CommitOutcome, PgSalesStore, SalesStore},
    transformer::read_cleaned,
    CanonicalRecord, LoadOutcome, Loader, Reconciler,
};
use serial_test::serial;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Transform `rows` complete rows and return the cleaned records
async fn cleaned_records(staging: &TestStaging, name: &str, first: u32, rows: u32) -> Result<Vec<CanonicalRecord>> {
    use retail_etl::staging::StagingArea;

    staging.stage_raw(name, &sales_rows(first, rows, 0)).await?;
    let store = Arc::new(retail_etl::store::MemorySalesStore::new());
    staging
        .pipeline(store, test_settings())
        .transformer()
        .transform(&file_id(name))
        .await?;
    let bytes = staging.cleaned.read(&file_id(name)).await?;
    read_cleaned(&bytes).map_err(anyhow::Error::msg)
}

#[tokio::test]
#[serial]
#[ignore] // Requires Docker
async fn test_commit_registers_file_and_rows() -> Result<()> {
    init_tracing();
    let db = TestPostgres::start().await?;
    let store = PgSalesStore::new(db.pool().clone());
    let staging = TestStaging::new()?;
    let records = cleaned_records(&staging, "orders_jan", 10100, 25).await?;

    let outcome = store.commit_file(&file_id("orders_jan"), &records).await?;
    assert_eq!(outcome, CommitOutcome::Committed { rows: 25 });
    assert_eq!(store.count_rows(&file_id("orders_jan")).await?, 25);
    assert!(store.is_registered(&file_id("orders_jan")).await?);

    let processed = store.processed_files().await?;
    assert_eq!(processed.into_iter().collect::<Vec<_>>(), vec![file_id("orders_jan")]);

    let (order_number, customer): (i32, Option<String>) = sqlx::query_as(
        "SELECT order_number, customer_name FROM retail_sales WHERE source_file = $1 ORDER BY order_number LIMIT 1",
    )
    .bind("orders_jan")
    .fetch_one(db.pool())
    .await?;
    assert_eq!(order_number, 10100);
    assert_eq!(customer, records[0].customer_name);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore] // Requires Docker
async fn test_second_commit_is_rejected() -> Result<()> {
    let db = TestPostgres::start().await?;
    let store = PgSalesStore::new(db.pool().clone());
    let staging = TestStaging::new()?;
    let records = cleaned_records(&staging, "orders_jan", 1, 10).await?;

    store.commit_file(&file_id("orders_jan"), &records).await?;
    let again = store.commit_file(&file_id("orders_jan"), &records).await?;

    assert_eq!(again, CommitOutcome::AlreadyRegistered);
    assert_eq!(store.count_rows(&file_id("orders_jan")).await?, 10);
    Ok(())
}

/// Rejects any `retail_sales` row with a negative order number
const REJECT_NEGATIVE_ORDERS: &str = r#"
CREATE FUNCTION reject_negative_orders() RETURNS trigger AS $$
BEGIN
    IF NEW.order_number < 0 THEN
        RAISE EXCEPTION 'negative order number %', NEW.order_number;
    END IF;
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

CREATE TRIGGER retail_sales_reject_negative_orders
    BEFORE INSERT ON retail_sales
    FOR EACH ROW EXECUTE FUNCTION reject_negative_orders();
"#;

#[tokio::test]
#[serial]
#[ignore] // Requires Docker
async fn test_failed_insert_rolls_back_registry_entry() -> Result<()> {
    init_tracing();
    let db = TestPostgres::start().await?;
    sqlx::raw_sql(REJECT_NEGATIVE_ORDERS).execute(db.pool()).await?;

    let store = Arc::new(PgSalesStore::new(db.pool().clone()));
    let staging = TestStaging::new()?;
    let rows = retail_etl::store::postgres::INSERT_BATCH_SIZE as u32 + 5;
    let mut records = cleaned_records(&staging, "orders_jan", 1, rows).await?;
    // The failing row sits in the second batch, after the registry row and a full batch
    if let Some(last) = records.last_mut() {
        last.order_number = -1;
    }

    assert!(store.commit_file(&file_id("orders_jan"), &records).await.is_err());
    assert!(!store.is_registered(&file_id("orders_jan")).await?);
    assert_eq!(store.count_rows(&file_id("orders_jan")).await?, 0);

    let registered: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_files")
        .fetch_one(db.pool())
        .await?;
    assert_eq!(registered, 0);

    let reconciler = Reconciler::new(staging.raw.clone(), store.clone());
    assert_eq!(reconciler.pending_files().await?, vec![file_id("orders_jan")]);

    // Once the rejected row is fixed the same file commits
    if let Some(last) = records.last_mut() {
        last.order_number = 99999;
    }
    let outcome = store.commit_file(&file_id("orders_jan"), &records).await?;
    assert_eq!(outcome, CommitOutcome::Committed { rows: rows as usize });
    assert!(reconciler.pending_files().await?.is_empty());
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore] // Requires Docker
async fn test_large_file_spans_insert_batches() -> Result<()> {
    let db = TestPostgres::start().await?;
    let store = PgSalesStore::new(db.pool().clone());
    let staging = TestStaging::new()?;
    let rows = retail_etl::store::postgres::INSERT_BATCH_SIZE as u32 * 2 + 17;
    let records = cleaned_records(&staging, "orders_big", 1, rows).await?;

    let outcome = store.commit_file(&file_id("orders_big"), &records).await?;
    assert_eq!(outcome, CommitOutcome::Committed { rows: rows as usize });
    assert_eq!(store.count_rows(&file_id("orders_big")).await?, rows as i64);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore] // Requires Docker
async fn test_pipeline_run_against_postgres() -> Result<()> {
    init_tracing();
    let db = TestPostgres::start().await?;
    let store = Arc::new(PgSalesStore::new(db.pool().clone()));
    let staging = TestStaging::new()?;
    staging.stage_raw("orders_jan", &sales_rows(10100, 48, 2)).await?;
    staging.stage_raw("orders_feb", &sales_rows(10200, 12, 0)).await?;

    let pipeline = staging.pipeline(store.clone(), test_settings()).with_concurrency(2);
    let first = pipeline.run(&CancellationToken::new()).await?;
    assert!(first.is_clean());
    assert_eq!(first.rows_loaded(), 60);

    let second = pipeline.run(&CancellationToken::new()).await?;
    assert!(second.pending.is_empty());

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM retail_sales")
        .fetch_one(db.pool())
        .await?;
    assert_eq!(total, 60);

    let registered: Vec<String> = sqlx::query_scalar("SELECT filename FROM processed_files ORDER BY filename")
        .fetch_all(db.pool())
        .await?;
    assert_eq!(registered, vec!["orders_feb".to_string(), "orders_jan".to_string()]);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore] // Requires Docker
async fn test_concurrent_loaders_load_once() -> Result<()> {
    let db = TestPostgres::start().await?;
    let store = Arc::new(PgSalesStore::new(db.pool().clone()));
    let staging = TestStaging::new()?;
    cleaned_records(&staging, "orders_jan", 1, 30).await?;

    let loaders: Vec<_> = (0..4)
        .map(|_| Loader::new(staging.cleaned.clone(), store.clone()))
        .collect();
    let outcomes = futures::future::join_all(
        loaders.iter().map(|loader| async move { loader.load(&file_id("orders_jan")).await }),
    )
    .await;

    let mut loaded = 0;
    for outcome in outcomes {
        match outcome? {
            LoadOutcome::Loaded { rows, .. } => {
                assert_eq!(rows, 30);
                loaded += 1;
            },
            LoadOutcome::AlreadyLoaded { .. } => {},
        }
    }
    assert_eq!(loaded, 1);
    assert_eq!(store.count_rows(&file_id("orders_jan")).await?, 30);
    Ok(())
}
