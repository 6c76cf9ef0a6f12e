use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::collections::BTreeSet;
use tracing::{debug, info, instrument};

use super::{CommitOutcome, SalesStore, StoreError};
use crate::schema::{CanonicalRecord, FileId};

/// Rows per multi-value INSERT; 19 binds each keeps well under the 65535 parameter limit
pub const INSERT_BATCH_SIZE: usize = 1000;

/// `retail_sales` and `processed_files` in PostgreSQL
#[derive(Clone)]
pub struct PgSalesStore {
    pool: PgPool,
}

impl PgSalesStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Destination rows attributed to one file
    pub async fn count_rows(&self, id: &FileId) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM retail_sales WHERE source_file = $1")
            .bind(id.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn insert_batch(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        id: &FileId,
        records: &[CanonicalRecord],
    ) -> Result<(), StoreError> {
        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            INSERT INTO retail_sales (
                source_file, order_number, quantity_ordered, price_each, order_line_number,
                sales, order_date, status, qtr_id, month_id, year_id, product_line, msrp,
                product_code, customer_name, city, state, country, deal_size
            )
            "#,
        );

        query_builder.push_values(records.iter(), |mut b, record| {
            b.push_bind(id.as_str())
                .push_bind(record.order_number)
                .push_bind(record.quantity_ordered)
                .push_bind(record.price_each)
                .push_bind(record.order_line_number)
                .push_bind(record.sales)
                .push_bind(record.order_date)
                .push_bind(record.status)
                .push_bind(record.qtr_id)
                .push_bind(record.month_id)
                .push_bind(record.year_id)
                .push_bind(record.product_line)
                .push_bind(record.msrp)
                .push_bind(record.product_code)
                .push_bind(&record.customer_name)
                .push_bind(&record.city)
                .push_bind(&record.state)
                .push_bind(&record.country)
                .push_bind(record.deal_size);
        });

        query_builder.build().execute(&mut **tx).await?;
        Ok(())
    }
}

#[async_trait]
impl SalesStore for PgSalesStore {
    fn describe(&self) -> String {
        "postgres".to_string()
    }

    async fn processed_files(&self) -> Result<BTreeSet<FileId>, StoreError> {
        let rows = sqlx::query("SELECT filename FROM processed_files")
            .fetch_all(&self.pool)
            .await?;

        let mut ids = BTreeSet::new();
        for row in rows {
            let filename: String = row.try_get("filename")?;
            let id = filename
                .parse()
                .map_err(|e| StoreError::Rejected(format!("registry entry '{}': {}", filename, e)))?;
            ids.insert(id);
        }
        Ok(ids)
    }

    async fn is_registered(&self, id: &FileId) -> Result<bool, StoreError> {
        let registered: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM processed_files WHERE filename = $1)")
                .bind(id.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(registered)
    }

    #[instrument(skip(self, records), fields(file = %id, rows = records.len()))]
    async fn commit_file(
        &self,
        id: &FileId,
        records: &[CanonicalRecord],
    ) -> Result<CommitOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Registering first serializes concurrent loaders of the same file on the primary key
        let registered = sqlx::query(
            "INSERT INTO processed_files (filename) VALUES ($1) ON CONFLICT (filename) DO NOTHING",
        )
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?;

        if registered.rows_affected() == 0 {
            tx.rollback().await?;
            debug!("File registered concurrently, skipping insert");
            return Ok(CommitOutcome::AlreadyRegistered);
        }

        for chunk in records.chunks(INSERT_BATCH_SIZE) {
            Self::insert_batch(&mut tx, id, chunk).await?;
        }

        tx.commit().await?;

        info!("Committed file to retail_sales");
        Ok(CommitOutcome::Committed {
            rows: records.len(),
        })
    }
}
