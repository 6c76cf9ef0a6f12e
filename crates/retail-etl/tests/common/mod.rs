//! Shared fixtures for retail-etl integration tests
//!
//! - temporary raw/cleaned staging directories
//! - a builder for raw sales files in the source dataset's 25-column layout, Latin-1 encoded
//! - a PostgreSQL container with migrations applied (Docker required)

#![allow(dead_code)]

use anyhow::{Context, Result};
use retail_etl::{
    pipeline::Pipeline,
    staging::{LocalStaging, StagingArea},
    store::SalesStore,
    CategoricalColumn, CategoryVocabulary, FileId, TransformSettings,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::info;

pub const SOURCE_HEADER: &str = "ORDERNUMBER,QUANTITYORDERED,PRICEEACH,ORDERLINENUMBER,SALES,ORDERDATE,STATUS,QTR_ID,MONTH_ID,YEAR_ID,PRODUCTLINE,MSRP,PRODUCTCODE,CUSTOMERNAME,PHONE,ADDRESSLINE1,ADDRESSLINE2,CITY,STATE,POSTALCODE,COUNTRY,TERRITORY,CONTACTLASTNAME,CONTACTFIRSTNAME,DEALSIZE";

pub const PRODUCT_CODES: &[&str] = &["S10_1678", "S10_1949", "S12_1108", "S18_2238", "S24_3969"];

const STATUSES: &[&str] = &["Shipped", "Shipped", "Resolved", "On Hold", "In Process", "Cancelled"];
const PRODUCT_LINES: &[&str] = &["Motorcycles", "Classic Cars", "Trucks and Buses", "Vintage Cars", "Planes"];
const DEAL_SIZES: &[&str] = &["Small", "Medium", "Large"];
const CUSTOMERS: &[(&str, &str, Option<&str>, &str)] = &[
    ("Land of Toys Inc.", "NYC", Some("NY"), "USA"),
    ("Reims Collectables", "Reims", None, "France"),
    ("Lyon Souveniers", "Paris", None, "France"),
    ("Toys of Finland, Co.", "Helsinki", None, "Finland"),
    ("Mus\u{e9}e du Jouet", "Montr\u{e9}al", Some("Qu\u{e9}bec"), "Canada"),
];

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,retail_etl=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn file_id(name: &str) -> FileId {
    name.parse().unwrap_or_else(|e| panic!("bad test file id {}: {}", name, e))
}

// ============================================================================
// Raw sales files
// ============================================================================

/// One source line; every field is deterministic in `order_number`
#[derive(Debug, Clone)]
pub struct SalesRow {
    pub order_number: u32,
    pub quantity: Option<u32>,
    pub price_each: String,
    pub status: String,
    pub product_line: String,
    pub product_code: String,
    pub customer: String,
    pub city: String,
    pub state: Option<String>,
    pub country: String,
    pub deal_size: String,
}

impl SalesRow {
    pub fn sample(order_number: u32) -> Self {
        let i = order_number as usize;
        let (customer, city, state, country) = CUSTOMERS[i % CUSTOMERS.len()];
        Self {
            order_number,
            quantity: Some(20 + (order_number % 30)),
            price_each: format!("{}.{:02}", 50 + i % 50, i % 100),
            status: STATUSES[i % STATUSES.len()].to_string(),
            product_line: PRODUCT_LINES[i % PRODUCT_LINES.len()].to_string(),
            product_code: PRODUCT_CODES[i % PRODUCT_CODES.len()].to_string(),
            customer: customer.to_string(),
            city: city.to_string(),
            state: state.map(str::to_string),
            country: country.to_string(),
            deal_size: DEAL_SIZES[i % DEAL_SIZES.len()].to_string(),
        }
    }

    pub fn without_quantity(mut self) -> Self {
        self.quantity = None;
        self
    }

    pub fn with_deal_size(mut self, deal_size: &str) -> Self {
        self.deal_size = deal_size.to_string();
        self
    }

    fn csv_line(&self) -> String {
        let month = 1 + self.order_number % 12;
        let day = 1 + self.order_number % 28;
        let quarter = (month - 1) / 3 + 1;
        let quantity = self.quantity.map(|q| q.to_string()).unwrap_or_default();
        let sales = self
            .quantity
            .map(|q| format!("{:.2}", q as f64 * self.price_each.parse::<f64>().unwrap_or(0.0)))
            .unwrap_or_else(|| "0".to_string());

        format!(
            "{},{},{},{},{},{}/{}/2003 0:00,{},{},{},2003,{},95,{},\"{}\",2125557818,\"897 Long Airport Avenue\",,{},{},10022,{},NA,Yu,Kwai,{}",
            self.order_number,
            quantity,
            self.price_each,
            1 + self.order_number % 9,
            sales,
            month,
            day,
            self.status,
            quarter,
            month,
            self.product_line,
            self.product_code,
            self.customer,
            self.city,
            self.state.as_deref().unwrap_or(""),
            self.country,
            self.deal_size,
        )
    }
}

/// Encode rows under the source header as ISO-8859-1 bytes
pub fn sales_csv(rows: &[SalesRow]) -> Vec<u8> {
    let mut text = String::from(SOURCE_HEADER);
    text.push_str("\r\n");
    for row in rows {
        text.push_str(&row.csv_line());
        text.push_str("\r\n");
    }
    let (bytes, _, unmappable) = encoding_rs::WINDOWS_1252.encode(&text);
    assert!(!unmappable, "test data must be representable in Latin-1");
    bytes.into_owned()
}

/// Rows `first..first + complete` plus `incomplete` rows missing QUANTITYORDERED
pub fn sales_rows(first: u32, complete: u32, incomplete: u32) -> Vec<SalesRow> {
    let mut rows: Vec<SalesRow> = (first..first + complete).map(SalesRow::sample).collect();
    rows.extend(
        (first + complete..first + complete + incomplete).map(|n| SalesRow::sample(n).without_quantity()),
    );
    rows
}

// ============================================================================
// Staging and pipeline
// ============================================================================

pub struct TestStaging {
    pub dir: TempDir,
    pub raw: Arc<LocalStaging>,
    pub cleaned: Arc<LocalStaging>,
}

impl TestStaging {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("Failed to create staging directory")?;
        let raw = Arc::new(LocalStaging::new(dir.path().join("raw")));
        let cleaned = Arc::new(LocalStaging::new(dir.path().join("cleaned")));
        std::fs::create_dir_all(raw.root())?;
        std::fs::create_dir_all(cleaned.root())?;
        Ok(Self { dir, raw, cleaned })
    }

    pub async fn stage_raw(&self, name: &str, rows: &[SalesRow]) -> Result<()> {
        self.raw.write(&file_id(name), sales_csv(rows)).await?;
        Ok(())
    }

    pub async fn stage_raw_bytes(&self, name: &str, bytes: Vec<u8>) -> Result<()> {
        self.raw.write(&file_id(name), bytes).await?;
        Ok(())
    }

    pub fn pipeline(&self, store: Arc<dyn SalesStore>, settings: TransformSettings) -> Pipeline {
        Pipeline::new(self.raw.clone(), self.cleaned.clone(), store, settings)
    }
}

/// Built-in vocabulary plus the product codes used by [`SalesRow::sample`]
pub fn test_vocabulary() -> CategoryVocabulary {
    let mut vocabulary = CategoryVocabulary::builtin();
    vocabulary.extend(
        CategoricalColumn::ProductCode,
        PRODUCT_CODES.iter().map(|code| code.to_string()),
    );
    vocabulary
}

pub fn test_settings() -> TransformSettings {
    TransformSettings {
        vocabulary: Arc::new(test_vocabulary()),
        ..TransformSettings::default()
    }
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    /// Start a PostgreSQL container with the retail migrations applied
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container.get_host().await.context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        retail_etl::db::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
