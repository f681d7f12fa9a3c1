//! Shared helpers for sales-ingest integration tests
//!
//! Database tests spin up a throwaway PostgreSQL container through
//! testcontainers and are marked `#[ignore = "requires Docker"]`:
//!
//! ```bash
//! cargo test -p sales-ingest -- --ignored --nocapture
//! ```

#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sales_ingest::db::DbConfig;
use sales_ingest::{Fetcher, IngestError, IngestResult, LoadStep, ObjectLocation};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

/// The concrete snapshot used throughout the suite
pub const SAMPLE_SNAPSHOT: &str = "id,order_id,customer_id,amount,created_at\n\
                                   1,O-1,C-1,10.5,2025-01-01T00:00:00\n\
                                   2,O-2,C-2,20.0,2025-01-02T00:00:00";

/// `(id, order_id, customer_id, amount, created_at)` as stored
pub type SalesRow = (i32, Option<String>, Option<String>, Option<f64>, Option<NaiveDateTime>);

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    container: ContainerAsync<Postgres>,
    pool: PgPool,
    db_config: DbConfig,
}

impl TestPostgres {
    /// Start a PostgreSQL container and connect a small pool to it
    pub async fn start() -> Result<Self> {
        Self::start_with_pool_size(5).await
    }

    /// A pool of one pins every query to the same session, which makes
    /// session-local state (temporary tables) observable
    pub async fn start_with_pool_size(max_connections: u32) -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let db_config = DbConfig {
            host: host.to_string(),
            port,
            database: "postgres".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            max_connections,
            connect_timeout_secs: 30,
        };
        debug!(?db_config, "PostgreSQL container ready");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(db_config.connect_options())
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self {
            container,
            pool,
            db_config,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }

    pub fn db_config(&self) -> &DbConfig {
        &self.db_config
    }
}

// ============================================================================
// Destination helpers
// ============================================================================

/// All rows of a destination table ordered by id
pub async fn fetch_rows(pool: &PgPool, qualified: &str) -> Result<Vec<SalesRow>> {
    sqlx::query_as(&format!(
        "SELECT id, order_id, customer_id, amount, created_at FROM {} ORDER BY id",
        qualified
    ))
    .fetch_all(pool)
    .await
    .context("Failed to read destination rows")
}

pub async fn insert_row(pool: &PgPool, qualified: &str, row: &SalesRow) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO {} (id, order_id, customer_id, amount, created_at) VALUES ($1, $2, $3, $4, $5)",
        qualified
    ))
    .bind(row.0)
    .bind(&row.1)
    .bind(&row.2)
    .bind(row.3)
    .bind(row.4)
    .execute(pool)
    .await
    .context("Failed to seed destination row")?;
    Ok(())
}

/// Temporary staging tables currently present in any session
pub async fn staging_tables(pool: &PgPool, name: &str) -> Result<i64> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace \
         WHERE c.relname = $1 AND n.nspname LIKE 'pg_temp%'",
    )
    .bind(name)
    .fetch_one(pool)
    .await
    .context("Failed to look for staging tables")
}

pub fn ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").expect("valid test timestamp")
}

pub fn row(
    id: i32,
    order_id: &str,
    customer_id: &str,
    amount: f64,
    created_at: &str,
) -> SalesRow {
    (
        id,
        Some(order_id.to_string()),
        Some(customer_id.to_string()),
        Some(amount),
        Some(ts(created_at)),
    )
}

// ============================================================================
// Fetcher doubles
// ============================================================================

/// Serves fixed text for one location and counts calls
pub struct StaticFetcher {
    location: ObjectLocation,
    text: String,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn new(location: ObjectLocation, text: impl Into<String>) -> Self {
        Self {
            location,
            text: text.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, location: &ObjectLocation) -> IngestResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *location == self.location {
            Ok(self.text.clone())
        } else {
            Err(IngestError::NotFound {
                bucket: location.bucket.clone(),
                key: location.key.clone(),
            })
        }
    }
}

/// Always fails as if the blob store were down
pub struct UnreachableFetcher;

#[async_trait]
impl Fetcher for UnreachableFetcher {
    async fn fetch(&self, _location: &ObjectLocation) -> IngestResult<String> {
        Err(IngestError::Connection {
            step: LoadStep::Fetch,
            message: "connection refused".to_string(),
        })
    }
}

// ============================================================================
// Tracing
// ============================================================================

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,sales_ingest=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}
