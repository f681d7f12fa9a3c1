//! Postgres connection settings and pool construction

use crate::error::{IngestError, IngestResult, LoadStep};
use sales_common::env;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::time::Duration;

/// Default Postgres host inside the compose network.
pub const DEFAULT_HOST: &str = "postgres";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_DATABASE: &str = "sales";
pub const DEFAULT_USER: &str = "airflow";
pub const DEFAULT_PASSWORD: &str = "airflow";

/// A run needs one connection; the second covers the standalone bootstrap.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 2;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database: DEFAULT_DATABASE.to_string(),
            user: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl DbConfig {
    /// Load from `PG_*` variables
    pub fn from_env() -> sales_common::Result<Self> {
        Ok(Self {
            host: env::string_or("PG_HOST", DEFAULT_HOST),
            port: env::parse_or("PG_PORT", DEFAULT_PORT)?,
            database: env::string_or("PG_DB", DEFAULT_DATABASE),
            user: env::string_or("PG_USER", DEFAULT_USER),
            password: env::string_or("PG_PASS", DEFAULT_PASSWORD),
            max_connections: env::parse_or("PG_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            connect_timeout_secs: env::parse_or("PG_CONNECT_TIMEOUT", DEFAULT_CONNECT_TIMEOUT_SECS)?,
        })
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .password(&self.password)
            .application_name("sales-ingest")
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("PG_HOST cannot be empty".to_string());
        }
        if self.port == 0 {
            return Err("PG_PORT must be greater than 0".to_string());
        }
        if self.max_connections == 0 {
            return Err("PG_MAX_CONNECTIONS must be greater than 0".to_string());
        }
        Ok(())
    }
}

pub async fn create_pool(config: &DbConfig) -> IngestResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect_with(config.connect_options())
        .await
        .map_err(|e| IngestError::from_sqlx(LoadStep::Connect, e))?;

    tracing::info!(
        host = %config.host,
        port = config.port,
        database = %config.database,
        "Database connection pool created"
    );

    Ok(pool)
}
