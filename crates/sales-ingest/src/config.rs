//! Configuration management
//!
//! Everything comes from environment-style variables (a `.env` file in the
//! working directory is honoured); see each section's `from_env` for names and
//! defaults.

use crate::db::DbConfig;
use crate::error::{IngestError, IngestResult};
use crate::loader::LoaderConfig;
use crate::storage::{ObjectLocation, StorageConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub source: ObjectLocation,
    pub database: DbConfig,
    pub loader: LoaderConfig,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> IngestResult<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            storage: StorageConfig::from_env()?,
            source: ObjectLocation::from_env(),
            database: DbConfig::from_env()?,
            loader: LoaderConfig::from_env()?,
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> IngestResult<()> {
        self.storage.validate().map_err(IngestError::Config)?;
        self.source.validate().map_err(IngestError::Config)?;
        self.database.validate().map_err(IngestError::Config)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serial_test::serial;

    const KEYS: [&str; 8] = [
        "MINIO_ENDPOINT",
        "SOURCE_BUCKET",
        "SOURCE_KEY",
        "PG_HOST",
        "PG_PORT",
        "DEST_SCHEMA",
        "DEST_TABLE",
        "LOAD_ISOLATION",
    ];

    fn clear_env() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_load_defaults() {
        clear_env();
        let config = Config::load().unwrap();
        assert_eq!(config.source, ObjectLocation::new("raw", "sales/sales.csv"));
        assert_eq!(config.database.host, "postgres");
        assert_eq!(config.loader.destination.to_string(), "raw.sales");
    }

    #[test]
    #[serial]
    fn test_load_overrides() {
        clear_env();
        std::env::set_var("SOURCE_KEY", "sales/2025-01-02.csv");
        std::env::set_var("DEST_TABLE", "sales_daily");
        std::env::set_var("LOAD_ISOLATION", "serializable");

        let config = Config::load().unwrap();
        assert_eq!(config.source.key, "sales/2025-01-02.csv");
        assert_eq!(config.loader.destination.table(), "sales_daily");
        assert_eq!(
            config.loader.isolation,
            crate::loader::IsolationLevel::Serializable
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_destination_is_config_error() {
        clear_env();
        std::env::set_var("DEST_TABLE", "sales\"; drop");
        let err = Config::load().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_isolation_is_config_error() {
        clear_env();
        std::env::set_var("LOAD_ISOLATION", "chaos");
        let err = Config::load().unwrap_err();
        assert!(err.to_string().contains("LOAD_ISOLATION"));
        clear_env();
    }
}
