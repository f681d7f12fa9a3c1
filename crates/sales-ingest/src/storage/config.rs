use sales_common::env;
use serde::{Deserialize, Serialize};

/// Default MinIO endpoint inside the compose network.
pub const DEFAULT_ENDPOINT: &str = "http://minio:9000";

/// Default signing region; MinIO accepts any region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default MinIO root credentials.
pub const DEFAULT_ACCESS_KEY: &str = "minioadmin";
pub const DEFAULT_SECRET_KEY: &str = "minioadmin";

/// Default request attempts, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default snapshot location.
pub const DEFAULT_BUCKET: &str = "raw";
pub const DEFAULT_OBJECT_KEY: &str = "sales/sales.csv";

#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `None` targets AWS S3 itself
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
    pub max_attempts: u32,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("path_style", &self.path_style)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::for_minio(DEFAULT_ENDPOINT)
    }
}

impl StorageConfig {
    /// Load from `MINIO_*` variables, falling back to the standard AWS names
    /// for credentials
    pub fn from_env() -> sales_common::Result<Self> {
        Ok(Self {
            endpoint: match std::env::var("MINIO_ENDPOINT") {
                // Explicitly empty means "talk to AWS"
                Ok(v) if v.trim().is_empty() => None,
                Ok(v) => Some(v.trim().to_string()),
                Err(_) => Some(DEFAULT_ENDPOINT.to_string()),
            },
            region: env::string_or("MINIO_REGION", DEFAULT_REGION),
            access_key: env::var("MINIO_ACCESS")
                .or_else(|| env::var("AWS_ACCESS_KEY_ID"))
                .unwrap_or_else(|| DEFAULT_ACCESS_KEY.to_string()),
            secret_key: env::var("MINIO_SECRET")
                .or_else(|| env::var("AWS_SECRET_ACCESS_KEY"))
                .unwrap_or_else(|| DEFAULT_SECRET_KEY.to_string()),
            path_style: env::flag_or("MINIO_PATH_STYLE", true)?,
            max_attempts: env::parse_or("MINIO_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
        })
    }

    pub fn for_minio(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: DEFAULT_REGION.to_string(),
            access_key: DEFAULT_ACCESS_KEY.to_string(),
            secret_key: DEFAULT_SECRET_KEY.to_string(),
            path_style: true,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(endpoint) = &self.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(format!(
                    "MINIO_ENDPOINT must start with http:// or https://, got '{}'",
                    endpoint
                ));
            }
        }
        if self.max_attempts == 0 {
            return Err("MINIO_MAX_ATTEMPTS must be at least 1".to_string());
        }
        Ok(())
    }
}
