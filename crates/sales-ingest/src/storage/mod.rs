//! Blob store access: read-only snapshot fetch over the S3 API

use crate::error::{IngestError, IngestResult, LoadStep};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{retry::RetryConfig, BehaviorVersion, Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    operation::get_object::GetObjectError,
    Client,
};
use sales_common::env;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

pub mod config;

pub use config::StorageConfig;

/// Bucket + key of a snapshot object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// `SOURCE_BUCKET` / `SOURCE_KEY`, defaulting to `raw` / `sales/sales.csv`
    pub fn from_env() -> Self {
        Self::new(
            env::string_or("SOURCE_BUCKET", config::DEFAULT_BUCKET),
            env::string_or("SOURCE_KEY", config::DEFAULT_OBJECT_KEY),
        )
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.bucket.trim().is_empty() {
            return Err("SOURCE_BUCKET cannot be empty".to_string());
        }
        if self.key.trim().is_empty() {
            return Err("SOURCE_KEY cannot be empty".to_string());
        }
        Ok(())
    }
}

impl std::fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Source of snapshot text
///
/// Implementations return the complete object or an error, never a prefix.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, location: &ObjectLocation) -> IngestResult<String>;
}

#[derive(Clone)]
pub struct S3Fetcher {
    client: Client,
}

impl S3Fetcher {
    pub fn new(config: &StorageConfig) -> Self {
        debug!("Initializing blob store client with config: {:?}", config);

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "sales-ingest",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style)
            .retry_config(RetryConfig::standard().with_max_attempts(config.max_attempts));

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
        }
    }

    async fn fetch_bytes(&self, location: &ObjectLocation) -> IngestResult<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| classify_get_object_error(location, e))?;

        // Collect the whole body before handing anything to the caller
        let body = response.body.collect().await.map_err(|e| IngestError::Connection {
            step: LoadStep::Fetch,
            message: format!("body of {} interrupted: {}", location, e),
        })?;

        Ok(body.into_bytes().to_vec())
    }
}

#[async_trait]
impl Fetcher for S3Fetcher {
    #[instrument(skip(self), fields(location = %location))]
    async fn fetch(&self, location: &ObjectLocation) -> IngestResult<String> {
        debug!("Downloading snapshot");
        let bytes = self.fetch_bytes(location).await?;
        let text = decode_text(bytes)?;
        info!(bytes = text.len(), "Downloaded snapshot");
        Ok(text)
    }
}

/// Decode snapshot bytes as UTF-8
pub fn decode_text(bytes: Vec<u8>) -> IngestResult<String> {
    String::from_utf8(bytes).map_err(|e| IngestError::Decode {
        valid_up_to: e.utf8_error().valid_up_to(),
    })
}

fn classify_get_object_error(
    location: &ObjectLocation,
    err: SdkError<GetObjectError>,
) -> IngestError {
    let not_found = || IngestError::NotFound {
        bucket: location.bucket.clone(),
        key: location.key.clone(),
    };

    match &err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_) => {
            IngestError::Connection {
                step: LoadStep::Fetch,
                message: DisplayErrorContext(&err).to_string(),
            }
        },
        SdkError::ServiceError(context) => {
            let status = context.raw().status().as_u16();
            let service_error = context.err();
            if service_error.is_no_such_key()
                || service_error.code() == Some("NoSuchBucket")
                || status == 404
            {
                not_found()
            } else if status >= 500 {
                IngestError::Connection {
                    step: LoadStep::Fetch,
                    message: format!("{} answered HTTP {}: {}", location, status, service_error),
                }
            } else {
                IngestError::Storage(format!(
                    "GET {} failed with HTTP {}: {}",
                    location,
                    status,
                    DisplayErrorContext(&err)
                ))
            }
        },
        _ => IngestError::Storage(DisplayErrorContext(&err).to_string()),
    }
}
