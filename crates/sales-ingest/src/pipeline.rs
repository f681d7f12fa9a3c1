//! The single unit of work a scheduler invokes: fetch the snapshot, load it

use crate::config::Config;
use crate::db;
use crate::error::IngestResult;
use crate::loader::{parser, LoadResult, Loader};
use crate::storage::{Fetcher, ObjectLocation, S3Fetcher};
use serde::Serialize;
use tracing::{info, instrument};

/// Outcome of a dry run over a snapshot
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SnapshotCheck {
    pub location: ObjectLocation,
    pub bytes: usize,
    pub rows: usize,
}

/// Fetch then load using already-constructed collaborators
pub async fn run_with<F>(fetcher: &F, loader: &Loader, source: &ObjectLocation) -> IngestResult<LoadResult>
where
    F: Fetcher + ?Sized,
{
    let text = fetcher.fetch(source).await?;
    loader.load(&text).await
}

/// Run one load from configuration alone
///
/// The snapshot is fetched before any database connection is opened, so a
/// missing object never touches the destination.
#[instrument(skip(config), fields(source = %config.source, destination = %config.loader.destination))]
pub async fn run_load(config: &Config) -> IngestResult<LoadResult> {
    let fetcher = S3Fetcher::new(&config.storage);
    let text = fetcher.fetch(&config.source).await?;

    let pool = db::create_pool(&config.database).await?;
    let loader = Loader::new(pool.clone(), config.loader.clone());
    let result = loader.load(&text).await;
    pool.close().await;

    result
}

/// Create the destination schema and table only
pub async fn run_bootstrap(config: &Config) -> IngestResult<()> {
    let pool = db::create_pool(&config.database).await?;
    let result = Loader::new(pool.clone(), config.loader.clone()).bootstrap().await;
    pool.close().await;
    result
}

/// Fetch and validate the snapshot without writing anything
#[instrument(skip(config), fields(source = %config.source))]
pub async fn run_check(config: &Config) -> IngestResult<SnapshotCheck> {
    let fetcher = S3Fetcher::new(&config.storage);
    check_with(&fetcher, &config.source).await
}

pub async fn check_with<F>(fetcher: &F, source: &ObjectLocation) -> IngestResult<SnapshotCheck>
where
    F: Fetcher + ?Sized,
{
    let text = fetcher.fetch(source).await?;
    let records = parser::parse_snapshot(&text)?;

    info!(rows = records.len(), "Snapshot is well-formed");
    Ok(SnapshotCheck {
        location: source.clone(),
        bytes: text.len(),
        rows: records.len(),
    })
}
