//! Sales Ingest Library
//!
//! Moves the periodically produced sales snapshot from the blob store into
//! Postgres so that `raw.sales` mirrors it, however often the run repeats.
//!
//! - [`storage`]: fetch the snapshot object as UTF-8 text
//! - [`loader`]: bootstrap the destination, parse, stage with `COPY`, upsert
//! - [`pipeline`]: the one operation a scheduler calls
//!
//! # Example
//!
//! ```no_run
//! use sales_ingest::{config::Config, pipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let result = pipeline::run_load(&config).await?;
//!     println!("upserted {} rows", result.rows_upserted);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod loader;
pub mod pipeline;
pub mod storage;

pub use error::{ErrorKind, IngestError, IngestResult, LoadStep};
pub use loader::{DestinationTable, LoadResult, Loader, LoaderConfig};
pub use storage::{Fetcher, ObjectLocation, S3Fetcher};
