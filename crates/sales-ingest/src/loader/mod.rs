//! Snapshot loader: bootstrap → parse → stage → merge, in one transaction
//!
//! A load either commits every row of the snapshot or leaves the destination
//! exactly as it was. The staging table is transaction-scoped, so it is gone
//! after commit and after rollback alike.

use crate::error::{IngestError, IngestResult, LoadStep};
use sales_common::env;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error, info, instrument, warn};

pub mod merge;
pub mod parser;
pub mod schema;
pub mod staging;

pub use parser::{parse_snapshot, SalesRecord};
pub use schema::DestinationTable;

/// Isolation level of the load transaction
///
/// Read committed is the floor: a concurrent reader never sees a partly merged
/// snapshot at any of these levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn set_transaction_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
            IsolationLevel::RepeatableRead => "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
            IsolationLevel::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
        }
    }
}

impl std::str::FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "read-committed" => Ok(IsolationLevel::ReadCommitted),
            "repeatable-read" => Ok(IsolationLevel::RepeatableRead),
            "serializable" => Ok(IsolationLevel::Serializable),
            other => Err(format!(
                "unknown isolation level '{}' (read-committed, repeatable-read, serializable)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub destination: DestinationTable,
    pub isolation: IsolationLevel,
}

impl LoaderConfig {
    /// `DEST_SCHEMA`, `DEST_TABLE`, `LOAD_ISOLATION`
    pub fn from_env() -> IngestResult<Self> {
        let destination = DestinationTable::new(
            env::string_or("DEST_SCHEMA", schema::DEFAULT_SCHEMA),
            env::string_or("DEST_TABLE", schema::DEFAULT_TABLE),
        )?;
        let isolation = env::parse_or("LOAD_ISOLATION", IsolationLevel::default())?;

        Ok(Self {
            destination,
            isolation,
        })
    }
}

/// Row counts of a committed load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LoadResult {
    pub rows_staged: u64,
    /// `rows_inserted + rows_updated`
    pub rows_upserted: u64,
    pub rows_inserted: u64,
    pub rows_updated: u64,
}

/// Progress of one load invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Start,
    SchemaReady,
    Staged,
    Merged,
    Done,
    Failed,
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoadState::Start => "start",
            LoadState::SchemaReady => "schema_ready",
            LoadState::Staged => "staged",
            LoadState::Merged => "merged",
            LoadState::Done => "done",
            LoadState::Failed => "failed",
        };
        f.write_str(name)
    }
}

impl LoadState {
    fn advance(&mut self, next: LoadState) {
        debug!(from = %self, to = %next, "Load state transition");
        *self = next;
    }
}

#[derive(Clone)]
pub struct Loader {
    pool: PgPool,
    config: LoaderConfig,
}

impl Loader {
    pub fn new(pool: PgPool, config: LoaderConfig) -> Self {
        Self { pool, config }
    }

    pub fn destination(&self) -> &DestinationTable {
        &self.config.destination
    }

    /// Ensure the destination exists without loading anything
    #[instrument(skip(self), fields(destination = %self.config.destination))]
    pub async fn bootstrap(&self) -> IngestResult<()> {
        let mut tx = self.begin().await?;
        schema::bootstrap(&mut tx, &self.config.destination).await?;
        tx.commit()
            .await
            .map_err(|e| IngestError::from_sqlx(LoadStep::Commit, e))?;

        info!("Destination schema bootstrapped");
        Ok(())
    }

    /// Merge a snapshot into the destination
    ///
    /// There is no resume: after an error the call must be reissued from the
    /// start with the full snapshot.
    #[instrument(skip(self, text), fields(destination = %self.config.destination, bytes = text.len()))]
    pub async fn load(&self, text: &str) -> IngestResult<LoadResult> {
        let mut state = LoadState::Start;

        match self.load_in_transaction(text, &mut state).await {
            Ok(result) => {
                info!(
                    rows_staged = result.rows_staged,
                    rows_inserted = result.rows_inserted,
                    rows_updated = result.rows_updated,
                    "Load committed"
                );
                Ok(result)
            },
            Err(err) => {
                let reached = state;
                state.advance(LoadState::Failed);
                error!(
                    %reached,
                    failed_step = ?err.step(),
                    error = %err,
                    "Load failed; destination left unchanged"
                );
                Err(err)
            },
        }
    }

    async fn begin(&self) -> IngestResult<Transaction<'static, Postgres>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IngestError::from_sqlx(LoadStep::Connect, e))?;

        sqlx::query(self.config.isolation.set_transaction_sql())
            .execute(&mut *tx)
            .await
            .map_err(|e| IngestError::from_sqlx(LoadStep::Bootstrap, e))?;

        Ok(tx)
    }

    async fn load_in_transaction(
        &self,
        text: &str,
        state: &mut LoadState,
    ) -> IngestResult<LoadResult> {
        let mut tx = self.begin().await?;

        match self.run_steps(&mut tx, text, state).await {
            Ok(result) => {
                tx.commit()
                    .await
                    .map_err(|e| IngestError::from_sqlx(LoadStep::Commit, e))?;
                state.advance(LoadState::Done);
                Ok(result)
            },
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    // The server aborts the transaction on its own once the session ends
                    warn!(error = %rollback_err, "Explicit rollback failed");
                }
                Err(err)
            },
        }
    }

    async fn run_steps(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        text: &str,
        state: &mut LoadState,
    ) -> IngestResult<LoadResult> {
        let destination = &self.config.destination;

        schema::bootstrap(&mut **tx, destination).await?;
        state.advance(LoadState::SchemaReady);

        let records = parser::parse_snapshot(text)?;
        debug!(rows = records.len(), "Parsed snapshot");

        staging::create_staging(&mut **tx, destination).await?;
        let rows_staged = staging::bulk_load(&mut **tx, destination, &records).await?;
        state.advance(LoadState::Staged);

        let counts = merge::upsert(&mut **tx, destination).await?;
        state.advance(LoadState::Merged);

        Ok(LoadResult {
            rows_staged,
            rows_upserted: counts.inserted + counts.updated,
            rows_inserted: counts.inserted,
            rows_updated: counts.updated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_from_str() {
        assert_eq!("read-committed".parse::<IsolationLevel>().unwrap(), IsolationLevel::ReadCommitted);
        assert_eq!("REPEATABLE_READ".parse::<IsolationLevel>().unwrap(), IsolationLevel::RepeatableRead);
        assert_eq!("serializable".parse::<IsolationLevel>().unwrap(), IsolationLevel::Serializable);
        assert!("read-uncommitted".parse::<IsolationLevel>().is_err());
    }

    #[test]
    fn test_isolation_default_is_read_committed() {
        assert_eq!(
            IsolationLevel::default().set_transaction_sql(),
            "SET TRANSACTION ISOLATION LEVEL READ COMMITTED"
        );
    }

    #[test]
    fn test_state_advance() {
        let mut state = LoadState::Start;
        state.advance(LoadState::SchemaReady);
        assert_eq!(state, LoadState::SchemaReady);
        assert_eq!(state.to_string(), "schema_ready");
    }
}
