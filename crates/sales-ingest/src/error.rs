//! Ingestion error taxonomy
//!
//! Every failure surfaces as a specific [`IngestError`] so the caller can tell
//! "retry me" ([`IngestError::is_transient`]) from "fix the data first".

use serde::Serialize;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// The step of a run in which an error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStep {
    Fetch,
    Connect,
    Bootstrap,
    Parse,
    Stage,
    Merge,
    Commit,
}

impl std::fmt::Display for LoadStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoadStep::Fetch => "fetch",
            LoadStep::Connect => "connect",
            LoadStep::Bootstrap => "bootstrap",
            LoadStep::Parse => "parse",
            LoadStep::Stage => "stage",
            LoadStep::Merge => "merge",
            LoadStep::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// Coarse classification of an [`IngestError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    NotFound,
    Decode,
    SchemaMismatch,
    RowFormat,
    Transaction,
    Storage,
    Config,
}

#[derive(Error, Debug)]
pub enum IngestError {
    /// A store could not be reached, or the connection dropped mid-request
    #[error("Connection error during {step}: {message}")]
    Connection { step: LoadStep, message: String },

    #[error("Object not found: s3://{bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Snapshot is not valid UTF-8 (first invalid byte at offset {valid_up_to})")]
    Decode { valid_up_to: usize },

    /// The snapshot header, or an existing destination table, has the wrong columns
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Row {row} (line {line}): {reason}")]
    RowFormat { row: u64, line: u64, reason: String },

    /// The destination store rejected a statement; the transaction was rolled back
    #[error("Transaction failed during {step}: {source}")]
    Transaction {
        step: LoadStep,
        #[source]
        source: sqlx::Error,
    },

    /// The blob store answered but refused the request (e.g. access denied)
    #[error("Blob store rejected request: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IngestError {
    /// Classify a database error raised while executing `step`
    ///
    /// Transport-level failures become [`IngestError::Connection`]; anything the
    /// server itself rejected stays a [`IngestError::Transaction`].
    pub fn from_sqlx(step: LoadStep, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Connection {
                step,
                message: err.to_string(),
            },
            other => Self::Transaction {
                step,
                source: other,
            },
        }
    }

    pub fn row_format(row: u64, line: u64, reason: impl Into<String>) -> Self {
        Self::RowFormat {
            row,
            line,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Connection { .. } => ErrorKind::Connection,
            IngestError::NotFound { .. } => ErrorKind::NotFound,
            IngestError::Decode { .. } => ErrorKind::Decode,
            IngestError::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            IngestError::RowFormat { .. } => ErrorKind::RowFormat,
            IngestError::Transaction { .. } => ErrorKind::Transaction,
            IngestError::Storage(_) => ErrorKind::Storage,
            IngestError::Config(_) => ErrorKind::Config,
        }
    }

    /// The run step that failed, where one applies
    pub fn step(&self) -> Option<LoadStep> {
        match self {
            IngestError::Connection { step, .. } | IngestError::Transaction { step, .. } => {
                Some(*step)
            },
            IngestError::NotFound { .. } | IngestError::Decode { .. } | IngestError::Storage(_) => {
                Some(LoadStep::Fetch)
            },
            IngestError::SchemaMismatch(_) => Some(LoadStep::Parse),
            IngestError::RowFormat { .. } => Some(LoadStep::Stage),
            IngestError::Config(_) => None,
        }
    }

    /// Whether reissuing the whole run may succeed without upstream changes
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Connection { .. } => true,
            IngestError::Transaction { step, source } => source
                .as_database_error()
                .and_then(|db| db.code())
                .is_some_and(|code| is_transient_sqlstate(*step, &code)),
            _ => false,
        }
    }

    /// Malformed input that needs an upstream data fix
    pub fn is_data_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Decode | ErrorKind::SchemaMismatch | ErrorKind::RowFormat
        )
    }
}

/// Serialization failures (40001) and deadlocks (40P01) are transient at any
/// step. During bootstrap, two first loads racing on `CREATE ... IF NOT EXISTS`
/// can also collide in the catalog (23505, 42P06, 42P07); the rerun finds the
/// relation in place.
fn is_transient_sqlstate(step: LoadStep, code: &str) -> bool {
    match code {
        "40001" | "40P01" => true,
        "23505" | "42P06" | "42P07" => step == LoadStep::Bootstrap,
        _ => false,
    }
}

impl From<sales_common::CommonError> for IngestError {
    fn from(err: sales_common::CommonError) -> Self {
        IngestError::Config(err.to_string())
    }
}
