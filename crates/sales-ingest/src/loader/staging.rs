//! Transaction-scoped staging table and bulk load via `COPY FROM STDIN`

use super::parser::SalesRecord;
use super::schema::{column_list, DestinationTable, COLUMNS};
use crate::error::{IngestError, IngestResult, LoadStep};
use sqlx::PgConnection;
use tracing::{debug, instrument};

/// Bytes per CopyData message
const COPY_CHUNK_SIZE: usize = 64 * 1024;

fn stage_err(e: sqlx::Error) -> IngestError {
    IngestError::from_sqlx(LoadStep::Stage, e)
}

/// Create the staging table for this transaction
///
/// `ON COMMIT DROP` removes it at commit; a rollback removes it with every
/// other effect of the transaction, so it never outlives the load.
pub async fn create_staging(conn: &mut PgConnection, table: &DestinationTable) -> IngestResult<()> {
    let columns = COLUMNS
        .iter()
        .map(|c| {
            if c.name == "id" {
                format!("{} {} NOT NULL", c.name, c.sql_type)
            } else {
                format!("{} {}", c.name, c.sql_type)
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    sqlx::query(&format!(
        "CREATE TEMP TABLE \"{}\" ({}) ON COMMIT DROP",
        table.staging_name(),
        columns
    ))
    .execute(&mut *conn)
    .await
    .map_err(stage_err)?;

    Ok(())
}

/// Bulk-load records into the staging table; returns the row count Postgres reports
#[instrument(skip(conn, records), fields(rows = records.len()))]
pub async fn bulk_load(
    conn: &mut PgConnection,
    table: &DestinationTable,
    records: &[SalesRecord],
) -> IngestResult<u64> {
    if records.is_empty() {
        return Ok(0);
    }

    let payload = encode_csv(records);
    let statement = format!(
        "COPY pg_temp.\"{}\" ({}) FROM STDIN WITH (FORMAT csv)",
        table.staging_name(),
        column_list()
    );

    let mut copy = conn.copy_in_raw(&statement).await.map_err(stage_err)?;
    for chunk in payload.chunks(COPY_CHUNK_SIZE) {
        copy.send(chunk).await.map_err(stage_err)?;
    }
    let copied = copy.finish().await.map_err(stage_err)?;

    if copied != records.len() as u64 {
        return Err(stage_err(sqlx::Error::Protocol(format!(
            "COPY reported {} rows for {} records",
            copied,
            records.len()
        ))));
    }

    debug!(copied, bytes = payload.len(), "Staged snapshot rows");
    Ok(copied)
}

/// Layout `COPY` reads back into `timestamp` without loss
const TIMESTAMP_LAYOUT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Render records as headerless CSV in canonical column order
///
/// `None` becomes an unquoted empty field, which `COPY ... CSV` reads as NULL.
/// Text is always quoted, so an empty string stays an empty string.
fn encode_csv(records: &[SalesRecord]) -> Vec<u8> {
    let mut out = String::with_capacity(records.len() * 64);

    for record in records {
        out.push_str(&record.id.to_string());
        out.push(',');
        push_text(&mut out, record.order_id.as_deref());
        out.push(',');
        push_text(&mut out, record.customer_id.as_deref());
        out.push(',');
        if let Some(amount) = record.amount {
            out.push_str(&amount.to_string());
        }
        out.push(',');
        if let Some(created_at) = record.created_at {
            out.push_str(&created_at.format(TIMESTAMP_LAYOUT).to_string());
        }
        out.push('\n');
    }

    out.into_bytes()
}

fn push_text(out: &mut String, value: Option<&str>) {
    if let Some(value) = value {
        out.push('"');
        out.push_str(&value.replace('"', "\"\""));
        out.push('"');
    }
}
