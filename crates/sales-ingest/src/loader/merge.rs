//! Set-oriented upsert from staging into the destination

use super::schema::{column_list, DestinationTable, COLUMNS};
use crate::error::{IngestError, IngestResult, LoadStep};
use sqlx::PgConnection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeCounts {
    pub inserted: u64,
    pub updated: u64,
}

/// Build the single `INSERT ... ON CONFLICT` statement
///
/// `xmax = 0` holds only for tuples created by this statement, which splits
/// the affected rows into fresh inserts and conflict updates.
fn upsert_sql(table: &DestinationTable) -> String {
    let columns = column_list();
    let assignments = COLUMNS
        .iter()
        .filter(|c| c.name != "id")
        .map(|c| format!("{name} = EXCLUDED.{name}", name = c.name))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"WITH upserted AS (
    INSERT INTO {destination} ({columns})
    SELECT {columns} FROM pg_temp."{staging}"
    ON CONFLICT (id) DO UPDATE SET {assignments}
    RETURNING (xmax = 0) AS inserted
)
SELECT
    COUNT(*) FILTER (WHERE inserted),
    COUNT(*) FILTER (WHERE NOT inserted)
FROM upserted"#,
        destination = table.qualified(),
        staging = table.staging_name(),
    )
}

pub async fn upsert(conn: &mut PgConnection, table: &DestinationTable) -> IngestResult<MergeCounts> {
    let (inserted, updated): (i64, i64) = sqlx::query_as(&upsert_sql(table))
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| IngestError::from_sqlx(LoadStep::Merge, e))?;

    Ok(MergeCounts {
        inserted: inserted as u64,
        updated: updated as u64,
    })
}
