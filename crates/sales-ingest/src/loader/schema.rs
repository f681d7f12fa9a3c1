//! Destination relation naming and idempotent schema bootstrap

use crate::error::{IngestError, IngestResult, LoadStep};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use std::sync::LazyLock;
use tracing::{debug, instrument};

/// Default destination relation: `raw.sales`.
pub const DEFAULT_SCHEMA: &str = "raw";
pub const DEFAULT_TABLE: &str = "sales";

/// Unquoted Postgres identifier that fits in NAMEDATALEN.
static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").unwrap()
});

/// One column of the snapshot / destination shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    /// Type as written in DDL
    pub sql_type: &'static str,
    /// Type as reported by `information_schema.columns.udt_name`
    pub udt_name: &'static str,
}

/// The five columns, in canonical order
pub const COLUMNS: [ColumnSpec; 5] = [
    ColumnSpec { name: "id", sql_type: "integer", udt_name: "int4" },
    ColumnSpec { name: "order_id", sql_type: "text", udt_name: "text" },
    ColumnSpec { name: "customer_id", sql_type: "text", udt_name: "text" },
    ColumnSpec { name: "amount", sql_type: "double precision", udt_name: "float8" },
    ColumnSpec { name: "created_at", sql_type: "timestamp", udt_name: "timestamp" },
];

/// Comma-separated column list in canonical order
pub fn column_list() -> String {
    COLUMNS.iter().map(|c| c.name).collect::<Vec<_>>().join(", ")
}

/// Schema-qualified destination table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationTable {
    schema: String,
    table: String,
}

impl DestinationTable {
    /// Names are interpolated into DDL, so only plain lowercase identifiers are accepted
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> IngestResult<Self> {
        let schema = schema.into();
        let table = table.into();

        for (what, name) in [("schema", &schema), ("table", &table)] {
            if !IDENTIFIER.is_match(name) {
                return Err(IngestError::Config(format!(
                    "destination {} name '{}' must match {}",
                    what,
                    name,
                    IDENTIFIER.as_str()
                )));
            }
        }

        Ok(Self { schema, table })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// `"schema"."table"`, safe to splice into SQL
    pub fn qualified(&self) -> String {
        format!("\"{}\".\"{}\"", self.schema, self.table)
    }

    /// Name of the per-load temporary staging table
    pub fn staging_name(&self) -> String {
        format!("{}_staging", self.table)
    }
}

impl Default for DestinationTable {
    fn default() -> Self {
        Self {
            schema: DEFAULT_SCHEMA.to_string(),
            table: DEFAULT_TABLE.to_string(),
        }
    }
}

impl std::fmt::Display for DestinationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

fn create_table_sql(table: &DestinationTable) -> String {
    let columns = COLUMNS
        .iter()
        .map(|c| {
            if c.name == "id" {
                format!("{} {} PRIMARY KEY", c.name, c.sql_type)
            } else {
                format!("{} {}", c.name, c.sql_type)
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!("CREATE TABLE IF NOT EXISTS {} ({})", table.qualified(), columns)
}

/// Ensure the destination schema and table exist with the expected shape
///
/// Creating is idempotent; an existing table is left alone but must carry the
/// five columns with the expected types and a single-column unique index on
/// `id`, otherwise the merge could not be expressed against it.
#[instrument(skip(conn), fields(destination = %table))]
pub async fn bootstrap(conn: &mut PgConnection, table: &DestinationTable) -> IngestResult<()> {
    let step = |e| IngestError::from_sqlx(LoadStep::Bootstrap, e);

    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS \"{}\"", table.schema()))
        .execute(&mut *conn)
        .await
        .map_err(step)?;

    sqlx::query(&create_table_sql(table))
        .execute(&mut *conn)
        .await
        .map_err(step)?;

    verify_shape(conn, table).await?;

    debug!("Destination schema ready");
    Ok(())
}

async fn verify_shape(conn: &mut PgConnection, table: &DestinationTable) -> IngestResult<()> {
    let step = |e| IngestError::from_sqlx(LoadStep::Bootstrap, e);

    let existing: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT column_name::text, udt_name::text
        FROM information_schema.columns
        WHERE table_schema = $1 AND table_name = $2
        "#,
    )
    .bind(table.schema())
    .bind(table.table())
    .fetch_all(&mut *conn)
    .await
    .map_err(step)?;

    let problems = shape_problems(&existing);
    if !problems.is_empty() {
        return Err(IngestError::SchemaMismatch(format!(
            "destination {} {}",
            table,
            problems.join("; ")
        )));
    }

    let keyed: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1
            FROM pg_index i
            JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
            WHERE i.indrelid = to_regclass($1)
              AND i.indisunique
              AND i.indnatts = 1
              AND a.attname = 'id'
        )
        "#,
    )
    .bind(table.qualified())
    .fetch_one(&mut *conn)
    .await
    .map_err(step)?;

    if !keyed {
        return Err(IngestError::SchemaMismatch(format!(
            "destination {} has no unique constraint on id",
            table
        )));
    }

    Ok(())
}

/// Compare reported `(column, udt)` pairs against [`COLUMNS`]
///
/// Extra columns are tolerated; missing or retyped ones are not.
fn shape_problems(existing: &[(String, String)]) -> Vec<String> {
    COLUMNS
        .iter()
        .filter_map(|expected| {
            match existing.iter().find(|(name, _)| name == expected.name) {
                None => Some(format!("is missing column '{}'", expected.name)),
                Some((_, udt)) if udt != expected.udt_name => Some(format!(
                    "column '{}' has type {}, expected {}",
                    expected.name, udt, expected.udt_name
                )),
                Some(_) => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(n, t)| (n.to_string(), t.to_string()))
            .collect()
    }

    #[test]
    fn test_destination_accepts_plain_identifiers() {
        let table = DestinationTable::new("raw", "sales_v2").unwrap();
        assert_eq!(table.qualified(), "\"raw\".\"sales_v2\"");
        assert_eq!(table.to_string(), "raw.sales_v2");
        assert_eq!(table.staging_name(), "sales_v2_staging");
    }

    #[test]
    fn test_destination_rejects_injection() {
        assert!(DestinationTable::new("raw", "sales; DROP TABLE x").is_err());
        assert!(DestinationTable::new("Raw", "sales").is_err());
        assert!(DestinationTable::new("raw", "").is_err());
        assert!(DestinationTable::new("raw", "a".repeat(64)).is_err());
    }

    #[test]
    fn test_create_table_sql() {
        let sql = create_table_sql(&DestinationTable::default());
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"raw\".\"sales\" (id integer PRIMARY KEY, order_id text, \
             customer_id text, amount double precision, created_at timestamp)"
        );
    }

    #[test]
    fn test_shape_matches() {
        let existing = pairs(&[
            ("id", "int4"),
            ("order_id", "text"),
            ("customer_id", "text"),
            ("amount", "float8"),
            ("created_at", "timestamp"),
            ("loaded_at", "timestamptz"),
        ]);
        assert!(shape_problems(&existing).is_empty());
    }

    #[test]
    fn test_shape_reports_missing_and_retyped() {
        let existing = pairs(&[
            ("id", "int4"),
            ("order_id", "text"),
            ("amount", "numeric"),
            ("created_at", "timestamp"),
        ]);
        let problems = shape_problems(&existing);
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("customer_id"));
        assert!(problems[1].contains("numeric"));
    }
}
