// SQL Dialects
// The few fragments that differ between the supported engines

use crate::db::traits::DatabaseType;
use serde::{Deserialize, Serialize};

/// SQL flavour spoken by the remote engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    SqlServer,
    Sqlite,
}

impl Dialect {
    pub fn for_engine(engine: DatabaseType) -> Self {
        match engine {
            DatabaseType::Postgresql => Dialect::Postgres,
            DatabaseType::Mssql => Dialect::SqlServer,
            DatabaseType::Sqlite => Dialect::Sqlite,
        }
    }

    /// Hour of day (0-23, UTC) of an epoch-seconds column
    pub fn hour_of_day(&self, column: &str) -> String {
        match self {
            Dialect::Postgres => format!("CAST(EXTRACT(HOUR FROM TO_TIMESTAMP({})) AS INTEGER)", column),
            Dialect::SqlServer => format!("DATEPART(HOUR, DATEADD(SECOND, {}, '1970-01-01'))", column),
            Dialect::Sqlite => format!("CAST(strftime('%H', {}, 'unixepoch') AS INTEGER)", column),
        }
    }

    /// ROUND that accepts floating point input on every engine
    pub fn round(&self, expr: &str, digits: u32) -> String {
        match self {
            // ROUND(double precision, int) does not exist in PostgreSQL
            Dialect::Postgres => format!("ROUND(CAST({} AS NUMERIC), {})", expr, digits),
            Dialect::SqlServer | Dialect::Sqlite => format!("ROUND({}, {})", expr, digits),
        }
    }

    /// Prefix placed right after `SELECT` to cap the row count
    pub fn top_clause(&self, n: usize) -> String {
        match self {
            Dialect::SqlServer => format!("TOP {} ", n),
            Dialect::Postgres | Dialect::Sqlite => String::new(),
        }
    }

    /// Suffix placed at the end of the statement to cap the row count
    pub fn limit_clause(&self, n: usize) -> String {
        match self {
            Dialect::SqlServer => String::new(),
            Dialect::Postgres | Dialect::Sqlite => format!("\nLIMIT {}", n),
        }
    }

    /// Tables (and views) visible in the target database
    pub fn list_tables_sql(&self) -> &'static str {
        match self {
            Dialect::Postgres => {
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema NOT IN ('pg_catalog', 'information_schema') \
                 ORDER BY table_name"
            }
            Dialect::SqlServer => "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES ORDER BY TABLE_NAME",
            Dialect::Sqlite => {
                "SELECT name FROM sqlite_master \
                 WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
                 ORDER BY name"
            }
        }
    }

    /// Column names and declared types of one table
    pub fn describe_sql(&self, table: &str) -> String {
        let table = quote_literal(table);
        match self {
            Dialect::Postgres => format!(
                "SELECT column_name, data_type FROM information_schema.columns \
                 WHERE table_name = {} ORDER BY ordinal_position",
                table
            ),
            Dialect::SqlServer => format!(
                "SELECT COLUMN_NAME, DATA_TYPE FROM INFORMATION_SCHEMA.COLUMNS \
                 WHERE TABLE_NAME = {} ORDER BY ORDINAL_POSITION",
                table
            ),
            Dialect::Sqlite => format!("SELECT name, type FROM pragma_table_info({})", table),
        }
    }

    /// Row count of one table; the name must already be a valid identifier
    pub fn count_sql(&self, table: &str) -> String {
        format!("SELECT COUNT(*) AS row_count FROM {}", table)
    }
}

/// Single-quoted SQL string literal
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Whether `name` is a plain (optionally schema-qualified) identifier that is
/// safe to splice into SQL unquoted
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}
