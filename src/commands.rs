// Inspection Commands
// Connection check and schema lookups run over one managed session each

use crate::config::ReportConfig;
use crate::db::registry::DriverRegistry;
use crate::db::session::{ConnectionError, SessionManager};
use crate::db::traits::{DatabaseError, RawResult};
use crate::observer::RunObserver;
use crate::query::dialect::is_valid_identifier;
use crate::query::{Catalogue, Dialect};
use futures::FutureExt;
use std::fmt::Write;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Query failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("'{0}' is not a valid table name")]
    InvalidTable(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Unexpected result: {0}")]
    UnexpectedResult(String),
}

/// Column name and declared type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

/// Runs one-off lookups against the configured engine
pub struct Inspector {
    manager: SessionManager,
    dialect: Dialect,
}

impl Inspector {
    pub async fn new(
        config: &ReportConfig,
        registry: &DriverRegistry,
        observer: Arc<dyn RunObserver>,
    ) -> Result<Self, CommandError> {
        let engine = config.connection.engine;
        let driver = registry.get_driver(engine).await.map_err(ConnectionError::from)?;
        let manager = SessionManager::new(driver, config.connection.clone(), observer)?;
        Ok(Self {
            manager,
            dialect: Dialect::for_engine(engine),
        })
    }

    /// Connect with retry, validate, close. Returns the session id used.
    pub async fn check(&self) -> Result<String, CommandError> {
        let id = self
            .manager
            .with_session(|session| {
                let id = session.id().to_string();
                async move { id }.boxed()
            })
            .await?;
        Ok(id)
    }

    pub async fn tables(&self) -> Result<Vec<String>, CommandError> {
        let result = self.query(self.dialect.list_tables_sql().to_string()).await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| row.first())
            .map(|cell| cell.to_string())
            .collect())
    }

    pub async fn describe(&self, table: &str) -> Result<Vec<ColumnInfo>, CommandError> {
        let result = self.query(self.dialect.describe_sql(table)).await?;
        if result.is_empty() {
            return Err(CommandError::TableNotFound(table.to_string()));
        }
        Ok(result
            .rows
            .iter()
            .map(|row| ColumnInfo {
                name: row.first().map(|c| c.to_string()).unwrap_or_default(),
                data_type: row.get(1).map(|c| c.to_string()).unwrap_or_default(),
            })
            .collect())
    }

    pub async fn count(&self, table: &str) -> Result<i64, CommandError> {
        if !is_valid_identifier(table) {
            return Err(CommandError::InvalidTable(table.to_string()));
        }
        let result = self.query(self.dialect.count_sql(table)).await?;
        result
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(|cell| cell.as_i64())
            .ok_or_else(|| CommandError::UnexpectedResult("count returned no number".to_string()))
    }

    async fn query(&self, sql: String) -> Result<RawResult, CommandError> {
        let result = self
            .manager
            .with_session(move |session| async move { session.execute(&sql).await }.boxed())
            .await??;
        Ok(result)
    }
}

/// Human-readable listing of every catalogue entry and its SQL
pub fn catalogue_listing(catalogue: &Catalogue) -> String {
    let mut out = String::new();
    for spec in catalogue.iter() {
        let _ = writeln!(out, "== {} ==", spec.name());
        let _ = writeln!(out, "{}", spec.description());
        let columns: Vec<&str> = spec.schema().iter().map(|c| c.name.as_str()).collect();
        let _ = writeln!(out, "columns: {}", columns.join(", "));
        let _ = writeln!(out, "{}\n", spec.sql());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::traits::{ConnectionConfig, DatabaseType};
    use crate::demo::DemoDataset;
    use crate::observer::testing::{Event, RecordingObserver};
    use std::time::Duration;

    async fn inspector(dir: &tempfile::TempDir) -> (Inspector, Arc<RecordingObserver>) {
        let db = dir.path().join("flows.db");
        DemoDataset::new(&db).rows(25).write().unwrap();

        let mut config = ReportConfig::default();
        config.connection = ConnectionConfig::new(DatabaseType::Sqlite, db.to_string_lossy());
        config.connection.retry_delay = Duration::ZERO;

        let observer = Arc::new(RecordingObserver::default());
        let inspector = Inspector::new(&config, &DriverRegistry::with_defaults(), observer.clone())
            .await
            .unwrap();
        (inspector, observer)
    }

    #[tokio::test]
    async fn test_check_opens_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let (inspector, observer) = inspector(&dir).await;

        let id = inspector.check().await.unwrap();
        assert!(id.starts_with("sqlite-"));
        assert!(observer.events().contains(&Event::Closed(id)));
    }

    #[tokio::test]
    async fn test_schema_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let (inspector, _) = inspector(&dir).await;

        assert_eq!(inspector.tables().await.unwrap(), vec!["unsw_nb15_combined"]);
        assert_eq!(inspector.count("unsw_nb15_combined").await.unwrap(), 25);

        let columns = inspector.describe("unsw_nb15_combined").await.unwrap();
        assert!(columns.contains(&ColumnInfo {
            name: "attack_cat".to_string(),
            data_type: "TEXT".to_string()
        }));
    }

    #[tokio::test]
    async fn test_bad_table_names() {
        let dir = tempfile::tempdir().unwrap();
        let (inspector, _) = inspector(&dir).await;

        assert!(matches!(
            inspector.count("x; DROP TABLE y").await,
            Err(CommandError::InvalidTable(_))
        ));
        assert!(matches!(
            inspector.describe("missing").await,
            Err(CommandError::TableNotFound(_))
        ));
        assert!(matches!(inspector.count("missing").await, Err(CommandError::Database(_))));
    }

    #[test]
    fn test_catalogue_listing() {
        let listing = catalogue_listing(&Catalogue::builtin(Dialect::Sqlite, "flows"));
        assert!(listing.contains("== attack-distribution =="));
        assert!(listing.contains("columns: attack_cat, count, percentage"));
        assert!(listing.contains("FROM flows"));
    }
}
