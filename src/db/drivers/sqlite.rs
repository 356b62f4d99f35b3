// SQLite Driver
// Implements DatabaseDriver for local SQLite files using rusqlite

use crate::db::traits::{
    CellValue, ConnectionConfig, DatabaseDriver, DatabaseError, DatabaseType, DriverSession,
    RawResult,
};
use rusqlite::types::ValueRef;
use rusqlite::{Connection as RusqliteConnection, InterruptHandle, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

type SharedConnection = Arc<Mutex<Option<RusqliteConnection>>>;

/// One SQLite connection, opened read-only.
///
/// Statements run on the blocking pool so an abandoned query future does not
/// pin a runtime worker; dropping that future interrupts the statement.
pub struct SqliteSession {
    id: String,
    conn: SharedConnection,
    interrupt: Arc<InterruptHandle>,
}

/// Interrupts the running statement unless the query completed
struct InterruptOnDrop {
    handle: Arc<InterruptHandle>,
    abandoned: Arc<AtomicBool>,
    armed: bool,
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.abandoned.store(true, Ordering::SeqCst);
            self.handle.interrupt();
        }
    }
}

impl SqliteSession {
    fn run(conn: &RusqliteConnection, sql: &str, abandoned: &AtomicBool) -> rusqlite::Result<RawResult> {
        let mut stmt = conn.prepare_cached(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let column_count = columns.len();

        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            if abandoned.load(Ordering::SeqCst) {
                return Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_INTERRUPT),
                    Some("query abandoned".to_string()),
                ));
            }
            let cells = (0..column_count)
                .map(|idx| SqliteDriver::cell_value_from_row(row, idx))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.push(cells);
        }

        Ok(RawResult::new(columns, rows))
    }
}

fn poisoned() -> DatabaseError {
    DatabaseError::ConnectionFailed("SQLite connection lock poisoned".to_string())
}

#[async_trait::async_trait]
impl DriverSession for SqliteSession {
    fn session_id(&self) -> &str {
        &self.id
    }

    async fn query(&mut self, sql: &str) -> Result<RawResult, DatabaseError> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let abandoned = Arc::new(AtomicBool::new(false));
        let mut guard = InterruptOnDrop {
            handle: Arc::clone(&self.interrupt),
            abandoned: Arc::clone(&abandoned),
            armed: true,
        };

        let task = tokio::task::spawn_blocking(move || {
            let lock = conn.lock().map_err(|_| poisoned())?;
            let conn = lock
                .as_ref()
                .ok_or_else(|| DatabaseError::ConnectionFailed("session released".to_string()))?;
            if abandoned.load(Ordering::SeqCst) {
                return Err(DatabaseError::Query("query abandoned".to_string()));
            }
            Self::run(conn, &sql, &abandoned).map_err(|e| DatabaseError::Query(e.to_string()))
        });

        let result = task
            .await
            .map_err(|e| DatabaseError::Query(format!("query task failed: {}", e)));
        guard.armed = false;
        result?
    }

    async fn release(&mut self) -> Result<(), DatabaseError> {
        let conn = Arc::clone(&self.conn);
        // Waits for an interrupted statement to unwind before taking the connection
        let taken = tokio::task::spawn_blocking(move || conn.lock().map(|mut c| c.take()).map_err(|_| ()))
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(format!("close task failed: {}", e)))?
            .map_err(|_| poisoned())?;
        let Some(conn) = taken else {
            return Ok(());
        };
        // Cached statements are the cursors here; finalize them before closing
        conn.flush_prepared_statement_cache();
        conn.close()
            .map_err(|(_, e)| DatabaseError::ConnectionFailed(format!("close failed: {}", e)))
    }
}

/// SQLite driver implementation
pub struct SqliteDriver;

impl SqliteDriver {
    /// Create a new SQLite driver
    pub fn new() -> Self {
        Self
    }

    /// Extract database path from config
    fn get_database_path(config: &ConnectionConfig) -> Result<PathBuf, DatabaseError> {
        if config.database.is_empty() {
            return Err(DatabaseError::InvalidConfig(
                "SQLite database path is required".to_string(),
            ));
        }

        // Expand ~ to home directory if present
        if let Some(rest) = config.database.strip_prefix("~/") {
            if let Some(home) = std::env::var_os("HOME") {
                return Ok(Path::new(&home).join(rest));
            }
        }
        Ok(PathBuf::from(&config.database))
    }

    /// Open SQLite connection. A missing file is a connection failure, never a new database.
    fn open_connection(path: &Path) -> Result<RusqliteConnection, DatabaseError> {
        RusqliteConnection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| DatabaseError::ConnectionFailed(format!("Failed to open SQLite database: {}", e)))
    }

    /// Extract cell value from row
    fn cell_value_from_row(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<CellValue> {
        Ok(match row.get_ref(idx)? {
            ValueRef::Null => CellValue::Null,
            ValueRef::Integer(i) => CellValue::Int(i),
            ValueRef::Real(f) => CellValue::Float(f),
            ValueRef::Text(t) => CellValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => CellValue::Text(format!("<{} bytes>", b.len())),
        })
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for SqliteDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    async fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn DriverSession>, DatabaseError> {
        let path = Self::get_database_path(config)?;
        let conn = Self::open_connection(&path)?;
        let interrupt = Arc::new(conn.get_interrupt_handle());

        Ok(Box::new(SqliteSession {
            id: format!("sqlite-{}", uuid::Uuid::new_v4()),
            conn: Arc::new(Mutex::new(Some(conn))),
            interrupt,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, ConnectionConfig) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flows.db");
        let conn = RusqliteConnection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE flows (proto TEXT, sbytes INTEGER, rate REAL, service TEXT);
             INSERT INTO flows VALUES ('tcp', 100, 1.5, '-');
             INSERT INTO flows VALUES ('udp', 40, NULL, 'dns');",
        )
        .unwrap();
        drop(conn);

        let config = ConnectionConfig::new(DatabaseType::Sqlite, path.to_string_lossy());
        (dir, config)
    }

    #[test]
    fn test_driver_type() {
        let driver = SqliteDriver::new();
        assert_eq!(driver.database_type(), DatabaseType::Sqlite);
    }

    #[tokio::test]
    async fn test_query_preserves_storage_types() {
        let (_dir, config) = fixture();
        let mut session = SqliteDriver::new().open(&config).await.unwrap();

        let result = session
            .query("SELECT proto, sbytes, rate, service FROM flows ORDER BY proto")
            .await
            .unwrap();

        assert_eq!(result.columns, vec!["proto", "sbytes", "rate", "service"]);
        assert_eq!(
            result.rows[0],
            vec![
                CellValue::Text("tcp".to_string()),
                CellValue::Int(100),
                CellValue::Float(1.5),
                CellValue::Text("-".to_string()),
            ]
        );
        assert_eq!(result.rows[1][2], CellValue::Null);

        session.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_result_keeps_columns() {
        let (_dir, config) = fixture();
        let mut session = SqliteDriver::new().open(&config).await.unwrap();

        let result = session
            .query("SELECT proto, sbytes FROM flows WHERE sbytes > 1000")
            .await
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(result.columns, vec!["proto", "sbytes"]);
    }

    #[tokio::test]
    async fn test_missing_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConnectionConfig::new(
            DatabaseType::Sqlite,
            dir.path().join("absent.db").to_string_lossy(),
        );
        let result = SqliteDriver::new().open(&config).await;
        assert!(matches!(result, Err(DatabaseError::ConnectionFailed(_))));
        assert!(!dir.path().join("absent.db").exists());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (_dir, config) = fixture();
        let mut session = SqliteDriver::new().open(&config).await.unwrap();
        session.query("SELECT 1").await.unwrap();

        session.release().await.unwrap();
        session.release().await.unwrap();
        assert!(session.query("SELECT 1").await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_sql_is_query_error() {
        let (_dir, config) = fixture();
        let mut session = SqliteDriver::new().open(&config).await.unwrap();
        assert!(matches!(
            session.query("SELECT nope FROM flows").await,
            Err(DatabaseError::Query(_))
        ));
    }

    #[tokio::test]
    async fn test_dropped_query_is_interrupted() {
        let (_dir, config) = fixture();
        let mut session = SqliteDriver::new().open(&config).await.unwrap();

        let started = std::time::Instant::now();
        let slow = session.query(
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 500000000) \
             SELECT count(*) FROM c",
        );
        assert!(tokio::time::timeout(std::time::Duration::from_millis(200), slow)
            .await
            .is_err());

        // The interrupted statement unwinds and the connection stays usable
        let result = session.query("SELECT count(*) FROM flows").await.unwrap();
        assert_eq!(result.rows[0][0], CellValue::Int(2));
        session.release().await.unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }
}
