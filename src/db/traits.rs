// Database Driver Traits
// Defines the abstraction every remote query engine is reached through

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Supported database types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Postgresql,
    Mssql,
    Sqlite,
}

impl DatabaseType {
    /// Display name for logs and reports
    pub fn display_name(&self) -> &'static str {
        match self {
            DatabaseType::Postgresql => "PostgreSQL",
            DatabaseType::Mssql => "Microsoft SQL Server",
            DatabaseType::Sqlite => "SQLite",
        }
    }

    /// Default port for the database type
    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseType::Postgresql => 5432,
            DatabaseType::Mssql => 1433,
            DatabaseType::Sqlite => 0, // File-based, no port
        }
    }

    /// Whether the engine is reached over the network (host/user required)
    pub fn is_networked(&self) -> bool {
        !matches!(self, DatabaseType::Sqlite)
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Driver-level database error
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Driver not found for database type: {0:?}")]
    DriverNotFound(DatabaseType),

    #[error("Query execution error: {0}")]
    Query(String),

    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cell value in a result set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Numeric view of the cell; numeric strings are parsed
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Float(f) => Some(*f),
            CellValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            CellValue::Text(s) => s.trim().parse::<f64>().ok(),
            CellValue::Null => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int(i) => Some(*i),
            CellValue::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            CellValue::Text(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => f.write_str("NULL"),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Int(i) => write!(f, "{}", i),
            CellValue::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{:.1}", v)
                } else {
                    write!(f, "{}", v)
                }
            }
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

/// Result set exactly as the engine returned it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl RawResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Connection parameters for one remote engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub engine: DatabaseType,
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: Option<String>,
    /// Database/catalog name; the file path for SQLite
    pub database: String,
    pub max_retries: u32,
    #[serde(with = "duration_secs")]
    pub retry_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt (1.0 = fixed)
    pub backoff_factor: f64,
    /// Upper bound for a backed-off delay
    #[serde(with = "duration_secs")]
    pub max_retry_delay: Duration,
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
    /// TLS for the whole TDS stream (SQL Server only)
    #[serde(default)]
    pub encrypt: bool,
    #[serde(default = "default_trust_certificate")]
    pub trust_certificate: bool,
}

fn default_trust_certificate() -> bool {
    true
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new(DatabaseType::Postgresql, "cybersecurity_analytics")
    }
}

impl ConnectionConfig {
    pub fn new(engine: DatabaseType, database: impl Into<String>) -> Self {
        Self {
            engine,
            host: "localhost".to_string(),
            port: None,
            username: "root".to_string(),
            password: None,
            database: database.into(),
            max_retries: 5,
            retry_delay: Duration::from_secs(10),
            backoff_factor: 1.0,
            max_retry_delay: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(30),
            encrypt: false,
            trust_certificate: true,
        }
    }

    pub fn get_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.engine.default_port())
    }

    pub fn validate(&self) -> Result<(), DatabaseError> {
        if self.database.trim().is_empty() {
            return Err(DatabaseError::InvalidConfig(match self.engine {
                DatabaseType::Sqlite => "SQLite database path is required".to_string(),
                _ => "Database name is required".to_string(),
            }));
        }
        if self.engine.is_networked() {
            if self.host.trim().is_empty() {
                return Err(DatabaseError::InvalidConfig("Host is required".to_string()));
            }
            if self.username.trim().is_empty() {
                return Err(DatabaseError::InvalidConfig("Username is required".to_string()));
            }
        }
        if self.max_retries == 0 {
            return Err(DatabaseError::InvalidConfig(
                "max_retries must allow at least one attempt".to_string(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(DatabaseError::InvalidConfig(format!(
                "backoff_factor must be a finite number >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        Ok(())
    }

    /// Short description safe for logs (no password)
    pub fn describe(&self) -> String {
        match self.engine {
            DatabaseType::Sqlite => format!("{} file {}", self.engine, self.database),
            _ => format!(
                "{} {}@{}:{}/{}",
                self.engine,
                self.username,
                self.host,
                self.get_port(),
                self.database
            ),
        }
    }
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Live session on one engine. Owned by exactly one caller, never shared.
#[async_trait::async_trait]
pub trait DriverSession: Send {
    /// Identifier used in logs
    fn session_id(&self) -> &str;

    /// Execute a query and materialize the complete result set
    async fn query(&mut self, sql: &str) -> Result<RawResult, DatabaseError>;

    /// Release cursor-equivalent resources first, then the connection itself.
    /// Calling it on an already released session is a no-op.
    async fn release(&mut self) -> Result<(), DatabaseError>;
}

/// Database driver trait - all database drivers must implement this
#[async_trait::async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Get the database type this driver supports
    fn database_type(&self) -> DatabaseType;

    /// Get the display name for this driver
    fn driver_name(&self) -> &'static str {
        self.database_type().display_name()
    }

    /// Open a new session. No validation round-trip happens here.
    async fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn DriverSession>, DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        assert_eq!(DatabaseType::Postgresql.default_port(), 5432);
        assert_eq!(DatabaseType::Mssql.default_port(), 1433);
        assert_eq!(DatabaseType::Sqlite.default_port(), 0);
    }

    #[test]
    fn test_config_validation() {
        let config = ConnectionConfig::new(DatabaseType::Postgresql, "cybersecurity_analytics");
        assert!(config.validate().is_ok());

        let mut no_host = config.clone();
        no_host.host = String::new();
        assert!(matches!(no_host.validate(), Err(DatabaseError::InvalidConfig(_))));

        let mut no_retries = config.clone();
        no_retries.max_retries = 0;
        assert!(no_retries.validate().is_err());

        let mut bad_backoff = config;
        bad_backoff.backoff_factor = 0.5;
        assert!(bad_backoff.validate().is_err());
    }

    #[test]
    fn test_sqlite_config_needs_no_host() {
        let mut config = ConnectionConfig::new(DatabaseType::Sqlite, "/tmp/flows.db");
        config.host = String::new();
        config.username = String::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.describe(), "SQLite file /tmp/flows.db");
    }

    #[test]
    fn test_cell_numeric_views() {
        assert_eq!(CellValue::Text(" 42 ".to_string()).as_i64(), Some(42));
        assert_eq!(CellValue::Text("42.0".to_string()).as_i64(), Some(42));
        assert_eq!(CellValue::Text("4.5".to_string()).as_i64(), None);
        assert_eq!(CellValue::Float(3.0).as_i64(), Some(3));
        assert_eq!(CellValue::Int(7).as_f64(), Some(7.0));
        assert_eq!(CellValue::Null.as_f64(), None);
    }

    #[test]
    fn test_password_is_not_serialized() {
        let mut config = ConnectionConfig::new(DatabaseType::Postgresql, "db");
        config.password = Some("hunter2".to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_out_of_range_durations_are_rejected() {
        let err = serde_json::from_str::<ConnectionConfig>(r#"{"retry_delay": 1e30}"#).unwrap_err();
        assert!(err.is_data(), "{}", err);
        assert!(serde_json::from_str::<ConnectionConfig>(r#"{"max_retry_delay": -1}"#).is_err());

        let config: ConnectionConfig = serde_json::from_str(r#"{"retry_delay": 0.25}"#).unwrap();
        assert_eq!(config.retry_delay, Duration::from_millis(250));
    }
}
