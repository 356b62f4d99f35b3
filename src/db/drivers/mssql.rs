// MS-SQL Driver
// Implements DatabaseDriver for SQL Server engines using a dedicated tiberius client

use crate::db::traits::{
    CellValue, ConnectionConfig, DatabaseDriver, DatabaseError, DatabaseType, DriverSession,
    RawResult,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tiberius::{AuthMethod, ColumnType, Config, EncryptionLevel, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

type MssqlClient = tiberius::Client<Compat<TcpStream>>;

fn query_error(e: tiberius::error::Error) -> DatabaseError {
    DatabaseError::Query(e.to_string())
}

/// One dedicated SQL Server connection
pub struct MssqlSession {
    id: String,
    client: Option<MssqlClient>,
}

#[async_trait::async_trait]
impl DriverSession for MssqlSession {
    fn session_id(&self) -> &str {
        &self.id
    }

    async fn query(&mut self, sql: &str) -> Result<RawResult, DatabaseError> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| DatabaseError::ConnectionFailed("session released".to_string()))?;

        let mut stream = client.simple_query(sql).await.map_err(query_error)?;

        // Column metadata arrives before the rows, so empty results keep their header
        let columns: Vec<String> = stream
            .columns()
            .await
            .map_err(query_error)?
            .map(|cols| cols.iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let rows = stream.into_first_result().await.map_err(query_error)?;
        let rows = rows
            .iter()
            .map(|row| {
                (0..row.columns().len())
                    .map(|idx| MssqlDriver::cell_value_from_row(row, idx))
                    .collect()
            })
            .collect();

        Ok(RawResult::new(columns, rows))
    }

    async fn release(&mut self) -> Result<(), DatabaseError> {
        match self.client.take() {
            Some(client) => client
                .close()
                .await
                .map_err(|e| DatabaseError::ConnectionFailed(format!("close failed: {}", e))),
            None => Ok(()),
        }
    }
}

/// MS-SQL driver implementation
pub struct MssqlDriver;

impl MssqlDriver {
    /// Create a new MS-SQL driver
    pub fn new() -> Self {
        Self
    }

    /// Convert the connection config to a tiberius config
    fn to_tiberius_config(config: &ConnectionConfig) -> Result<Config, DatabaseError> {
        if config.host.is_empty() {
            return Err(DatabaseError::InvalidConfig("Host required for MS-SQL".to_string()));
        }
        if config.username.is_empty() {
            return Err(DatabaseError::InvalidConfig("Username required for MS-SQL".to_string()));
        }

        let mut tiberius_config = Config::new();
        tiberius_config.host(&config.host);
        tiberius_config.port(config.get_port());
        tiberius_config.database(&config.database);
        tiberius_config.authentication(AuthMethod::sql_server(
            &config.username,
            config.password.as_deref().unwrap_or_default(),
        ));

        if config.trust_certificate {
            tiberius_config.trust_cert();
        }

        tiberius_config.encryption(if config.encrypt {
            EncryptionLevel::Required
        } else {
            EncryptionLevel::Off
        });

        Ok(tiberius_config)
    }

    /// Extract cell value from row
    fn cell_value_from_row(row: &Row, idx: usize) -> CellValue {
        let col_type = row
            .columns()
            .get(idx)
            .map(|c| c.column_type())
            .unwrap_or(ColumnType::Null);

        match col_type {
            ColumnType::Null => CellValue::Null,

            // Integer types
            ColumnType::Int1 => row
                .try_get::<u8, _>(idx)
                .ok()
                .flatten()
                .map(|v| CellValue::Int(v as i64))
                .unwrap_or(CellValue::Null),
            ColumnType::Int2 => row
                .try_get::<i16, _>(idx)
                .ok()
                .flatten()
                .map(|v| CellValue::Int(v as i64))
                .unwrap_or(CellValue::Null),
            ColumnType::Int4 => row
                .try_get::<i32, _>(idx)
                .ok()
                .flatten()
                .map(|v| CellValue::Int(v as i64))
                .unwrap_or(CellValue::Null),
            ColumnType::Int8 => row
                .try_get::<i64, _>(idx)
                .ok()
                .flatten()
                .map(CellValue::Int)
                .unwrap_or(CellValue::Null),
            ColumnType::Intn => row
                .try_get::<i64, _>(idx)
                .ok()
                .flatten()
                .map(CellValue::Int)
                .or_else(|| row.try_get::<i32, _>(idx).ok().flatten().map(|v| CellValue::Int(v as i64)))
                .or_else(|| row.try_get::<i16, _>(idx).ok().flatten().map(|v| CellValue::Int(v as i64)))
                .or_else(|| row.try_get::<u8, _>(idx).ok().flatten().map(|v| CellValue::Int(v as i64)))
                .unwrap_or(CellValue::Null),

            // Float types
            ColumnType::Float4 => row
                .try_get::<f32, _>(idx)
                .ok()
                .flatten()
                .map(|v| CellValue::Float(v as f64))
                .unwrap_or(CellValue::Null),
            ColumnType::Float8 | ColumnType::Money | ColumnType::Money4 => row
                .try_get::<f64, _>(idx)
                .ok()
                .flatten()
                .map(CellValue::Float)
                .unwrap_or(CellValue::Null),
            ColumnType::Floatn => row
                .try_get::<f64, _>(idx)
                .ok()
                .flatten()
                .map(CellValue::Float)
                .or_else(|| row.try_get::<f32, _>(idx).ok().flatten().map(|v| CellValue::Float(v as f64)))
                .unwrap_or(CellValue::Null),

            // AVG/percentage aggregates come back as DECIMAL
            ColumnType::Decimaln | ColumnType::Numericn => row
                .try_get::<tiberius::numeric::Numeric, _>(idx)
                .ok()
                .flatten()
                .map(|n| CellValue::Float(f64::from(n)))
                .unwrap_or(CellValue::Null),

            ColumnType::Bit | ColumnType::Bitn => row
                .try_get::<bool, _>(idx)
                .ok()
                .flatten()
                .map(CellValue::Bool)
                .unwrap_or(CellValue::Null),

            // Date/Time types are reported as text
            ColumnType::Datetime | ColumnType::Datetime2 | ColumnType::Datetimen | ColumnType::Datetime4 => row
                .try_get::<NaiveDateTime, _>(idx)
                .ok()
                .flatten()
                .map(|dt| CellValue::Text(dt.to_string()))
                .unwrap_or(CellValue::Null),
            ColumnType::DatetimeOffsetn => row
                .try_get::<DateTime<Utc>, _>(idx)
                .ok()
                .flatten()
                .map(|dt| CellValue::Text(dt.to_rfc3339()))
                .unwrap_or(CellValue::Null),
            ColumnType::Daten => row
                .try_get::<NaiveDate, _>(idx)
                .ok()
                .flatten()
                .map(|d| CellValue::Text(d.to_string()))
                .unwrap_or(CellValue::Null),
            ColumnType::Timen => row
                .try_get::<NaiveTime, _>(idx)
                .ok()
                .flatten()
                .map(|t| CellValue::Text(t.to_string()))
                .unwrap_or(CellValue::Null),

            ColumnType::Guid => row
                .try_get::<tiberius::Uuid, _>(idx)
                .ok()
                .flatten()
                .map(|g| CellValue::Text(g.to_string()))
                .unwrap_or(CellValue::Null),

            // Strings and anything else with a textual form
            _ => row
                .try_get::<&str, _>(idx)
                .ok()
                .flatten()
                .map(|s| CellValue::Text(s.to_string()))
                .unwrap_or(CellValue::Null),
        }
    }
}

impl Default for MssqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for MssqlDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mssql
    }

    async fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn DriverSession>, DatabaseError> {
        let tiberius_config = Self::to_tiberius_config(config)?;

        let tcp = TcpStream::connect(format!("{}:{}", config.host, config.get_port()))
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(format!("TCP connection failed: {}", e)))?;

        tcp.set_nodelay(true)
            .map_err(|e| DatabaseError::ConnectionFailed(format!("Failed to set TCP_NODELAY: {}", e)))?;

        let client = tiberius::Client::connect(tiberius_config, tcp.compat_write())
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        Ok(Box::new(MssqlSession {
            id: format!("mssql-{}", uuid::Uuid::new_v4()),
            client: Some(client),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> ConnectionConfig {
        let mut config = ConnectionConfig::new(DatabaseType::Mssql, "cybersecurity_analytics");
        config.host = "sqlserver.local".to_string();
        config.username = "sa".to_string();
        config.password = Some("secret".to_string());
        config
    }

    #[test]
    fn test_driver_type() {
        let driver = MssqlDriver::new();
        assert_eq!(driver.database_type(), DatabaseType::Mssql);
        assert_eq!(driver.driver_name(), "Microsoft SQL Server");
    }

    #[test]
    fn test_tiberius_config_uses_default_port() {
        let config = MssqlDriver::to_tiberius_config(&sample_config()).unwrap();
        assert_eq!(config.get_addr(), "sqlserver.local:1433");
    }

    #[test]
    fn test_tiberius_config_requires_username() {
        let mut config = sample_config();
        config.username = String::new();
        assert!(matches!(
            MssqlDriver::to_tiberius_config(&config),
            Err(DatabaseError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_release_without_client_is_noop() {
        let mut session = MssqlSession {
            id: "mssql-test".to_string(),
            client: None,
        };
        assert!(session.release().await.is_ok());
        assert!(session.query("SELECT 1").await.is_err());
    }
}
