// PostgreSQL Driver
// Implements DatabaseDriver for PostgreSQL-wire engines using tokio-postgres

use crate::db::traits::{
    CellValue, ConnectionConfig, DatabaseDriver, DatabaseError, DatabaseType, DriverSession,
    RawResult,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};

/// How long `release` waits for the connection task to wind down
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// One dedicated PostgreSQL connection
pub struct PostgresSession {
    id: String,
    client: Option<Client>,
    connection_task: Option<JoinHandle<()>>,
}

#[async_trait::async_trait]
impl DriverSession for PostgresSession {
    fn session_id(&self) -> &str {
        &self.id
    }

    async fn query(&mut self, sql: &str) -> Result<RawResult, DatabaseError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| DatabaseError::ConnectionFailed("session released".to_string()))?;

        // Simple protocol: values arrive as text and the normalizer coerces them,
        // which sidesteps NUMERIC decoding for aggregates.
        let messages = client
            .simple_query(sql)
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        let mut result = RawResult::default();
        for message in messages {
            match message {
                SimpleQueryMessage::RowDescription(columns) => {
                    result.columns = columns.iter().map(|c| c.name().to_string()).collect();
                }
                SimpleQueryMessage::Row(row) => {
                    if result.columns.is_empty() {
                        result.columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                    }
                    let cells = (0..row.len())
                        .map(|idx| match row.get(idx) {
                            Some(text) => CellValue::Text(text.to_string()),
                            None => CellValue::Null,
                        })
                        .collect();
                    result.rows.push(cells);
                }
                // First result set only
                SimpleQueryMessage::CommandComplete(_) => break,
                _ => {}
            }
        }

        Ok(result)
    }

    async fn release(&mut self) -> Result<(), DatabaseError> {
        // Dropping the client closes the request channel; the connection task
        // then sends Terminate and finishes.
        drop(self.client.take());

        let Some(mut task) = self.connection_task.take() else {
            return Ok(());
        };
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DatabaseError::ConnectionFailed(format!(
                "connection task failed: {}",
                e
            ))),
            Err(_) => {
                task.abort();
                Err(DatabaseError::Timeout(SHUTDOWN_GRACE))
            }
        }
    }
}

impl Drop for PostgresSession {
    fn drop(&mut self) {
        drop(self.client.take());
        if let Some(task) = self.connection_task.take() {
            task.abort();
        }
    }
}

/// PostgreSQL driver implementation
pub struct PostgresDriver;

impl PostgresDriver {
    /// Create a new PostgreSQL driver
    pub fn new() -> Self {
        Self
    }

    /// Build the tokio-postgres configuration from the connection config
    fn build_config(config: &ConnectionConfig) -> Result<tokio_postgres::Config, DatabaseError> {
        if config.host.is_empty() {
            return Err(DatabaseError::InvalidConfig("Host is required".to_string()));
        }
        if config.database.is_empty() {
            return Err(DatabaseError::InvalidConfig("Database name is required".to_string()));
        }

        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.get_port())
            .user(&config.username)
            .dbname(&config.database)
            .connect_timeout(config.connect_timeout)
            .application_name(env!("CARGO_PKG_NAME"));
        if let Some(password) = &config.password {
            pg.password(password);
        }
        Ok(pg)
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for PostgresDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgresql
    }

    async fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn DriverSession>, DatabaseError> {
        let pg = Self::build_config(config)?;

        let (client, connection) = pg
            .connect(NoTls)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(format!("PostgreSQL connection failed: {}", e)))?;

        let connection_task = tokio::spawn(async move {
            // Errors here surface to the client as closed-connection query errors
            let _ = connection.await;
        });

        Ok(Box::new(PostgresSession {
            id: format!("postgres-{}", uuid::Uuid::new_v4()),
            client: Some(client),
            connection_task: Some(connection_task),
        }))
    }
}
